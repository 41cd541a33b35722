//! The concurrent pool core.
//!
//! A [`Pool`] owns a fixed set of shards, each a lock-protected slot array,
//! plus a bounded backpressure queue for demand that arrives while every
//! slot is busy. Leases enter at a PRNG-chosen shard and probe linearly;
//! returns locate their slot in O(1) through the back-pointer stored ahead
//! of every payload.
//!
//! Lock discipline: a shard lock and the queue lock are the only locks. The
//! return-plus-hand-off path is the one place both are held, shard first,
//! queue second. No path takes two shard locks, so deadlock is impossible.

mod queue;
mod record;
mod shard;

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::allocator::{PoolAllocator, ZeroedBufferAllocator, DEFAULT_PAYLOAD_SIZE};
use crate::config::PoolConfig;
use crate::error::{ErrorSink, PoolError, StderrSink};
use crate::rng;
use crate::stats::PoolStats;
use self::queue::{ParkedCallback, WaitQueue};
use self::record::SlotRecord;
use self::shard::Shard;

/// Relaxed ordering for observability scalars (eventual visibility is fine;
/// exactness comes from updating them while the owning shard lock is held).
const RELAXED: Ordering = Ordering::Relaxed;

/// Result of a lease that may park.
#[derive(Debug)]
pub enum LeaseOutcome<T> {
    /// A payload was handed out immediately.
    Ready(NonNull<T>),

    /// Every slot was busy; the callback is parked FIFO and will receive
    /// the next compatible freed object.
    Parked,

    /// The request failed; the error sink has the reason.
    Failed,
}

/// Sharded, thread-safe pool of reusable objects.
///
/// Callers lease payload pointers and return them when done. Exhausted
/// leases can park a callback that a later return services in arrival
/// order, handing over the freed object without it ever going back on the
/// free list.
///
/// Parked callbacks run while a shard lock is held: they must be short,
/// must not block, and must not re-enter the pool.
pub struct Pool<T> {
    shards: Box<[Shard<T>]>,
    queue: Mutex<WaitQueue<T>>,
    allocator: Box<dyn PoolAllocator<T>>,
    sink: Box<dyn ErrorSink>,

    // Pool-global scalars. Mutated while holding the relevant shard or queue
    // lock, read lock-free by observers.
    busy_global: AtomicUsize,
    peak_global: AtomicUsize,
    total_capacity: AtomicUsize,
    total_allocated: AtomicU64,
    grow_count: AtomicU64,
    shrink_count: AtomicU64,
    queue_peak: AtomicUsize,
    queue_grows: AtomicU64,
}

// SAFETY: slot records are heap allocations reached only under their shard's
// lock or through the payload pointer a lease holder exclusively owns; the
// raw pointers inside `Shard` carry no thread affinity. Payloads move
// between threads, hence the `T: Send` bound.
unsafe impl<T: Send> Send for Pool<T> {}
unsafe impl<T: Send> Sync for Pool<T> {}

impl Pool<BytesMut> {
    /// Default pool: 16 zero-filled 64-byte buffers across 4 shards.
    pub fn with_defaults() -> Result<Self, PoolError> {
        Self::with_payload_size(DEFAULT_PAYLOAD_SIZE)
    }

    /// Default pool with a caller-chosen payload size (zero maps to 64).
    pub fn with_payload_size(payload_size: usize) -> Result<Self, PoolError> {
        Pool::new(
            &PoolConfig::default(),
            ZeroedBufferAllocator::new(payload_size),
        )
    }
}

impl<T: Send> Pool<T> {
    /// Build a pool with the default stderr error sink.
    pub fn new<A>(config: &PoolConfig, allocator: A) -> Result<Self, PoolError>
    where
        A: PoolAllocator<T> + 'static,
    {
        Self::with_error_sink(config, allocator, StderrSink)
    }

    /// Build a pool that reports failures to `sink`.
    ///
    /// Objects are partitioned across shards by balanced division and every
    /// one is constructed up front, firing `on_construct` under the owning
    /// shard's lock.
    pub fn with_error_sink<A, S>(
        config: &PoolConfig,
        allocator: A,
        sink: S,
    ) -> Result<Self, PoolError>
    where
        A: PoolAllocator<T> + 'static,
        S: ErrorSink + 'static,
    {
        let sink: Box<dyn ErrorSink> = Box::new(sink);
        if let Err(error) = config.validate() {
            sink.report(
                error,
                &format!(
                    "pool_size={} shard_count={} out of range",
                    config.pool_size, config.shard_count
                ),
            );
            return Err(error);
        }

        let shards: Box<[Shard<T>]> = (0..config.shard_count)
            .map(|_| Shard::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let pool = Self {
            shards,
            queue: Mutex::new(WaitQueue::new(config.queue_capacity)),
            allocator: Box::new(allocator),
            sink,
            busy_global: AtomicUsize::new(0),
            peak_global: AtomicUsize::new(0),
            total_capacity: AtomicUsize::new(0),
            total_allocated: AtomicU64::new(0),
            grow_count: AtomicU64::new(0),
            shrink_count: AtomicU64::new(0),
            queue_peak: AtomicUsize::new(0),
            queue_grows: AtomicU64::new(0),
        };

        let base = config.pool_size / config.shard_count;
        let remainder = config.pool_size % config.shard_count;
        for (id, shard) in pool.shards.iter().enumerate() {
            let share = base + usize::from(id < remainder);
            if share == 0 {
                continue;
            }
            let mut state = shard.lock();
            let result = state.grow_slots(id as u16, share, pool.allocator.as_ref());
            let built = state.slot_count();
            drop(state);
            pool.total_capacity.fetch_add(built, RELAXED);
            if result.is_err() {
                // Dropping the partially built pool destroys what exists.
                pool.sink.report(
                    PoolError::AllocFailed,
                    &format!("object construction failed in shard {}", id),
                );
                return Err(PoolError::AllocFailed);
            }
        }
        pool.total_allocated
            .store(config.pool_size as u64, RELAXED);

        debug!(
            "pool created: {} objects, {} shards, queue capacity {}",
            config.pool_size, config.shard_count, config.queue_capacity
        );
        Ok(pool)
    }

    /// Lease an object.
    ///
    /// Returns the payload pointer, or `None` (reporting `Exhausted`) when
    /// every slot in every shard is busy. The caller owns the payload until
    /// it passes the pointer back through [`Pool::release`].
    pub fn lease(&self) -> Option<NonNull<T>> {
        match self.try_lease() {
            Some(payload) => Some(payload),
            None => {
                self.sink
                    .report(PoolError::Exhausted, "no free object in any shard");
                None
            }
        }
    }

    /// Lease an object, parking `callback` if the pool is exhausted.
    ///
    /// A parked callback fires exactly once, with the next freed object, in
    /// FIFO order with other parked requests; it runs on the returning
    /// thread while that shard's lock is held. If the queue is full its
    /// capacity is doubled once; if that also fails the request is refused
    /// with `QueueFull`.
    pub fn lease_or_park<F>(&self, callback: F) -> LeaseOutcome<T>
    where
        F: FnOnce(NonNull<T>) + Send + 'static,
    {
        if let Some(payload) = self.try_lease() {
            return LeaseOutcome::Ready(payload);
        }

        let mut queue = self.queue.lock();
        if queue.is_full() {
            let doubled = queue.capacity().max(1);
            if queue.grow(doubled).is_err() {
                drop(queue);
                self.sink.report(
                    PoolError::QueueFull,
                    "backpressure queue is full and could not expand",
                );
                return LeaseOutcome::Failed;
            }
            self.queue_grows.fetch_add(1, RELAXED);
            trace!("backpressure queue doubled to {}", queue.capacity());
        }
        queue.push(Box::new(callback));
        let parked = queue.len();
        drop(queue);

        self.queue_peak.fetch_max(parked, RELAXED);
        trace!("lease parked, {} waiting", parked);
        LeaseOutcome::Parked
    }

    /// Probe shards for a free slot, starting at a PRNG-chosen entry point
    /// and wrapping once around. Work-conserving: a free slot is found if
    /// one exists, at the cost of one lock acquisition per probed shard.
    fn try_lease(&self) -> Option<NonNull<T>> {
        let shard_count = self.shards.len();
        let entry = rng::next_u32() as usize % shard_count;

        for offset in 0..shard_count {
            let id = (entry + offset) % shard_count;
            let mut state = self.shards[id].lock();
            if let Some(payload) =
                state.lease_slot(self.allocator.as_ref(), self.sink.as_ref())
            {
                // Still under the shard lock, so a stats reader can never
                // see more busy slots than the recorded peak.
                let busy = self.busy_global.fetch_add(1, RELAXED) + 1;
                self.peak_global.fetch_max(busy, RELAXED);
                return Some(payload);
            }
        }
        None
    }

    /// Return a leased payload.
    ///
    /// The slot is located in O(1) through the back-pointer ahead of the
    /// payload, then verified against the shard before anything is trusted:
    /// foreign pointers, double returns, and payloads that fail validation
    /// are refused with `InvalidObject` and no state change. On acceptance
    /// the object is reset and either freed or handed directly to the
    /// oldest parked requester, whose callback runs before this returns.
    ///
    /// # Safety
    ///
    /// `payload` must have come from a lease or parked callback of some
    /// `Pool<T>`; the caller must own it exclusively (no use after this
    /// call); and its slot must not have been destroyed by a shrink or by
    /// dropping its pool.
    pub unsafe fn release(&self, payload: NonNull<T>) -> bool {
        // SAFETY: per the contract, a record header precedes the payload.
        let record = unsafe { SlotRecord::from_payload(payload) };
        let addr = unsafe { SlotRecord::addr(record) };

        let shard_id = addr.shard() as usize;
        if shard_id >= self.shards.len() {
            self.sink.report(
                PoolError::InvalidObject,
                "back-pointer names a shard this pool does not have",
            );
            return false;
        }

        let mut state = self.shards[shard_id].lock();
        if !state.verify_member(record, addr.index()) {
            drop(state);
            self.sink
                .report(PoolError::InvalidObject, "object is not from this pool");
            return false;
        }

        // SAFETY: verified to be a live record of the locked shard.
        unsafe {
            if !SlotRecord::is_busy(record) {
                drop(state);
                self.sink
                    .report(PoolError::InvalidObject, "object is already free");
                return false;
            }
            if !self.allocator.validate(SlotRecord::payload_mut(record)) {
                drop(state);
                self.sink.report(
                    PoolError::InvalidObject,
                    "payload failed validation on return",
                );
                return false;
            }
            self.allocator.reset(SlotRecord::payload_mut(record));
        }

        // Drain the oldest parked request, if the object still qualifies.
        // Queue lock nests inside the shard lock; this is the only place
        // both are held.
        let mut waiter: Option<ParkedCallback<T>> = None;
        {
            let mut queue = self.queue.lock();
            if !queue.is_empty() {
                // SAFETY: record is live and locked.
                if unsafe { self.allocator.validate(SlotRecord::payload_mut(record)) } {
                    waiter = queue.pop();
                } else {
                    self.sink.report(
                        PoolError::InvalidObject,
                        "payload failed validation at hand-off, request stays parked",
                    );
                }
            }
        }

        match waiter {
            Some(callback) => {
                // The slot stays busy: same object, new owner. Counters move
                // only after the transition settles, so leases - returns
                // equals the busy count at every observable point.
                // SAFETY: record is live and locked.
                unsafe { self.allocator.on_reuse(SlotRecord::payload_mut(record)) };
                state.record_handoff();
                trace!("returned object handed to parked requester");
                // Runs under the shard lock; the documented contract forbids
                // the callback from re-entering the pool.
                callback(payload);
                drop(state);
            }
            None => {
                // SAFETY: record is live and locked.
                unsafe { SlotRecord::set_busy(record, false) };
                state.record_return();
                self.busy_global.fetch_sub(1, RELAXED);
                drop(state);
            }
        }
        true
    }

    /// Add `additional` objects, spread across shards by balanced division.
    ///
    /// Shards grown before a failure keep their new size; callers observe
    /// the partial capacity and decide whether to retry. `total_allocated`
    /// and the grow counter advance only when every shard grew.
    pub fn grow(&self, additional: usize) -> bool {
        if additional == 0 {
            self.sink
                .report(PoolError::InvalidSize, "grow of zero objects");
            return false;
        }

        let shard_count = self.shards.len();
        let base = additional / shard_count;
        let remainder = additional % shard_count;

        for (id, shard) in self.shards.iter().enumerate() {
            let share = base + usize::from(id < remainder);
            if share == 0 {
                continue;
            }
            let mut state = shard.lock();
            let before = state.slot_count();
            let result = state.grow_slots(id as u16, share, self.allocator.as_ref());
            let added = state.slot_count() - before;
            drop(state);

            if added > 0 {
                self.total_capacity.fetch_add(added, RELAXED);
            }
            if let Err(error) = result {
                self.sink
                    .report(error, &format!("grow failed in shard {}", id));
                return false;
            }
        }

        self.total_allocated.fetch_add(additional as u64, RELAXED);
        self.grow_count.fetch_add(1, RELAXED);
        debug!("pool grown by {} objects", additional);
        true
    }

    /// Remove `reduce` free objects, spread across shards by balanced
    /// division.
    ///
    /// Busy slots are never destroyed. Each shard is all-or-nothing; when a
    /// shard lacks enough contiguous free tail slots the operation stops
    /// with `InsufficientFree`, leaving earlier shards shrunk (the
    /// documented asymmetry with grow, whose failures also stop early).
    pub fn shrink(&self, reduce: usize) -> bool {
        if reduce == 0 {
            self.sink
                .report(PoolError::InvalidSize, "shrink of zero objects");
            return false;
        }
        if reduce > self.capacity() {
            self.sink
                .report(PoolError::InvalidSize, "shrink exceeds capacity");
            return false;
        }

        let shard_count = self.shards.len();
        let base = reduce / shard_count;
        let remainder = reduce % shard_count;

        for (id, shard) in self.shards.iter().enumerate() {
            let share = base + usize::from(id < remainder);
            if share == 0 {
                continue;
            }
            let mut state = shard.lock();
            let before = state.slot_count();
            let result = state.shrink_slots(share, self.allocator.as_ref());
            let removed = before - state.slot_count();
            drop(state);

            if removed > 0 {
                self.total_capacity.fetch_sub(removed, RELAXED);
            }
            if let Err(error) = result {
                self.sink.report(
                    error,
                    &format!("shrink needs {} free tail slots in shard {}", share, id),
                );
                return false;
            }
        }

        self.total_allocated.fetch_sub(reduce as u64, RELAXED);
        self.shrink_count.fetch_add(1, RELAXED);
        debug!("pool shrunk by {} objects", reduce);
        true
    }

    /// Extend the backpressure queue capacity by `additional` entries.
    pub fn grow_queue(&self, additional: usize) -> bool {
        if additional == 0 {
            self.sink
                .report(PoolError::InvalidSize, "queue grow of zero entries");
            return false;
        }

        let mut queue = self.queue.lock();
        match queue.grow(additional) {
            Ok(()) => {
                let capacity = queue.capacity();
                drop(queue);
                self.queue_grows.fetch_add(1, RELAXED);
                debug!("backpressure queue grown to {}", capacity);
                true
            }
            Err(error) => {
                drop(queue);
                self.sink
                    .report(error, "queue reallocation failed");
                false
            }
        }
    }

    /// Objects currently leased out, summed across shards.
    #[inline]
    pub fn used_count(&self) -> usize {
        self.busy_global.load(RELAXED)
    }

    /// Total slots across all shards.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.total_capacity.load(RELAXED)
    }

    /// Aggregate the per-shard counters and pool-level scalars.
    ///
    /// Each shard is locked briefly in turn; the queue lock is not taken.
    /// The result is eventually consistent across shards, not a global
    /// instant.
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats::default();
        for shard in self.shards.iter() {
            let state = shard.read();
            stats.leases += state.leases;
            stats.returns += state.returns;
            stats.contention_attempts += state.lock_attempts;
            stats.contention_time_ns += state.lock_wait_ns;
        }
        stats.peak_busy = self.peak_global.load(RELAXED);
        stats.total_allocated = self.total_allocated.load(RELAXED);
        stats.grow_count = self.grow_count.load(RELAXED);
        stats.shrink_count = self.shrink_count.load(RELAXED);
        stats.queue_peak_size = self.queue_peak.load(RELAXED);
        stats.queue_grow_count = self.queue_grows.load(RELAXED);
        stats
    }

    /// Lifetime lease count per shard, for load-balance inspection.
    pub fn shard_lease_counts(&self) -> Vec<u64> {
        self.shards.iter().map(|shard| shard.read().leases).collect()
    }
}

// Test-only introspection helpers.
#[cfg(test)]
impl<T: Send> Pool<T> {
    fn busy_per_shard(&self) -> Vec<usize> {
        self.shards
            .iter()
            .map(|shard| shard.read().busy_count())
            .collect()
    }

    /// Shard id recorded in a leased payload's back-pointer.
    ///
    /// # Safety
    ///
    /// `payload` must be a live lease from this pool.
    unsafe fn shard_of(&self, payload: NonNull<T>) -> usize {
        unsafe { SlotRecord::addr(SlotRecord::from_payload(payload)).shard() as usize }
    }

    /// Slot index recorded in a leased payload's back-pointer.
    ///
    /// # Safety
    ///
    /// `payload` must be a live lease from this pool.
    unsafe fn slot_index_of(&self, payload: NonNull<T>) -> u64 {
        unsafe { SlotRecord::addr(SlotRecord::from_payload(payload)).index() }
    }
}

impl<T> Drop for Pool<T> {
    /// Destroy every slot, firing `on_destruct` once per live record.
    /// Parked requests still queued are dropped without being invoked.
    fn drop(&mut self) {
        for shard in self.shards.iter_mut() {
            shard.get_mut().destroy_all(self.allocator.as_ref());
        }
        debug!("pool destroyed");
    }
}
