//! Contention-isolation shards.
//!
//! Each shard owns one mutex-protected slot array plus local counters. All
//! slot mutation goes through `&mut ShardState` under that lock; no code
//! path ever holds two shard locks at once.

use std::ptr::NonNull;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};

use crate::allocator::PoolAllocator;
use crate::error::{ErrorSink, PoolError};
use crate::pool::record::{SlotAddr, SlotRecord, MAX_SLOTS_PER_SHARD};

pub(crate) struct Shard<T> {
    state: Mutex<ShardState<T>>,
}

pub(crate) struct ShardState<T> {
    slots: Vec<NonNull<SlotRecord<T>>>,
    busy_count: usize,

    // Local counters, all protected by the shard lock.
    pub(super) leases: u64,
    pub(super) returns: u64,
    pub(super) peak_busy: usize,
    pub(super) lock_attempts: u64,
    pub(super) lock_wait_ns: u64,
}

impl<T> Shard<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ShardState {
                slots: Vec::new(),
                busy_count: 0,
                leases: 0,
                returns: 0,
                peak_busy: 0,
                lock_attempts: 0,
                lock_wait_ns: 0,
            }),
        }
    }

    /// Acquire the shard lock on an operating path, recording the attempt
    /// and any time spent blocked.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ShardState<T>> {
        let mut guard = match self.state.try_lock() {
            Some(guard) => guard,
            None => {
                let start = Instant::now();
                let mut guard = self.state.lock();
                guard.lock_wait_ns += start.elapsed().as_nanos() as u64;
                guard
            }
        };
        guard.lock_attempts += 1;
        guard
    }

    /// Acquire the shard lock for a read-only aggregate (stats, per-shard
    /// counts) without polluting the contention counters.
    pub(crate) fn read(&self) -> MutexGuard<'_, ShardState<T>> {
        self.state.lock()
    }

    /// Lock-free access for destruction, when `&mut self` proves exclusivity.
    pub(crate) fn get_mut(&mut self) -> &mut ShardState<T> {
        self.state.get_mut()
    }
}

impl<T> ShardState<T> {
    #[inline]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn busy_count(&self) -> usize {
        self.busy_count
    }

    /// Hand out the lowest-indexed free slot, or `None` when the shard has
    /// nothing to give.
    ///
    /// Slots whose payload fails validation are reported and skipped; the
    /// scan keeps going. On success the slot is busy, the local counters are
    /// current, and `reset` then `on_reuse` have fired.
    pub(crate) fn lease_slot(
        &mut self,
        allocator: &dyn PoolAllocator<T>,
        sink: &dyn ErrorSink,
    ) -> Option<NonNull<T>> {
        if self.busy_count >= self.slots.len() {
            return None;
        }

        for index in 0..self.slots.len() {
            let record = self.slots[index];
            // SAFETY: the record is owned by this shard and we hold its
            // lock; the slot is free, so no lease holder aliases the payload.
            unsafe {
                if SlotRecord::is_busy(record) {
                    continue;
                }
                if !allocator.validate(SlotRecord::payload_mut(record)) {
                    sink.report(
                        PoolError::InvalidObject,
                        "slot failed validation on lease, skipping",
                    );
                    continue;
                }

                SlotRecord::set_busy(record, true);
                self.busy_count += 1;
                self.leases += 1;
                if self.busy_count > self.peak_busy {
                    self.peak_busy = self.busy_count;
                }

                let payload = SlotRecord::payload_mut(record);
                allocator.reset(payload);
                allocator.on_reuse(payload);
            }
            return Some(SlotRecord::payload_ptr(record));
        }

        None
    }

    /// Whether `record` is this shard's slot at `index`. The return path
    /// must verify this before trusting a caller-supplied back-pointer.
    pub(crate) fn verify_member(&self, record: NonNull<SlotRecord<T>>, index: u64) -> bool {
        match self.slots.get(index as usize) {
            Some(slot) => *slot == record,
            None => false,
        }
    }

    /// Slot-level bookkeeping for an accepted return with no hand-off.
    pub(crate) fn record_return(&mut self) {
        self.busy_count -= 1;
        self.returns += 1;
    }

    /// Bookkeeping for a return handed straight to a parked requester: the
    /// slot never goes free, so only the lifetime counters move.
    pub(crate) fn record_handoff(&mut self) {
        self.returns += 1;
        self.leases += 1;
    }

    /// Construct `additional` slots at the tail.
    ///
    /// Slots constructed before a failure stay in place; the caller decides
    /// what the partial growth means pool-wide.
    pub(crate) fn grow_slots(
        &mut self,
        shard_id: u16,
        additional: usize,
        allocator: &dyn PoolAllocator<T>,
    ) -> Result<(), PoolError> {
        if self.slots.len() as u64 + additional as u64 > MAX_SLOTS_PER_SHARD {
            return Err(PoolError::InvalidSize);
        }
        if self.slots.try_reserve(additional).is_err() {
            return Err(PoolError::AllocFailed);
        }

        for _ in 0..additional {
            let Some(mut payload) = allocator.allocate() else {
                return Err(PoolError::AllocFailed);
            };
            allocator.on_construct(&mut payload);
            let addr = SlotAddr::new(shard_id, self.slots.len() as u64);
            self.slots.push(SlotRecord::create(addr, payload));
        }
        Ok(())
    }

    /// Destroy `reduce` slots from the high end.
    ///
    /// All-or-nothing per shard: if the free tail is shorter than `reduce`,
    /// nothing is touched. Busy slots are never destroyed, which is why the
    /// lease scan prefers low indices: busy slots cluster away from the tail.
    pub(crate) fn shrink_slots(
        &mut self,
        reduce: usize,
        allocator: &dyn PoolAllocator<T>,
    ) -> Result<(), PoolError> {
        if self.free_tail_len() < reduce {
            return Err(PoolError::InsufficientFree);
        }

        for _ in 0..reduce {
            let Some(record) = self.slots.pop() else {
                break;
            };
            // SAFETY: the tail slot is free (checked above) and we hold the
            // shard lock, so nothing else can reach this record.
            unsafe {
                allocator.on_destruct(SlotRecord::payload_mut(record));
                SlotRecord::destroy(record);
            }
        }

        // A shard can no longer have been that busy at its new size.
        if self.peak_busy > self.slots.len() {
            self.peak_busy = self.slots.len();
        }
        Ok(())
    }

    /// Number of contiguous free slots at the high end of the array.
    fn free_tail_len(&self) -> usize {
        self.slots
            .iter()
            .rev()
            // SAFETY: records are live and the caller holds the shard lock.
            .take_while(|record| unsafe { !SlotRecord::is_busy(**record) })
            .count()
    }

    /// Destroy every slot, busy or not. Only called while tearing the pool
    /// down, when no lease can still be outstanding per the release contract.
    pub(crate) fn destroy_all(&mut self, allocator: &dyn PoolAllocator<T>) {
        for record in self.slots.drain(..) {
            // SAFETY: exclusive access during teardown.
            unsafe {
                allocator.on_destruct(SlotRecord::payload_mut(record));
                SlotRecord::destroy(record);
            }
        }
        self.busy_count = 0;
    }
}
