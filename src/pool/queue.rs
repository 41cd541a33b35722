//! Bounded FIFO of parked lease requests.
//!
//! Requests that find every shard busy can leave a callback here instead of
//! failing; the return path drains the queue oldest-first. Parked requesters
//! are not blocked threads, just callbacks waiting for a future return. The
//! queue owns its own mutex at the pool level, always acquired after a shard
//! lock and never before one.

use std::collections::VecDeque;
use std::ptr::NonNull;

use crate::error::PoolError;

/// Callback invoked with the freed payload, while the owning shard's lock is
/// held. Must be short, must not block, and must not re-enter the pool.
pub(crate) type ParkedCallback<T> = Box<dyn FnOnce(NonNull<T>) + Send>;

/// FIFO of parked requests with an explicit, growable capacity bound.
pub(crate) struct WaitQueue<T> {
    entries: VecDeque<ParkedCallback<T>>,
    capacity: usize,
}

impl<T> WaitQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a parked request. Callers check [`Self::is_full`] first.
    pub(crate) fn push(&mut self, callback: ParkedCallback<T>) {
        debug_assert!(!self.is_full());
        self.entries.push_back(callback);
    }

    /// Oldest parked request, if any.
    pub(crate) fn pop(&mut self) -> Option<ParkedCallback<T>> {
        self.entries.pop_front()
    }

    /// Extend capacity by `additional` entries. Fallible so a full queue can
    /// refuse to park rather than abort on a failed reallocation.
    pub(crate) fn grow(&mut self, additional: usize) -> Result<(), PoolError> {
        self.entries
            .try_reserve(additional)
            .map_err(|_| PoolError::AllocFailed)?;
        self.capacity += additional;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn noop() -> ParkedCallback<u8> {
        Box::new(|_| {})
    }

    #[test]
    fn test_fifo_order() {
        let order = Arc::new(AtomicUsize::new(0));
        let mut queue: WaitQueue<u8> = WaitQueue::new(4);

        for expected in 0..3usize {
            let order = order.clone();
            queue.push(Box::new(move |_| {
                assert_eq!(order.fetch_add(1, Ordering::SeqCst), expected);
            }));
        }

        while let Some(callback) = queue.pop() {
            callback(NonNull::dangling());
        }
        assert_eq!(order.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_capacity_bound() {
        let mut queue: WaitQueue<u8> = WaitQueue::new(2);
        assert!(!queue.is_full());
        queue.push(noop());
        queue.push(noop());
        assert!(queue.is_full());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_grow_extends_capacity() {
        let mut queue: WaitQueue<u8> = WaitQueue::new(1);
        queue.push(noop());
        assert!(queue.is_full());

        queue.grow(1).unwrap();
        assert_eq!(queue.capacity(), 2);
        assert!(!queue.is_full());
        queue.push(noop());
        assert!(queue.is_full());
    }

    #[test]
    fn test_pop_empty() {
        let mut queue: WaitQueue<u8> = WaitQueue::new(1);
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}
