//! Object lifecycle hooks.
//!
//! A pool delegates every payload-touching decision to its allocator: how to
//! build an object, how to wipe it between owners, and whether it is still
//! trustworthy. All hooks except [`PoolAllocator::allocate`] default to
//! no-ops so simple factories stay one method long.

use bytes::BytesMut;

/// Payload size used by the default buffer pools when none is given.
pub const DEFAULT_PAYLOAD_SIZE: usize = 64;

/// Lifecycle hooks for pooled objects.
///
/// Hooks run under the owning shard's lock, so they must be short and must
/// not call back into the pool.
pub trait PoolAllocator<T>: Send + Sync {
    /// Construct one payload. `None` signals allocation failure.
    fn allocate(&self) -> Option<T>;

    /// Wipe an object back to its handed-out state. Runs on every lease
    /// before hand-out and on every accepted return.
    fn reset(&self, _obj: &mut T) {}

    /// Whether the object is safe to hand out. Checked on lease, on return,
    /// and before a backpressure hand-off; a failing slot is skipped.
    fn validate(&self, _obj: &T) -> bool {
        true
    }

    /// Runs once per slot, right after construction.
    fn on_construct(&self, _obj: &mut T) {}

    /// Runs once per slot, just before it is destroyed.
    fn on_destruct(&self, _obj: &mut T) {}

    /// Runs after `reset` on every successful lease, including hand-offs.
    fn on_reuse(&self, _obj: &mut T) {}
}

/// Adapter turning a factory closure into an allocator with default hooks.
///
/// ```
/// use slotpool::{FnAllocator, Pool, PoolConfig};
///
/// let pool = Pool::new(
///     &PoolConfig::new(8, 2),
///     FnAllocator::new(|| Vec::<u8>::with_capacity(512)),
/// )
/// .unwrap();
/// assert_eq!(pool.capacity(), 8);
/// ```
pub struct FnAllocator<F>(F);

impl<F> FnAllocator<F> {
    pub fn new(factory: F) -> Self {
        Self(factory)
    }
}

impl<T, F> PoolAllocator<T> for FnAllocator<F>
where
    F: Fn() -> T + Send + Sync,
{
    fn allocate(&self) -> Option<T> {
        Some((self.0)())
    }
}

/// Allocator behind the default pools: fixed-size `BytesMut` payloads,
/// zero-filled at construction and re-zeroed on every lease and return.
pub struct ZeroedBufferAllocator {
    payload_size: usize,
}

impl ZeroedBufferAllocator {
    /// A size of zero maps to [`DEFAULT_PAYLOAD_SIZE`].
    pub fn new(payload_size: usize) -> Self {
        Self {
            payload_size: if payload_size == 0 {
                DEFAULT_PAYLOAD_SIZE
            } else {
                payload_size
            },
        }
    }

    #[inline]
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }
}

impl PoolAllocator<BytesMut> for ZeroedBufferAllocator {
    fn allocate(&self) -> Option<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.payload_size);
        buf.resize(self.payload_size, 0);
        Some(buf)
    }

    fn reset(&self, buf: &mut BytesMut) {
        buf.clear();
        buf.resize(self.payload_size, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_buffer_allocate() {
        let allocator = ZeroedBufferAllocator::new(128);
        let buf = allocator.allocate().unwrap();
        assert_eq!(buf.len(), 128);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_size_maps_to_default() {
        let allocator = ZeroedBufferAllocator::new(0);
        assert_eq!(allocator.payload_size(), DEFAULT_PAYLOAD_SIZE);
        assert_eq!(allocator.allocate().unwrap().len(), DEFAULT_PAYLOAD_SIZE);
    }

    #[test]
    fn test_reset_rezeroes() {
        let allocator = ZeroedBufferAllocator::new(32);
        let mut buf = allocator.allocate().unwrap();
        buf.fill(0xAB);
        allocator.reset(&mut buf);
        assert_eq!(buf.len(), 32);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fn_allocator_uses_factory() {
        let allocator = FnAllocator::new(|| String::from("fresh"));
        assert_eq!(allocator.allocate().as_deref(), Some("fresh"));
        // Hooks default to no-ops and always-valid.
        let mut s = String::from("x");
        allocator.reset(&mut s);
        assert!(allocator.validate(&s));
        assert_eq!(s, "x");
    }
}
