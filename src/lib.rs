//! Sharded, thread-safe reusable-object pool.
//!
//! Callers lease pre-constructed objects and return them when done,
//! amortising allocation and initialisation on hot paths. Contention is
//! spread across mutex-protected shards; demand that arrives while every
//! slot is busy can park a callback that a later return services in FIFO
//! order, handing over the freed object directly.

pub mod allocator;
pub mod config;
pub mod error;
pub mod pool;
mod rng;
pub mod stats;

pub use allocator::{FnAllocator, PoolAllocator, ZeroedBufferAllocator, DEFAULT_PAYLOAD_SIZE};
pub use config::{PoolConfig, DEFAULT_POOL_SIZE, DEFAULT_QUEUE_CAPACITY, DEFAULT_SHARD_COUNT};
pub use error::{ErrorSink, PoolError, StderrSink};
pub use pool::{LeaseOutcome, Pool};
pub use stats::PoolStats;
