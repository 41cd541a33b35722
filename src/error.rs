use std::fmt;

/// Unified error kind for pool operations.
///
/// Errors are reported, never thrown: every fallible operation hands the kind
/// to the configured [`ErrorSink`] exactly once and then returns a failure
/// value (`false`, `None`, or `Err`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Pool handle is not usable
    InvalidPool,

    /// Object is not from this pool, is already free, or failed validation
    InvalidObject,

    /// Every slot is busy and no parking callback was supplied
    Exhausted,

    /// Memory allocation or object construction failed
    AllocFailed,

    /// Size argument out of the accepted range
    InvalidSize,

    /// Shrink asked for more slots than are currently free
    InsufficientFree,

    /// Backpressure queue is full and could not expand
    QueueFull,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::InvalidPool => write!(f, "invalid pool"),
            PoolError::InvalidObject => write!(f, "invalid object"),
            PoolError::Exhausted => write!(f, "pool exhausted"),
            PoolError::AllocFailed => write!(f, "allocation failed"),
            PoolError::InvalidSize => write!(f, "invalid size"),
            PoolError::InsufficientFree => write!(f, "insufficient free objects"),
            PoolError::QueueFull => write!(f, "backpressure queue full"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Destination for error reports.
///
/// The sink receives the kind and a short human-readable message, once per
/// distinct failure. Implementations must not call back into the pool that
/// is reporting.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: PoolError, message: &str);
}

/// Default sink: errors go to the process standard error stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl ErrorSink for StderrSink {
    fn report(&self, error: PoolError, message: &str) {
        eprintln!("slotpool: {}: {}", error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(PoolError::Exhausted.to_string(), "pool exhausted");
        assert_eq!(
            PoolError::InsufficientFree.to_string(),
            "insufficient free objects"
        );
    }

    #[test]
    fn test_error_kinds_are_comparable() {
        assert_eq!(PoolError::QueueFull, PoolError::QueueFull);
        assert_ne!(PoolError::QueueFull, PoolError::AllocFailed);
    }
}
