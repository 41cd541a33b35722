use std::fmt;

/// Point-in-time summary of pool activity.
///
/// Shard counters are summed while briefly holding each shard lock in turn;
/// pool- and queue-level scalars are copied from relaxed atomics. Snapshots
/// are eventually consistent across shards: no single global instant is
/// promised, only that each counter is monotonic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Lifetime successful leases across all shards
    pub leases: u64,

    /// Lifetime accepted returns across all shards
    pub returns: u64,

    /// Peak concurrent busy objects ever observed pool-wide
    pub peak_busy: usize,

    /// Shard lock acquisitions on the lease/return/resize paths
    pub contention_attempts: u64,

    /// Nanoseconds spent blocked waiting for shard locks
    pub contention_time_ns: u64,

    /// Objects currently allocated (creation plus grows, minus shrinks)
    pub total_allocated: u64,

    /// Completed grow operations
    pub grow_count: u64,

    /// Completed shrink operations
    pub shrink_count: u64,

    /// Largest number of parked requests ever queued at once
    pub queue_peak_size: usize,

    /// Times the backpressure queue capacity was extended
    pub queue_grow_count: u64,
}

impl PoolStats {
    /// Leases not yet matched by a return at snapshot time.
    #[inline]
    pub fn in_flight(&self) -> u64 {
        self.leases.saturating_sub(self.returns)
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "leases={} returns={} peak_busy={} allocated={} grows={} shrinks={} queue_peak={}",
            self.leases,
            self.returns,
            self.peak_busy,
            self.total_allocated,
            self.grow_count,
            self.shrink_count,
            self.queue_peak_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight() {
        let stats = PoolStats {
            leases: 10,
            returns: 7,
            ..Default::default()
        };
        assert_eq!(stats.in_flight(), 3);
    }

    #[test]
    fn test_in_flight_saturates() {
        // Cross-shard snapshots may observe a return before its lease.
        let stats = PoolStats {
            leases: 3,
            returns: 4,
            ..Default::default()
        };
        assert_eq!(stats.in_flight(), 0);
    }

    #[test]
    fn test_display_mentions_core_counters() {
        let stats = PoolStats {
            leases: 2,
            returns: 1,
            peak_busy: 2,
            ..Default::default()
        };
        let rendered = stats.to_string();
        assert!(rendered.contains("leases=2"));
        assert!(rendered.contains("peak_busy=2"));
    }
}
