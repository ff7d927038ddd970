// SPDX-License-Identifier: MIT OR Apache-2.0
//! Monotonic sequence counters and RFC-3339-nanos timestamps.
//!
//! spec.md §3 requires `ts` to be RFC-3339 nanos UTC and monotonically
//! nondecreasing within a single emitter, and `seq` on `tool_call_start` to
//! form `1,2,3,…` with no gaps or repeats.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Produces RFC-3339 nanosecond timestamps that never move backwards within
/// a process, even if the system clock is adjusted underneath it.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_nanos: AtomicI64,
}

impl MonotonicClock {
    /// Create a new clock with no prior reading.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_nanos: AtomicI64::new(i64::MIN),
        }
    }

    /// Return the current RFC-3339 nanos timestamp, clamped so it is never
    /// earlier than the previously returned value.
    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let stamped = self
            .last_nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(wall.max(prev + 1).max(prev))
            })
            .unwrap_or(wall)
            .max(wall);
        DateTime::<Utc>::from_timestamp_nanos(stamped.max(wall))
    }
}

/// A strictly increasing `seq` generator, one per run, starting at 1 per
/// spec.md §3 (`CallInfo.seq` — "monotonic from 1 per run").
#[derive(Debug, Default)]
pub struct SeqCounter {
    next: AtomicU64,
}

impl SeqCounter {
    /// Create a counter that will yield 1 on its first call.
    #[must_use]
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    /// Return the next sequence number; never repeats, never skips.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_counter_starts_at_one_and_is_gapless() {
        let c = SeqCounter::new();
        let values: Vec<u64> = (0..100).map(|_| c.next()).collect();
        assert_eq!(values, (1..=100).collect::<Vec<_>>());
    }

    #[test]
    fn monotonic_clock_never_decreases() {
        let clock = MonotonicClock::new();
        let mut last = clock.now();
        for _ in 0..1000 {
            let now = clock.now();
            assert!(now >= last, "clock went backwards: {now:?} < {last:?}");
            last = now;
        }
    }
}
