//! Aggregate per-run counters backing `run_end.summary` (spec.md §8
//! invariant: `calls_total == calls_allowed + calls_blocked + ...`).

use std::sync::atomic::{AtomicU64, Ordering};

use sublum_events::{DecisionAction, RunSummary};

/// Lock-free counters updated from the agent-reader task as decisions are
/// reached, snapshotted once into a [`RunSummary`] at shutdown.
#[derive(Debug, Default)]
pub struct RunCounters {
    total: AtomicU64,
    allowed: AtomicU64,
    blocked: AtomicU64,
    throttled: AtomicU64,
    rejected: AtomicU64,
    terminated: AtomicU64,
}

impl RunCounters {
    /// Record one call's terminal decision action.
    pub fn record(&self, action: DecisionAction) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let bucket = match action {
            DecisionAction::Allow => &self.allowed,
            DecisionAction::Block => &self.blocked,
            DecisionAction::Throttle => &self.throttled,
            DecisionAction::RejectWithHint => &self.rejected,
            DecisionAction::TerminateRun => &self.terminated,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters into a [`RunSummary`], stamping the elapsed
    /// wall-clock duration.
    #[must_use]
    pub fn snapshot(&self, duration_ms: u64) -> RunSummary {
        RunSummary {
            calls_total: self.total.load(Ordering::Relaxed),
            calls_allowed: self.allowed.load(Ordering::Relaxed),
            calls_blocked: self.blocked.load(Ordering::Relaxed),
            calls_throttled: self.throttled.load(Ordering::Relaxed),
            calls_rejected: self.rejected.load(Ordering::Relaxed),
            calls_terminated: self.terminated.load(Ordering::Relaxed),
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_internally_consistent() {
        let counters = RunCounters::default();
        counters.record(DecisionAction::Allow);
        counters.record(DecisionAction::Allow);
        counters.record(DecisionAction::Block);
        counters.record(DecisionAction::Throttle);
        counters.record(DecisionAction::RejectWithHint);
        counters.record(DecisionAction::TerminateRun);
        let summary = counters.snapshot(1234);
        assert_eq!(summary.calls_total, 6);
        assert!(summary.is_consistent());
        assert_eq!(summary.duration_ms, 1234);
    }
}
