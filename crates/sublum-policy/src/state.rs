//! Per-category stateful storage for budget, rate-limit, breaker and dedupe
//! rules (spec.md §4.4 "Stateful rule semantics").
//!
//! Each category lives behind its own `Mutex<HashMap<...>>` rather than a
//! registry of fine-grained per-key locks: critical sections here are a
//! handful of integer/float operations, so one mutex per category is enough
//! to avoid contention in practice without pulling in a concurrent-map
//! dependency the teacher workspace doesn't carry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Bounds how large the dedupe table is allowed to grow before a sweep
/// evicts expired and then oldest entries.
const MAX_DEDUPE_ENTRIES: usize = 50_000;

/// Budget counters, one per `(rule_id, key)`.
#[derive(Debug, Default)]
pub struct BudgetState {
    counters: Mutex<HashMap<String, i64>>,
}

impl BudgetState {
    /// Consume one unit of budget. Returns `true` if the call is within
    /// budget (counter decremented), `false` if the budget was already
    /// exhausted (counter left at zero).
    pub fn try_consume(&self, key: &str, limit: i64) -> bool {
        let mut counters = self.counters.lock().expect("budget mutex poisoned");
        let counter = counters.entry(key.to_string()).or_insert(limit);
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Outcome of consuming from a token bucket.
#[derive(Debug, Clone, Copy)]
pub struct BucketResult {
    /// `true` if at least one token was available and has been consumed.
    pub allowed: bool,
    /// Suggested backoff, populated only when `!allowed`.
    pub backoff_ms: Option<u64>,
}

/// Token buckets, one per `(rule_id, key)`.
#[derive(Debug, Default)]
pub struct RateLimitState {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimitState {
    /// Consume one token, refilling for elapsed time first (spec.md §4.4
    /// "Refill uses wall clock now" — approximated here with a monotonic
    /// instant, which cannot run backwards the way wall clock can).
    pub fn try_consume(&self, key: &str, capacity: f64, refill_per_second: f64, now: Instant) -> BucketResult {
        let mut buckets = self.buckets.lock().expect("rate limit mutex poisoned");
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| TokenBucket {
            tokens: capacity,
            last_refill: now,
        });
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_second).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            BucketResult { allowed: true, backoff_ms: None }
        } else {
            let deficit = 1.0 - bucket.tokens;
            let backoff_ms = if refill_per_second > 0.0 {
                (1000.0 * deficit / refill_per_second).ceil() as u64
            } else {
                u64::MAX
            };
            BucketResult { allowed: false, backoff_ms: Some(backoff_ms) }
        }
    }
}

struct Breaker {
    repeat_events: HashMap<String, Vec<Instant>>,
    error_events: HashMap<String, Vec<Instant>>,
    tripped_until: Option<Instant>,
}

impl Breaker {
    fn new() -> Self {
        Self { repeat_events: HashMap::new(), error_events: HashMap::new(), tripped_until: None }
    }
}

fn prune(events: &mut Vec<Instant>, now: Instant, window: Duration) {
    events.retain(|t| now.saturating_duration_since(*t) <= window);
}

/// Breakers, one per rule id.
#[derive(Debug, Default)]
pub struct BreakerState {
    breakers: Mutex<HashMap<String, Breaker>>,
}

impl BreakerState {
    /// Evaluate and update the breaker for a fresh call. Returns `true` if
    /// the breaker is (now) tripped and the call should be blocked.
    pub fn observe_call(
        &self,
        rule_id: &str,
        args_hash: &str,
        repeat_threshold: u32,
        window_ms: u64,
        cooldown_ms: u64,
        now: Instant,
    ) -> bool {
        let window = Duration::from_millis(window_ms);
        let mut breakers = self.breakers.lock().expect("breaker mutex poisoned");
        let breaker = breakers.entry(rule_id.to_string()).or_insert_with(Breaker::new);

        if let Some(until) = breaker.tripped_until {
            if now < until {
                return true;
            }
            breaker.tripped_until = None;
        }

        if repeat_threshold > 0 {
            let events = breaker.repeat_events.entry(args_hash.to_string()).or_default();
            prune(events, now, window);
            events.push(now);
            if events.len() as u32 >= repeat_threshold {
                breaker.tripped_until = Some(now + Duration::from_millis(cooldown_ms));
                return true;
            }
        }
        false
    }

    /// Record that a call completed in error, for rules configured with an
    /// `error_threshold`. Called by the adapter after the upstream response
    /// is observed, independent of [`Self::observe_call`]'s pre-call check.
    pub fn observe_error(&self, rule_id: &str, tool_name: &str, error_threshold: u32, window_ms: u64, cooldown_ms: u64, now: Instant) {
        if error_threshold == 0 {
            return;
        }
        let window = Duration::from_millis(window_ms);
        let mut breakers = self.breakers.lock().expect("breaker mutex poisoned");
        let breaker = breakers.entry(rule_id.to_string()).or_insert_with(Breaker::new);
        let events = breaker.error_events.entry(tool_name.to_string()).or_default();
        prune(events, now, window);
        events.push(now);
        if events.len() as u32 >= error_threshold {
            breaker.tripped_until = Some(now + Duration::from_millis(cooldown_ms));
        }
    }
}

/// A TTL dedupe table keyed by `(rule_id, server_name, tool_name,
/// args_hash)`.
#[derive(Debug, Default)]
pub struct DedupeState {
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupeState {
    /// Record this call's key. Returns `true` if the key was already
    /// present and not yet expired (a duplicate hit).
    pub fn check_and_record(&self, key: &str, window_ms: u64, now: Instant) -> bool {
        let window = Duration::from_millis(window_ms);
        let mut seen = self.seen.lock().expect("dedupe mutex poisoned");

        let hit = seen.get(key).is_some_and(|last| now.saturating_duration_since(*last) <= window);

        seen.insert(key.to_string(), now);

        if seen.len() > MAX_DEDUPE_ENTRIES {
            seen.retain(|_, last| now.saturating_duration_since(*last) <= window);
            while seen.len() > MAX_DEDUPE_ENTRIES {
                if let Some(oldest_key) = seen.iter().min_by_key(|(_, t)| **t).map(|(k, _)| k.clone()) {
                    seen.remove(&oldest_key);
                } else {
                    break;
                }
            }
        }

        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_allows_until_exhausted_then_blocks() {
        let state = BudgetState::default();
        assert!(state.try_consume("k", 2));
        assert!(state.try_consume("k", 2));
        assert!(!state.try_consume("k", 2));
        assert!(!state.try_consume("k", 2));
    }

    #[test]
    fn budget_keys_are_independent() {
        let state = BudgetState::default();
        assert!(state.try_consume("a", 1));
        assert!(!state.try_consume("a", 1));
        assert!(state.try_consume("b", 1));
    }

    #[test]
    fn rate_limit_denies_when_bucket_empty_and_reports_backoff() {
        let state = RateLimitState::default();
        let t0 = Instant::now();
        let first = state.try_consume("k", 1.0, 1.0, t0);
        assert!(first.allowed);
        let second = state.try_consume("k", 1.0, 1.0, t0);
        assert!(!second.allowed);
        assert!(second.backoff_ms.unwrap() > 0);
    }

    #[test]
    fn rate_limit_refills_over_time() {
        let state = RateLimitState::default();
        let t0 = Instant::now();
        assert!(state.try_consume("k", 1.0, 10.0, t0).allowed);
        assert!(!state.try_consume("k", 1.0, 10.0, t0).allowed);
        let t1 = t0 + Duration::from_millis(200);
        assert!(state.try_consume("k", 1.0, 10.0, t1).allowed);
    }

    #[test]
    fn breaker_trips_on_repeat_threshold() {
        let state = BreakerState::default();
        let t0 = Instant::now();
        assert!(!state.observe_call("r1", "hash-a", 3, 60_000, 1_000, t0));
        assert!(!state.observe_call("r1", "hash-a", 3, 60_000, 1_000, t0));
        assert!(state.observe_call("r1", "hash-a", 3, 60_000, 1_000, t0));
    }

    #[test]
    fn breaker_cooldown_expires() {
        let state = BreakerState::default();
        let t0 = Instant::now();
        for _ in 0..3 {
            state.observe_call("r1", "hash-a", 3, 60_000, 50, t0);
        }
        assert!(state.observe_call("r1", "hash-a", 3, 60_000, 50, t0));
        let later = t0 + Duration::from_millis(100);
        assert!(!state.observe_call("r1", "hash-b", 3, 60_000, 50, later));
    }

    #[test]
    fn breaker_trips_on_error_threshold() {
        let state = BreakerState::default();
        let t0 = Instant::now();
        state.observe_error("r1", "git_push", 2, 60_000, 1_000, t0);
        assert!(!state.observe_call("r1", "other-hash", 0, 60_000, 1_000, t0));
        state.observe_error("r1", "git_push", 2, 60_000, 1_000, t0);
        assert!(state.observe_call("r1", "other-hash", 0, 60_000, 1_000, t0));
    }

    #[test]
    fn dedupe_hits_within_window_and_expires_after() {
        let state = DedupeState::default();
        let t0 = Instant::now();
        assert!(!state.check_and_record("k", 1_000, t0));
        assert!(state.check_and_record("k", 1_000, t0));
        let later = t0 + Duration::from_millis(2_000);
        assert!(!state.check_and_record("k", 1_000, later));
    }

    proptest::proptest! {
        #[test]
        fn budget_counter_never_goes_negative(n_calls in 0usize..200, limit in 1i64..50) {
            let state = BudgetState::default();
            let mut allowed_count = 0i64;
            for _ in 0..n_calls {
                if state.try_consume("k", limit) {
                    allowed_count += 1;
                }
            }
            proptest::prop_assert!(allowed_count <= limit);
            proptest::prop_assert_eq!(allowed_count, limit.min(n_calls as i64));
        }
    }
}
