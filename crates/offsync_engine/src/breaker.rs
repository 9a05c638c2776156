//! Rate-limit circuit breaker.

use crate::config::BreakerConfig;
use offsync_store::BreakerSnapshot;
use std::time::Duration;
use tracing::{debug, warn};

/// Gates sync attempts after repeated rate-limit responses.
///
/// The breaker trips once `trip_threshold` consecutive rate-limit errors
/// are seen. Each trip backs off for `base_backoff * multiplier` (capped at
/// `max_backoff`) and then doubles the multiplier (capped at
/// `max_multiplier`), giving 30s, 60s, 120s, 240s, 300s with the defaults.
///
/// The consecutive-error count survives a trip, so once the backoff
/// expires a single further rate limit re-trips at the next step. Any
/// response that is not a rate limit zeroes the count.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerSnapshot,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(config: BreakerConfig) -> Self {
        Self::restore(config, BreakerSnapshot::default())
    }

    /// Recreates a breaker from persisted state.
    pub fn restore(config: BreakerConfig, state: BreakerSnapshot) -> Self {
        Self { config, state }
    }

    /// Returns the persistable state.
    pub fn snapshot(&self) -> BreakerSnapshot {
        self.state
    }

    /// Returns the current consecutive rate-limit error count.
    pub fn consecutive_errors(&self) -> u32 {
        self.state.consecutive_rate_limit_errors
    }

    /// Returns the multiplier the next trip will use.
    pub fn multiplier(&self) -> f64 {
        self.state.backoff_multiplier
    }

    /// Returns true while sync attempts must be refused.
    pub fn is_tripped(&self, now: u64) -> bool {
        self.state.backoff_until.is_some_and(|until| now < until)
    }

    /// Returns the remaining backoff, `None` if not tripped.
    pub fn retry_after(&self, now: u64) -> Option<Duration> {
        self.state
            .backoff_until
            .filter(|until| now < *until)
            .map(|until| Duration::from_millis(until - now))
    }

    /// Returns when the breaker closes, if it is open.
    pub fn open_until(&self, now: u64) -> Option<u64> {
        self.state.backoff_until.filter(|until| now < *until)
    }

    /// Records a rate-limit error. Returns true if the breaker is now tripped.
    pub fn record_rate_limit(&mut self, now: u64) -> bool {
        self.state.consecutive_rate_limit_errors += 1;
        debug!(
            consecutive = self.state.consecutive_rate_limit_errors,
            "rate limited"
        );
        // an open breaker keeps its backoff; only errors after it closes escalate
        if self.state.consecutive_rate_limit_errors >= self.config.trip_threshold
            && !self.is_tripped(now)
        {
            self.trip(now);
        }
        self.is_tripped(now)
    }

    /// Records a response that was not a rate limit.
    pub fn record_success(&mut self) {
        self.state.consecutive_rate_limit_errors = 0;
    }

    /// Clears all state, re-enabling attempts immediately.
    pub fn reset(&mut self) {
        self.state = BreakerSnapshot::default();
    }

    fn trip(&mut self, now: u64) {
        let backoff = self.config.backoff_for_multiplier(self.state.backoff_multiplier);
        self.state.backoff_until = Some(now + backoff.as_millis() as u64);
        self.state.backoff_multiplier =
            (self.state.backoff_multiplier * 2.0).min(self.config.max_multiplier);
        warn!(?backoff, "circuit breaker tripped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000;

    fn trip(breaker: &mut CircuitBreaker, now: u64) -> Duration {
        while !breaker.record_rate_limit(now) {}
        breaker.retry_after(now).unwrap()
    }

    #[test]
    fn trips_on_third_error() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        assert!(!breaker.record_rate_limit(0));
        assert!(!breaker.record_rate_limit(0));
        assert!(breaker.record_rate_limit(0));
        assert_eq!(breaker.retry_after(0), Some(Duration::from_secs(30)));
        assert!(breaker.is_tripped(29 * SEC));
        assert!(!breaker.is_tripped(30 * SEC));
    }

    #[test]
    fn backoff_schedule() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        let mut now = 0;
        let mut schedule = Vec::new();
        for _ in 0..6 {
            let backoff = trip(&mut breaker, now);
            schedule.push(backoff.as_secs());
            now += backoff.as_millis() as u64;
        }
        assert_eq!(schedule, vec![30, 60, 120, 240, 300, 300]);
        assert_eq!(breaker.multiplier(), 10.0);
    }

    #[test]
    fn errors_while_open_keep_backoff() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        assert_eq!(trip(&mut breaker, 0), Duration::from_secs(30));
        for _ in 0..7 {
            assert!(breaker.record_rate_limit(SEC));
        }
        assert_eq!(breaker.open_until(SEC), Some(30 * SEC));
        assert_eq!(breaker.multiplier(), 2.0);

        // the next error after the backoff escalates once
        assert!(breaker.record_rate_limit(30 * SEC));
        assert_eq!(breaker.retry_after(30 * SEC), Some(Duration::from_secs(60)));
    }

    #[test]
    fn success_resets_count_only() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        breaker.record_rate_limit(0);
        breaker.record_rate_limit(0);
        breaker.record_success();
        assert_eq!(breaker.consecutive_errors(), 0);
        assert!(!breaker.record_rate_limit(0));

        trip(&mut breaker, 0);
        breaker.record_success();
        assert!(breaker.is_tripped(0));
        assert_eq!(breaker.multiplier(), 2.0);
    }

    #[test]
    fn manual_reset_clears_everything() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        trip(&mut breaker, 0);
        breaker.reset();
        assert!(!breaker.is_tripped(0));
        assert_eq!(breaker.multiplier(), 1.0);
        assert_eq!(breaker.consecutive_errors(), 0);
    }

    #[test]
    fn restores_from_snapshot() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        trip(&mut breaker, 5 * SEC);
        let restored = CircuitBreaker::restore(BreakerConfig::default(), breaker.snapshot());
        assert!(restored.is_tripped(6 * SEC));
        assert_eq!(restored.open_until(6 * SEC), Some(35 * SEC));
    }
}
