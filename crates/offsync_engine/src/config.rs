//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync passes.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Backend environment; keys all persisted metadata.
    pub environment: String,
    /// Maximum number of creates per batch call.
    pub push_batch_size: usize,
    /// Change-feed page size for incremental pulls.
    pub pull_page_size: u32,
    /// Collection page size during bootstrap.
    pub bootstrap_page_size: u32,
    /// Failed attempts after which a mutation is abandoned.
    pub max_mutation_attempts: u32,
    /// Timeout applied to every remote call.
    pub request_timeout: Duration,
    /// Circuit-breaker configuration.
    pub breaker: BreakerConfig,
}

impl SyncConfig {
    /// Creates a configuration for `environment` with default limits.
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            push_batch_size: 50,
            pull_page_size: 100,
            bootstrap_page_size: 200,
            max_mutation_attempts: 5,
            request_timeout: Duration::from_secs(30),
            breaker: BreakerConfig::default(),
        }
    }

    /// Sets the batch create size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the change-feed page size.
    pub fn with_pull_page_size(mut self, size: u32) -> Self {
        self.pull_page_size = size.max(1);
        self
    }

    /// Sets the bootstrap page size.
    pub fn with_bootstrap_page_size(mut self, size: u32) -> Self {
        self.bootstrap_page_size = size.max(1);
        self
    }

    /// Sets the mutation retry ceiling.
    pub fn with_max_mutation_attempts(mut self, attempts: u32) -> Self {
        self.max_mutation_attempts = attempts.max(1);
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the circuit-breaker configuration.
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    // Effective sizes; never zero.

    pub(crate) fn batch_size(&self) -> usize {
        self.push_batch_size.max(1)
    }

    pub(crate) fn pull_limit(&self) -> u32 {
        self.pull_page_size.max(1)
    }

    pub(crate) fn bootstrap_limit(&self) -> u32 {
        self.bootstrap_page_size.max(1)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("production")
    }
}

/// Configuration for the rate-limit circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive rate-limit errors that trip the breaker.
    pub trip_threshold: u32,
    /// Backoff of the first trip.
    pub base_backoff: Duration,
    /// Upper bound on any backoff.
    pub max_backoff: Duration,
    /// Upper bound on the backoff multiplier.
    pub max_multiplier: f64,
}

impl BreakerConfig {
    /// Sets the trip threshold.
    pub fn with_trip_threshold(mut self, threshold: u32) -> Self {
        self.trip_threshold = threshold.max(1);
        self
    }

    /// Sets the base backoff.
    pub fn with_base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    /// Sets the maximum backoff.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Calculates the backoff for a trip at the given multiplier.
    pub fn backoff_for_multiplier(&self, multiplier: f64) -> Duration {
        let secs = self.base_backoff.as_secs_f64() * multiplier.max(1.0);
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()))
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            trip_threshold: 3,
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
            max_multiplier: 10.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("staging")
            .with_push_batch_size(25)
            .with_pull_page_size(10)
            .with_max_mutation_attempts(3)
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.environment, "staging");
        assert_eq!(config.push_batch_size, 25);
        assert_eq!(config.pull_page_size, 10);
        assert_eq!(config.max_mutation_attempts, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.push_batch_size, 50);
        assert_eq!(config.pull_page_size, 100);
        assert_eq!(config.max_mutation_attempts, 5);
        assert_eq!(config.breaker.trip_threshold, 3);
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let config = SyncConfig::default()
            .with_push_batch_size(0)
            .with_pull_page_size(0);
        assert_eq!(config.push_batch_size, 1);
        assert_eq!(config.pull_page_size, 1);
    }

    #[test]
    fn literal_zero_sizes_are_clamped_on_use() {
        let config = SyncConfig {
            push_batch_size: 0,
            pull_page_size: 0,
            bootstrap_page_size: 0,
            ..SyncConfig::default()
        };
        assert_eq!(config.batch_size(), 1);
        assert_eq!(config.pull_limit(), 1);
        assert_eq!(config.bootstrap_limit(), 1);
    }

    #[test]
    fn backoff_respects_max() {
        let breaker = BreakerConfig::default();
        assert_eq!(breaker.backoff_for_multiplier(1.0), Duration::from_secs(30));
        assert_eq!(breaker.backoff_for_multiplier(8.0), Duration::from_secs(240));
        assert_eq!(breaker.backoff_for_multiplier(10.0), Duration::from_secs(300));
    }
}
