//! Dispatcher configuration
//!
//! One flat struct holding every recognised option. Durations are in
//! milliseconds; each field also accepts its bare option name, so both
//! `rate_limit_interval_ms: 1000` and `rate_limit_interval: 1000` parse.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    circuit_breaker::CircuitBreakerConfig, error::ConfigError, policy::RetryPolicy,
    rate_limiter::RateLimitConfig,
};

const fn default_rate_limit_max_requests() -> u32 {
    10
}

const fn default_rate_limit_interval_ms() -> u64 {
    60_000 // 1 minute
}

const fn default_circuit_breaker_failure_threshold() -> u32 {
    5
}

const fn default_circuit_breaker_reset_timeout_ms() -> u64 {
    30_000
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_queue_process_interval_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum admissions per rate limit window
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,

    /// Length of the rate limit window
    #[serde(
        default = "default_rate_limit_interval_ms",
        alias = "rate_limit_interval"
    )]
    pub rate_limit_interval_ms: u64,

    /// Consecutive failures before a provider's circuit opens
    #[serde(default = "default_circuit_breaker_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,

    /// How long an open circuit waits before allowing a probe
    #[serde(
        default = "default_circuit_breaker_reset_timeout_ms",
        alias = "circuit_breaker_reset_timeout"
    )]
    pub circuit_breaker_reset_timeout_ms: u64,

    /// Retries per provider after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles for each later retry
    #[serde(default = "default_initial_backoff_ms", alias = "initial_backoff")]
    pub initial_backoff_ms: u64,

    /// How often the deferred queue is drained
    #[serde(
        default = "default_queue_process_interval_ms",
        alias = "queue_process_interval"
    )]
    pub queue_process_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_limit_max_requests: default_rate_limit_max_requests(),
            rate_limit_interval_ms: default_rate_limit_interval_ms(),
            circuit_breaker_failure_threshold: default_circuit_breaker_failure_threshold(),
            circuit_breaker_reset_timeout_ms: default_circuit_breaker_reset_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            queue_process_interval_ms: default_queue_process_interval_ms(),
        }
    }
}

impl DispatchConfig {
    /// Reject values that would stall or spin the dispatcher
    ///
    /// # Errors
    ///
    /// [`ConfigError::Zero`] naming the first offending field
    pub const fn validate(&self) -> Result<(), ConfigError> {
        let field = if self.rate_limit_max_requests == 0 {
            "rate_limit_max_requests"
        } else if self.rate_limit_interval_ms == 0 {
            "rate_limit_interval_ms"
        } else if self.circuit_breaker_failure_threshold == 0 {
            "circuit_breaker_failure_threshold"
        } else if self.queue_process_interval_ms == 0 {
            "queue_process_interval_ms"
        } else {
            return Ok(());
        };

        Err(ConfigError::Zero { field })
    }

    #[must_use]
    pub const fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit_max_requests,
            interval_ms: self.rate_limit_interval_ms,
        }
    }

    #[must_use]
    pub const fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            reset_timeout_ms: self.circuit_breaker_reset_timeout_ms,
        }
    }

    #[must_use]
    pub const fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.initial_backoff_ms)
    }

    #[must_use]
    pub const fn queue_process_interval(&self) -> Duration {
        Duration::from_millis(self.queue_process_interval_ms)
    }
}
