//! Retry policy for provider attempts.
//!
//! Kept separate from the attempt loop so retry timing can be reasoned about and
//! tested without a provider.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry budget and exponential backoff for one provider.
///
/// A provider gets `max_retries + 1` attempts in total. The delay after the
/// zero-indexed attempt `n` fails is `initial_backoff * 2^n`, so delays grow
/// 1x, 2x, 4x, ...
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds).
    ///
    /// Default: 1000
    #[serde(default = "defaults::initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            initial_backoff_ms: defaults::initial_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: u32, initial_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
        }
    }

    /// Total attempts a provider gets before it is exhausted.
    #[must_use]
    pub const fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Retries still available after the zero-indexed `attempt` has failed.
    #[must_use]
    pub const fn retries_left(&self, attempt: u32) -> u32 {
        self.max_retries.saturating_sub(attempt)
    }

    /// Delay to wait after the zero-indexed `attempt` fails.
    ///
    /// Saturates instead of overflowing for very large attempt numbers.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let millis = if attempt >= 63 {
            u64::MAX
        } else {
            self.initial_backoff_ms.saturating_mul(1u64 << attempt)
        };

        Duration::from_millis(millis)
    }
}

mod defaults {
    pub const fn max_retries() -> u32 {
        3
    }

    pub const fn initial_backoff_ms() -> u64 {
        1_000
    }
}
