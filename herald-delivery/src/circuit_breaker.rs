//! Per-provider circuit breaker
//!
//! Each provider in the fallback chain owns one breaker, so a provider suffering a
//! sustained outage is skipped immediately instead of burning its retry budget on
//! every request.
//!
//! # State Transitions
//!
//! ```text
//! ┌─────────┐  failure_threshold consecutive failures  ┌──────┐
//! │ Closed  │ ───────────────────────────────────────> │ Open │ <──┐
//! └─────────┘                                           └──────┘    │
//!     ^                                                    │        │
//!     │                                                    │ reset_timeout elapsed
//!     │  Success              ┌───────────────┐            │        │
//!     └───────────────────────│  Half-Open    │ <──────────┘        │
//!                             └───────────────┘                     │
//!                                     │  any single failure         │
//!                                     └─────────────────────────────┘
//! ```
//!
//! The threshold only applies while closed. Once half-open, the first failure
//! re-opens the circuit.
//!
//! Opening arms a reset deadline rather than a background task: the open to
//! half-open flip is applied by whichever call first observes the deadline has
//! passed, and closing clears it. All reads go through `tokio::time::Instant`, so
//! a paused tokio clock drives the breaker deterministically.

use std::{sync::Arc, time::Duration};

use herald_common::tracing;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open a closed circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before allowing a probe (milliseconds)
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_reset_timeout_ms() -> u64 {
    30_000
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy - attempts allowed
    Closed,
    /// Tripped - attempts rejected until the reset timeout elapses
    Open,
    /// Probation - attempts allowed, the next outcome decides
    HalfOpen,
}

#[derive(Debug)]
struct CircuitBreakerData {
    state: CircuitState,
    /// Consecutive failures since the last success
    failure_count: u32,
    last_failure_at: Option<Instant>,
    /// Pending open -> half-open transition
    reset_at: Option<Instant>,
}

impl CircuitBreakerData {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            reset_at: None,
        }
    }

    /// Fire the reset deadline if it has passed
    fn advance(&mut self, now: Instant, provider: &str) {
        if self.state == CircuitState::Open && self.reset_at.is_some_and(|at| now >= at) {
            self.state = CircuitState::HalfOpen;
            self.reset_at = None;
            tracing::warn!(
                provider,
                "Circuit breaker entering HALF-OPEN state - allowing a test request"
            );
        }
    }

    /// Returns `true` if the circuit transitioned to Open
    fn trip(&mut self, now: Instant, reset_timeout: Duration, provider: &str) -> bool {
        if self.state == CircuitState::Open {
            return false;
        }

        self.state = CircuitState::Open;
        self.reset_at = Some(now + reset_timeout);
        tracing::error!(
            provider,
            failure_count = self.failure_count,
            reset_timeout_ms = u64::try_from(reset_timeout.as_millis()).unwrap_or(u64::MAX),
            "Circuit breaker OPENED - provider will be skipped until HALF-OPEN"
        );
        true
    }

    /// Returns `true` if the circuit transitioned to Open
    fn record_failure(
        &mut self,
        now: Instant,
        config: &CircuitBreakerConfig,
        provider: &str,
    ) -> bool {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);

        if self.state == CircuitState::HalfOpen
            || self.failure_count >= config.failure_threshold
        {
            self.trip(now, Duration::from_millis(config.reset_timeout_ms), provider)
        } else {
            false
        }
    }

    /// Returns `true` if the circuit transitioned to Closed
    fn record_success(&mut self, provider: &str) -> bool {
        let recovered = if self.state == CircuitState::HalfOpen {
            self.state = CircuitState::Closed;
            self.reset_at = None;
            self.last_failure_at = None;
            tracing::info!(provider, "Circuit breaker CLOSED - normal operation resumed");
            true
        } else {
            false
        };

        self.failure_count = 0;
        recovered
    }
}

/// Health gate for a single provider
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: Arc<str>,
    config: CircuitBreakerConfig,
    data: Mutex<CircuitBreakerData>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(provider: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            data: Mutex::new(CircuitBreakerData::new()),
        }
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Returns `true` unless the circuit is open
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Record a successful send
    ///
    /// Returns `true` if the circuit transitioned to Closed (recovered)
    pub fn on_success(&self) -> bool {
        self.on_success_at(Instant::now())
    }

    /// Record a failed send
    ///
    /// Returns `true` if the circuit transitioned to Open (tripped)
    pub fn on_failure(&self) -> bool {
        self.on_failure_at(Instant::now())
    }

    pub fn state(&self) -> CircuitState {
        self.state_at(Instant::now())
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut data = self.data.lock();
        data.advance(Instant::now(), &self.provider);
        CircuitBreakerStats {
            state: data.state,
            failure_count: data.failure_count,
            last_failure_at: data.last_failure_at,
        }
    }

    pub(crate) fn allow_at(&self, now: Instant) -> bool {
        self.state_at(now) != CircuitState::Open
    }

    pub(crate) fn on_success_at(&self, now: Instant) -> bool {
        let mut data = self.data.lock();
        data.advance(now, &self.provider);
        data.record_success(&self.provider)
    }

    pub(crate) fn on_failure_at(&self, now: Instant) -> bool {
        let mut data = self.data.lock();
        data.advance(now, &self.provider);
        data.record_failure(now, &self.config, &self.provider)
    }

    pub(crate) fn state_at(&self, now: Instant) -> CircuitState {
        let mut data = self.data.lock();
        data.advance(now, &self.provider);
        data.state
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    /// Consecutive failures since the last success
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
}
