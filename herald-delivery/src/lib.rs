//! Outbound dispatch for herald
//!
//! This crate provides:
//! - Idempotent acceptance of requests, keyed by a caller-supplied or generated key
//! - Sliding-window rate limiting, with deferred requests queued and replayed
//! - Bounded retries with exponential backoff against each provider
//! - Per-provider circuit breaking with fallback to the next provider in priority order
//!
//! All state is held in process and lost on restart.

pub mod circuit_breaker;
mod config;
mod dispatcher;
mod error;
mod ledger;
pub mod policy;
pub mod provider;
mod queue;
pub mod rate_limiter;
mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use config::DispatchConfig;
pub use dispatcher::{Dispatcher, DrainReport};
pub use error::{AllProvidersFailed, ConfigError, ProviderError, ProviderFailure};
pub use policy::RetryPolicy;
pub use provider::{Provider, SimulatedProvider, SimulatedProviderConfig};
pub use queue::DeliveryQueue;
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use types::{DeliveryState, IdempotencyKey, Outcome, Receipt, Request, StatusRecord};
