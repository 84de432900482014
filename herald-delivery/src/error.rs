//! Typed errors for dispatch operations.
//!
//! Only [`AllProvidersFailed`] ever reaches a caller, inside
//! [`Outcome::Failed`](crate::Outcome::Failed). A [`ProviderError`] is retried
//! locally and a [`ProviderFailure`] triggers fallback to the next provider.
//! Rate limiting and duplicate keys are outcomes, not errors.

use core::fmt::{self, Display, Formatter};

use serde::Serialize;
use thiserror::Error;

/// A single failed `send` against one provider.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Why a provider in the fallback chain produced no receipt.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ProviderFailure {
    /// The full retry budget was spent.
    #[error("Provider {provider} failed after {attempts} attempts. Last error: {last_error}")]
    Exhausted {
        provider: String,
        attempts: u32,
        #[source]
        last_error: ProviderError,
    },

    /// Skipped without an attempt because its circuit was open.
    #[error("Provider {provider} skipped: circuit open")]
    CircuitOpen { provider: String },
}

impl ProviderFailure {
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::Exhausted { provider, .. } | Self::CircuitOpen { provider } => provider,
        }
    }
}

/// Terminal failure: every provider was exhausted or skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub struct AllProvidersFailed {
    /// One entry per provider, in priority order
    pub failures: Vec<ProviderFailure>,
}

impl Display for AllProvidersFailed {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str("All providers are unavailable")?;

        for (index, failure) in self.failures.iter().enumerate() {
            let separator = if index == 0 { ": " } else { "; " };
            write!(fmt, "{separator}{failure}")?;
        }

        Ok(())
    }
}

/// Configuration rejected at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value that has to be positive was zero.
    #[error("Invalid configuration for {field}: must be greater than zero")]
    Zero { field: &'static str },

    /// A value was outside its permitted range.
    #[error("Invalid configuration for {field}: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    /// The dispatcher was built without anything to dispatch to.
    #[error("At least one provider must be configured")]
    NoProviders,
}
