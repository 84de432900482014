//! Request, status and outcome types shared by the dispatch components

use core::{
    borrow::Borrow,
    fmt::{self, Display, Formatter},
};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AllProvidersFailed;

/// Caller-supplied or generated identifier for one logical send
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(Arc<str>);

impl IdempotencyKey {
    /// Generate a fresh, time-ordered key
    #[must_use]
    pub fn generate() -> Self {
        Self(Arc::from(ulid::Ulid::new().to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for IdempotencyKey {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

impl Borrow<str> for IdempotencyKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IdempotencyKey {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for IdempotencyKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// An outbound message. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    to: Arc<str>,
    subject: Arc<str>,
    body: Arc<str>,
    idempotency_key: IdempotencyKey,
}

impl Request {
    /// Build a request with a freshly generated idempotency key
    #[must_use]
    pub fn new(to: impl Into<Arc<str>>, subject: impl Into<Arc<str>>, body: impl Into<Arc<str>>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            idempotency_key: IdempotencyKey::generate(),
        }
    }

    /// Replace the generated key with one supplied by the caller
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<IdempotencyKey>) -> Self {
        self.idempotency_key = key.into();
        self
    }

    #[must_use]
    pub fn to(&self) -> &str {
        &self.to
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    #[must_use]
    pub const fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }
}

/// Proof of a successful send, as reported by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub provider: String,
}

/// Where a request currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Processing,
    Queued,
    Success,
    Failed,
}

impl DeliveryState {
    /// Returns `true` once no further attempts will be made
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl Display for DeliveryState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Processing => "processing",
            Self::Queued => "queued",
            Self::Success => "success",
            Self::Failed => "failed",
        })
    }
}

/// Ledger entry for one idempotency key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(rename = "status")]
    pub state: DeliveryState,
    /// Provider that accepted the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Aggregate failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time of the last write to this entry
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    #[must_use]
    pub fn new(state: DeliveryState) -> Self {
        Self {
            state,
            provider: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn succeeded(provider: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            ..Self::new(DeliveryState::Success)
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(DeliveryState::Failed)
        }
    }
}

/// What `submit` tells the caller
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The key was seen before; nothing was sent
    Duplicate { original_status: StatusRecord },
    /// Over the rate limit; the request is queued and will be replayed
    RateLimited,
    /// Accepted by `provider`
    Success { provider: String },
    /// Every provider was exhausted or circuit-open
    Failed { error: AllProvidersFailed },
}

impl Outcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}
