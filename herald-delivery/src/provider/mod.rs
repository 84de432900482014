//! Delivery provider abstraction
//!
//! A provider is an opaque transport that either accepts a request or fails.
//! The dispatcher never inspects how; latency, failure modes and the wire
//! protocol stay behind [`Provider::send`].

mod simulated;

use async_trait::async_trait;

pub use simulated::{SimulatedProvider, SimulatedProviderConfig};

use crate::{
    error::ProviderError,
    types::{Receipt, Request},
};

#[async_trait]
pub trait Provider: Send + Sync {
    /// Name used in logs, ledger entries and outcomes
    fn name(&self) -> &str;

    /// Attempt to deliver `request` once
    ///
    /// # Errors
    ///
    /// Any failure; the dispatcher treats every error as transient
    async fn send(&self, request: &Request) -> Result<Receipt, ProviderError>;
}
