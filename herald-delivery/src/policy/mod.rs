//! Policy abstractions for dispatch operations.
//!
//! - [`RetryPolicy`]: per-provider retry budget and backoff timing

pub mod retry;

pub use retry::RetryPolicy;
