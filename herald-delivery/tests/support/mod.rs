//! Scripted provider doubles for dispatcher tests

#![allow(dead_code)]

use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use herald_delivery::{DispatchConfig, Provider, ProviderError, Receipt, Request};
use parking_lot::Mutex;
use tokio::time::Instant;

/// One observed call to [`ScriptedProvider::send`]
#[derive(Debug, Clone)]
pub struct Call {
    pub key: String,
    pub at: Instant,
}

/// Provider whose results are scripted up front.
///
/// Each call pops the next scripted result; once the script runs out every call
/// returns `otherwise`.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<bool>>,
    otherwise: bool,
    latency: Duration,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedProvider {
    fn build(name: &str, script: impl IntoIterator<Item = bool>, otherwise: bool) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(script.into_iter().collect()),
            otherwise,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, [], true))
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, [], false))
    }

    /// Fails `failures` times, then succeeds
    pub fn flaky(name: &str, failures: usize) -> Arc<Self> {
        Arc::new(Self::build(name, vec![false; failures], true))
    }

    /// Succeeds after sleeping `latency`
    pub fn slow(name: &str, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::build(name, [], true)
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.calls.lock().iter().map(|call| call.key.clone()).collect()
    }

    /// Gaps between consecutive calls
    pub fn gaps(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at))
            .collect()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: &Request) -> Result<Receipt, ProviderError> {
        self.calls.lock().push(Call {
            key: request.idempotency_key().to_string(),
            at: Instant::now(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let succeed = self.script.lock().pop_front().unwrap_or(self.otherwise);
        if succeed {
            Ok(Receipt {
                provider: self.name.clone(),
            })
        } else {
            Err(ProviderError::new(format!("{} failed", self.name)))
        }
    }
}

pub fn providers(list: &[&Arc<ScriptedProvider>]) -> Vec<Arc<dyn Provider>> {
    list.iter()
        .map(|provider| Arc::clone(provider) as Arc<dyn Provider>)
        .collect()
}

/// Config with generous limits and a one second initial backoff
pub fn config() -> DispatchConfig {
    DispatchConfig {
        rate_limit_max_requests: 100,
        rate_limit_interval_ms: 1_000,
        circuit_breaker_failure_threshold: 100,
        circuit_breaker_reset_timeout_ms: 30_000,
        max_retries: 3,
        initial_backoff_ms: 1_000,
        queue_process_interval_ms: 500,
    }
}

pub fn request(key: &str) -> Request {
    Request::new("test@example.com", "Test", "This is a test").with_idempotency_key(key)
}
