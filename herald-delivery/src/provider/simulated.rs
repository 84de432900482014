//! A provider that simulates network latency and random failures

use std::time::Duration;

use async_trait::async_trait;
use herald_common::{outgoing, tracing};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::Provider;
use crate::{
    error::{ConfigError, ProviderError},
    types::{Receipt, Request},
};

const fn default_min_latency_ms() -> u64 {
    50
}

const fn default_max_latency_ms() -> u64 {
    100
}

/// Configuration for one simulated provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedProviderConfig {
    pub name: String,

    /// Probability in `[0, 1]` that a send fails
    #[serde(default)]
    pub failure_rate: f64,

    /// Lower bound of the simulated latency (milliseconds)
    #[serde(default = "default_min_latency_ms")]
    pub min_latency_ms: u64,

    /// Upper bound of the simulated latency (milliseconds, exclusive)
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,
}

#[derive(Debug)]
pub struct SimulatedProvider {
    config: SimulatedProviderConfig,
}

impl SimulatedProvider {
    /// # Errors
    ///
    /// If `failure_rate` is outside `[0, 1]` or the latency bounds are inverted
    pub fn new(config: SimulatedProviderConfig) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&config.failure_rate) {
            return Err(ConfigError::OutOfRange {
                field: "failure_rate",
                reason: format!("{} is not within [0, 1]", config.failure_rate),
            });
        }

        if config.min_latency_ms > config.max_latency_ms {
            return Err(ConfigError::OutOfRange {
                field: "min_latency_ms",
                reason: format!(
                    "{} exceeds max_latency_ms {}",
                    config.min_latency_ms, config.max_latency_ms
                ),
            });
        }

        Ok(Self { config })
    }

    fn latency(&self) -> Duration {
        let SimulatedProviderConfig {
            min_latency_ms,
            max_latency_ms,
            ..
        } = self.config;

        if min_latency_ms >= max_latency_ms {
            return Duration::from_millis(min_latency_ms);
        }

        Duration::from_millis(rand::rng().random_range(min_latency_ms..max_latency_ms))
    }

    fn fails(&self) -> bool {
        rand::rng().random_bool(self.config.failure_rate)
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn send(&self, request: &Request) -> Result<Receipt, ProviderError> {
        outgoing!(
            level = DEBUG,
            provider = %self.config.name,
            to = request.to(),
            "Attempting to send"
        );

        tokio::time::sleep(self.latency()).await;

        if self.fails() {
            tracing::warn!(provider = %self.config.name, to = request.to(), "Simulated send failed");
            Err(ProviderError::new(format!(
                "Simulated failure from {}",
                self.config.name
            )))
        } else {
            outgoing!(
                level = DEBUG,
                provider = %self.config.name,
                to = request.to(),
                "Sent"
            );
            Ok(Receipt {
                provider: self.config.name.clone(),
            })
        }
    }
}
