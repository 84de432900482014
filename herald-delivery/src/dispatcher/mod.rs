//! Dispatch orchestration
//!
//! [`Dispatcher::submit`] runs every request through the same decision sequence:
//!
//! 1. Known idempotency key: answer from the ledger, providers untouched.
//! 2. Rate limit exceeded: record `queued`, append to the delivery queue.
//! 3. Otherwise record `processing` and walk the providers in priority order,
//!    skipping any whose circuit is open and giving each of the rest a fresh
//!    retry budget, until one accepts or all are exhausted.
//!
//! [`Dispatcher::serve`] drains the queue on a fixed period through step 3,
//! without waiting for one cycle's sends before starting the next cycle.
//!
//! Shared state (ledger, rate limiter, breakers, queue) is only locked for
//! synchronous check-and-update steps, never across a provider call or backoff.

mod attempt;
mod drain;

use std::sync::{Arc, atomic::AtomicBool};

use futures_util::{StreamExt, stream::FuturesUnordered};

use herald_common::{
    Signal, internal,
    tracing::{self, debug, error, info, warn},
};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::MissedTickBehavior,
};

pub use drain::DrainReport;

use crate::{
    circuit_breaker::{CircuitBreaker, CircuitState},
    config::DispatchConfig,
    error::{AllProvidersFailed, ConfigError, ProviderFailure},
    ledger::Ledger,
    policy::RetryPolicy,
    provider::Provider,
    queue::DeliveryQueue,
    rate_limiter::RateLimiter,
    types::{DeliveryState, Outcome, Request, StatusRecord},
};

/// A provider paired with the breaker guarding it
pub(crate) struct Route {
    provider: Arc<dyn Provider>,
    breaker: CircuitBreaker,
}

pub struct Dispatcher {
    config: DispatchConfig,
    retry: RetryPolicy,
    /// Providers in priority order
    routes: Vec<Route>,
    ledger: Ledger,
    rate_limiter: RateLimiter,
    queue: DeliveryQueue,
    /// Set while a drain cycle is in flight
    draining: AtomicBool,
}

impl Dispatcher {
    /// Build a dispatcher over `providers`, highest priority first
    ///
    /// # Errors
    ///
    /// If the configuration is invalid or `providers` is empty
    pub fn new(
        config: DispatchConfig,
        providers: Vec<Arc<dyn Provider>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        if providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        let breaker_config = config.circuit_breaker();
        let routes = providers
            .into_iter()
            .map(|provider| Route {
                breaker: CircuitBreaker::new(provider.name(), breaker_config.clone()),
                provider,
            })
            .collect::<Vec<_>>();

        internal!(
            level = DEBUG,
            providers = routes.len(),
            max_retries = config.max_retries,
            rate_limit = config.rate_limit_max_requests,
            "Dispatcher initialised"
        );

        Ok(Self {
            retry: config.retry(),
            rate_limiter: RateLimiter::new(&config.rate_limit()),
            routes,
            ledger: Ledger::new(),
            queue: DeliveryQueue::new(),
            draining: AtomicBool::new(false),
            config,
        })
    }

    /// Accept `request` for delivery, at most once per idempotency key
    #[tracing::instrument(level = "debug", skip_all, fields(key = %request.idempotency_key()))]
    pub async fn submit(&self, request: Request) -> Outcome {
        let key = request.idempotency_key();

        let claimed = self.ledger.claim_with(key, || {
            if self.rate_limiter.admit() {
                DeliveryState::Processing
            } else {
                DeliveryState::Queued
            }
        });

        match claimed {
            Err(original_status) => {
                warn!(
                    key = %key,
                    status = %original_status.state,
                    "Duplicate request detected"
                );
                Outcome::Duplicate { original_status }
            }
            Ok(DeliveryState::Queued) => {
                warn!(key = %key, "Rate limit exceeded, queuing request");
                self.queue.enqueue(request);
                Outcome::RateLimited
            }
            Ok(_) => self.dispatch(&request).await,
        }
    }

    /// Walk the providers in priority order until one accepts `request`
    async fn dispatch(&self, request: &Request) -> Outcome {
        let key = request.idempotency_key();
        let mut failures = Vec::with_capacity(self.routes.len());

        for route in &self.routes {
            let provider = route.provider.name();

            if !route.breaker.allow() {
                warn!(provider, key = %key, "Circuit is OPEN, falling back immediately");
                failures.push(ProviderFailure::CircuitOpen {
                    provider: provider.to_string(),
                });
                continue;
            }

            match attempt::send_with_retry(route, request, &self.retry).await {
                Ok(receipt) => {
                    info!(
                        provider,
                        key = %key,
                        reported_by = %receipt.provider,
                        "Delivered"
                    );
                    self.ledger.record(key, StatusRecord::succeeded(provider));
                    return Outcome::Success {
                        provider: provider.to_string(),
                    };
                }
                Err(failure) => {
                    warn!(key = %key, %failure, "Provider failed permanently, falling back");
                    failures.push(failure);
                }
            }
        }

        let error = AllProvidersFailed { failures };
        error!(key = %key, %error, "All providers failed");
        self.ledger
            .record(key, StatusRecord::failed(error.to_string()));

        Outcome::Failed { error }
    }

    /// Current ledger entry for `key`
    pub fn status(&self, key: &str) -> Option<StatusRecord> {
        self.ledger.get(key)
    }

    /// Run the periodic queue drain until a shutdown signal arrives
    ///
    /// Each tick dequeues whatever the rate limiter admits and starts those
    /// dispatches without waiting for them, so the next tick is never held
    /// back by a slow provider. Dispatches still running when the signal
    /// arrives are driven to completion before this returns.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!(
            level = INFO,
            interval_ms = self.config.queue_process_interval_ms,
            "Queue drain loop starting"
        );

        let mut process_timer = tokio::time::interval(self.config.queue_process_interval());
        process_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick to avoid immediate execution
        process_timer.tick().await;

        let mut in_flight = FuturesUnordered::new();

        loop {
            tokio::select! {
                _ = process_timer.tick() => {
                    let batch = self.take_admitted().unwrap_or_default();
                    if !batch.is_empty() {
                        debug!(
                            dispatched = batch.len(),
                            remaining = self.queue.len(),
                            "Drain cycle started"
                        );
                        in_flight.extend(
                            batch.into_iter().map(|request| self.dispatch_queued(request)),
                        );
                    }
                }
                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                    debug!(
                        success = Outcome::is_success(&outcome),
                        in_flight = in_flight.len(),
                        "Queued request finished"
                    );
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) => {
                            internal!(level = INFO, "Queue drain loop received shutdown signal");
                            break;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Shutdown channel lagged");
                        }
                        Err(RecvError::Closed) => {
                            error!("Queue drain loop shutdown channel closed");
                            break;
                        }
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            internal!(
                level = INFO,
                in_flight = in_flight.len(),
                "Waiting for queued requests already dispatched"
            );
            while in_flight.next().await.is_some() {}
        }

        internal!(
            level = INFO,
            queued = self.queue.len(),
            tracked = self.ledger.len(),
            "Queue drain loop stopped"
        );
    }

    /// Get a reference to the delivery queue
    pub const fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Breaker for the provider at priority `index`
    pub fn breaker(&self, index: usize) -> Option<&CircuitBreaker> {
        self.routes.get(index).map(|route| &route.breaker)
    }

    /// Circuit state of every provider, in priority order
    pub fn circuit_states(&self) -> Vec<(String, CircuitState)> {
        self.routes
            .iter()
            .map(|route| (route.breaker.provider().to_string(), route.breaker.state()))
            .collect()
    }

    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }
}
