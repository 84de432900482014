use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use futures_util::future::join_all;
use herald_common::{
    Signal, internal, logging,
    tracing::debug,
};
use herald_delivery::{
    DispatchConfig, Dispatcher, IdempotencyKey, Outcome, Provider, Request, SimulatedProvider,
    SimulatedProviderConfig,
};
use serde::Deserialize;
use tokio::sync::broadcast;

const fn default_burst() -> usize {
    15
}

const fn default_linger_secs() -> u64 {
    70
}

/// The canned traffic sent once the dispatcher is up
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Demo {
    /// Concurrent sends fired at once to overrun the rate limit
    #[serde(default = "default_burst")]
    burst: usize,

    /// How long to let the drain loop replay the queue before exiting
    #[serde(default = "default_linger_secs", alias = "linger")]
    linger_secs: u64,
}

impl Default for Demo {
    fn default() -> Self {
        Self {
            burst: default_burst(),
            linger_secs: default_linger_secs(),
        }
    }
}

fn default_providers() -> Vec<SimulatedProviderConfig> {
    vec![
        SimulatedProviderConfig {
            name: "ProviderA".to_string(),
            failure_rate: 0.3,
            min_latency_ms: 50,
            max_latency_ms: 100,
        },
        SimulatedProviderConfig {
            name: "ProviderB".to_string(),
            failure_rate: 0.2,
            min_latency_ms: 70,
            max_latency_ms: 150,
        },
    ]
}

#[derive(Debug, Deserialize)]
pub struct Herald {
    #[serde(alias = "dispatcher", default)]
    dispatch: DispatchConfig,
    /// Providers in priority order
    #[serde(alias = "provider", default = "default_providers")]
    providers: Vec<SimulatedProviderConfig>,
    #[serde(default)]
    demo: Demo,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

fn report(label: &str, outcome: &Outcome) -> anyhow::Result<()> {
    let outcome = serde_json::to_string(outcome)?;
    internal!(level = INFO, label, outcome = %outcome, "Submit result");
    Ok(())
}

fn request(index: usize) -> Request {
    Request::new(
        format!("user{index}@example.com"),
        format!("Test Email {index}"),
        format!("This is test email {index}"),
    )
}

impl Demo {
    /// Fire the canned traffic, then wait out the linger period.
    ///
    /// Returns every key it submitted, in submission order.
    async fn run(&self, dispatcher: &Dispatcher) -> anyhow::Result<Vec<IdempotencyKey>> {
        let mut keys = Vec::with_capacity(self.burst + 2);

        let single = Request::new("user@example.com", "Test Email", "This is a test email");
        keys.push(single.idempotency_key().clone());
        report("single", &dispatcher.submit(single).await)?;

        let duplicate = Request::new("user@example.com", "Duplicate Test", "Testing idempotency")
            .with_idempotency_key("duplicate-test-key");
        keys.push(duplicate.idempotency_key().clone());
        report("first", &dispatcher.submit(duplicate.clone()).await)?;
        report("duplicate", &dispatcher.submit(duplicate).await)?;

        let burst = (0..self.burst).map(request).collect::<Vec<_>>();
        keys.extend(burst.iter().map(|request| request.idempotency_key().clone()));

        let outcomes = join_all(burst.into_iter().map(|request| dispatcher.submit(request))).await;
        for outcome in &outcomes {
            report("burst", outcome)?;
        }

        internal!(
            level = INFO,
            queued = dispatcher.queue().len(),
            linger_secs = self.linger_secs,
            "Waiting for queued requests to drain"
        );
        tokio::time::sleep(Duration::from_secs(self.linger_secs)).await;

        Ok(keys)
    }
}

impl Herald {
    /// Run the dispatcher and the demonstration traffic until either the
    /// traffic completes or a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// If the configuration is rejected, or a signal handler cannot be installed
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let providers = self
            .providers
            .into_iter()
            .map(|config| {
                SimulatedProvider::new(config).map(|provider| Arc::new(provider) as Arc<dyn Provider>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let dispatcher = Arc::new(Dispatcher::new(self.dispatch, providers)?);

        internal!(level = INFO, "Controller running");

        let serve = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            let receiver = SHUTDOWN_BROADCAST.subscribe();
            async move { dispatcher.serve(receiver).await }
        });

        let keys = tokio::select! {
            r = self.demo.run(&dispatcher) => r?,
            r = shutdown() => {
                r?;
                Vec::new()
            }
        };

        internal!(level = INFO, "Shutting down...");

        if let Err(err) = SHUTDOWN_BROADCAST.send(Signal::Shutdown) {
            debug!("No receivers for shutdown signal: {err}");
        }
        serve.await?;

        let mut unfinished = 0_usize;
        for key in &keys {
            if let Some(status) = dispatcher.status(key.as_str()) {
                if !status.state.is_terminal() {
                    unfinished += 1;
                }
                let status = serde_json::to_string(&status)?;
                internal!(level = INFO, key = %key, status = %status, "Final status");
            }
        }

        for (provider, state) in dispatcher.circuit_states() {
            internal!(level = INFO, provider = %provider, ?state, "Final circuit state");
        }

        internal!(
            level = INFO,
            queued = dispatcher.queue().len(),
            unfinished,
            "Dispatcher stopped"
        );

        Ok(())
    }
}
