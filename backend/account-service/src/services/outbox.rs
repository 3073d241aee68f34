/// Background outbox relay for account-service
///
/// Account mutations append their events to `outbox_events` inside the mutation
/// transaction; this task moves them to the message bus.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use transactional_outbox::metrics::OutboxMetrics;
use transactional_outbox::{OutboxRelay, OutboxStore, Publisher};

/// Running relay task and the switch that stops it.
pub struct OutboxRelayHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl OutboxRelayHandle {
    /// Signal the relay and wait for its in-flight cycle to finish.
    pub async fn shutdown(self) {
        // Receiver already gone means the task has exited on its own.
        let _ = self.shutdown.send(true);

        if let Err(e) = self.task.await {
            error!(error = %e, "Outbox relay task failed");
        } else {
            info!("Outbox relay shut down");
        }
    }
}

/// Spawn the relay loop on the current runtime.
pub fn spawn_outbox_relay<S, P>(
    store: Arc<S>,
    publisher: Arc<P>,
    tick: Duration,
    metrics: Option<OutboxMetrics>,
) -> OutboxRelayHandle
where
    S: OutboxStore + 'static,
    S::Claim: 'static,
    P: Publisher + 'static,
{
    let (shutdown, shutdown_rx) = watch::channel(false);

    let mut relay = OutboxRelay::new(store, publisher).with_tick(tick);
    if let Some(metrics) = metrics {
        relay = relay.with_metrics(metrics);
    }

    let task = tokio::spawn(async move { relay.run(shutdown_rx).await });

    OutboxRelayHandle { shutdown, task }
}
