//! Background relay moving envelopes from the outbox to the message bus.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::metrics::OutboxMetrics;
use crate::{OutboxClaim, OutboxResult, OutboxStore, Publisher};

/// Time between two relay cycles.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Pending stats are refreshed every this many ticks when metrics are enabled.
const STATS_REFRESH_TICKS: u64 = 20;

/// What a single relay cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Nothing was eligible for claiming
    Idle,
    /// Envelope published and marked `done`
    Delivered(i64),
    /// Publish failed and the envelope was marked `error`
    Failed(i64),
}

/// Claims, publishes and settles one envelope per tick.
///
/// Several relays may run against the same store; row locking guarantees each envelope is
/// handled by exactly one of them at a time.
pub struct OutboxRelay<S: OutboxStore, P: Publisher> {
    store: Arc<S>,
    publisher: Arc<P>,
    tick: Duration,
    metrics: Option<OutboxMetrics>,
}

impl<S: OutboxStore, P: Publisher> OutboxRelay<S, P> {
    pub fn new(store: Arc<S>, publisher: Arc<P>) -> Self {
        Self {
            store,
            publisher,
            tick: DEFAULT_TICK_INTERVAL,
            metrics: None,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Also update Prometheus metrics while relaying.
    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one claim → publish → mark cycle.
    ///
    /// A publish failure is not an error of the cycle: the envelope is marked `error` and
    /// [`RelayOutcome::Failed`] is returned. Errors are returned only when the store itself
    /// fails (claim or mark), in which case any claim is released unchanged.
    pub async fn process_one(&self) -> OutboxResult<RelayOutcome> {
        let Some(claim) = self.store.claim_one().await? else {
            return Ok(RelayOutcome::Idle);
        };

        let (id, topic, key) = {
            let envelope = claim.envelope();
            (envelope.id, envelope.topic.clone(), envelope.idempotency_key())
        };

        let payload = serde_json::to_vec(&claim.envelope().payload);
        let published = match payload {
            Ok(bytes) => self.publisher.publish(&bytes, &topic, &key).await,
            Err(e) => Err(e.into()),
        };

        match published {
            Ok(()) => {
                claim.mark_done().await?;
                if let Some(metrics) = &self.metrics {
                    metrics.delivered.inc();
                }
                info!(envelope_id = id, topic = %topic, "Envelope relayed");
                Ok(RelayOutcome::Delivered(id))
            }
            Err(e) => {
                error!(
                    envelope_id = id,
                    topic = %topic,
                    error = %e,
                    "Failed to publish envelope, marking as error"
                );
                claim.mark_error().await?;
                if let Some(metrics) = &self.metrics {
                    metrics.failed.inc();
                }
                Ok(RelayOutcome::Failed(id))
            }
        }
    }

    /// Tick until `shutdown` turns `true` (or its sender goes away).
    ///
    /// Shutdown is only observed between cycles: a cycle that has started always runs to
    /// its mark step before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_ms = self.tick.as_millis() as u64, "Outbox relay starting");

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: u64 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping outbox relay");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.process_one().await {
                        Ok(RelayOutcome::Idle) => {}
                        Ok(outcome) => debug!(?outcome, "Relay cycle finished"),
                        Err(e) if e.is_transient() => {
                            warn!(error = %e, "Outbox relay cycle failed, retrying next tick");
                        }
                        Err(e) => error!(error = %e, "Outbox relay cycle failed"),
                    }

                    ticks += 1;
                    if ticks % STATS_REFRESH_TICKS == 0 {
                        self.refresh_stats().await;
                    }
                }
            }
        }

        info!("Outbox relay stopped");
    }

    async fn refresh_stats(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };

        match self.store.pending_stats().await {
            Ok(stats) => {
                metrics.pending.set(stats.pending);
                metrics.oldest_pending_age_seconds.set(stats.oldest_age_seconds);
            }
            Err(e) => warn!(error = %e, "Failed to refresh outbox pending stats"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryOutboxStore, RecordingPublisher};
    use crate::{NewEnvelope, OutboxStatus};
    use serde_json::json;
    use std::collections::HashSet;

    fn event(topic: &str, n: u32) -> NewEnvelope {
        NewEnvelope::new(topic, &json!({ "n": n })).unwrap()
    }

    fn relay(
        store: &InMemoryOutboxStore,
        publisher: &RecordingPublisher,
    ) -> OutboxRelay<InMemoryOutboxStore, RecordingPublisher> {
        OutboxRelay::new(Arc::new(store.clone()), Arc::new(publisher.clone()))
    }

    #[tokio::test]
    async fn test_delivers_and_marks_done() {
        let store = InMemoryOutboxStore::new();
        let publisher = RecordingPublisher::new();
        let ids = store.append(&[event("user.cud.changed", 1)]).unwrap();

        let outcome = relay(&store, &publisher).process_one().await.unwrap();

        assert_eq!(outcome, RelayOutcome::Delivered(ids[0]));
        assert_eq!(store.status_of(ids[0]), Some(OutboxStatus::Done));

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "user.cud.changed");
        assert_eq!(published[0].idempotency_key, ids[0].to_string());
        assert_eq!(published[0].json().unwrap(), json!({ "n": 1 }));
    }

    #[tokio::test]
    async fn test_idle_when_nothing_pending() {
        let store = InMemoryOutboxStore::new();
        let publisher = RecordingPublisher::new();

        let outcome = relay(&store, &publisher).process_one().await.unwrap();
        assert_eq!(outcome, RelayOutcome::Idle);
    }

    #[tokio::test]
    async fn test_publish_failure_is_terminal() {
        let store = InMemoryOutboxStore::new();
        let publisher = RecordingPublisher::new();
        publisher.fail_next(1);
        let ids = store.append(&[event("user.be.registered", 1)]).unwrap();
        let relay = relay(&store, &publisher);

        assert_eq!(
            relay.process_one().await.unwrap(),
            RelayOutcome::Failed(ids[0])
        );
        assert_eq!(store.status_of(ids[0]), Some(OutboxStatus::Error));

        // Not picked up again even though the publisher has recovered.
        assert_eq!(relay.process_one().await.unwrap(), RelayOutcome::Idle);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_block_following_envelopes() {
        let store = InMemoryOutboxStore::new();
        let publisher = RecordingPublisher::new();
        publisher.fail_topic("broken");
        store
            .append(&[event("broken", 1), event("user.cud.changed", 2)])
            .unwrap();
        let relay = relay(&store, &publisher);

        assert!(matches!(
            relay.process_one().await.unwrap(),
            RelayOutcome::Failed(_)
        ));
        assert!(matches!(
            relay.process_one().await.unwrap(),
            RelayOutcome::Delivered(_)
        ));
        assert_eq!(publisher.published()[0].topic, "user.cud.changed");
    }

    #[tokio::test]
    async fn test_claim_error_is_transient_and_leaves_row_pending() {
        let store = InMemoryOutboxStore::new();
        let publisher = RecordingPublisher::new();
        let ids = store.append(&[event("t", 1)]).unwrap();
        store.fail_next_claims(1);
        let relay = relay(&store, &publisher);

        let err = relay.process_one().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.status_of(ids[0]), Some(OutboxStatus::Created));

        assert_eq!(
            relay.process_one().await.unwrap(),
            RelayOutcome::Delivered(ids[0])
        );
    }

    #[tokio::test]
    async fn test_oldest_first() {
        let store = InMemoryOutboxStore::new();
        let publisher = RecordingPublisher::new();
        for n in 0..3 {
            store.append(&[event("t", n)]).unwrap();
        }
        let relay = relay(&store, &publisher);

        for _ in 0..3 {
            relay.process_one().await.unwrap();
        }

        let order: Vec<serde_json::Value> = publisher
            .published()
            .iter()
            .map(|m| m.json().unwrap()["n"].clone())
            .collect();
        assert_eq!(order, vec![json!(0), json!(1), json!(2)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_relays_never_double_deliver() {
        let store = InMemoryOutboxStore::new();
        let publisher = RecordingPublisher::new().with_delay(Duration::from_millis(2));
        let events: Vec<NewEnvelope> = (0..40).map(|n| event("t", n)).collect();
        store.append(&events).unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let relay = relay(&store, &publisher);
            handles.push(tokio::spawn(async move {
                while relay.process_one().await.unwrap() != RelayOutcome::Idle {}
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let keys: Vec<String> = publisher
            .published()
            .into_iter()
            .map(|m| m.idempotency_key)
            .collect();
        let unique: HashSet<&String> = keys.iter().collect();
        assert_eq!(keys.len(), 40);
        assert_eq!(unique.len(), 40);
        assert!(store
            .envelopes()
            .iter()
            .all(|e| e.status == OutboxStatus::Done));
    }

    #[tokio::test]
    async fn test_run_drains_outbox_and_stops_on_signal() {
        let store = InMemoryOutboxStore::new();
        let publisher = RecordingPublisher::new();
        store
            .append(&[event("t", 1), event("t", 2), event("t", 3)])
            .unwrap();

        let relay = relay(&store, &publisher).with_tick(Duration::from_millis(5));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { relay.run(rx).await });

        for _ in 0..200 {
            if publisher.published().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(publisher.published().len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_cycle() {
        let store = InMemoryOutboxStore::new();
        let publisher = RecordingPublisher::new().with_delay(Duration::from_millis(200));
        let ids = store.append(&[event("t", 1), event("t", 2)]).unwrap();

        let relay = relay(&store, &publisher).with_tick(Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { relay.run(rx).await });

        // First tick fires immediately; the publish is now sleeping.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(store.status_of(ids[0]), Some(OutboxStatus::Done));
        assert_eq!(store.status_of(ids[1]), Some(OutboxStatus::Created));
        assert_eq!(publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_follow_outcomes() {
        let store = InMemoryOutboxStore::new();
        let publisher = RecordingPublisher::new();
        publisher.fail_topic("broken");
        store
            .append(&[event("ok", 1), event("broken", 2)])
            .unwrap();

        let registry = prometheus::Registry::new();
        let metrics = OutboxMetrics::register_in("test", &registry).unwrap();
        let relay = relay(&store, &publisher).with_metrics(metrics.clone());

        relay.process_one().await.unwrap();
        relay.process_one().await.unwrap();
        relay.refresh_stats().await;

        assert_eq!(metrics.delivered.get(), 1);
        assert_eq!(metrics.failed.get(), 1);
        assert_eq!(metrics.pending.get(), 0);
    }
}
