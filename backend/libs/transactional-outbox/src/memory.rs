//! In-process implementations of the store and publisher.
//!
//! They keep the same contracts as the Postgres store and the Kafka publisher (skip-locked
//! claims, atomic appends, terminal `error` rows) so relay and service logic can be tested
//! without external infrastructure.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;

use crate::{
    EventEnvelope, NewEnvelope, OutboxClaim, OutboxError, OutboxResult, OutboxStatus,
    OutboxStore, PendingStats, Publisher,
};

#[derive(Default)]
struct StoreState {
    next_id: i64,
    rows: BTreeMap<i64, EventEnvelope>,
    locked: HashSet<i64>,
    fail_appends: bool,
    failing_claims: usize,
}

/// Outbox store kept in memory. Clones share the same rows.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<Mutex<StoreState>>,
}

fn lock(state: &Mutex<StoreState>) -> MutexGuard<'_, StoreState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert all envelopes as `created`, or none of them.
    pub fn append(&self, events: &[NewEnvelope]) -> OutboxResult<Vec<i64>> {
        let mut state = lock(&self.state);
        if state.fail_appends {
            return Err(OutboxError::Other(anyhow!("outbox append rejected")));
        }

        let now = Utc::now();
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            state.next_id += 1;
            let id = state.next_id;
            state.rows.insert(
                id,
                EventEnvelope {
                    id,
                    topic: event.topic.clone(),
                    payload: event.payload.clone(),
                    status: OutboxStatus::Created,
                    created_at: now,
                    updated_at: now,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    /// Make every following `append` fail until switched off again.
    pub fn set_fail_appends(&self, fail: bool) {
        lock(&self.state).fail_appends = fail;
    }

    /// Make the next `n` claims fail as if the database connection dropped.
    pub fn fail_next_claims(&self, n: usize) {
        lock(&self.state).failing_claims = n;
    }

    /// Snapshot of all rows in id order.
    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        lock(&self.state).rows.values().cloned().collect()
    }

    pub fn status_of(&self, id: i64) -> Option<OutboxStatus> {
        lock(&self.state).rows.get(&id).map(|row| row.status)
    }

    /// Operator re-queue: move every `error` row back to `created`.
    pub fn requeue_errors(&self) -> u64 {
        let mut state = lock(&self.state);
        let now = Utc::now();
        let mut count = 0;
        for row in state.rows.values_mut() {
            if row.status == OutboxStatus::Error {
                row.status = OutboxStatus::Created;
                row.updated_at = now;
                count += 1;
            }
        }
        count
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    type Claim = MemoryClaim;

    async fn claim_one(&self) -> OutboxResult<Option<MemoryClaim>> {
        let mut state = lock(&self.state);
        if state.failing_claims > 0 {
            state.failing_claims -= 1;
            return Err(OutboxError::Other(anyhow!("connection lost during claim")));
        }

        let candidate = state
            .rows
            .values()
            .filter(|row| row.status == OutboxStatus::Created && !state.locked.contains(&row.id))
            .min_by_key(|row| (row.created_at, row.id))
            .cloned();

        Ok(candidate.map(|envelope| {
            state.locked.insert(envelope.id);
            MemoryClaim {
                state: Arc::clone(&self.state),
                envelope,
            }
        }))
    }

    async fn pending_stats(&self) -> OutboxResult<PendingStats> {
        let state = lock(&self.state);
        let now = Utc::now();
        let pending: Vec<&EventEnvelope> = state
            .rows
            .values()
            .filter(|row| row.status == OutboxStatus::Created)
            .collect();

        let oldest_age_seconds = pending
            .iter()
            .map(|row| row.created_at)
            .min()
            .map(|oldest| (now - oldest).num_seconds())
            .unwrap_or(0);

        Ok(PendingStats {
            pending: pending.len() as i64,
            oldest_age_seconds,
        })
    }
}

/// Claim on an in-memory row. Dropping it without marking releases the row unchanged.
pub struct MemoryClaim {
    state: Arc<Mutex<StoreState>>,
    envelope: EventEnvelope,
}

impl MemoryClaim {
    fn finish(&self, status: OutboxStatus) -> OutboxResult<()> {
        let mut state = lock(&self.state);
        let row = state
            .rows
            .get_mut(&self.envelope.id)
            .ok_or(OutboxError::EnvelopeNotFound(self.envelope.id))?;
        row.status = status;
        row.updated_at = Utc::now();
        Ok(())
    }
}

impl Drop for MemoryClaim {
    fn drop(&mut self) {
        lock(&self.state).locked.remove(&self.envelope.id);
    }
}

#[async_trait]
impl OutboxClaim for MemoryClaim {
    fn envelope(&self) -> &EventEnvelope {
        &self.envelope
    }

    async fn mark_done(self) -> OutboxResult<()> {
        self.finish(OutboxStatus::Done)
    }

    async fn mark_error(self) -> OutboxResult<()> {
        self.finish(OutboxStatus::Error)
    }
}

/// A message captured by [`RecordingPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub idempotency_key: String,
}

impl PublishedMessage {
    pub fn json(&self) -> OutboxResult<serde_json::Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

#[derive(Default)]
struct RecorderState {
    published: Vec<PublishedMessage>,
    failing_publishes: usize,
    failing_topics: HashSet<String>,
}

/// Publisher that keeps everything it is given. Can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    state: Arc<Mutex<RecorderState>>,
    delay: Option<Duration>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait `delay` inside every publish call, to simulate a slow broker.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `n` publish calls.
    pub fn fail_next(&self, n: usize) {
        self.recorder().failing_publishes = n;
    }

    /// Fail every publish to `topic`.
    pub fn fail_topic(&self, topic: &str) {
        self.recorder().failing_topics.insert(topic.to_string());
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.recorder().published.clone()
    }

    fn recorder(&self) -> MutexGuard<'_, RecorderState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        payload: &[u8],
        topic: &str,
        idempotency_key: &str,
    ) -> OutboxResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.recorder();
        if state.failing_topics.contains(topic) {
            return Err(OutboxError::PublishFailed(format!("topic {topic} unavailable")));
        }
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(OutboxError::PublishFailed("broker unavailable".to_string()));
        }

        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            idempotency_key: idempotency_key.to_string(),
        });
        Ok(())
    }
}
