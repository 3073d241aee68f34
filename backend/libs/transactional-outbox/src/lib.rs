//! # Transactional Outbox
//!
//! Reliable announcement of domain events produced inside database transactions.
//!
//! ## How it works
//!
//! 1. A business mutation and its events are written in the same transaction: the events
//!    land in the `outbox_events` table as [`EventEnvelope`] rows with status `created`.
//! 2. An [`OutboxRelay`] ticks on a fixed interval. Each tick it claims exactly one
//!    `created` row (`FOR UPDATE SKIP LOCKED`), hands the payload to a [`Publisher`] and
//!    marks the row `done` or `error` inside the claim transaction.
//! 3. The envelope id travels with the message as its idempotency key so downstream
//!    consumers can drop duplicates.
//!
//! Either the business change and its events commit together or neither does, which
//! removes the dual-write gap between the database and the message bus.
//!
//! ## Guarantees
//!
//! - **At-least-once**: a row leaves `created` only after a publish attempt.
//! - **No double claim**: a row locked by one relay is invisible to the others.
//! - **Best-effort FIFO**: rows are claimed oldest first, but with several relays running
//!   concurrently global order is only approximate.
//! - **`error` is terminal**: failed rows are not retried automatically; operators re-queue
//!   them with `outbox-cli`.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use transactional_outbox::{NewEnvelope, PgOutboxStore};
//! use serde_json::json;
//! use sqlx::PgPool;
//!
//! async fn register(pool: &PgPool, outbox: &PgOutboxStore) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tx = pool.begin().await?;
//!
//!     sqlx::query("INSERT INTO users (email) VALUES ($1)")
//!         .bind("alice@example.com")
//!         .execute(&mut *tx)
//!         .await?;
//!
//!     let event = NewEnvelope::new("user.be.registered", &json!({ "email": "alice@example.com" }))?;
//!     outbox.append(&mut tx, &[event]).await?;
//!
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod error;
pub mod memory;
pub mod metrics;
pub mod publisher;
pub mod relay;
mod store;

pub use error::{OutboxError, OutboxResult};
pub use publisher::{KafkaPublisher, Publisher};
pub use relay::{OutboxRelay, RelayOutcome, DEFAULT_TICK_INTERVAL};
pub use store::{PgClaim, PgOutboxStore};

/// Lifecycle state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outbox_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    /// Waiting to be claimed by a relay
    Created,
    /// Published successfully
    Done,
    /// Publish attempt failed; requires operator action
    Error,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Created => "created",
            OutboxStatus::Done => "done",
            OutboxStatus::Error => "error",
        }
    }
}

/// One durable outbound message.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventEnvelope {
    /// Surrogate id assigned on insert, doubles as the bus idempotency key
    pub id: i64,

    /// Routing destination (e.g. "user.cud.changed")
    pub topic: String,

    /// Serialized domain event
    pub payload: serde_json::Value,

    pub status: OutboxStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Key handed to the publisher so duplicate deliveries can be detected downstream.
    pub fn idempotency_key(&self) -> String {
        self.id.to_string()
    }
}

/// An event that has not been written to the outbox yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEnvelope {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl NewEnvelope {
    /// Serialize `payload` and pair it with its routing topic.
    pub fn new<T: Serialize + ?Sized>(topic: impl Into<String>, payload: &T) -> OutboxResult<Self> {
        Ok(Self {
            topic: topic.into(),
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// Snapshot of the backlog, used for metrics and the operator CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingStats {
    /// Rows still in `created`
    pub pending: i64,
    /// Age in seconds of the oldest `created` row (0 when nothing is pending)
    pub oldest_age_seconds: i64,
}

/// Storage side of the relay: hands out one locked envelope at a time.
///
/// Appending happens inside the caller's own transaction, so each implementation
/// exposes it with its own transaction type (see [`PgOutboxStore::append`]).
#[async_trait]
pub trait OutboxStore: Send + Sync {
    type Claim: OutboxClaim;

    /// Lock and return the oldest `created` envelope not already locked by another
    /// claimer, or `None` when nothing is eligible.
    ///
    /// The claim owns the underlying transaction. Dropping it without marking releases
    /// the row unchanged.
    async fn claim_one(&self) -> OutboxResult<Option<Self::Claim>>;

    /// Count of pending rows and age of the oldest one.
    async fn pending_stats(&self) -> OutboxResult<PendingStats>;
}

/// A claimed envelope together with the lock that protects it.
#[async_trait]
pub trait OutboxClaim: Send + Sized {
    fn envelope(&self) -> &EventEnvelope;

    /// Record a successful publish and release the lock.
    async fn mark_done(self) -> OutboxResult<()>;

    /// Record a failed publish and release the lock. The `error` status is durable.
    async fn mark_error(self) -> OutboxResult<()>;
}
