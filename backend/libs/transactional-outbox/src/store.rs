//! PostgreSQL-backed outbox store.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, warn};

use crate::{
    EventEnvelope, NewEnvelope, OutboxClaim, OutboxError, OutboxResult, OutboxStatus,
    OutboxStore, PendingStats,
};

/// Oldest unlocked pending row. `SKIP LOCKED` keeps concurrent relays from waiting on (or
/// double-delivering) a row another relay already holds.
const CLAIM_ONE_SQL: &str = r#"
    SELECT id, topic, payload, status, created_at, updated_at
    FROM outbox_events
    WHERE status = 'created'
    ORDER BY created_at ASC, id ASC
    LIMIT 1
    FOR UPDATE SKIP LOCKED
"#;

/// SQLx implementation of the outbox store.
#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert envelopes with status `created` inside the caller's transaction.
    ///
    /// All rows go in with a single statement, so either the whole set is written or the
    /// statement fails and the caller's transaction is doomed with it.
    ///
    /// Returns the assigned envelope ids in insertion order.
    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        events: &[NewEnvelope],
    ) -> OutboxResult<Vec<i64>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder =
            QueryBuilder::<Postgres>::new("INSERT INTO outbox_events (topic, payload, status) ");
        builder.push_values(events, |mut row, event| {
            row.push_bind(&event.topic)
                .push_bind(&event.payload)
                .push_bind(OutboxStatus::Created);
        });
        builder.push(" RETURNING id");

        let ids: Vec<i64> = builder
            .build_query_scalar()
            .fetch_all(&mut **tx)
            .await?;

        debug!(count = ids.len(), ids = ?ids, "Envelopes appended to outbox");

        Ok(ids)
    }

    /// Move `error` rows created at or after `since` back to `created`.
    pub async fn requeue_errors(&self, since: DateTime<Utc>) -> OutboxResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'created',
                updated_at = NOW()
            WHERE status = 'error'
              AND created_at >= $1
            "#,
        )
        .bind(since)
        .execute(&self.pool)
        .await
        .context("Failed to requeue failed envelopes since timestamp")?;

        Ok(res.rows_affected())
    }

    /// Move `error` rows with ids in `from_id..=to_id` back to `created`.
    pub async fn requeue_range(&self, from_id: i64, to_id: i64) -> OutboxResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'created',
                updated_at = NOW()
            WHERE status = 'error'
              AND id BETWEEN $1 AND $2
            "#,
        )
        .bind(from_id)
        .bind(to_id)
        .execute(&self.pool)
        .await
        .context("Failed to requeue failed envelopes by id range")?;

        Ok(res.rows_affected())
    }

    /// Delete delivered rows last touched before `now - older_than`.
    pub async fn purge_done(&self, older_than: ChronoDuration) -> OutboxResult<u64> {
        let cutoff = Utc::now() - older_than;

        let res = sqlx::query(
            r#"
            DELETE FROM outbox_events
            WHERE status = 'done'
              AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("Failed to purge delivered envelopes")?;

        Ok(res.rows_affected())
    }

    /// Current status of one row, mostly useful to tests and tooling.
    pub async fn status_of(&self, id: i64) -> OutboxResult<Option<OutboxStatus>> {
        let status = sqlx::query_scalar::<_, OutboxStatus>(
            "SELECT status FROM outbox_events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    type Claim = PgClaim;

    async fn claim_one(&self) -> OutboxResult<Option<PgClaim>> {
        let mut tx = self.pool.begin().await?;

        let envelope = sqlx::query_as::<_, EventEnvelope>(CLAIM_ONE_SQL)
            .fetch_optional(&mut *tx)
            .await?;

        match envelope {
            Some(envelope) => {
                debug!(
                    envelope_id = envelope.id,
                    topic = %envelope.topic,
                    "Envelope claimed"
                );
                Ok(Some(PgClaim { tx, envelope }))
            }
            None => {
                tx.rollback().await?;
                Ok(None)
            }
        }
    }

    async fn pending_stats(&self) -> OutboxResult<PendingStats> {
        let rec = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS pending,
                COALESCE(EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::BIGINT, 0) AS age_seconds
            FROM outbox_events
            WHERE status = 'created'
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute pending stats")?;

        Ok(PendingStats {
            pending: rec.try_get("pending")?,
            oldest_age_seconds: rec.try_get("age_seconds")?,
        })
    }
}

/// A row locked by `claim_one`, still inside its transaction.
pub struct PgClaim {
    tx: Transaction<'static, Postgres>,
    envelope: EventEnvelope,
}

impl PgClaim {
    async fn finish(self, status: OutboxStatus) -> OutboxResult<()> {
        let PgClaim { mut tx, envelope } = self;

        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = $1,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(status)
        .bind(envelope.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            warn!(envelope_id = envelope.id, "Envelope vanished while claimed");
            return Err(OutboxError::EnvelopeNotFound(envelope.id));
        }

        tx.commit().await?;

        debug!(
            envelope_id = envelope.id,
            status = status.as_str(),
            "Envelope status recorded"
        );

        Ok(())
    }
}

#[async_trait]
impl OutboxClaim for PgClaim {
    fn envelope(&self) -> &EventEnvelope {
        &self.envelope
    }

    async fn mark_done(self) -> OutboxResult<()> {
        self.finish(OutboxStatus::Done).await
    }

    async fn mark_error(self) -> OutboxResult<()> {
        self.finish(OutboxStatus::Error).await
    }
}
