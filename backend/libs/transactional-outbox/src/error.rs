//! Error types for the transactional outbox library.

use thiserror::Error;

/// Result type alias for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur during outbox operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database operation failed (lock conflict, connection loss, ...)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Envelope not found in outbox
    #[error("Envelope not found: {0}")]
    EnvelopeNotFound(i64),

    /// Failed to publish to the message broker
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error with context
    #[error("Outbox error: {0}")]
    Other(#[from] anyhow::Error),
}

impl OutboxError {
    /// Failures the relay expects to clear up by itself on a later tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, OutboxError::DatabaseError(_) | OutboxError::Other(_))
    }
}
