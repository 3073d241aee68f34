use thiserror::Error;
use transactional_outbox::OutboxError;

pub type Result<T> = std::result::Result<T, AccountError>;

#[derive(Debug, Error)]
pub enum AccountError {
    /// Unknown email, wrong password and inactive account all look the same to the caller
    #[error("incorrect user and password")]
    InvalidCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Invalid activation code")]
    InvalidActivationCode,

    #[error("Invalid password reset code")]
    InvalidResetCode,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token lacks required scope: {0}")]
    InsufficientScope(String),

    #[error("invalid otp code")]
    InvalidOtpCode,

    #[error("Two FA enrollment not started")]
    TwoFaNotInitiated,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Outbox error: {0}")]
    Outbox(String),

    #[error("JWT error: {0}")]
    JwtError(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Coarse failure category handed to whatever transport sits in front of the services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input, never retried
    Validation,
    /// Duplicate registration
    Conflict,
    /// Unknown activation or reset code
    NotFound,
    /// Bad credentials, bad OTP code, invalid or under-scoped token
    AuthRejected,
    /// Storage or signing failure
    Internal,
}

impl AccountError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccountError::Validation(_) | AccountError::TwoFaNotInitiated => ErrorKind::Validation,
            AccountError::EmailAlreadyExists => ErrorKind::Conflict,
            AccountError::InvalidActivationCode
            | AccountError::InvalidResetCode
            | AccountError::UserNotFound => ErrorKind::NotFound,
            AccountError::InvalidCredentials
            | AccountError::InvalidToken
            | AccountError::InsufficientScope(_)
            | AccountError::InvalidOtpCode => ErrorKind::AuthRejected,
            AccountError::Database(_)
            | AccountError::Outbox(_)
            | AccountError::JwtError(_)
            | AccountError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show to the caller.
    pub fn public_message(&self) -> String {
        match self.kind() {
            // Don't leak internal details
            ErrorKind::Internal => "Internal server error".to_string(),
            ErrorKind::AuthRejected => match self {
                AccountError::InvalidOtpCode => self.to_string(),
                AccountError::InvalidCredentials => self.to_string(),
                _ => "Invalid or expired token".to_string(),
            },
            _ => self.to_string(),
        }
    }
}

// Conversions from external error types
impl From<sqlx::Error> for AccountError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);
        AccountError::Database(err.to_string())
    }
}

impl From<OutboxError> for AccountError {
    fn from(err: OutboxError) -> Self {
        tracing::error!("Outbox error: {}", err);
        AccountError::Outbox(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AccountError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        tracing::error!("JWT error: {}", err);
        AccountError::JwtError(err.to_string())
    }
}

impl From<serde_json::Error> for AccountError {
    fn from(err: serde_json::Error) -> Self {
        AccountError::Internal(format!("Serialization failed: {}", err))
    }
}

impl From<validator::ValidationErrors> for AccountError {
    fn from(err: validator::ValidationErrors) -> Self {
        AccountError::Validation(err.to_string())
    }
}
