/// Account Service Library
///
/// Registration, activation and password management, staged login with an optional
/// TOTP second factor, and transactional announcement of account events.
///
/// ## Modules
///
/// - `config`: Service configuration
/// - `db`: User repository (Postgres)
/// - `domain`: Account events and their outbox topics
/// - `error`: Error types
/// - `models`: Data models and request DTOs
/// - `security`: JWT, password hashing, TOTP
/// - `services`: Business logic (account lifecycle, auth, 2FA, outbox relay)
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod models;
pub mod security;
pub mod services;

// Re-export commonly used types
pub use error::{AccountError, ErrorKind, Result};
