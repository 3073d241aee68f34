//! Configuration management for Account Service
//!
//! Settings come from environment variables, with a `.env` file loaded first in debug
//! builds.
//!
//! # Example
//!
//! ```no_run
//! use account_service::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("OTP enabled: {}", settings.otp.enabled);
//!     Ok(())
//! }
//! ```

use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Upper bound for `OTP_RECOVERY_CODE_COUNT`
pub const MAX_RECOVERY_CODES: usize = 100;

/// Upper bound for both JWT lifetimes (one year)
pub const MAX_TOKEN_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub kafka: KafkaSettings,
    pub jwt: JwtSettings,
    pub otp: OtpSettings,
    pub outbox: OutboxSettings,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn load() -> Result<Self> {
        if cfg!(debug_assertions) && dotenvy::dotenv().is_ok() {
            info!("Loaded .env file for development");
        }

        Self::from_source(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_source<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Settings {
            database: DatabaseSettings::from_source(&lookup)?,
            kafka: KafkaSettings::from_source(&lookup)?,
            jwt: JwtSettings::from_source(&lookup)?,
            otp: OtpSettings::from_source(&lookup)?,
            outbox: OutboxSettings::from_source(&lookup)?,
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        None => Ok(default),
    }
}

/// Database connection settings
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseSettings {
    fn from_source<F: Fn(&str) -> Option<String>>(lookup: &F) -> Result<Self> {
        Ok(Self {
            url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: parse_or(lookup, "DATABASE_MAX_CONNECTIONS", 20)?,
            min_connections: parse_or(lookup, "DATABASE_MIN_CONNECTIONS", 2)?,
            acquire_timeout: Duration::from_secs(parse_or(lookup, "DATABASE_ACQUIRE_TIMEOUT", 5)?),
        })
    }
}

/// Kafka event streaming settings
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    /// Empty when the relay should not run
    pub brokers: Vec<String>,
    pub topic_prefix: Option<String>,
    pub producer_timeout: Duration,
}

impl KafkaSettings {
    fn from_source<F: Fn(&str) -> Option<String>>(lookup: &F) -> Result<Self> {
        let brokers = lookup("KAFKA_BROKERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            brokers,
            topic_prefix: lookup("KAFKA_TOPIC_PREFIX").filter(|p| !p.trim().is_empty()),
            producer_timeout: Duration::from_secs(parse_or(lookup, "KAFKA_PRODUCER_TIMEOUT", 5)?),
        })
    }
}

/// How tokens are signed
#[derive(Debug, Clone)]
pub enum JwtKeys {
    /// HS256 shared secret
    Secret(String),
    /// RS256 PEM key pair
    RsaPem {
        private_key: String,
        public_key: String,
    },
}

/// JWT authentication settings
#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub keys: JwtKeys,
    /// Lifetime of a full `user` token
    pub ttl: Duration,
    /// Lifetime of a `2fa-check` token
    pub two_fa_ttl: Duration,
}

impl JwtSettings {
    fn from_source<F: Fn(&str) -> Option<String>>(lookup: &F) -> Result<Self> {
        // Prefer PEM-based RSA keys when both halves are present.
        let keys = match (lookup("JWT_PRIVATE_KEY"), lookup("JWT_PUBLIC_KEY")) {
            (Some(private_key), Some(public_key)) => JwtKeys::RsaPem {
                private_key,
                public_key,
            },
            (Some(_), None) | (None, Some(_)) => {
                bail!("JWT_PRIVATE_KEY and JWT_PUBLIC_KEY must be set together")
            }
            (None, None) => match lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
                Some(secret) => JwtKeys::Secret(secret),
                None => bail!("JWT_SECRET or JWT_PRIVATE_KEY/JWT_PUBLIC_KEY must be set"),
            },
        };

        Ok(Self {
            keys,
            ttl: ttl_or(lookup, "JWT_TTL_SECONDS", 3600)?,
            two_fa_ttl: ttl_or(lookup, "JWT_TWO_FA_TTL_SECONDS", 300)?,
        })
    }
}

fn ttl_or<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u64) -> Result<Duration> {
    let secs: u64 = parse_or(lookup, key, default)?;
    if secs == 0 || secs > MAX_TOKEN_TTL_SECONDS {
        bail!("{} must be between 1 and {}", key, MAX_TOKEN_TTL_SECONDS);
    }
    Ok(Duration::from_secs(secs))
}

/// Second factor settings
#[derive(Debug, Clone)]
pub struct OtpSettings {
    /// Global switch; when off nobody is asked for a second factor
    pub enabled: bool,
    pub issuer: String,
    pub recovery_code_count: usize,
    /// Accepted 30 s steps on either side of the current one
    pub skew: u8,
}

impl Default for OtpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            issuer: "Accounts".to_string(),
            recovery_code_count: 10,
            skew: 0,
        }
    }
}

impl OtpSettings {
    fn from_source<F: Fn(&str) -> Option<String>>(lookup: &F) -> Result<Self> {
        let defaults = Self::default();
        let issuer = lookup("OTP_ISSUER").unwrap_or(defaults.issuer);
        if issuer.contains(':') {
            bail!("OTP_ISSUER must not contain ':'");
        }

        let recovery_code_count: usize =
            parse_or(lookup, "OTP_RECOVERY_CODE_COUNT", defaults.recovery_code_count)?;
        if recovery_code_count == 0 || recovery_code_count > MAX_RECOVERY_CODES {
            bail!(
                "OTP_RECOVERY_CODE_COUNT must be between 1 and {}",
                MAX_RECOVERY_CODES
            );
        }

        Ok(Self {
            enabled: parse_or(lookup, "OTP_ENABLED", defaults.enabled)?,
            issuer,
            recovery_code_count,
            skew: parse_or(lookup, "OTP_SKEW", defaults.skew)?,
        })
    }
}

/// Outbox relay settings
#[derive(Debug, Clone)]
pub struct OutboxSettings {
    pub tick: Duration,
}

impl OutboxSettings {
    fn from_source<F: Fn(&str) -> Option<String>>(lookup: &F) -> Result<Self> {
        let tick_ms: u64 = parse_or(lookup, "OUTBOX_TICK_MS", 50)?;
        if tick_ms == 0 {
            bail!("OUTBOX_TICK_MS must be positive");
        }
        Ok(Self {
            tick: Duration::from_millis(tick_ms),
        })
    }
}
