/// Two-Factor Authentication (2FA) using TOTP (Time-based One-Time Password)
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{rngs::OsRng, Rng};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::config::OtpSettings;
use crate::error::{AccountError, Result};
use crate::models::OtpSetup;

const DIGITS: usize = 6;
const STEP_SECONDS: u64 = 30;
const RECOVERY_CODE_RANGE: std::ops::RangeInclusive<u32> = 100_000..=999_999;

/// One-time password capability used by the auth and two-factor services.
pub trait OtpEngine: Send + Sync {
    /// Fresh secret plus provisioning URI for `account_id`. Persists nothing.
    fn generate(&self, account_id: &str) -> Result<OtpSetup>;

    /// Check `code` against `secret` at the current instant.
    fn validate_code(&self, secret: &str, code: &str) -> Result<bool>;

    /// `count` pairwise-distinct 6-digit recovery codes.
    fn generate_recovery_codes(&self, count: usize) -> Result<Vec<String>>;
}

/// RFC 6238 engine: SHA-512, 6 digits, 30 second steps, base32 secrets.
pub struct TotpEngine {
    issuer: String,
    skew: u8,
}

impl TotpEngine {
    pub fn new(issuer: impl Into<String>, skew: u8) -> Self {
        Self {
            issuer: issuer.into(),
            skew,
        }
    }

    pub fn from_settings(settings: &OtpSettings) -> Self {
        Self::new(settings.issuer.clone(), settings.skew)
    }

    fn totp(&self, secret_bytes: Vec<u8>, account_id: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA512,
            DIGITS,
            self.skew,
            STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account_id.to_string(),
        )
        .map_err(|e| AccountError::Internal(format!("TOTP init failed: {}", e)))
    }

    fn decode_secret(secret: &str) -> Result<Vec<u8>> {
        Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| AccountError::Internal(format!("Invalid TOTP secret: {}", e)))
    }

    /// Check `code` against `secret` at `unix_secs`.
    pub fn validate_code_at(&self, secret: &str, code: &str, unix_secs: u64) -> Result<bool> {
        if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }
        // The account label plays no part in code derivation.
        let totp = self.totp(Self::decode_secret(secret)?, "verify")?;
        Ok(totp.check(code, unix_secs))
    }

    /// Code for `secret` at `unix_secs`; what an authenticator app would show.
    pub fn code_at(&self, secret: &str, unix_secs: u64) -> Result<String> {
        let totp = self.totp(Self::decode_secret(secret)?, "verify")?;
        Ok(totp.generate(unix_secs))
    }
}

fn now_unix() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| AccountError::Internal(format!("System clock before epoch: {}", e)))
}

impl OtpEngine for TotpEngine {
    fn generate(&self, account_id: &str) -> Result<OtpSetup> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| AccountError::Internal(format!("TOTP secret generation failed: {}", e)))?;

        let totp = self.totp(secret_bytes, account_id)?;

        // totp-rs omits `digits` when it is the default 6.
        let mut provisioning_uri = totp.get_url();
        if !provisioning_uri.contains("digits=") {
            provisioning_uri.push_str(&format!("&digits={}", DIGITS));
        }

        Ok(OtpSetup {
            secret: secret.to_encoded().to_string(),
            provisioning_uri,
        })
    }

    fn validate_code(&self, secret: &str, code: &str) -> Result<bool> {
        self.validate_code_at(secret, code, now_unix()?)
    }

    fn generate_recovery_codes(&self, count: usize) -> Result<Vec<String>> {
        let available = (RECOVERY_CODE_RANGE.end() - RECOVERY_CODE_RANGE.start() + 1) as usize;
        if count > available {
            return Err(AccountError::Internal(format!(
                "Cannot generate {} distinct recovery codes, only {} exist",
                count, available
            )));
        }

        let mut seen = HashSet::with_capacity(count);
        let mut codes = Vec::with_capacity(count);

        while codes.len() < count {
            let code = OsRng.gen_range(RECOVERY_CODE_RANGE).to_string();
            if seen.insert(code.clone()) {
                codes.push(code);
            }
        }

        Ok(codes)
    }
}
