/// Scoped JWT issuing and validation
///
/// Tokens carry a set of scopes instead of a token type. A password-only login of a
/// 2FA-enabled account yields a short-lived token scoped to `2fa-check`, which is good for
/// nothing but the second-factor step; everything else requires `user`.
///
/// Keys are handed to [`JwtTokenIssuer`] explicitly at startup, there is no global key
/// storage.
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::JwtKeys;
use crate::error::{AccountError, Result};

/// What a token may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "2fa-check")]
    TwoFaCheck,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::User => "user",
            Scope::TwoFaCheck => "2fa-check",
        }
    }
}

/// JWT claims: standard `sub`/`iat`/`exp` plus email and scopes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user public id)
    pub sub: String,
    pub email: String,
    pub scp: Vec<Scope>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn new(
        public_id: &str,
        email: &str,
        scopes: Vec<Scope>,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        // Saturate instead of overflowing on absurd lifetimes.
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            sub: public_id.to_string(),
            email: email.to_string(),
            scp: scopes,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        }
    }

    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scp.contains(&scope)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Reject claims that do not carry `scope`.
pub fn require_scope(claims: &Claims, scope: Scope) -> Result<()> {
    if claims.has_scope(scope) {
        Ok(())
    } else {
        Err(AccountError::InsufficientScope(scope.as_str().to_string()))
    }
}

/// Signing and verification of access tokens.
pub trait TokenIssuer: Send + Sync {
    fn issue(&self, claims: &Claims) -> Result<String>;

    /// Verify signature and expiry. Any failure is `InvalidToken`.
    fn parse(&self, token: &str) -> Result<Claims>;
}

pub struct JwtTokenIssuer {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenIssuer {
    fn with_keys(algorithm: Algorithm, encoding_key: EncodingKey, decoding_key: DecodingKey) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            algorithm,
            encoding_key,
            decoding_key,
            validation,
        }
    }

    /// HS256 with a shared secret.
    pub fn from_secret(secret: &str) -> Self {
        Self::with_keys(
            Algorithm::HS256,
            EncodingKey::from_secret(secret.as_bytes()),
            DecodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// RS256 from PEM-encoded keys.
    pub fn from_rsa_pem(private_key_pem: &str, public_key_pem: &str) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| AccountError::JwtError(format!("Failed to parse RSA private key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| AccountError::JwtError(format!("Failed to parse RSA public key: {e}")))?;

        Ok(Self::with_keys(Algorithm::RS256, encoding_key, decoding_key))
    }

    pub fn from_keys(keys: &JwtKeys) -> Result<Self> {
        match keys {
            JwtKeys::Secret(secret) => Ok(Self::from_secret(secret)),
            JwtKeys::RsaPem {
                private_key,
                public_key,
            } => Self::from_rsa_pem(private_key, public_key),
        }
    }
}

impl TokenIssuer for JwtTokenIssuer {
    fn issue(&self, claims: &Claims) -> Result<String> {
        Ok(encode(
            &Header::new(self.algorithm),
            claims,
            &self.encoding_key,
        )?)
    }

    fn parse(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Token rejected");
                AccountError::InvalidToken
            })
    }
}
