/// Staged authentication: password step, then an optional second factor
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use validator::Validate;

use crate::config::{JwtSettings, OtpSettings};
use crate::db::UserRepository;
use crate::error::{AccountError, Result};
use crate::models::{AuthToken, CredentialRequest, TwoFaCodeRequest, User};
use crate::security::{require_scope, verify_password, Claims, OtpEngine, Scope, TokenIssuer};

/// Argon2id hash with the same parameters as [`crate::security::hash_password`], matching
/// no real password. Verified against when the email is unknown.
const DUMMY_PASSWORD_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$OmsH/MhEpXXZ/6EEyzogoobEpqWJ1B4xQ2Lo2mD//lE";

/// Knobs the auth flow needs from configuration
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    /// Global 2FA switch
    pub otp_enabled: bool,
    pub session_ttl: Duration,
    pub two_fa_ttl: Duration,
}

impl AuthPolicy {
    pub fn from_settings(jwt: &JwtSettings, otp: &OtpSettings) -> Self {
        Self {
            otp_enabled: otp.enabled,
            session_ttl: jwt.ttl,
            two_fa_ttl: jwt.two_fa_ttl,
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn TokenIssuer>,
    otp: Arc<dyn OtpEngine>,
    policy: AuthPolicy,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn TokenIssuer>,
        otp: Arc<dyn OtpEngine>,
        policy: AuthPolicy,
    ) -> Self {
        Self {
            users,
            tokens,
            otp,
            policy,
        }
    }

    /// Password step.
    ///
    /// Unknown email, wrong password and a not yet activated account are all reported as
    /// `InvalidCredentials`. When the account has 2FA enabled (and 2FA is on globally) the
    /// returned token is scoped to `2fa-check` only and expires after the short 2FA TTL.
    pub async fn authenticate(&self, req: &CredentialRequest) -> Result<AuthToken> {
        req.validate()?;

        let Some(user) = self.users.find_by_email(&req.email).await? else {
            // Pay the same argon2 cost as a known email.
            let _ = verify_password(&req.password, DUMMY_PASSWORD_HASH);
            return Err(AccountError::InvalidCredentials);
        };

        if !verify_password(&req.password, &user.password_hash)? || !user.is_active() {
            return Err(AccountError::InvalidCredentials);
        }

        let two_fa_required = self.policy.otp_enabled && user.otp_enabled;
        let (scopes, ttl) = if two_fa_required {
            (vec![Scope::TwoFaCheck], self.policy.two_fa_ttl)
        } else {
            (vec![Scope::User], self.policy.session_ttl)
        };

        let token = self.issue(&user, scopes, ttl, two_fa_required)?;
        info!(
            public_id = %user.public_id,
            two_fa_required,
            "User authenticated"
        );
        Ok(token)
    }

    /// Second-factor step.
    ///
    /// Returns `Ok(None)` when 2FA is globally disabled. Accepts either a current TOTP code
    /// or one of the account's recovery codes; a recovery code is removed before the token
    /// is issued, so it can be used exactly once.
    pub async fn authenticate_two_fa(
        &self,
        claims: &Claims,
        req: &TwoFaCodeRequest,
    ) -> Result<Option<AuthToken>> {
        if !self.policy.otp_enabled {
            return Ok(None);
        }

        require_scope(claims, Scope::TwoFaCheck)?;
        req.validate().map_err(|_| AccountError::InvalidOtpCode)?;

        let user = self
            .users
            .find_by_public_id(&claims.sub)
            .await?
            .ok_or(AccountError::InvalidToken)?;

        if !user.is_active() {
            return Err(AccountError::InvalidCredentials);
        }

        let totp_valid = match &user.otp_secret {
            Some(secret) => self.otp.validate_code(secret, &req.code)?,
            None => false,
        };

        if !totp_valid {
            let consumed = self
                .users
                .consume_recovery_code(user.id, &req.code)
                .await?;
            if !consumed {
                return Err(AccountError::InvalidOtpCode);
            }
            info!(public_id = %user.public_id, "Recovery code consumed");
        }

        match self.issue(&user, vec![Scope::User], self.policy.session_ttl, false) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                if !totp_valid {
                    warn!(
                        public_id = %user.public_id,
                        "Token signing failed after a recovery code was consumed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Verify a bearer token and return its claims.
    pub fn parse_token(&self, token: &str) -> Result<Claims> {
        self.tokens.parse(token)
    }

    fn issue(
        &self,
        user: &User,
        scopes: Vec<Scope>,
        ttl: Duration,
        two_fa_required: bool,
    ) -> Result<AuthToken> {
        let claims = Claims::new(&user.public_id, &user.email, scopes, Utc::now(), ttl);
        let auth_token = self.tokens.issue(&claims)?;

        Ok(AuthToken {
            auth_token,
            expire_at: claims.expires_at(),
            two_fa_required,
        })
    }
}
