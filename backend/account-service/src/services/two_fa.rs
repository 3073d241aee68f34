/// Two-factor authentication enrollment (TOTP)
use std::sync::Arc;

use tracing::info;
use validator::Validate;

use crate::db::UserRepository;
use crate::error::{AccountError, Result};
use crate::models::{OtpSetup, RecoveryCodes, TwoFaCodeRequest, User};
use crate::security::{require_scope, Claims, OtpEngine, Scope};

/// Two-factor authentication service
#[derive(Clone)]
pub struct TwoFaService {
    users: Arc<dyn UserRepository>,
    otp: Arc<dyn OtpEngine>,
    recovery_code_count: usize,
}

impl TwoFaService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        otp: Arc<dyn OtpEngine>,
        recovery_code_count: usize,
    ) -> Self {
        Self {
            users,
            otp,
            recovery_code_count,
        }
    }

    async fn current_user(&self, claims: &Claims) -> Result<User> {
        require_scope(claims, Scope::User)?;
        self.users
            .find_by_public_id(&claims.sub)
            .await?
            .ok_or(AccountError::UserNotFound)
    }

    /// Begin TOTP enrollment
    ///
    /// The new secret is stored right away, replacing any previous one, but the enabled
    /// flag is left alone until step 2 proves the authenticator app is in sync.
    pub async fn enable_step1(&self, claims: &Claims) -> Result<OtpSetup> {
        let user = self.current_user(claims).await?;

        let setup = self.otp.generate(&user.public_id)?;
        self.users.set_otp_secret(user.id, &setup.secret).await?;

        info!(public_id = %user.public_id, "TOTP enrollment started");
        Ok(setup)
    }

    /// Confirm TOTP with a code from the authenticator app
    ///
    /// On success a fresh full set of recovery codes replaces the old one and 2FA is
    /// switched on in the same update. On failure nothing changes.
    pub async fn enable_step2(&self, claims: &Claims, req: &TwoFaCodeRequest) -> Result<RecoveryCodes> {
        let user = self.current_user(claims).await?;
        req.validate().map_err(|_| AccountError::InvalidOtpCode)?;

        let secret = user.otp_secret.ok_or(AccountError::TwoFaNotInitiated)?;
        if !self.otp.validate_code(&secret, &req.code)? {
            return Err(AccountError::InvalidOtpCode);
        }

        let codes = self.otp.generate_recovery_codes(self.recovery_code_count)?;
        // A concurrent step 1 replaced the secret we just validated against.
        if !self.users.enable_otp(user.id, &secret, &codes).await? {
            return Err(AccountError::InvalidOtpCode);
        }

        info!(public_id = %user.public_id, "TOTP enabled");
        Ok(RecoveryCodes { codes })
    }

    /// Disable TOTP; the secret and recovery codes are discarded.
    pub async fn disable(&self, claims: &Claims) -> Result<()> {
        let user = self.current_user(claims).await?;
        self.users.disable_otp(user.id).await?;

        info!(public_id = %user.public_id, "TOTP disabled");
        Ok(())
    }
}
