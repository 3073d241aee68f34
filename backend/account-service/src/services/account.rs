/// Account lifecycle: registration, activation, password management
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use crate::db::UserRepository;
use crate::domain::{registration_events, UserChangedEvent, UserResetPasswordEvent};
use crate::error::{AccountError, Result};
use crate::models::{
    ChangePasswordRequest, NewUser, PasswordResetRequest, RegisterRequest, ResetPasswordRequest,
    User, UserStatus,
};
use crate::security::{hash_password, require_scope, Claims, Scope};

#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UserRepository>,
}

impl AccountService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Create a `registered` account.
    ///
    /// `user.cud.changed` and `user.be.registered` are written to the outbox in the same
    /// transaction as the user row.
    pub async fn register(&self, req: &RegisterRequest) -> Result<User> {
        req.validate()?;

        let new_user = NewUser {
            public_id: Uuid::new_v4().to_string(),
            email: req.email.trim().to_string(),
            first_name: req.first_name.clone(),
            last_name: req.last_name.clone(),
            password_hash: hash_password(&req.password)?,
            activation_code: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        };

        let events = registration_events(&new_user)?;
        let user = self.users.create(&new_user, &events).await?;

        info!(public_id = %user.public_id, "User registered");
        Ok(user)
    }

    /// Activate the account holding `activation_code`.
    pub async fn activate(&self, activation_code: &str) -> Result<()> {
        let user = self
            .users
            .find_by_activation_code(activation_code)
            .await?
            .ok_or(AccountError::InvalidActivationCode)?;

        let now = Utc::now();
        let activated = User {
            status: UserStatus::Activated,
            activation_code: None,
            updated_at: now,
            ..user
        };
        let event = UserChangedEvent::from(&activated).envelope()?;

        if !self.users.activate(activation_code, now, &[event]).await? {
            return Err(AccountError::InvalidActivationCode);
        }

        info!(public_id = %activated.public_id, "User activated");
        Ok(())
    }

    /// Issue a reset code and announce it.
    ///
    /// Unknown emails succeed silently so the endpoint cannot be used to probe for
    /// accounts.
    pub async fn request_password_reset(&self, req: &PasswordResetRequest) -> Result<()> {
        req.validate()?;

        let Some(user) = self.users.find_by_email(req.email.trim()).await? else {
            debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let reset_code = Uuid::new_v4().to_string();
        let event = UserResetPasswordEvent {
            public_id: user.public_id.clone(),
            email: user.email.clone(),
            reset_password_code: reset_code.clone(),
        }
        .envelope()?;

        self.users
            .set_reset_code(user.id, &reset_code, Utc::now(), &[event])
            .await?;

        info!(public_id = %user.public_id, "Password reset requested");
        Ok(())
    }

    /// Set a new password using a reset code. The code is single use.
    pub async fn reset_password(&self, req: &ResetPasswordRequest) -> Result<()> {
        req.validate()?;

        let password_hash = hash_password(&req.password)?;
        if !self
            .users
            .reset_password(&req.reset_code, &password_hash, Utc::now())
            .await?
        {
            return Err(AccountError::InvalidResetCode);
        }

        info!("Password reset completed");
        Ok(())
    }

    pub async fn change_password(&self, claims: &Claims, req: &ChangePasswordRequest) -> Result<()> {
        let user = self.profile(claims).await?;
        req.validate()?;

        let password_hash = hash_password(&req.password)?;
        self.users
            .update_password(user.id, &password_hash, Utc::now())
            .await?;

        info!(public_id = %user.public_id, "Password changed");
        Ok(())
    }

    /// The account behind a `user`-scoped token.
    pub async fn profile(&self, claims: &Claims) -> Result<User> {
        require_scope(claims, Scope::User)?;
        self.users
            .find_by_public_id(&claims.sub)
            .await?
            .ok_or(AccountError::UserNotFound)
    }
}
