//! Account lifecycle events announced through the outbox.
//!
//! Topic names and payload field names are part of the contract with downstream
//! consumers (mailer, profile projections) and must stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use transactional_outbox::NewEnvelope;

use crate::error::Result;
use crate::models::{NewUser, User, UserStatus};

/// Full snapshot of a user after a create/update.
pub const TOPIC_USER_CHANGED: &str = "user.cud.changed";
/// A new account needs its activation mail.
pub const TOPIC_USER_REGISTERED: &str = "user.be.registered";
/// A password reset code was issued.
pub const TOPIC_USER_RESET_PASSWORD: &str = "user.be.reset_password";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserChangedEvent {
    pub public_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRegisteredEvent {
    pub public_id: String,
    pub email: String,
    pub activation_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResetPasswordEvent {
    pub public_id: String,
    pub email: String,
    pub reset_password_code: String,
}

impl From<&User> for UserChangedEvent {
    fn from(user: &User) -> Self {
        Self {
            public_id: user.public_id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            status: user.status,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

impl UserChangedEvent {
    pub fn envelope(&self) -> Result<NewEnvelope> {
        Ok(NewEnvelope::new(TOPIC_USER_CHANGED, self)?)
    }
}

impl UserRegisteredEvent {
    pub fn envelope(&self) -> Result<NewEnvelope> {
        Ok(NewEnvelope::new(TOPIC_USER_REGISTERED, self)?)
    }
}

impl UserResetPasswordEvent {
    pub fn envelope(&self) -> Result<NewEnvelope> {
        Ok(NewEnvelope::new(TOPIC_USER_RESET_PASSWORD, self)?)
    }
}

/// Events written together with a new registration.
pub fn registration_events(user: &NewUser) -> Result<Vec<NewEnvelope>> {
    let changed = UserChangedEvent {
        public_id: user.public_id.clone(),
        email: user.email.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        status: UserStatus::Registered,
        created_at: user.created_at,
        updated_at: user.created_at,
    };
    let registered = UserRegisteredEvent {
        public_id: user.public_id.clone(),
        email: user.email.clone(),
        activation_code: user.activation_code.clone(),
    };

    Ok(vec![changed.envelope()?, registered.envelope()?])
}
