use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use validator::Validate;

/// Account lifecycle state matching database user_status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "user_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Signed up, waiting for the activation code
    Registered,
    Activated,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Registered => "registered",
            UserStatus::Activated => "activated",
        }
    }
}

/// User model - core account entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Internal surrogate key, never exposed
    #[serde(skip_serializing)]
    pub id: i64,
    pub public_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub status: UserStatus,
    #[serde(skip_serializing)]
    pub activation_code: Option<String>,
    #[serde(skip_serializing)]
    pub reset_password_code: Option<String>,
    #[serde(skip_serializing)]
    pub otp_secret: Option<String>,
    #[serde(skip_serializing)]
    pub otp_recovery_codes: Vec<String>,
    pub otp_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Activated
    }
}

/// Account about to be inserted
#[derive(Debug, Clone)]
pub struct NewUser {
    pub public_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub activation_code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
}

/// Email + password for the first login step
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CredentialRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1))]
    pub reset_code: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 6, max = 128))]
    pub password: String,
}

/// TOTP code or recovery code
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TwoFaCodeRequest {
    #[validate(length(min = 6, max = 6))]
    pub code: String,
}

/// Result of a successful login step
#[derive(Debug, Clone, Serialize)]
pub struct AuthToken {
    pub auth_token: String,
    pub expire_at: DateTime<Utc>,
    pub two_fa_required: bool,
}

/// Fresh TOTP secret and the URI an authenticator app scans
#[derive(Debug, Clone, Serialize)]
pub struct OtpSetup {
    pub secret: String,
    pub provisioning_uri: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryCodes {
    pub codes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_validation() {
        let req = RegisterRequest {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            password: "secret1".into(),
        };
        assert!(req.validate().is_ok());

        let short = RegisterRequest {
            password: "12345".into(),
            ..req.clone()
        };
        assert!(short.validate().is_err());

        let bad_email = RegisterRequest {
            email: "not-an-email".into(),
            ..req
        };
        assert!(bad_email.validate().is_err());
    }

    #[test]
    fn test_two_fa_code_length() {
        assert!(TwoFaCodeRequest { code: "123456".into() }.validate().is_ok());
        assert!(TwoFaCodeRequest { code: "12345".into() }.validate().is_err());
    }
}
