//! In-memory collaborators shared by the service integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use account_service::db::UserRepository;
use account_service::error::{AccountError, Result};
use account_service::models::{NewUser, OtpSetup, User, UserStatus};
use account_service::security::{JwtTokenIssuer, OtpEngine};
use account_service::services::{AccountService, AuthPolicy, AuthService, TwoFaService};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use transactional_outbox::memory::InMemoryOutboxStore;
use transactional_outbox::{EventEnvelope, NewEnvelope};

pub const PASSWORD: &str = "hunter22";

/// User store backed by a vector, writing events to an in-memory outbox.
#[derive(Clone, Default)]
pub struct InMemoryUserRepository {
    users: Arc<Mutex<Vec<User>>>,
    pub outbox: InMemoryOutboxStore,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn users(&self) -> MutexGuard<'_, Vec<User>> {
        self.users.lock().unwrap()
    }

    pub fn get(&self, public_id: &str) -> User {
        self.users()
            .iter()
            .find(|u| u.public_id == public_id)
            .cloned()
            .unwrap()
    }

    pub fn events(&self) -> Vec<EventEnvelope> {
        self.outbox.envelopes()
    }

    pub fn user_count(&self) -> usize {
        self.users().len()
    }

    /// Apply `change` to the first matching user, and commit it only if the events are
    /// appended too.
    fn mutate<P, F>(&self, pred: P, events: &[NewEnvelope], change: F) -> Result<bool>
    where
        P: Fn(&User) -> bool,
        F: FnOnce(&mut User),
    {
        let mut users = self.users();
        let Some(index) = users.iter().position(|u| pred(u)) else {
            return Ok(false);
        };

        let mut updated = users[index].clone();
        change(&mut updated);
        self.outbox.append(events)?;
        users[index] = updated;
        Ok(true)
    }

    fn find(&self, pred: impl Fn(&User) -> bool) -> Option<User> {
        self.users().iter().find(|u| pred(u)).cloned()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.find(|u| u.email == email))
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<User>> {
        Ok(self.find(|u| u.public_id == public_id))
    }

    async fn find_by_activation_code(&self, code: &str) -> Result<Option<User>> {
        Ok(self.find(|u| u.activation_code.as_deref() == Some(code)))
    }

    async fn create(&self, user: &NewUser, events: &[NewEnvelope]) -> Result<User> {
        let mut users = self.users();
        if users.iter().any(|u| u.email == user.email) {
            return Err(AccountError::EmailAlreadyExists);
        }

        let created = User {
            id: users.len() as i64 + 1,
            public_id: user.public_id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            password_hash: user.password_hash.clone(),
            status: UserStatus::Registered,
            activation_code: Some(user.activation_code.clone()),
            reset_password_code: None,
            otp_secret: None,
            otp_recovery_codes: Vec::new(),
            otp_enabled: false,
            created_at: user.created_at,
            updated_at: user.created_at,
        };

        self.outbox.append(events)?;
        users.push(created.clone());
        Ok(created)
    }

    async fn activate(
        &self,
        activation_code: &str,
        updated_at: DateTime<Utc>,
        events: &[NewEnvelope],
    ) -> Result<bool> {
        self.mutate(
            |u| u.activation_code.as_deref() == Some(activation_code),
            events,
            |u| {
                u.status = UserStatus::Activated;
                u.activation_code = None;
                u.updated_at = updated_at;
            },
        )
    }

    async fn set_reset_code(
        &self,
        user_id: i64,
        reset_code: &str,
        updated_at: DateTime<Utc>,
        events: &[NewEnvelope],
    ) -> Result<()> {
        let found = self.mutate(|u| u.id == user_id, events, |u| {
            u.reset_password_code = Some(reset_code.to_string());
            u.updated_at = updated_at;
        })?;
        if found {
            Ok(())
        } else {
            Err(AccountError::UserNotFound)
        }
    }

    async fn reset_password(
        &self,
        reset_code: &str,
        password_hash: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.mutate(
            |u| u.reset_password_code.as_deref() == Some(reset_code),
            &[],
            |u| {
                u.password_hash = password_hash.to_string();
                u.reset_password_code = None;
                u.updated_at = updated_at;
            },
        )
    }

    async fn update_password(
        &self,
        user_id: i64,
        password_hash: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.mutate(|u| u.id == user_id, &[], |u| {
            u.password_hash = password_hash.to_string();
            u.updated_at = updated_at;
        })?;
        Ok(())
    }

    async fn set_otp_secret(&self, user_id: i64, secret: &str) -> Result<()> {
        self.mutate(|u| u.id == user_id, &[], |u| {
            u.otp_secret = Some(secret.to_string());
        })?;
        Ok(())
    }

    async fn enable_otp(
        &self,
        user_id: i64,
        secret: &str,
        recovery_codes: &[String],
    ) -> Result<bool> {
        self.mutate(
            |u| u.id == user_id && u.otp_secret.as_deref() == Some(secret),
            &[],
            |u| {
                u.otp_recovery_codes = recovery_codes.to_vec();
                u.otp_enabled = true;
            },
        )
    }

    async fn disable_otp(&self, user_id: i64) -> Result<()> {
        self.mutate(|u| u.id == user_id, &[], |u| {
            u.otp_enabled = false;
            u.otp_secret = None;
            u.otp_recovery_codes.clear();
        })?;
        Ok(())
    }

    async fn consume_recovery_code(&self, user_id: i64, code: &str) -> Result<bool> {
        self.mutate(
            |u| u.id == user_id && u.otp_recovery_codes.iter().any(|c| c == code),
            &[],
            |u| u.otp_recovery_codes.retain(|c| c != code),
        )
    }
}

/// Deterministic OTP engine: secret `secret-N` accepts exactly the code `N` padded to six
/// digits.
#[derive(Default)]
pub struct FakeOtpEngine {
    next_secret: AtomicU32,
    next_code_batch: AtomicU32,
}

impl FakeOtpEngine {
    pub fn code_for(secret: &str) -> String {
        let n: u32 = secret.trim_start_matches("secret-").parse().unwrap();
        format!("{:06}", n)
    }
}

impl OtpEngine for FakeOtpEngine {
    fn generate(&self, account_id: &str) -> Result<OtpSetup> {
        let n = self.next_secret.fetch_add(1, Ordering::SeqCst) + 1;
        let secret = format!("secret-{}", n);
        Ok(OtpSetup {
            provisioning_uri: format!("otpauth://totp/Test:{account_id}?secret={secret}"),
            secret,
        })
    }

    fn validate_code(&self, secret: &str, code: &str) -> Result<bool> {
        Ok(Self::code_for(secret) == code)
    }

    fn generate_recovery_codes(&self, count: usize) -> Result<Vec<String>> {
        let batch = self.next_code_batch.fetch_add(1, Ordering::SeqCst);
        Ok((0..count as u32)
            .map(|i| (900_000 + batch * 1_000 + i).to_string())
            .collect())
    }
}

pub struct TestServices {
    pub repo: InMemoryUserRepository,
    pub account: AccountService,
    pub auth: AuthService,
    pub two_fa: TwoFaService,
}

pub const SESSION_TTL: Duration = Duration::from_secs(3600);
pub const TWO_FA_TTL: Duration = Duration::from_secs(300);

pub fn services(otp_enabled: bool) -> TestServices {
    let repo = InMemoryUserRepository::new();
    let users: Arc<dyn UserRepository> = Arc::new(repo.clone());
    let otp: Arc<dyn OtpEngine> = Arc::new(FakeOtpEngine::default());
    let tokens = Arc::new(JwtTokenIssuer::from_secret("test-secret"));

    TestServices {
        account: AccountService::new(users.clone()),
        auth: AuthService::new(
            users.clone(),
            tokens,
            otp.clone(),
            AuthPolicy {
                otp_enabled,
                session_ttl: SESSION_TTL,
                two_fa_ttl: TWO_FA_TTL,
            },
        ),
        two_fa: TwoFaService::new(users, otp, 5),
        repo,
    }
}

pub fn register_request(email: &str) -> account_service::models::RegisterRequest {
    account_service::models::RegisterRequest {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        email: email.to_string(),
        password: PASSWORD.to_string(),
    }
}

/// Register and activate an account, returning its public id.
pub async fn active_user(svc: &TestServices, email: &str) -> String {
    let user = svc.account.register(&register_request(email)).await.unwrap();
    let code = user.activation_code.clone().unwrap();
    svc.account.activate(&code).await.unwrap();
    user.public_id
}
