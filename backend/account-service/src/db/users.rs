/// User persistence
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use transactional_outbox::{NewEnvelope, PgOutboxStore};

use crate::error::{AccountError, Result};
use crate::models::{NewUser, User};

const USER_COLUMNS: &str = "id, public_id, email, first_name, last_name, password_hash, status, \
     activation_code, reset_password_code, otp_secret, otp_recovery_codes, otp_enabled, \
     created_at, updated_at";

/// Storage seam for the account services.
///
/// Methods that take `events` append them to the outbox in the same transaction as the
/// user mutation: either both are committed or neither is.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<User>>;

    async fn find_by_activation_code(&self, code: &str) -> Result<Option<User>>;

    /// Insert a `registered` user. A duplicate email yields `EmailAlreadyExists`.
    async fn create(&self, user: &NewUser, events: &[NewEnvelope]) -> Result<User>;

    /// Activate the user holding `activation_code` and clear the code.
    ///
    /// Returns `false` when no user holds the code any more.
    async fn activate(
        &self,
        activation_code: &str,
        updated_at: DateTime<Utc>,
        events: &[NewEnvelope],
    ) -> Result<bool>;

    async fn set_reset_code(
        &self,
        user_id: i64,
        reset_code: &str,
        updated_at: DateTime<Utc>,
        events: &[NewEnvelope],
    ) -> Result<()>;

    /// Store a new hash for the user holding `reset_code` and clear the code.
    ///
    /// Returns `false` when no user holds the code any more.
    async fn reset_password(
        &self,
        reset_code: &str,
        password_hash: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn update_password(
        &self,
        user_id: i64,
        password_hash: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Overwrite the TOTP secret without touching the enabled flag.
    async fn set_otp_secret(&self, user_id: i64, secret: &str) -> Result<()>;

    /// Replace the recovery codes and turn 2FA on, provided `secret` is still the stored
    /// secret. Returns `false` when it has been replaced in the meantime.
    async fn enable_otp(&self, user_id: i64, secret: &str, recovery_codes: &[String])
        -> Result<bool>;

    /// Turn 2FA off and drop the secret and recovery codes.
    async fn disable_otp(&self, user_id: i64) -> Result<()>;

    /// Remove `code` from the user's recovery codes. Returns `true` only for the caller
    /// whose update actually removed it.
    async fn consume_recovery_code(&self, user_id: i64, code: &str) -> Result<bool>;
}

pub struct PgUserRepository {
    pool: PgPool,
    outbox: PgOutboxStore,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        let outbox = PgOutboxStore::new(pool.clone());
        Self { pool, outbox }
    }

    async fn find_one(&self, filter: &str, value: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {filter} = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        events: &[NewEnvelope],
    ) -> Result<()> {
        self.outbox.append(tx, events).await?;
        Ok(())
    }
}

fn map_insert_error(err: sqlx::Error) -> AccountError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() && db_err.constraint() == Some("users_email_key") {
            return AccountError::EmailAlreadyExists;
        }
    }
    AccountError::from(err)
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_one("email", email).await
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<User>> {
        self.find_one("public_id", public_id).await
    }

    async fn find_by_activation_code(&self, code: &str) -> Result<Option<User>> {
        self.find_one("activation_code", code).await
    }

    async fn create(&self, user: &NewUser, events: &[NewEnvelope]) -> Result<User> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            r#"
            INSERT INTO users (
                public_id, email, first_name, last_name, password_hash, status,
                activation_code, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 'registered', $6, $7, $7)
            RETURNING {USER_COLUMNS}
            "#
        );

        let created = sqlx::query_as::<_, User>(&query)
            .bind(&user.public_id)
            .bind(&user.email)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.password_hash)
            .bind(&user.activation_code)
            .bind(user.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_insert_error)?;

        self.append(&mut tx, events).await?;
        tx.commit().await?;

        Ok(created)
    }

    async fn activate(
        &self,
        activation_code: &str,
        updated_at: DateTime<Utc>,
        events: &[NewEnvelope],
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE users
            SET status = 'activated',
                activation_code = NULL,
                updated_at = $2
            WHERE activation_code = $1
            "#,
        )
        .bind(activation_code)
        .bind(updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        self.append(&mut tx, events).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn set_reset_code(
        &self,
        user_id: i64,
        reset_code: &str,
        updated_at: DateTime<Utc>,
        events: &[NewEnvelope],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE users SET reset_password_code = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(user_id)
        .bind(reset_code)
        .bind(updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AccountError::UserNotFound);
        }

        self.append(&mut tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn reset_password(
        &self,
        reset_code: &str,
        password_hash: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2,
                reset_password_code = NULL,
                updated_at = $3
            WHERE reset_password_code = $1
            "#,
        )
        .bind(reset_code)
        .bind(password_hash)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_password(
        &self,
        user_id: i64,
        password_hash: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = $3 WHERE id = $1")
                .bind(user_id)
                .bind(password_hash)
                .bind(updated_at)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AccountError::UserNotFound);
        }
        Ok(())
    }

    async fn set_otp_secret(&self, user_id: i64, secret: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET otp_secret = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(secret)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AccountError::UserNotFound);
        }
        Ok(())
    }

    async fn enable_otp(
        &self,
        user_id: i64,
        secret: &str,
        recovery_codes: &[String],
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET otp_recovery_codes = $3,
                otp_enabled = TRUE,
                updated_at = NOW()
            WHERE id = $1 AND otp_secret = $2
            "#,
        )
        .bind(user_id)
        .bind(secret)
        .bind(recovery_codes)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn disable_otp(&self, user_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET otp_enabled = FALSE,
                otp_secret = NULL,
                otp_recovery_codes = '{}',
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn consume_recovery_code(&self, user_id: i64, code: &str) -> Result<bool> {
        // Row lock serializes concurrent consumers; only one sees the code in the array.
        let result = sqlx::query(
            r#"
            UPDATE users
            SET otp_recovery_codes = array_remove(otp_recovery_codes, $2),
                updated_at = NOW()
            WHERE id = $1 AND $2 = ANY(otp_recovery_codes)
            "#,
        )
        .bind(user_id)
        .bind(code)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
