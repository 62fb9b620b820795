use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

pub const PROVIDER_LOCAL: &str = "local";
pub const PROVIDER_GOOGLE: &str = "google";

const USER_COLUMNS: &str = "id, name, email, password_hash, google_id, provider, otp, \
     otp_expires, email_verified_at, magic_token_hash, magic_token_expires, \
     created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    #[serde(skip_serializing)]
    pub google_id: Option<String>,
    pub provider: String,
    #[serde(skip_serializing)]
    pub otp: Option<i32>,
    #[serde(skip_serializing)]
    pub otp_expires: Option<OffsetDateTime>,
    pub email_verified_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub magic_token_hash: Option<String>,
    #[serde(skip_serializing)]
    pub magic_token_expires: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn is_google(&self) -> bool {
        self.provider == PROVIDER_GOOGLE
    }

    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_google_id(db: &PgPool, google_id: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE google_id = $1"
        ))
        .bind(google_id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Create a local account with a hashed password.
    pub async fn create_local(
        db: &PgPool,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, email, password_hash, provider)
             VALUES ($1, $2, $3, '{PROVIDER_LOCAL}')
             RETURNING {USER_COLUMNS}"
        ))
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Create a Google-backed account: no password, email pre-verified
    /// (the identity provider already verified it).
    pub async fn create_google(
        db: &PgPool,
        name: &str,
        email: &str,
        google_id: &str,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, email, google_id, provider, email_verified_at)
             VALUES ($1, $2, $3, '{PROVIDER_GOOGLE}', now())
             RETURNING {USER_COLUMNS}"
        ))
        .bind(name)
        .bind(email)
        .bind(google_id)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Link an external identity to an existing local account.
    pub async fn link_google(db: &PgPool, id: Uuid, google_id: &str) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users
             SET google_id = $2, provider = '{PROVIDER_GOOGLE}', updated_at = now()
             WHERE id = $1
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(google_id)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    pub async fn set_otp(
        db: &PgPool,
        id: Uuid,
        otp: i32,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET otp = $2, otp_expires = $3, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(otp)
            .bind(expires)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn clear_otp(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET otp = NULL, otp_expires = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn set_magic_token(
        db: &PgPool,
        id: Uuid,
        token_hash: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users
             SET magic_token_hash = $2, magic_token_expires = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Rollback path for a token whose email never went out.
    pub async fn clear_magic_token(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users
             SET magic_token_hash = NULL, magic_token_expires = NULL, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Single-statement magic-link consumption: the hash match, the expiry
    /// check and the field clearing all happen in one UPDATE, so a token
    /// cannot be judged valid after a concurrent consumption. Also marks the
    /// email verified on first use.
    pub async fn consume_magic_token(
        db: &PgPool,
        token_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users
             SET magic_token_hash = NULL,
                 magic_token_expires = NULL,
                 email_verified_at = COALESCE(email_verified_at, now()),
                 updated_at = now()
             WHERE magic_token_hash = $1 AND magic_token_expires > now()
             RETURNING {USER_COLUMNS}"
        ))
        .bind(token_hash)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }
}
