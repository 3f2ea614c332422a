/// Refresh token store
///
/// Raw tokens are 32 random bytes, base64url without padding. Only the hex
/// SHA-256 of the raw value is persisted; the raw value leaves the process
/// exactly once, at issuance.
use crate::db::account::RefreshToken;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use thiserror::Error;

/// Refresh token errors
///
/// The three validation failures stay distinct here; the HTTP layer folds
/// them into one message.
#[derive(Debug, Error)]
pub enum RefreshTokenError {
    #[error("Refresh token not found")]
    NotFound,

    #[error("Refresh token has been revoked")]
    Revoked,

    #[error("Refresh token has expired")]
    Expired,

    #[error("Refresh token not found or already revoked")]
    NotFoundOrAlreadyRevoked,

    #[error("Refresh token lifetime out of range")]
    LifetimeOutOfRange,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persists, validates and revokes refresh tokens
#[derive(Clone)]
pub struct RefreshTokenStore {
    db: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create and persist a refresh token, returning the raw value
    pub async fn issue(
        &self,
        account_id: i64,
        ttl: Duration,
        device_info: Option<&str>,
    ) -> Result<String, RefreshTokenError> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(RefreshTokenError::LifetimeOutOfRange)?;
        let raw = generate_raw_token();

        sqlx::query(
            "INSERT INTO refresh_tokens (account_id, token_hash, expires_at, created_at, device_info)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(account_id)
        .bind(hash_token(&raw))
        .bind(expires_at)
        .bind(now)
        .bind(device_info)
        .execute(&self.db)
        .await?;

        tracing::debug!("Issued refresh token for account {}", account_id);

        Ok(raw)
    }

    /// Resolve a raw token to its owning account id
    pub async fn validate(&self, raw: &str) -> Result<i64, RefreshTokenError> {
        let record = self
            .find_by_hash(&hash_token(raw))
            .await?
            .ok_or(RefreshTokenError::NotFound)?;

        check_usable(&record, Utc::now())?;

        Ok(record.account_id)
    }

    /// Revoke a raw token.
    ///
    /// A single conditional UPDATE; zero affected rows means the token never
    /// existed or somebody else revoked it first.
    pub async fn revoke(&self, raw: &str) -> Result<(), RefreshTokenError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = ?1
             WHERE token_hash = ?2 AND revoked_at IS NULL",
        )
        .bind(Utc::now())
        .bind(hash_token(raw))
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RefreshTokenError::NotFoundOrAlreadyRevoked);
        }

        Ok(())
    }

    /// Look up a stored token by hash
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, sqlx::Error> {
        sqlx::query_as::<_, RefreshToken>(
            "SELECT id, account_id, token_hash, expires_at, created_at, revoked_at, device_info
             FROM refresh_tokens WHERE token_hash = ?1",
        )
        .bind(token_hash)
        .fetch_optional(&self.db)
        .await
    }
}

/// Usable iff not revoked and not yet expired
fn check_usable(record: &RefreshToken, now: DateTime<Utc>) -> Result<(), RefreshTokenError> {
    if record.revoked_at.is_some() {
        return Err(RefreshTokenError::Revoked);
    }

    if now >= record.expires_at {
        return Err(RefreshTokenError::Expired);
    }

    Ok(())
}

fn generate_raw_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hex SHA-256 of a raw refresh token
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}
