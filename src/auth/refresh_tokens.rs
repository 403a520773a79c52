// Refresh token store
// Persists refresh tokens and single-use password-reset tokens, keyed by their SHA-256 digest

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::auth::{
    error::AuthError,
    models::{NewRefreshToken, RefreshTokenRecord, TokenPurpose, TokenStats},
    token::hash_token,
};

/// Expiry before which the cleanup sweeps may delete a row
pub(crate) fn grace_cutoff(older_than_days: i64) -> Result<DateTime<Utc>, AuthError> {
    Duration::try_days(older_than_days)
        .filter(|grace| *grace >= Duration::zero())
        .and_then(|grace| Utc::now().checked_sub_signed(grace))
        .ok_or_else(|| {
            AuthError::ConfigError(format!("grace period of {} days is out of range", older_than_days))
        })
}

/// Persistence for issued refresh and password-reset tokens
///
/// Every method takes the raw token and hashes it before touching storage.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord, AuthError>;

    /// Look up a non-expired record of any purpose
    async fn find_by_token(&self, token: &str) -> Result<Option<RefreshTokenRecord>, AuthError>;

    /// Bump `last_used`; absent or expired tokens yield `NotFound`
    async fn update_last_used(&self, token: &str) -> Result<(), AuthError>;

    async fn delete_by_token(&self, token: &str) -> Result<bool, AuthError>;

    /// Delete one refresh-purpose record, only if `user_id` owns it
    async fn delete_by_id_for_user(&self, user_id: i32, id: i32) -> Result<bool, AuthError>;

    async fn delete_by_user_id(&self, user_id: i32) -> Result<u64, AuthError>;

    /// Non-expired records of one purpose, newest first
    async fn list_active(
        &self,
        user_id: i32,
        purpose: TokenPurpose,
    ) -> Result<Vec<RefreshTokenRecord>, AuthError>;

    /// Keep only the `keep_count` newest non-expired refresh tokens of a user
    async fn prune_oldest(&self, user_id: i32, keep_count: i64) -> Result<u64, AuthError>;

    /// Soft revoke: expiry moves into the past, rows are kept for audit
    async fn revoke_all(&self, user_id: i32) -> Result<u64, AuthError>;

    /// Permanently delete rows that expired more than `older_than_days` ago
    async fn hard_delete_expired(&self, older_than_days: i64) -> Result<u64, AuthError>;

    async fn stats(&self, user_id: i32) -> Result<TokenStats, AuthError>;

    /// Atomically consume `old_token` and insert `new_token`
    ///
    /// Returns `None` when the old token was already consumed or expired, in
    /// which case nothing is inserted.
    async fn rotate(
        &self,
        old_token: &str,
        new_token: NewRefreshToken,
    ) -> Result<Option<RefreshTokenRecord>, AuthError>;

    /// Atomically delete and return a non-expired record of the given purpose
    async fn consume(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> Result<Option<RefreshTokenRecord>, AuthError>;
}

const TOKEN_COLUMNS: &str =
    "id, user_id, token_hash, purpose, expires_at, device_info, ip_address, created_at, last_used";

/// Postgres-backed refresh token store
#[derive(Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn insert_sql() -> String {
        format!(
            "INSERT INTO refresh_tokens (user_id, token_hash, purpose, expires_at, device_info, ip_address) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            TOKEN_COLUMNS
        )
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord, AuthError> {
        sqlx::query_as::<_, RefreshTokenRecord>(&Self::insert_sql())
            .bind(token.user_id)
            .bind(hash_token(&token.token))
            .bind(token.purpose)
            .bind(token.expires_at)
            .bind(&token.device_info)
            .bind(&token.ip_address)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AuthError::database("store refresh token", e))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let sql = format!(
            "SELECT {} FROM refresh_tokens WHERE token_hash = $1 AND expires_at > NOW()",
            TOKEN_COLUMNS
        );

        sqlx::query_as::<_, RefreshTokenRecord>(&sql)
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AuthError::database("find refresh token", e))
    }

    async fn update_last_used(&self, token: &str) -> Result<(), AuthError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET last_used = NOW() WHERE token_hash = $1 AND expires_at > NOW()",
        )
        .bind(hash_token(token))
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::database("update refresh token last_used", e))?;

        if result.rows_affected() == 0 {
            return Err(AuthError::not_found("Refresh token", "(redacted)"));
        }
        Ok(())
    }

    async fn delete_by_token(&self, token: &str) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(hash_token(token))
            .execute(&self.pool)
            .await
            .map_err(|e| AuthError::database("delete refresh token", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_id_for_user(&self, user_id: i32, id: i32) -> Result<bool, AuthError> {
        let result = sqlx::query(
            "DELETE FROM refresh_tokens WHERE id = $1 AND user_id = $2 AND purpose = $3",
        )
        .bind(id)
        .bind(user_id)
        .bind(TokenPurpose::Refresh)
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::database("delete refresh token by id", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_user_id(&self, user_id: i32) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AuthError::database("delete user refresh tokens", e))?;

        Ok(result.rows_affected())
    }

    async fn list_active(
        &self,
        user_id: i32,
        purpose: TokenPurpose,
    ) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        let sql = format!(
            "SELECT {} FROM refresh_tokens \
             WHERE user_id = $1 AND purpose = $2 AND expires_at > NOW() \
             ORDER BY created_at DESC, id DESC",
            TOKEN_COLUMNS
        );

        sqlx::query_as::<_, RefreshTokenRecord>(&sql)
            .bind(user_id)
            .bind(purpose)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AuthError::database("list refresh tokens", e))
    }

    async fn prune_oldest(&self, user_id: i32, keep_count: i64) -> Result<u64, AuthError> {
        let result = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE user_id = $1 AND purpose = $2 AND expires_at > NOW()
              AND id NOT IN (
                SELECT id FROM refresh_tokens
                WHERE user_id = $1 AND purpose = $2 AND expires_at > NOW()
                ORDER BY created_at DESC, id DESC
                LIMIT $3
              )
            "#,
        )
        .bind(user_id)
        .bind(TokenPurpose::Refresh)
        .bind(keep_count.max(0))
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::database("prune refresh tokens", e))?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            debug!(user_id, pruned, "Pruned old refresh tokens");
        }
        Ok(pruned)
    }

    async fn revoke_all(&self, user_id: i32) -> Result<u64, AuthError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET expires_at = NOW() - INTERVAL '1 second' \
             WHERE user_id = $1 AND expires_at > NOW()",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::database("revoke refresh tokens", e))?;

        Ok(result.rows_affected())
    }

    async fn hard_delete_expired(&self, older_than_days: i64) -> Result<u64, AuthError> {
        let cutoff = grace_cutoff(older_than_days)?;

        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| AuthError::database("delete expired refresh tokens", e))?;

        Ok(result.rows_affected())
    }

    async fn stats(&self, user_id: i32) -> Result<TokenStats, AuthError> {
        let (active_count, total_count, last_used): (i64, i64, Option<chrono::DateTime<Utc>>) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*) FILTER (WHERE expires_at > NOW()),
                       COUNT(*),
                       MAX(last_used)
                FROM refresh_tokens
                WHERE user_id = $1 AND purpose = $2
                "#,
            )
            .bind(user_id)
            .bind(TokenPurpose::Refresh)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AuthError::database("refresh token stats", e))?;

        Ok(TokenStats {
            active_count,
            total_count,
            last_used,
        })
    }

    async fn rotate(
        &self,
        old_token: &str,
        new_token: NewRefreshToken,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        // The transaction rolls back if dropped before commit
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AuthError::database("begin rotation", e))?;

        // Row lock makes a concurrent rotation of the same token wait, then see zero rows
        let consumed: Option<i32> = sqlx::query_scalar(
            "DELETE FROM refresh_tokens \
             WHERE token_hash = $1 AND purpose = $2 AND expires_at > NOW() \
             RETURNING id",
        )
        .bind(hash_token(old_token))
        .bind(TokenPurpose::Refresh)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AuthError::database("consume refresh token", e))?;

        if consumed.is_none() {
            return Ok(None);
        }

        let record = sqlx::query_as::<_, RefreshTokenRecord>(&Self::insert_sql())
            .bind(new_token.user_id)
            .bind(hash_token(&new_token.token))
            .bind(new_token.purpose)
            .bind(new_token.expires_at)
            .bind(&new_token.device_info)
            .bind(&new_token.ip_address)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AuthError::database("store rotated refresh token", e))?;

        tx.commit()
            .await
            .map_err(|e| AuthError::database("commit rotation", e))?;

        Ok(Some(record))
    }

    async fn consume(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let sql = format!(
            "DELETE FROM refresh_tokens \
             WHERE token_hash = $1 AND purpose = $2 AND expires_at > NOW() \
             RETURNING {}",
            TOKEN_COLUMNS
        );

        sqlx::query_as::<_, RefreshTokenRecord>(&sql)
            .bind(hash_token(token))
            .bind(purpose)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AuthError::database("consume token", e))
    }
}
