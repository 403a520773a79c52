// Opaque per-device session store
// Independent of the JWT pair: a user may hold both, and neither knows about the other

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::auth::{
    error::AuthError,
    models::{NewSession, Role, SessionRecord, SessionWithUser, User},
    refresh_tokens::grace_cutoff,
    token::{generate_opaque_token, hash_token},
};

/// Session lifetime when the caller does not give one
pub const DEFAULT_SESSION_TTL_DAYS: i64 = 30;

/// Persistence for opaque device sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session and return it with the raw token (only the hash is stored)
    async fn create(&self, session: NewSession) -> Result<(SessionRecord, String), AuthError>;

    /// Active, unexpired session for a token
    async fn find_by_token(&self, token: &str) -> Result<Option<SessionRecord>, AuthError>;

    /// Active, unexpired session joined with its active owner
    async fn find_by_token_with_user(&self, token: &str)
        -> Result<Option<SessionWithUser>, AuthError>;

    /// Active, unexpired sessions of a user, most recently used first
    async fn find_by_user_id(&self, user_id: i32) -> Result<Vec<SessionRecord>, AuthError>;

    /// Record activity; unknown or dead sessions yield `NotFound`
    async fn touch(&self, token: &str) -> Result<(), AuthError>;

    async fn deactivate(&self, token: &str) -> Result<bool, AuthError>;

    async fn deactivate_all(&self, user_id: i32) -> Result<u64, AuthError>;

    /// Delete sessions that ended more than `older_than_days` ago
    ///
    /// Deactivation caps `expires_at` at the moment of logout, so the grace
    /// window runs from whichever came first.
    async fn cleanup_expired(&self, older_than_days: i64) -> Result<u64, AuthError>;
}

pub(crate) fn default_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::days(DEFAULT_SESSION_TTL_DAYS)
}

const SESSION_COLUMNS: &str = "id, user_id, session_token_hash, device_info, ip_address, user_agent, \
     expires_at, last_accessed, is_active, created_at";

/// Session row joined with the owning user's columns
#[derive(FromRow)]
struct SessionUserRow {
    id: Uuid,
    user_id: i32,
    session_token_hash: String,
    device_info: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    expires_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    is_active: bool,
    created_at: DateTime<Utc>,
    user_email: String,
    user_password_hash: String,
    user_role: Role,
    user_is_active: bool,
    user_display_name: Option<String>,
    user_created_at: DateTime<Utc>,
    user_updated_at: DateTime<Utc>,
    user_last_login: Option<DateTime<Utc>>,
}

impl From<SessionUserRow> for SessionWithUser {
    fn from(row: SessionUserRow) -> Self {
        Self {
            user: User {
                id: row.user_id,
                email: row.user_email,
                password_hash: row.user_password_hash,
                role: row.user_role,
                is_active: row.user_is_active,
                display_name: row.user_display_name,
                created_at: row.user_created_at,
                updated_at: row.user_updated_at,
                last_login: row.user_last_login,
            },
            session: SessionRecord {
                id: row.id,
                user_id: row.user_id,
                session_token_hash: row.session_token_hash,
                device_info: row.device_info,
                ip_address: row.ip_address,
                user_agent: row.user_agent,
                expires_at: row.expires_at,
                last_accessed: row.last_accessed,
                is_active: row.is_active,
                created_at: row.created_at,
            },
        }
    }
}

/// Postgres-backed session store
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: NewSession) -> Result<(SessionRecord, String), AuthError> {
        let token = generate_opaque_token();
        let expires_at = session.expires_at.unwrap_or_else(|| default_expiry(Utc::now()));
        let sql = format!(
            "INSERT INTO user_sessions (id, user_id, session_token_hash, device_info, ip_address, user_agent, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            SESSION_COLUMNS
        );

        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(session.user_id)
            .bind(hash_token(&token))
            .bind(&session.device_info)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AuthError::database("create session", e))?;

        Ok((record, token))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SessionRecord>, AuthError> {
        let sql = format!(
            "SELECT {} FROM user_sessions \
             WHERE session_token_hash = $1 AND is_active = TRUE AND expires_at > NOW()",
            SESSION_COLUMNS
        );

        sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AuthError::database("find session", e))
    }

    async fn find_by_token_with_user(
        &self,
        token: &str,
    ) -> Result<Option<SessionWithUser>, AuthError> {
        let row = sqlx::query_as::<_, SessionUserRow>(
            r#"
            SELECT s.id, s.user_id, s.session_token_hash, s.device_info, s.ip_address, s.user_agent,
                   s.expires_at, s.last_accessed, s.is_active, s.created_at,
                   u.email AS user_email,
                   u.password_hash AS user_password_hash,
                   u.role AS user_role,
                   u.is_active AS user_is_active,
                   u.display_name AS user_display_name,
                   u.created_at AS user_created_at,
                   u.updated_at AS user_updated_at,
                   u.last_login AS user_last_login
            FROM user_sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.session_token_hash = $1
              AND s.is_active = TRUE
              AND s.expires_at > NOW()
              AND u.is_active = TRUE
            "#,
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::database("find session with user", e))?;

        Ok(row.map(SessionWithUser::from))
    }

    async fn find_by_user_id(&self, user_id: i32) -> Result<Vec<SessionRecord>, AuthError> {
        let sql = format!(
            "SELECT {} FROM user_sessions \
             WHERE user_id = $1 AND is_active = TRUE AND expires_at > NOW() \
             ORDER BY last_accessed DESC",
            SESSION_COLUMNS
        );

        sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AuthError::database("list sessions", e))
    }

    async fn touch(&self, token: &str) -> Result<(), AuthError> {
        let result = sqlx::query(
            "UPDATE user_sessions SET last_accessed = NOW() \
             WHERE session_token_hash = $1 AND is_active = TRUE AND expires_at > NOW()",
        )
        .bind(hash_token(token))
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::database("touch session", e))?;

        if result.rows_affected() == 0 {
            return Err(AuthError::not_found("Session", "(redacted)"));
        }
        Ok(())
    }

    async fn deactivate(&self, token: &str) -> Result<bool, AuthError> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_active = FALSE, expires_at = LEAST(expires_at, NOW()) \
             WHERE session_token_hash = $1 AND is_active = TRUE",
        )
        .bind(hash_token(token))
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::database("deactivate session", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_all(&self, user_id: i32) -> Result<u64, AuthError> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_active = FALSE, expires_at = LEAST(expires_at, NOW()) \
             WHERE user_id = $1 AND is_active = TRUE",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::database("deactivate user sessions", e))?;

        Ok(result.rows_affected())
    }

    async fn cleanup_expired(&self, older_than_days: i64) -> Result<u64, AuthError> {
        let cutoff = grace_cutoff(older_than_days)?;

        let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < $1")
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::database("delete expired sessions", e))?;

        Ok(result.rows_affected())
    }
}
