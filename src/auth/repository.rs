// User record collaborator: trait seam plus the Postgres repository

use async_trait::async_trait;
use sqlx::PgPool;

use crate::auth::{
    error::AuthError,
    models::{NewUser, User},
};

/// Persistence operations the identity core needs from the user table
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create a new user; a taken email yields [`AuthError::EmailAlreadyExists`]
    async fn create(&self, user: NewUser) -> Result<User, AuthError>;

    /// Find a user by email (case-insensitive)
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn find_by_id(&self, id: i32) -> Result<Option<User>, AuthError>;

    async fn email_exists(&self, email: &str) -> Result<bool, AuthError>;

    async fn update_password(&self, id: i32, password_hash: &str) -> Result<(), AuthError>;

    async fn update_last_login(&self, id: i32) -> Result<(), AuthError>;

    /// Soft delete: the row stays, the account can no longer authenticate
    async fn deactivate(&self, id: i32) -> Result<(), AuthError>;
}

const USER_COLUMNS: &str =
    "id, email, password_hash, role, is_active, display_name, created_at, updated_at, last_login";

/// User repository for database operations
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new UserRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn create(&self, user: NewUser) -> Result<User, AuthError> {
        let sql = format!(
            "INSERT INTO users (email, password_hash, role, display_name) VALUES ($1, $2, $3, $4) RETURNING {}",
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&sql)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role)
            .bind(&user.display_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                // Check for unique constraint violation
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.is_unique_violation() {
                        return AuthError::EmailAlreadyExists;
                    }
                }
                AuthError::database("create user", e)
            })
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {} FROM users WHERE LOWER(email) = LOWER($1)", USER_COLUMNS);

        sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AuthError::database("find user by email", e))
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);

        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AuthError::database("find user by id", e))
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AuthError> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(email) = LOWER($1))")
                .bind(email)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AuthError::database("check email", e))?;

        Ok(exists.0)
    }

    async fn update_password(&self, id: i32, password_hash: &str) -> Result<(), AuthError> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
                .bind(password_hash)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| AuthError::database("update password", e))?;

        if result.rows_affected() == 0 {
            return Err(AuthError::not_found("User", id));
        }
        Ok(())
    }

    async fn update_last_login(&self, id: i32) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AuthError::database("update last login", e))?;

        Ok(())
    }

    async fn deactivate(&self, id: i32) -> Result<(), AuthError> {
        let result =
            sqlx::query("UPDATE users SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| AuthError::database("deactivate user", e))?;

        if result.rows_affected() == 0 {
            return Err(AuthError::not_found("User", id));
        }
        Ok(())
    }
}
