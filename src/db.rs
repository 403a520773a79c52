// Postgres pool and schema setup

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::auth::{
    error::AuthError, refresh_tokens::PgRefreshTokenStore, repository::UserRepository,
    sessions::PgSessionStore, AuthService,
};
use crate::config::AuthConfig;

/// Type alias for the PostgreSQL connection pool
pub type DbPool = PgPool;

/// Creates and configures a PostgreSQL connection pool
///
/// # Arguments
/// * `database_url` - PostgreSQL connection string
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    tracing::debug!("Creating database connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await?;

    tracing::info!("Database connection pool created successfully");
    Ok(pool)
}

/// Apply the migrations bundled under `migrations/`
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Migrations completed successfully");
    Ok(())
}

/// Build an [`AuthService`] whose stores all share `pool`
pub fn postgres_auth_service(config: AuthConfig, pool: DbPool) -> Result<AuthService, AuthError> {
    AuthService::new(
        config,
        Arc::new(UserRepository::new(pool.clone())),
        Arc::new(PgRefreshTokenStore::new(pool.clone())),
        Arc::new(PgSessionStore::new(pool)),
    )
}
