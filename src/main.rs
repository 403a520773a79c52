use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use contract_review_auth::{auth::CleanupScheduler, config::AuthConfig, create_router, db};

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize tracing subscriber; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Contract Review identity service - Starting...");

    let config = AuthConfig::from_env()?;
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| "DATABASE_URL must be set in environment")?;
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let service = Arc::new(db::postgres_auth_service(config, pool)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleanup = CleanupScheduler::from_config(
        service.config(),
        service.refresh_token_store(),
        service.session_store(),
    )
    .spawn(shutdown_rx);

    let app = create_router(service);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Identity service is running on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the sweeper; it runs one last pass before exiting
    let _ = shutdown_tx.send(true);
    if let Err(e) = cleanup.await {
        tracing::error!("Cleanup task ended abnormally: {}", e);
    }

    tracing::info!("Identity service stopped");
    Ok(())
}
