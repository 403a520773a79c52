// Periodic removal of expired refresh tokens and dead sessions

use std::sync::Arc;
use std::time::Duration;

use tokio::{sync::watch, task::JoinHandle, time};
use tracing::{debug, error, info};

use crate::auth::{refresh_tokens::RefreshTokenStore, sessions::SessionStore};
use crate::config::AuthConfig;

/// Shortest tick the scheduler accepts; `tokio::time::interval` panics on zero
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Rows removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub refresh_tokens: u64,
    pub sessions: u64,
}

/// Background sweeper for both token tables
///
/// Rows are only removed once they have been expired for longer than the
/// grace window, so recently expired tokens remain visible for auditing.
#[derive(Clone)]
pub struct CleanupScheduler {
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    sessions: Arc<dyn SessionStore>,
    grace_days: i64,
    interval: Duration,
}

impl std::fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScheduler")
            .field("grace_days", &self.grace_days)
            .field("interval", &self.interval)
            .finish()
    }
}

impl CleanupScheduler {
    pub fn new(
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        sessions: Arc<dyn SessionStore>,
        grace_days: i64,
        interval: Duration,
    ) -> Self {
        Self {
            refresh_tokens,
            sessions,
            grace_days,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub fn from_config(
        config: &AuthConfig,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self::new(
            refresh_tokens,
            sessions,
            config.cleanup_grace_days,
            config.cleanup_interval(),
        )
    }

    /// Run both sweeps once; a failing sweep is logged and counted as zero
    pub async fn run_once(&self) -> CleanupReport {
        let refresh_tokens = match self.refresh_tokens.hard_delete_expired(self.grace_days).await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "Failed to delete expired refresh tokens");
                0
            }
        };

        let sessions = match self.sessions.cleanup_expired(self.grace_days).await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "Failed to delete expired sessions");
                0
            }
        };

        let report = CleanupReport {
            refresh_tokens,
            sessions,
        };
        if report == CleanupReport::default() {
            debug!("Cleanup sweep found nothing to remove");
        } else {
            info!(
                refresh_tokens = report.refresh_tokens,
                sessions = report.sessions,
                "Cleanup sweep completed"
            );
        }
        report
    }

    /// Sweep on every interval tick until `shutdown` turns true, then sweep once more
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            grace_days = self.grace_days,
            "Cleanup scheduler started"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }

        info!("Cleanup scheduler received shutdown signal, running final sweep");
        self.run_once().await;
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
