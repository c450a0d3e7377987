//! services/api/src/sweeper.rs
//!
//! Drives the janitor's periodic sweeps. The process model runs exactly one
//! sweeper task, so overlapping runs of the same sweep cannot occur.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use iqra_core::janitor::Janitor;

/// How often idle active sessions are completed.
pub const INACTIVITY_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// How often expired sessions and recordings are purged.
pub const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Runs both sweeps on their intervals until the token is cancelled.
pub async fn run(janitor: Janitor, shutdown: CancellationToken) {
    let mut inactivity = tokio::time::interval(INACTIVITY_SWEEP_INTERVAL);
    let mut retention = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
    // Consume the immediate first tick of each interval.
    inactivity.tick().await;
    retention.tick().await;

    info!("Session sweeper started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Session sweeper stopped");
                return;
            }
            _ = inactivity.tick() => {
                if let Err(e) = janitor.complete_inactive_sessions(Utc::now()).await {
                    error!("Inactivity sweep failed: {:?}", e);
                }
            }
            _ = retention.tick() => {
                if let Err(e) = janitor.purge_expired(Utc::now()).await {
                    error!("Retention sweep failed: {:?}", e);
                }
            }
        }
    }
}
