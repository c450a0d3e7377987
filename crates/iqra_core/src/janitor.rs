//! crates/iqra_core/src/janitor.rs
//!
//! Periodic maintenance over the session store: completing sessions that
//! went quiet and deleting sessions and recordings past their retention
//! window. Both sweeps take `now` explicitly so the boundary conditions are
//! testable; the surrounding host decides when they run.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::CleanupRun;
use crate::ports::{DatabaseService, PortResult};

/// Maximum writes per batch commit, matching the store's limit.
pub const DELETE_BATCH_SIZE: usize = 500;

/// An active session with no activity for this long is considered over.
pub const INACTIVITY_TIMEOUT_MINUTES: i64 = 30;

/// Sessions older than this are deleted unconditionally.
pub const SESSION_RETENTION_DAYS: i64 = 30;

/// Active sessions older than this are deleted unless they showed activity
/// within the same window.
pub const ACTIVE_SESSION_GRACE_HOURS: i64 = 24;

/// Recordings older than this are deleted unless flagged important.
pub const RECORDING_RETENTION_DAYS: i64 = 30;

/// End reason stamped on sessions completed by the inactivity sweep.
pub const END_REASON_INACTIVITY: &str = "inactivity";

/// What one retention sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionOutcome {
    pub sessions_deleted: u64,
    pub recordings_deleted: u64,
}

/// The periodic sweep runner. Constructed once with the store injected.
#[derive(Clone)]
pub struct Janitor {
    db: Arc<dyn DatabaseService>,
}

impl Janitor {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// Completes active sessions that have been idle for the inactivity
    /// timeout. Returns how many sessions were transitioned.
    pub async fn complete_inactive_sessions(&self, now: DateTime<Utc>) -> PortResult<u64> {
        let idle_since = now - Duration::minutes(INACTIVITY_TIMEOUT_MINUTES);
        let ids = self.db.idle_active_sessions(idle_since).await.map_err(|e| {
            error!("Failed to query idle sessions: {:?}", e);
            e
        })?;

        let mut completed = 0u64;
        for chunk in ids.chunks(DELETE_BATCH_SIZE) {
            completed += self
                .db
                .complete_sessions(chunk, now, END_REASON_INACTIVITY)
                .await
                .map_err(|e| {
                    error!("Failed to complete idle sessions: {:?}", e);
                    e
                })?;
        }
        if completed > 0 {
            info!("Inactivity sweep completed {} sessions", completed);
        }
        Ok(completed)
    }

    /// Deletes sessions and recordings past their retention windows, in
    /// batches. Batches commit independently; a failure records the counts
    /// the committed batches achieved and propagates without rolling back.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> PortResult<RetentionOutcome> {
        let mut outcome = RetentionOutcome::default();
        let result = self.purge_expired_inner(now, &mut outcome).await;

        let run = CleanupRun {
            ran_at: now,
            sessions_deleted: outcome.sessions_deleted,
            recordings_deleted: outcome.recordings_deleted,
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        if let Err(e) = self.db.record_cleanup_run(&run).await {
            warn!("Failed to record cleanup run: {:?}", e);
        }

        match result {
            Ok(()) => {
                info!(
                    "Retention sweep deleted {} sessions and {} recordings",
                    outcome.sessions_deleted, outcome.recordings_deleted
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    "Retention sweep failed after deleting {} sessions and {} recordings: {:?}",
                    outcome.sessions_deleted, outcome.recordings_deleted, e
                );
                Err(e)
            }
        }
    }

    async fn purge_expired_inner(
        &self,
        now: DateTime<Utc>,
        outcome: &mut RetentionOutcome,
    ) -> PortResult<()> {
        let retention_cutoff = now - Duration::days(SESSION_RETENTION_DAYS);
        let grace_cutoff = now - Duration::hours(ACTIVE_SESSION_GRACE_HOURS);

        let mut session_ids = self.db.sessions_started_before(retention_cutoff).await?;
        // Day-old active sessions are double-checked against their last
        // activity so a session that resumed is not deleted.
        let lapsed = self.db.lapsed_active_sessions(grace_cutoff).await?;
        for id in lapsed {
            if !session_ids.contains(&id) {
                session_ids.push(id);
            }
        }
        outcome.sessions_deleted += self.delete_session_batches(&session_ids).await?;

        let recording_cutoff = now - Duration::days(RECORDING_RETENTION_DAYS);
        let recording_ids = self.db.expired_recordings(recording_cutoff).await?;
        for chunk in recording_ids.chunks(DELETE_BATCH_SIZE) {
            outcome.recordings_deleted += self.db.delete_recordings(chunk).await?;
        }
        Ok(())
    }

    async fn delete_session_batches(&self, session_ids: &[Uuid]) -> PortResult<u64> {
        let mut deleted = 0u64;
        for chunk in session_ids.chunks(DELETE_BATCH_SIZE) {
            deleted += self.db.delete_sessions(chunk).await?;
        }
        Ok(deleted)
    }
}
