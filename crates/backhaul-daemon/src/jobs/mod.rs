//! Job lifecycle: state machine, cancellation, stuck-job watchdog.
//!
//! Valid transitions:
//!
//! ```text
//! pending ──► running ──► succeeded
//!    │           │    └──► failed
//!    └───────────┴───────► cancelled
//! ```
//!
//! The watchdog adds `running → failed (stuck)` for jobs whose progress
//! timestamp goes stale, and applies the same cutoff to pending jobs an
//! agent never picked up.

mod watchdog;

pub use watchdog::run_watchdog;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use backhaul_core::db::unix_timestamp;

use crate::storage::{BackupConfig, BackupJob, Database, DatabaseError, JobStatus, StuckJob};

/// Job state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Configuration {0} already has an active job")]
    AlreadyActive(String),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: &'static str,
    },

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// Terminal outcome reported by an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
}

impl JobOutcome {
    const fn status(self) -> JobStatus {
        match self {
            Self::Succeeded => JobStatus::Succeeded,
            Self::Failed => JobStatus::Failed,
        }
    }
}

/// Hook invoked after a job succeeds, to prune old snapshots.
///
/// Implementations must not block; the state machine calls this after the
/// terminal transition is durable, and a pruning failure never reverts
/// the job.
pub trait RetentionTrigger: Send + Sync {
    fn prune_after_success(&self, config: BackupConfig);
}

/// Per-job abort channels for locally executed jobs.
///
/// Agent-executed jobs have no entry here; their cancellation is observed
/// by the agent on its next pull.
#[derive(Clone, Default)]
pub struct AbortHandles {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<()>>>>,
}

impl AbortHandles {
    /// Register a running job; the returned receiver fires on cancel.
    pub fn register(&self, job_id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut map) = self.inner.lock() {
            map.insert(job_id.to_owned(), tx);
        }
        rx
    }

    /// Drop the handle once the job reached a terminal state.
    pub fn finish(&self, job_id: &str) {
        if let Ok(mut map) = self.inner.lock() {
            map.remove(job_id);
        }
    }

    /// Fire the abort signal. Returns `false` when no runner is registered.
    pub fn abort(&self, job_id: &str) -> bool {
        let Ok(mut map) = self.inner.lock() else {
            return false;
        };
        map.remove(job_id).is_some_and(|tx| tx.send(()).is_ok())
    }
}

/// The job state machine, backed by guarded SQL transitions.
#[derive(Clone)]
pub struct JobManager {
    db: Database,
    aborts: AbortHandles,
    retention: Option<Arc<dyn RetentionTrigger>>,
}

impl JobManager {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            aborts: AbortHandles::default(),
            retention: None,
        }
    }

    #[must_use]
    pub fn with_retention<T: RetentionTrigger + 'static>(mut self, trigger: T) -> Self {
        self.retention = Some(Arc::new(trigger));
        self
    }

    pub const fn abort_handles(&self) -> &AbortHandles {
        &self.aborts
    }

    /// Create a pending job for a config.
    pub async fn create(
        &self,
        config_id: &str,
        agent_id: Option<&str>,
    ) -> Result<BackupJob, JobError> {
        let id = Uuid::new_v4().to_string();

        let job = self
            .db
            .insert_job(&id, config_id, agent_id)
            .await?
            .ok_or_else(|| JobError::AlreadyActive(config_id.to_owned()))?;

        info!(job_id = %job.id, config_id, agent = ?agent_id, "Job created");
        Ok(job)
    }

    /// Transition a job to running.
    pub async fn start(&self, job_id: &str) -> Result<BackupJob, JobError> {
        if self.db.start_job(job_id).await? {
            let job = self.db.get_job(job_id).await?;
            info!(job_id, config_id = %job.config_id, "Job started");
            return Ok(job);
        }

        Err(self.transition_error(job_id, "running").await)
    }

    /// Record progress from an executor.
    ///
    /// A report against a non-running job (typically one the watchdog
    /// already reset) is logged and swallowed; the executor keeps going
    /// and its terminal report will be rejected the same way.
    pub async fn report_progress(
        &self,
        job_id: &str,
        bytes_delta: i64,
        log_chunk: &str,
    ) -> Result<(), JobError> {
        if !self.db.add_job_progress(job_id, bytes_delta, log_chunk).await? {
            warn!(job_id, "Progress report for a job no longer running");
        }
        Ok(())
    }

    /// Transition a running job to its terminal outcome.
    pub async fn complete(
        &self,
        job_id: &str,
        outcome: JobOutcome,
        error_message: Option<&str>,
        final_log: &str,
    ) -> Result<BackupJob, JobError> {
        let status = outcome.status();
        if !self
            .db
            .finish_job(job_id, status.as_str(), error_message, final_log)
            .await?
        {
            return Err(self.transition_error(job_id, status.as_str()).await);
        }

        self.aborts.finish(job_id);
        let job = self.db.get_job(job_id).await?;
        info!(job_id, status = %status, bytes = job.bytes_transferred, "Job finished");

        if outcome == JobOutcome::Succeeded {
            if let Some(trigger) = &self.retention {
                match self.db.get_config(&job.config_id).await {
                    Ok(config) => trigger.prune_after_success(config),
                    Err(e) => warn!(job_id, error = %e, "Skipping retention: config gone"),
                }
            }
        }

        Ok(job)
    }

    /// Cancel a pending or running job.
    pub async fn cancel(&self, job_id: &str) -> Result<BackupJob, JobError> {
        if !self.db.cancel_job_row(job_id).await? {
            return Err(self.transition_error(job_id, "cancelled").await);
        }

        // Best effort; an agent-side job observes the cancel on next pull.
        self.aborts.abort(job_id);

        let job = self.db.get_job(job_id).await?;
        info!(job_id, config_id = %job.config_id, "Job cancelled");
        Ok(job)
    }

    /// Fail every job whose progress went stale beyond `threshold` seconds.
    pub async fn reset_stuck(&self, threshold: i64) -> Result<Vec<StuckJob>, JobError> {
        let cutoff = unix_timestamp() - threshold;
        let stuck = self.db.reset_stuck_jobs(cutoff).await?;

        for job in &stuck {
            self.aborts.finish(&job.id);
            warn!(job_id = %job.id, config_id = %job.config_id, "Job reset as stuck");
        }

        Ok(stuck)
    }

    /// Accumulated log text for a job.
    pub async fn logs(&self, job_id: &str) -> Result<String, JobError> {
        Ok(self.get(job_id).await?.log)
    }

    pub async fn get(&self, job_id: &str) -> Result<BackupJob, JobError> {
        self.db
            .get_job(job_id)
            .await
            .map_err(|_| JobError::NotFound(job_id.to_owned()))
    }

    pub async fn list(&self, owner_id: &str, limit: u32) -> Result<Vec<BackupJob>, JobError> {
        Ok(self.db.list_jobs(owner_id, limit).await?)
    }

    /// Build the precise transition error for a guarded update that
    /// affected no rows.
    async fn transition_error(&self, job_id: &str, to: &'static str) -> JobError {
        match self.db.get_job(job_id).await {
            Ok(job) => JobError::InvalidTransition {
                job_id: job_id.to_owned(),
                from: job.status,
                to,
            },
            Err(DatabaseError::NotFound(_)) => JobError::NotFound(job_id.to_owned()),
            Err(e) => JobError::Db(e),
        }
    }
}
