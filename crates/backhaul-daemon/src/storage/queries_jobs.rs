//! Backup job queries.
//!
//! Transition guards live in the SQL itself: every state-changing statement
//! carries a `WHERE status = ...` predicate and reports via `rows_affected`
//! whether the transition happened. The job state machine layers its typed
//! errors on top of these primitives.

use backhaul_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::BackupJob;

/// A job transitioned to failed by the stuck sweep.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StuckJob {
    pub id: String,
    pub config_id: String,
}

impl Database {
    /// Insert a pending job, guarded by the at-most-one-active invariant.
    ///
    /// Returns `None` when the configuration already has a pending or
    /// running job. The `INSERT ... SELECT ... WHERE NOT EXISTS` plus the
    /// partial unique index make the check-and-create atomic under
    /// concurrent dispatchers.
    pub async fn insert_job(
        &self,
        id: &str,
        config_id: &str,
        agent_id: Option<&str>,
    ) -> Result<Option<BackupJob>, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            r"
            INSERT INTO backup_jobs (id, config_id, agent_id, status, progress_at, created_at)
            SELECT ?, ?, ?, 'pending', ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM backup_jobs
                WHERE config_id = ? AND status IN ('pending', 'running')
            )
            ",
        )
        .bind(id)
        .bind(config_id)
        .bind(agent_id)
        .bind(now)
        .bind(now)
        .bind(config_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(self.get_job(id).await?))
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: &str) -> Result<BackupJob, DatabaseError> {
        sqlx::query_as::<_, BackupJob>("SELECT * FROM backup_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Job {id}")))
    }

    /// List recent jobs for an owner's configs, newest first.
    pub async fn list_jobs(&self, owner_id: &str, limit: u32) -> Result<Vec<BackupJob>, DatabaseError> {
        let jobs = sqlx::query_as::<_, BackupJob>(
            r"
            SELECT j.* FROM backup_jobs j
            JOIN backup_configs c ON c.id = j.config_id
            WHERE c.owner_id = ?
            ORDER BY j.created_at DESC
            LIMIT ?
            ",
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(jobs)
    }

    /// The active (pending or running) job for a config, if any.
    pub async fn active_job_for_config(
        &self,
        config_id: &str,
    ) -> Result<Option<BackupJob>, DatabaseError> {
        let job = sqlx::query_as::<_, BackupJob>(
            "SELECT * FROM backup_jobs WHERE config_id = ? AND status IN ('pending', 'running')",
        )
        .bind(config_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(job)
    }

    /// Count active jobs assigned to an agent.
    pub async fn count_active_jobs_for_agent(&self, agent_id: &str) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM backup_jobs WHERE agent_id = ? AND status IN ('pending', 'running')",
        )
        .bind(agent_id)
        .fetch_one(self.pool())
        .await?;

        Ok(row.0)
    }

    /// Pending jobs waiting on an agent's work queue.
    pub async fn pending_jobs_for_agent(
        &self,
        agent_id: &str,
    ) -> Result<Vec<BackupJob>, DatabaseError> {
        let jobs = sqlx::query_as::<_, BackupJob>(
            "SELECT * FROM backup_jobs WHERE agent_id = ? AND status = 'pending' ORDER BY created_at",
        )
        .bind(agent_id)
        .fetch_all(self.pool())
        .await?;

        Ok(jobs)
    }

    /// Transition pending → running and bump the config's last-run.
    ///
    /// Last-run moves only here, once an execution target has accepted the
    /// job, so a job that never starts does not mask the config as
    /// "attempted". Returns `false` if the job was not pending.
    pub async fn start_job(&self, id: &str) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE backup_jobs SET status = 'running', started_at = ?, progress_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE backup_configs SET last_run = ? WHERE id = (SELECT config_id FROM backup_jobs WHERE id = ?)",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Accumulate progress on a running job.
    ///
    /// Bytes only ever grow; the progress timestamp feeds the watchdog.
    /// Returns `false` if the job is not running.
    pub async fn add_job_progress(
        &self,
        id: &str,
        bytes_delta: i64,
        log_chunk: &str,
    ) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "UPDATE backup_jobs SET bytes_transferred = bytes_transferred + ?, log = log || ?, progress_at = ? WHERE id = ? AND status = 'running'",
        )
        .bind(bytes_delta.max(0))
        .bind(log_chunk)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Transition running → succeeded | failed. Returns `false` unless the
    /// job was running.
    pub async fn finish_job(
        &self,
        id: &str,
        status: &str,
        error_message: Option<&str>,
        final_log: &str,
    ) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "UPDATE backup_jobs SET status = ?, completed_at = ?, error_message = ?, log = log || ? WHERE id = ? AND status = 'running'",
        )
        .bind(status)
        .bind(now)
        .bind(error_message)
        .bind(final_log)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Transition pending | running → cancelled. Returns `false` when the
    /// job was already terminal.
    pub async fn cancel_job_row(&self, id: &str) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "UPDATE backup_jobs SET status = 'cancelled', completed_at = ?, error_message = 'cancelled by operator' WHERE id = ? AND status IN ('pending', 'running')",
        )
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fail every non-terminal job whose last progress precedes `cutoff`.
    ///
    /// Covers running jobs that stopped reporting and pending jobs no agent
    /// ever picked up. Each failed job frees its configuration for future
    /// dispatch.
    pub async fn reset_stuck_jobs(&self, cutoff: i64) -> Result<Vec<StuckJob>, DatabaseError> {
        let now = unix_timestamp();

        let stuck = sqlx::query_as::<_, StuckJob>(
            r"
            UPDATE backup_jobs
            SET status = 'failed',
                completed_at = ?,
                error_message = 'stuck: no progress within threshold'
            WHERE status IN ('pending', 'running') AND progress_at < ?
            RETURNING id, config_id
            ",
        )
        .bind(now)
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;

        Ok(stuck)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::ConfigParams;

    async fn db_with_config(id: &str) -> Database {
        let db = Database::open_in_memory().await.unwrap();
        db.create_config(&ConfigParams {
            id,
            owner_id: "owner-1",
            name: id,
            agent_id: None,
            source_path: "/data",
            remote_type: "s3",
            remote_name: "offsite",
            remote_path: "bucket/data",
            profile_id: None,
            sealed_credentials: Some("deadbeef"),
            is_incremental: true,
            schedule_cron: "0 2 * * *",
            keep_daily_days: 3,
            keep_weekly: true,
            enabled: true,
        })
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn at_most_one_active_job_per_config() {
        let db = db_with_config("c1").await;

        assert!(db.insert_job("j1", "c1", None).await.unwrap().is_some());
        assert!(db.insert_job("j2", "c1", None).await.unwrap().is_none());

        // Finishing the first frees the config
        db.start_job("j1").await.unwrap();
        db.finish_job("j1", "succeeded", None, "").await.unwrap();
        assert!(db.insert_job("j3", "c1", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn start_job_bumps_last_run() {
        let db = db_with_config("c1").await;
        db.insert_job("j1", "c1", None).await.unwrap();

        assert!(db.get_config("c1").await.unwrap().last_run.is_none());
        assert!(db.start_job("j1").await.unwrap());
        assert!(db.get_config("c1").await.unwrap().last_run.is_some());

        // Not pending anymore
        assert!(!db.start_job("j1").await.unwrap());
    }

    #[tokio::test]
    async fn progress_accumulates_monotonically() {
        let db = db_with_config("c1").await;
        db.insert_job("j1", "c1", None).await.unwrap();
        db.start_job("j1").await.unwrap();

        db.add_job_progress("j1", 100, "chunk one\n").await.unwrap();
        db.add_job_progress("j1", 50, "chunk two\n").await.unwrap();
        // Negative deltas are clamped, not applied
        db.add_job_progress("j1", -30, "").await.unwrap();

        let job = db.get_job("j1").await.unwrap();
        assert_eq!(job.bytes_transferred, 150);
        assert!(job.log.contains("chunk one"));
        assert!(job.log.contains("chunk two"));
    }

    #[tokio::test]
    async fn progress_rejected_unless_running() {
        let db = db_with_config("c1").await;
        db.insert_job("j1", "c1", None).await.unwrap();

        assert!(!db.add_job_progress("j1", 10, "x").await.unwrap());

        db.start_job("j1").await.unwrap();
        db.finish_job("j1", "failed", Some("boom"), "").await.unwrap();
        assert!(!db.add_job_progress("j1", 10, "x").await.unwrap());
    }

    #[tokio::test]
    async fn cancel_only_from_non_terminal() {
        let db = db_with_config("c1").await;
        db.insert_job("j1", "c1", None).await.unwrap();

        assert!(db.cancel_job_row("j1").await.unwrap());
        assert!(!db.cancel_job_row("j1").await.unwrap());

        let job = db.get_job("j1").await.unwrap();
        assert_eq!(job.status, "cancelled");
    }

    #[tokio::test]
    async fn stuck_sweep_transitions_only_stale_jobs() {
        let db = db_with_config("c1").await;
        db.insert_job("j1", "c1", None).await.unwrap();
        db.start_job("j1").await.unwrap();

        // Fresh progress: cutoff in the past leaves the job alone
        let stuck = db.reset_stuck_jobs(unix_timestamp() - 300).await.unwrap();
        assert!(stuck.is_empty());

        // Cutoff in the future: everything is stale
        let stuck = db.reset_stuck_jobs(unix_timestamp() + 300).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].config_id, "c1");

        let job = db.get_job("j1").await.unwrap();
        assert_eq!(job.status, "failed");
        assert!(job.error_message.unwrap().contains("stuck"));

        // Config is dispatchable again
        assert!(db.insert_job("j2", "c1", None).await.unwrap().is_some());
    }
}
