//! Job read and control commands.

use crate::storage::{BackupJob, StuckJob};

use super::{Orchestrator, ServiceError};

impl Orchestrator {
    /// Recent jobs across the owner's configurations.
    pub async fn list_jobs(
        &self,
        owner_id: &str,
        limit: u32,
    ) -> Result<Vec<BackupJob>, ServiceError> {
        Ok(self.jobs.list(owner_id, limit).await?)
    }

    pub async fn get_job(&self, owner_id: &str, job_id: &str) -> Result<BackupJob, ServiceError> {
        let job = self.jobs.get(job_id).await?;
        self.get_config(owner_id, &job.config_id).await?;
        Ok(job)
    }

    /// The accumulated log text of a job.
    pub async fn job_logs(&self, owner_id: &str, job_id: &str) -> Result<String, ServiceError> {
        Ok(self.get_job(owner_id, job_id).await?.log)
    }

    /// Cancel a pending or running job.
    pub async fn cancel_job(&self, owner_id: &str, job_id: &str) -> Result<BackupJob, ServiceError> {
        self.get_job(owner_id, job_id).await?;
        Ok(self.jobs.cancel(job_id).await?)
    }

    /// Dispatch a configuration immediately, outside its schedule.
    pub async fn run_now(&self, owner_id: &str, config_id: &str) -> Result<BackupJob, ServiceError> {
        Ok(self.dispatcher.run_now(config_id, owner_id).await?)
    }

    /// Manually sweep for stuck jobs (the watchdog does this on a timer).
    pub async fn reset_stuck_jobs(&self, threshold: i64) -> Result<Vec<StuckJob>, ServiceError> {
        Ok(self.jobs.reset_stuck(threshold).await?)
    }
}
