//! Job dispatcher: turns a due configuration into a running job.
//!
//! Credentials are resolved before any job row exists, so a configuration
//! with a broken credential source never burns its dispatch slot. Target
//! selection is by assignment: a config without an agent runs on the
//! daemon host, an assigned config is queued for the agent to pull at its
//! next check-in.

use serde::Serialize;
use tracing::{info, warn};

use crate::executor::{LocalRunner, rclone};
use crate::jobs::{JobError, JobManager, JobOutcome};
use crate::registry::{AgentRegistry, RegistryError};
use crate::storage::{AgentStatus, BackupConfig, BackupJob, Database, DatabaseError};
use crate::vault::{CredentialVault, VaultError};

/// Dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Agent {0} is offline")]
    AgentOffline(String),

    #[error("Job {0} is not assigned to this agent")]
    NotAssigned(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// Everything an agent needs to execute one pulled job.
///
/// Carries decrypted material in `remote_config`; it exists only inside
/// the check-in response and is never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct AgentWorkItem {
    pub job_id: String,
    pub config_id: String,
    pub source_path: String,
    pub remote_name: String,
    pub remote_spec: String,
    pub backup_dir: Option<String>,
    pub remote_config: String,
}

/// Dispatches due configurations to their execution target.
#[derive(Clone)]
pub struct Dispatcher {
    db: Database,
    vault: CredentialVault,
    registry: AgentRegistry,
    jobs: JobManager,
    runner: LocalRunner,
}

impl Dispatcher {
    pub const fn new(
        db: Database,
        vault: CredentialVault,
        registry: AgentRegistry,
        jobs: JobManager,
        runner: LocalRunner,
    ) -> Self {
        Self {
            db,
            vault,
            registry,
            jobs,
            runner,
        }
    }

    /// Dispatch one configuration.
    ///
    /// Local target: the job is created, started, and handed to the
    /// runner. Agent target: the agent must be online and the job stays
    /// pending on its pull queue.
    pub async fn dispatch(&self, config: &BackupConfig) -> Result<BackupJob, DispatchError> {
        let creds = self.vault.resolve(config, &config.owner_id).await?;

        match config.agent_id.as_deref() {
            None => {
                let job = self.jobs.create(&config.id, None).await?;
                let job = self.jobs.start(&job.id).await?;
                self.runner.spawn(job.clone(), config.clone(), creds);
                info!(config_id = %config.id, job_id = %job.id, "Dispatched locally");
                Ok(job)
            }
            Some(agent_id) => {
                let (_, status) = self.registry.get(agent_id).await?;
                if status != AgentStatus::Online {
                    return Err(DispatchError::AgentOffline(agent_id.to_owned()));
                }

                drop(creds); // the agent re-resolves at pull time

                let job = self.jobs.create(&config.id, Some(agent_id)).await?;
                info!(config_id = %config.id, job_id = %job.id, agent_id, "Queued for agent");
                Ok(job)
            }
        }
    }

    /// Operator-triggered immediate dispatch.
    pub async fn run_now(
        &self,
        config_id: &str,
        owner_id: &str,
    ) -> Result<BackupJob, DispatchError> {
        let config = self.db.get_config(config_id).await?;
        if config.owner_id != owner_id {
            return Err(DispatchError::Db(DatabaseError::NotFound(format!(
                "Config {config_id}"
            ))));
        }

        self.dispatch(&config).await
    }

    /// Pull pending work for an agent, transitioning each job to running.
    ///
    /// A pending job whose credentials fail to resolve at pull time is
    /// failed in place instead of being returned; the agent never sees it.
    pub async fn fetch_work(&self, agent_id: &str) -> Result<Vec<AgentWorkItem>, DispatchError> {
        let pending = self.db.pending_jobs_for_agent(agent_id).await?;
        let mut items = Vec::with_capacity(pending.len());

        for job in pending {
            let config = match self.db.get_config(&job.config_id).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Pending job without config");
                    continue;
                }
            };

            let creds = match self.vault.resolve(&config, &config.owner_id).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failing job: credentials unresolved at pull");
                    self.jobs.start(&job.id).await?;
                    self.jobs
                        .complete(&job.id, JobOutcome::Failed, Some(&e.to_string()), "")
                        .await?;
                    continue;
                }
            };

            let job = match self.jobs.start(&job.id).await {
                Ok(started) => started,
                Err(JobError::InvalidTransition { .. }) => {
                    // Lost a race with a cancel or the stuck sweep; the rest
                    // of the queue still gets handed out
                    warn!(job_id = %job.id, "Job no longer pending at pull, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let date = chrono::Utc::now().date_naive();

            items.push(AgentWorkItem {
                job_id: job.id,
                config_id: config.id.clone(),
                source_path: config.source_path.clone(),
                remote_name: config.remote_name.clone(),
                remote_spec: rclone::remote_spec(&config),
                backup_dir: (config.is_incremental != 0)
                    .then(|| rclone::backup_dir(&config, date)),
                remote_config: rclone::render_remote_config(&config.remote_name, &creds),
            });
        }

        Ok(items)
    }

    /// Progress report from an agent for a job it pulled.
    pub async fn report_remote_progress(
        &self,
        agent_id: &str,
        job_id: &str,
        bytes_delta: i64,
        log_chunk: &str,
    ) -> Result<(), DispatchError> {
        self.check_assignment(agent_id, job_id).await?;
        self.jobs.report_progress(job_id, bytes_delta, log_chunk).await?;
        Ok(())
    }

    /// Terminal report from an agent for a job it pulled.
    pub async fn complete_remote(
        &self,
        agent_id: &str,
        job_id: &str,
        outcome: JobOutcome,
        error_message: Option<&str>,
        final_log: &str,
    ) -> Result<BackupJob, DispatchError> {
        self.check_assignment(agent_id, job_id).await?;
        Ok(self
            .jobs
            .complete(job_id, outcome, error_message, final_log)
            .await?)
    }

    async fn check_assignment(&self, agent_id: &str, job_id: &str) -> Result<(), DispatchError> {
        let job = self.db.get_job(job_id).await?;
        if job.agent_id.as_deref() != Some(agent_id) {
            return Err(DispatchError::NotAssigned(job_id.to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::MachineFacts;
    use crate::storage::ConfigParams;
    use backhaul_crypto::{CredentialSealer, MasterKey};
    use std::collections::BTreeMap;

    struct Fixture {
        db: Database,
        vault: CredentialVault,
        registry: AgentRegistry,
        jobs: JobManager,
        dispatcher: Dispatcher,
    }

    async fn fixture() -> Fixture {
        let db = Database::open_in_memory().await.unwrap();
        let sealer = CredentialSealer::new(&MasterKey::generate()).unwrap();
        let vault = CredentialVault::new(db.clone(), sealer);
        let registry = AgentRegistry::new(db.clone(), 30, 3600);
        let jobs = JobManager::new(db.clone());
        let runner = LocalRunner::new(jobs.clone(), "true".to_owned());
        let dispatcher = Dispatcher::new(
            db.clone(),
            vault.clone(),
            registry.clone(),
            jobs.clone(),
            runner,
        );

        Fixture {
            db,
            vault,
            registry,
            jobs,
            dispatcher,
        }
    }

    async fn make_config(fx: &Fixture, id: &str, agent_id: Option<&str>) -> BackupConfig {
        let blob = fx
            .vault
            .seal(&BTreeMap::from([(
                "access_key".to_owned(),
                "AKIA123".to_owned(),
            )]))
            .unwrap();

        fx.db
            .create_config(&ConfigParams {
                id,
                owner_id: "owner-1",
                name: id,
                agent_id,
                source_path: "/tmp",
                remote_type: "s3",
                remote_name: "offsite",
                remote_path: "bucket/data",
                profile_id: None,
                sealed_credentials: Some(blob.as_str()),
                is_incremental: true,
                schedule_cron: "0 2 * * *",
                keep_daily_days: 3,
                keep_weekly: true,
                enabled: true,
            })
            .await
            .unwrap()
    }

    async fn enroll(fx: &Fixture, hostname: &str) -> String {
        let token = fx.registry.issue_token("owner-1").await.unwrap();
        fx.registry
            .redeem(
                &token.token,
                &MachineFacts {
                    hostname: hostname.to_owned(),
                    platform: "linux".to_owned(),
                    ip_address: "10.0.0.5".to_owned(),
                    version: "1.0.0".to_owned(),
                },
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn unresolved_credentials_create_no_job() {
        let fx = fixture().await;
        let mut config = make_config(&fx, "c1", None).await;
        config.sealed_credentials = None;

        let err = fx.dispatcher.dispatch(&config).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Vault(VaultError::CredentialsUnresolved)
        ));
        assert!(fx.db.active_job_for_config("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn agent_job_stays_pending_until_pull() {
        let fx = fixture().await;
        let agent_id = enroll(&fx, "web-01").await;
        let config = make_config(&fx, "c1", Some(&agent_id)).await;

        let job = fx.dispatcher.dispatch(&config).await.unwrap();
        assert_eq!(job.status, "pending");

        let work = fx.dispatcher.fetch_work(&agent_id).await.unwrap();
        assert_eq!(work.len(), 1);
        assert_eq!(work[0].job_id, job.id);
        assert!(work[0].remote_config.contains("AKIA123"));
        assert!(work[0].backup_dir.as_deref().unwrap().contains("BACKUPS"));

        assert_eq!(fx.jobs.get(&job.id).await.unwrap().status, "running");
        // Queue is drained
        assert!(fx.dispatcher.fetch_work(&agent_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_job_does_not_block_the_pull() {
        let fx = fixture().await;
        let agent_id = enroll(&fx, "web-01").await;
        let first = make_config(&fx, "c1", Some(&agent_id)).await;
        let second = make_config(&fx, "c2", Some(&agent_id)).await;

        let doomed = fx.dispatcher.dispatch(&first).await.unwrap();
        let queued = fx.dispatcher.dispatch(&second).await.unwrap();

        // Operator cancel racing the agent's pull
        fx.jobs.cancel(&doomed.id).await.unwrap();

        let work = fx.dispatcher.fetch_work(&agent_id).await.unwrap();
        assert_eq!(work.len(), 1);
        assert_eq!(work[0].job_id, queued.id);
        assert_eq!(fx.jobs.get(&doomed.id).await.unwrap().status, "cancelled");
    }

    #[tokio::test]
    async fn offline_agent_rejects_dispatch() {
        let fx = fixture().await;
        let db = fx.db.clone();
        db.create_agent("a1", "cold-01", "linux", "10.0.0.9", "1.0.0")
            .await
            .unwrap();
        // Push last_seen far into the past
        sqlx::query("UPDATE agents SET last_seen = 1000 WHERE id = 'a1'")
            .execute(db.pool())
            .await
            .unwrap();

        let config = make_config(&fx, "c1", Some("a1")).await;
        let err = fx.dispatcher.dispatch(&config).await.unwrap_err();
        assert!(matches!(err, DispatchError::AgentOffline(_)));
        assert!(fx.db.active_job_for_config("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remote_completion_requires_assignment() {
        let fx = fixture().await;
        let agent_id = enroll(&fx, "web-01").await;
        let other_id = enroll(&fx, "web-02").await;
        let config = make_config(&fx, "c1", Some(&agent_id)).await;

        fx.dispatcher.dispatch(&config).await.unwrap();
        let work = fx.dispatcher.fetch_work(&agent_id).await.unwrap();
        let job_id = &work[0].job_id;

        let err = fx
            .dispatcher
            .complete_remote(&other_id, job_id, JobOutcome::Succeeded, None, "")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotAssigned(_)));

        fx.dispatcher
            .report_remote_progress(&agent_id, job_id, 2048, "chunk\n")
            .await
            .unwrap();
        let done = fx
            .dispatcher
            .complete_remote(&agent_id, job_id, JobOutcome::Succeeded, None, "done\n")
            .await
            .unwrap();
        assert_eq!(done.status, "succeeded");
        assert_eq!(done.bytes_transferred, 2048);
    }

    #[tokio::test]
    async fn run_now_checks_ownership() {
        let fx = fixture().await;
        make_config(&fx, "c1", None).await;

        let err = fx.dispatcher.run_now("c1", "intruder").await.unwrap_err();
        assert!(matches!(err, DispatchError::Db(DatabaseError::NotFound(_))));

        let job = fx.dispatcher.run_now("c1", "owner-1").await.unwrap();
        assert_eq!(job.status, "running");
    }
}
