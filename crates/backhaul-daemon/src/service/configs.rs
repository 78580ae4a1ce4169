//! Backup configuration commands.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use backhaul_core::CronSchedule;

use crate::storage::{BackupConfig, ConfigParams, RemoteType};

use super::{Orchestrator, ServiceError};

/// Write-side input for creating or updating a configuration.
///
/// `secrets` is plaintext credential material; it is sealed before
/// anything is persisted. Exactly one of `profile_id` / `secrets` must be
/// set, except on update with `keep_existing_credentials`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigInput {
    pub name: String,
    pub agent_id: Option<String>,
    pub source_path: String,
    pub remote_type: String,
    pub remote_name: String,
    pub remote_path: String,
    pub profile_id: Option<String>,
    pub secrets: Option<BTreeMap<String, String>>,
    pub is_incremental: bool,
    pub schedule_cron: String,
    pub keep_daily_days: i64,
    pub keep_weekly: bool,
    pub enabled: bool,
}

/// A config's credential columns after validation.
struct CredentialColumns {
    profile_id: Option<String>,
    sealed: Option<String>,
}

impl Orchestrator {
    /// Create a backup configuration.
    pub async fn create_config(
        &self,
        owner_id: &str,
        input: &ConfigInput,
    ) -> Result<BackupConfig, ServiceError> {
        self.validate_config_input(owner_id, input).await?;
        let creds = self.credential_columns(input)?;

        let id = Uuid::new_v4().to_string();
        let config = self
            .db
            .create_config(&ConfigParams {
                id: &id,
                owner_id,
                name: &input.name,
                agent_id: input.agent_id.as_deref(),
                source_path: &input.source_path,
                remote_type: &input.remote_type,
                remote_name: &input.remote_name,
                remote_path: &input.remote_path,
                profile_id: creds.profile_id.as_deref(),
                sealed_credentials: creds.sealed.as_deref(),
                is_incremental: input.is_incremental,
                schedule_cron: &input.schedule_cron,
                keep_daily_days: input.keep_daily_days,
                keep_weekly: input.keep_weekly,
                enabled: input.enabled,
            })
            .await?;

        info!(config_id = %config.id, owner_id, "Config created");
        Ok(config)
    }

    /// Update a configuration.
    ///
    /// With `keep_existing_credentials` the stored credential source is
    /// carried over untouched, so a form round-trip does not need to
    /// resubmit secrets.
    pub async fn update_config(
        &self,
        owner_id: &str,
        config_id: &str,
        input: &ConfigInput,
        keep_existing_credentials: bool,
    ) -> Result<BackupConfig, ServiceError> {
        let existing = self.get_config(owner_id, config_id).await?;
        self.validate_config_input(owner_id, input).await?;

        let creds = if keep_existing_credentials {
            CredentialColumns {
                profile_id: existing.profile_id.clone(),
                sealed: existing.sealed_credentials.clone(),
            }
        } else {
            self.credential_columns(input)?
        };

        let config = self
            .db
            .update_config(&ConfigParams {
                id: config_id,
                owner_id,
                name: &input.name,
                agent_id: input.agent_id.as_deref(),
                source_path: &input.source_path,
                remote_type: &input.remote_type,
                remote_name: &input.remote_name,
                remote_path: &input.remote_path,
                profile_id: creds.profile_id.as_deref(),
                sealed_credentials: creds.sealed.as_deref(),
                is_incremental: input.is_incremental,
                schedule_cron: &input.schedule_cron,
                keep_daily_days: input.keep_daily_days,
                keep_weekly: input.keep_weekly,
                enabled: input.enabled,
            })
            .await?;

        info!(config_id, owner_id, "Config updated");
        Ok(config)
    }

    /// Delete a configuration and its job history.
    ///
    /// The active job, if any, is cancelled first so a runner or agent
    /// does not keep reporting into a deleted config.
    pub async fn delete_config(&self, owner_id: &str, config_id: &str) -> Result<(), ServiceError> {
        self.get_config(owner_id, config_id).await?;

        if let Some(active) = self.db.active_job_for_config(config_id).await? {
            // A lost race with the job finishing on its own is fine
            let _ = self.jobs.cancel(&active.id).await;
        }

        self.db.remove_config(config_id).await?;
        info!(config_id, owner_id, "Config deleted");
        Ok(())
    }

    pub async fn get_config(
        &self,
        owner_id: &str,
        config_id: &str,
    ) -> Result<BackupConfig, ServiceError> {
        let config = self.db.get_config(config_id).await?;
        if config.owner_id != owner_id {
            return Err(ServiceError::NotFound(format!("Config {config_id}")));
        }
        Ok(config)
    }

    pub async fn list_configs(&self, owner_id: &str) -> Result<Vec<BackupConfig>, ServiceError> {
        Ok(self.db.list_configs(owner_id).await?)
    }

    async fn validate_config_input(
        &self,
        owner_id: &str,
        input: &ConfigInput,
    ) -> Result<(), ServiceError> {
        if input.name.trim().is_empty() {
            return Err(ServiceError::Validation("Name must not be empty".into()));
        }
        if input.source_path.trim().is_empty() {
            return Err(ServiceError::Validation(
                "Source path must not be empty".into(),
            ));
        }
        if input.keep_daily_days < 1 {
            return Err(ServiceError::Validation(
                "keep_daily_days must be at least 1".into(),
            ));
        }
        if RemoteType::parse(&input.remote_type).is_none() {
            return Err(ServiceError::Validation(format!(
                "Unsupported remote type: {}",
                input.remote_type
            )));
        }

        // Malformed cron never reaches the table
        CronSchedule::parse(&input.schedule_cron)?;

        if input.profile_id.is_some() && input.secrets.is_some() {
            return Err(ServiceError::Validation(
                "Provide either a credential profile or inline secrets, not both".into(),
            ));
        }

        if let Some(agent_id) = &input.agent_id {
            self.registry.get(agent_id).await?;
        }

        if let Some(profile_id) = &input.profile_id {
            let profile = self.get_profile(owner_id, profile_id).await?;
            if profile.remote_type != input.remote_type {
                return Err(ServiceError::Validation(format!(
                    "Profile {profile_id} is for {}, config wants {}",
                    profile.remote_type, input.remote_type
                )));
            }
        }

        Ok(())
    }

    /// Resolve the input's credential source into storage columns.
    fn credential_columns(&self, input: &ConfigInput) -> Result<CredentialColumns, ServiceError> {
        match (&input.profile_id, &input.secrets) {
            (Some(_), Some(_)) => Err(ServiceError::Validation(
                "Provide either a credential profile or inline secrets, not both".into(),
            )),
            (None, None) => Err(ServiceError::Validation(
                "A credential source is required".into(),
            )),
            (Some(profile_id), None) => Ok(CredentialColumns {
                profile_id: Some(profile_id.clone()),
                sealed: None,
            }),
            (None, Some(secrets)) => {
                if secrets.is_empty() {
                    return Err(ServiceError::Validation(
                        "Secrets must not be empty".into(),
                    ));
                }
                let blob = self.vault.seal(secrets)?;
                Ok(CredentialColumns {
                    profile_id: None,
                    sealed: Some(blob.as_str().to_owned()),
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::service::test_support::orchestrator;

    pub(crate) fn input(name: &str) -> ConfigInput {
        ConfigInput {
            name: name.to_owned(),
            agent_id: None,
            source_path: "/data".to_owned(),
            remote_type: "s3".to_owned(),
            remote_name: "offsite".to_owned(),
            remote_path: "bucket/data".to_owned(),
            profile_id: None,
            secrets: Some(BTreeMap::from([(
                "access_key".to_owned(),
                "AKIA123".to_owned(),
            )])),
            is_incremental: true,
            schedule_cron: "0 2 * * *".to_owned(),
            keep_daily_days: 3,
            keep_weekly: true,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn create_seals_inline_secrets() {
        let svc = orchestrator().await;
        let config = svc.create_config("owner-1", &input("nightly")).await.unwrap();

        let sealed = config.sealed_credentials.unwrap();
        assert!(!sealed.contains("AKIA123"));
        assert!(config.profile_id.is_none());
    }

    #[tokio::test]
    async fn malformed_cron_is_rejected_before_write() {
        let svc = orchestrator().await;
        let mut bad = input("nightly");
        bad.schedule_cron = "61 * * * *".to_owned();

        let err = svc.create_config("owner-1", &bad).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(svc.list_configs("owner-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn credential_source_is_exactly_one() {
        let svc = orchestrator().await;

        let mut neither = input("a");
        neither.secrets = None;
        assert!(matches!(
            svc.create_config("owner-1", &neither).await.unwrap_err(),
            ServiceError::Validation(_)
        ));

        let mut both = input("b");
        both.profile_id = Some("p1".to_owned());
        assert!(matches!(
            svc.create_config("owner-1", &both).await.unwrap_err(),
            ServiceError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn empty_inline_secrets_are_rejected() {
        let svc = orchestrator().await;
        let mut empty = input("nightly");
        empty.secrets = Some(BTreeMap::new());

        let err = svc.create_config("owner-1", &empty).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(svc.list_configs("owner-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_can_keep_existing_credentials() {
        let svc = orchestrator().await;
        let created = svc.create_config("owner-1", &input("nightly")).await.unwrap();

        let mut edit = input("renamed");
        edit.secrets = None; // form round-trip with blank secrets
        let updated = svc
            .update_config("owner-1", &created.id, &edit, true)
            .await
            .unwrap();

        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.sealed_credentials, created.sealed_credentials);
    }

    #[tokio::test]
    async fn foreign_owner_sees_not_found() {
        let svc = orchestrator().await;
        let created = svc.create_config("owner-1", &input("nightly")).await.unwrap();

        let err = svc.get_config("owner-2", &created.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_cancels_active_job_and_history() {
        let svc = orchestrator().await;
        let created = svc.create_config("owner-1", &input("nightly")).await.unwrap();
        let job = svc.jobs.create(&created.id, None).await.unwrap();

        svc.delete_config("owner-1", &created.id).await.unwrap();
        assert!(svc.db.get_job(&job.id).await.is_err());
        assert!(svc.list_configs("owner-1").await.unwrap().is_empty());
    }
}
