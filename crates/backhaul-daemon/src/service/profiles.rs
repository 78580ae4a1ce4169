//! Credential profile commands.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::storage::{CredentialProfile, ProfileParams, RemoteType};

use super::{Orchestrator, ServiceError};

/// Write-side input for a credential profile.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileInput {
    pub name: String,
    pub remote_type: String,
    pub secrets: BTreeMap<String, String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

impl Orchestrator {
    /// Create a credential profile, sealing the secrets.
    pub async fn create_profile(
        &self,
        owner_id: &str,
        input: &ProfileInput,
    ) -> Result<CredentialProfile, ServiceError> {
        if input.name.trim().is_empty() {
            return Err(ServiceError::Validation("Name must not be empty".into()));
        }
        if RemoteType::parse(&input.remote_type).is_none() {
            return Err(ServiceError::Validation(format!(
                "Unsupported remote type: {}",
                input.remote_type
            )));
        }
        if input.secrets.is_empty() {
            return Err(ServiceError::Validation(
                "Secrets must not be empty".into(),
            ));
        }

        let blob = self.vault.seal(&input.secrets)?;
        let id = Uuid::new_v4().to_string();

        let profile = self
            .db
            .create_profile(&ProfileParams {
                id: &id,
                owner_id,
                name: &input.name,
                remote_type: &input.remote_type,
                sealed_credentials: blob.as_str(),
                region: input.region.as_deref(),
                endpoint: input.endpoint.as_deref(),
            })
            .await?;

        info!(profile_id = %profile.id, owner_id, "Profile created");
        Ok(profile)
    }

    pub async fn get_profile(
        &self,
        owner_id: &str,
        profile_id: &str,
    ) -> Result<CredentialProfile, ServiceError> {
        let profile = self.db.get_profile(profile_id).await?;
        if profile.owner_id != owner_id {
            return Err(ServiceError::NotFound(format!("Profile {profile_id}")));
        }
        Ok(profile)
    }

    pub async fn list_profiles(
        &self,
        owner_id: &str,
    ) -> Result<Vec<CredentialProfile>, ServiceError> {
        Ok(self.db.list_profiles(owner_id).await?)
    }

    /// Delete a profile. Refused while any configuration references it;
    /// the caller must repoint or delete those configs first.
    pub async fn delete_profile(&self, owner_id: &str, profile_id: &str) -> Result<(), ServiceError> {
        self.get_profile(owner_id, profile_id).await?;

        let referenced = self.db.count_configs_for_profile(profile_id).await?;
        if referenced > 0 {
            return Err(ServiceError::Conflict(format!(
                "Profile {profile_id} is used by {referenced} configuration(s)"
            )));
        }

        self.db.remove_profile(profile_id).await?;
        info!(profile_id, owner_id, "Profile deleted");
        Ok(())
    }
}
