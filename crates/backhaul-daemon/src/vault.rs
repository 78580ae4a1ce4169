//! Credential vault: resolving sealed secrets at dispatch time.
//!
//! Secrets are stored only as sealed blobs, either inline on a backup
//! configuration or on a shared credential profile. Resolution happens
//! just before a job is handed to an executor and the decrypted material
//! lives only as long as the `ResolvedCredentials` value.

use std::collections::BTreeMap;

use zeroize::Zeroize;

use backhaul_crypto::{CredentialSealer, CryptoError, SealedBlob};

use crate::storage::{BackupConfig, Database, DatabaseError, RemoteType};

/// Vault errors.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("No credential source yields secrets for this configuration")]
    CredentialsUnresolved,

    #[error("Credential profile {0} belongs to a different owner")]
    CrossOwnerAccess(String),

    #[error("Unsupported remote type: {0}")]
    UnsupportedRemote(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// Where a configuration's secrets come from.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    Profile(String),
    Inline(SealedBlob),
}

impl CredentialSource {
    /// Pick the source from a stored configuration. Profile wins when both
    /// columns are somehow populated; the write path prevents that state.
    pub fn from_config(config: &BackupConfig) -> Option<Self> {
        if let Some(profile_id) = &config.profile_id {
            return Some(Self::Profile(profile_id.clone()));
        }
        config
            .sealed_credentials
            .as_deref()
            .map(|blob| Self::Inline(SealedBlob::from_encoded(blob)))
    }
}

/// Decrypted credentials for a single dispatch.
///
/// Secret values are wiped when the value is dropped.
#[derive(Debug)]
pub struct ResolvedCredentials {
    pub remote_type: RemoteType,
    pub secrets: BTreeMap<String, String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

impl Drop for ResolvedCredentials {
    fn drop(&mut self) {
        for value in self.secrets.values_mut() {
            value.zeroize();
        }
    }
}

/// Credential vault bound to the installation's master key.
#[derive(Clone)]
pub struct CredentialVault {
    db: Database,
    sealer: CredentialSealer,
}

impl CredentialVault {
    pub const fn new(db: Database, sealer: CredentialSealer) -> Self {
        Self { db, sealer }
    }

    /// Seal a plaintext secret map for storage.
    pub fn seal(&self, secrets: &BTreeMap<String, String>) -> Result<SealedBlob, VaultError> {
        Ok(self.sealer.seal(secrets)?)
    }

    /// Resolve the credentials a configuration needs to run.
    ///
    /// `owner_id` is the caller's identity; a profile belonging to someone
    /// else is a hard error even when the blob would unseal fine.
    pub async fn resolve(
        &self,
        config: &BackupConfig,
        owner_id: &str,
    ) -> Result<ResolvedCredentials, VaultError> {
        let remote_type = RemoteType::parse(&config.remote_type)
            .ok_or_else(|| VaultError::UnsupportedRemote(config.remote_type.clone()))?;

        let source =
            CredentialSource::from_config(config).ok_or(VaultError::CredentialsUnresolved)?;

        let resolved = match source {
            CredentialSource::Profile(profile_id) => {
                let profile = self
                    .db
                    .get_profile(&profile_id)
                    .await
                    .map_err(|_| VaultError::CredentialsUnresolved)?;

                if profile.owner_id != owner_id {
                    return Err(VaultError::CrossOwnerAccess(profile_id));
                }

                let blob = SealedBlob::from_encoded(&profile.sealed_credentials);
                let secrets: BTreeMap<String, String> = self.sealer.unseal(&blob)?;

                ResolvedCredentials {
                    remote_type,
                    secrets,
                    region: profile.region,
                    endpoint: profile.endpoint,
                }
            }
            CredentialSource::Inline(blob) => {
                let secrets: BTreeMap<String, String> = self.sealer.unseal(&blob)?;

                ResolvedCredentials {
                    remote_type,
                    secrets,
                    region: None,
                    endpoint: None,
                }
            }
        };

        // A blob that unseals to nothing cannot drive a transfer; treat it
        // the same as a missing source rather than failing mid-run.
        if resolved.secrets.is_empty() {
            return Err(VaultError::CredentialsUnresolved);
        }

        Ok(resolved)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::{ConfigParams, ProfileParams};
    use backhaul_crypto::MasterKey;

    fn sealer() -> CredentialSealer {
        CredentialSealer::new(&MasterKey::generate()).unwrap()
    }

    fn secrets() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("access_key".to_owned(), "AKIA123".to_owned()),
            ("secret_key".to_owned(), "s3cr3t".to_owned()),
        ])
    }

    async fn config_with_inline(db: &Database, vault: &CredentialVault) -> BackupConfig {
        let blob = vault.seal(&secrets()).unwrap();
        db.create_config(&ConfigParams {
            id: "c1",
            owner_id: "owner-1",
            name: "nightly",
            agent_id: None,
            source_path: "/data",
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

    #[tokio::test]
    async fn resolve_inline_credentials() {
        let db = Database::open_in_memory().await.unwrap();
        let vault = CredentialVault::new(db.clone(), sealer());
        let config = config_with_inline(&db, &vault).await;

        let resolved = vault.resolve(&config, "owner-1").await.unwrap();
        assert_eq!(resolved.remote_type, RemoteType::S3);
        assert_eq!(resolved.secrets["access_key"], "AKIA123");
    }

    #[tokio::test]
    async fn resolve_profile_credentials() {
        let db = Database::open_in_memory().await.unwrap();
        let vault = CredentialVault::new(db.clone(), sealer());

        let blob = vault.seal(&secrets()).unwrap();
        db.create_profile(&ProfileParams {
            id: "p1",
            owner_id: "owner-1",
            name: "wasabi",
            remote_type: "s3",
            sealed_credentials: blob.as_str(),
            region: Some("us-east-1"),
            endpoint: Some("https://s3.wasabisys.com"),
        })
        .await
        .unwrap();

        let mut config = config_with_inline(&db, &vault).await;
        config.profile_id = Some("p1".to_owned());
        config.sealed_credentials = None;

        let resolved = vault.resolve(&config, "owner-1").await.unwrap();
        assert_eq!(resolved.region.as_deref(), Some("us-east-1"));
        assert_eq!(resolved.secrets["secret_key"], "s3cr3t");
    }

    #[tokio::test]
    async fn cross_owner_profile_rejected() {
        let db = Database::open_in_memory().await.unwrap();
        let vault = CredentialVault::new(db.clone(), sealer());

        let blob = vault.seal(&secrets()).unwrap();
        db.create_profile(&ProfileParams {
            id: "p1",
            owner_id: "someone-else",
            name: "theirs",
            remote_type: "s3",
            sealed_credentials: blob.as_str(),
            region: None,
            endpoint: None,
        })
        .await
        .unwrap();

        let mut config = config_with_inline(&db, &vault).await;
        config.profile_id = Some("p1".to_owned());

        let err = vault.resolve(&config, "owner-1").await.unwrap_err();
        assert!(matches!(err, VaultError::CrossOwnerAccess(_)));
    }

    #[tokio::test]
    async fn missing_source_is_unresolved() {
        let db = Database::open_in_memory().await.unwrap();
        let vault = CredentialVault::new(db.clone(), sealer());

        let mut config = config_with_inline(&db, &vault).await;
        config.profile_id = None;
        config.sealed_credentials = None;

        let err = vault.resolve(&config, "owner-1").await.unwrap_err();
        assert!(matches!(err, VaultError::CredentialsUnresolved));
    }

    #[tokio::test]
    async fn blob_sealing_no_secrets_is_unresolved() {
        let db = Database::open_in_memory().await.unwrap();
        let vault = CredentialVault::new(db.clone(), sealer());

        let mut config = config_with_inline(&db, &vault).await;
        let empty = vault.seal(&BTreeMap::new()).unwrap();
        config.sealed_credentials = Some(empty.as_str().to_owned());

        let err = vault.resolve(&config, "owner-1").await.unwrap_err();
        assert!(matches!(err, VaultError::CredentialsUnresolved));
    }

    #[tokio::test]
    async fn wrong_key_fails_to_unseal() {
        let db = Database::open_in_memory().await.unwrap();
        let vault = CredentialVault::new(db.clone(), sealer());
        let config = config_with_inline(&db, &vault).await;

        let other = CredentialVault::new(db, sealer());
        let err = other.resolve(&config, "owner-1").await.unwrap_err();
        assert!(matches!(err, VaultError::Crypto(_)));
    }
}
