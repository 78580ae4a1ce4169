//! Snapshot store backed by the transfer tool.
//!
//! Lists and deletes the dated snapshot directories a configuration has
//! accumulated under its `BACKUPS/` prefix, using the same rendered
//! remote config as a sync run.

use std::path::Path;
use std::process::Stdio;

use anyhow::Context;
use tokio::process::Command;

use crate::retention::{Snapshot, SnapshotStore};
use crate::storage::BackupConfig;
use crate::vault::CredentialVault;

use super::rclone;

/// Remote snapshot access via the transfer tool.
#[derive(Clone)]
pub struct RemoteSnapshotStore {
    vault: CredentialVault,
    transfer_bin: String,
}

impl RemoteSnapshotStore {
    pub const fn new(vault: CredentialVault, transfer_bin: String) -> Self {
        Self {
            vault,
            transfer_bin,
        }
    }

    async fn write_remote_config(
        &self,
        config: &BackupConfig,
        dir: &Path,
    ) -> anyhow::Result<String> {
        let creds = self.vault.resolve(config, &config.owner_id).await?;
        let path = dir.join("transfer.conf");
        std::fs::write(
            &path,
            rclone::render_remote_config(&config.remote_name, &creds),
        )
        .context("writing transfer config")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("restricting transfer config permissions")?;
        }

        Ok(path.display().to_string())
    }

    async fn run_tool(&self, args: &[String]) -> anyhow::Result<String> {
        let output = Command::new(&self.transfer_bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("spawning {}", self.transfer_bin))?;

        if !output.status.success() {
            anyhow::bail!(
                "transfer tool exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl SnapshotStore for RemoteSnapshotStore {
    async fn list(&self, config: &BackupConfig) -> anyhow::Result<Vec<Snapshot>> {
        let dir = tempfile::tempdir().context("creating config tempdir")?;
        let conf = self.write_remote_config(config, dir.path()).await?;

        let prefix = rclone::snapshot_prefix(config);
        let stdout = self
            .run_tool(&[
                "lsf".to_owned(),
                prefix,
                "--dirs-only".to_owned(),
                "--config".to_owned(),
                conf,
            ])
            .await?;

        // Non-date entries under the prefix are ignored, not deleted
        Ok(stdout
            .lines()
            .filter_map(|line| Snapshot::parse(line.trim_end_matches('/')))
            .collect())
    }

    async fn delete(&self, config: &BackupConfig, snapshot: &Snapshot) -> anyhow::Result<()> {
        let dir = tempfile::tempdir().context("creating config tempdir")?;
        let conf = self.write_remote_config(config, dir.path()).await?;

        let target = format!("{}/{}", rclone::snapshot_prefix(config), snapshot.name);
        self.run_tool(&[
            "purge".to_owned(),
            target,
            "--config".to_owned(),
            conf,
        ])
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_prefix_has_no_date() {
        let config = BackupConfig {
            id: "cfg-1".to_owned(),
            owner_id: "owner-1".to_owned(),
            name: "nightly".to_owned(),
            agent_id: None,
            source_path: "/data".to_owned(),
            remote_type: "s3".to_owned(),
            remote_name: "offsite".to_owned(),
            remote_path: "bucket/data".to_owned(),
            profile_id: None,
            sealed_credentials: Some("deadbeef".to_owned()),
            is_incremental: 1,
            schedule_cron: "0 2 * * *".to_owned(),
            keep_daily_days: 3,
            keep_weekly: 1,
            enabled: 1,
            last_run: None,
            created_at: 0,
            updated_at: 0,
        };

        assert_eq!(
            rclone::snapshot_prefix(&config),
            "offsite:bucket/data/BACKUPS/cfg-1-nightly"
        );
    }
}
