//! Backup configuration and credential profile queries.

use backhaul_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::{BackupConfig, CredentialProfile};

/// Parameters for inserting a credential profile.
#[derive(Debug, Clone)]
pub struct ProfileParams<'a> {
    pub id: &'a str,
    pub owner_id: &'a str,
    pub name: &'a str,
    pub remote_type: &'a str,
    pub sealed_credentials: &'a str,
    pub region: Option<&'a str>,
    pub endpoint: Option<&'a str>,
}

/// Parameters for inserting or updating a backup configuration.
#[derive(Debug, Clone)]
pub struct ConfigParams<'a> {
    pub id: &'a str,
    pub owner_id: &'a str,
    pub name: &'a str,
    pub agent_id: Option<&'a str>,
    pub source_path: &'a str,
    pub remote_type: &'a str,
    pub remote_name: &'a str,
    pub remote_path: &'a str,
    pub profile_id: Option<&'a str>,
    pub sealed_credentials: Option<&'a str>,
    pub is_incremental: bool,
    pub schedule_cron: &'a str,
    pub keep_daily_days: i64,
    pub keep_weekly: bool,
    pub enabled: bool,
}

impl Database {
    // =========================================================================
    // Credential profile queries
    // =========================================================================

    /// Create a credential profile.
    pub async fn create_profile(
        &self,
        params: &ProfileParams<'_>,
    ) -> Result<CredentialProfile, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO credential_profiles (id, owner_id, name, remote_type, sealed_credentials, region, endpoint, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.id)
        .bind(params.owner_id)
        .bind(params.name)
        .bind(params.remote_type)
        .bind(params.sealed_credentials)
        .bind(params.region)
        .bind(params.endpoint)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_profile(params.id).await
    }

    /// Get a profile by ID.
    pub async fn get_profile(&self, id: &str) -> Result<CredentialProfile, DatabaseError> {
        sqlx::query_as::<_, CredentialProfile>("SELECT * FROM credential_profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Profile {id}")))
    }

    /// List profiles for an owner.
    pub async fn list_profiles(&self, owner_id: &str) -> Result<Vec<CredentialProfile>, DatabaseError> {
        let profiles = sqlx::query_as::<_, CredentialProfile>(
            "SELECT * FROM credential_profiles WHERE owner_id = ? ORDER BY name",
        )
        .bind(owner_id)
        .fetch_all(self.pool())
        .await?;

        Ok(profiles)
    }

    /// Count configs referencing a profile.
    pub async fn count_configs_for_profile(&self, profile_id: &str) -> Result<i64, DatabaseError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM backup_configs WHERE profile_id = ?")
                .bind(profile_id)
                .fetch_one(self.pool())
                .await?;

        Ok(row.0)
    }

    /// Remove a profile.
    pub async fn remove_profile(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM credential_profiles WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Backup config queries
    // =========================================================================

    /// Create a backup configuration.
    pub async fn create_config(
        &self,
        params: &ConfigParams<'_>,
    ) -> Result<BackupConfig, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            r"
            INSERT INTO backup_configs (
                id, owner_id, name, agent_id, source_path, remote_type, remote_name,
                remote_path, profile_id, sealed_credentials, is_incremental,
                schedule_cron, keep_daily_days, keep_weekly, enabled, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(params.id)
        .bind(params.owner_id)
        .bind(params.name)
        .bind(params.agent_id)
        .bind(params.source_path)
        .bind(params.remote_type)
        .bind(params.remote_name)
        .bind(params.remote_path)
        .bind(params.profile_id)
        .bind(params.sealed_credentials)
        .bind(i64::from(params.is_incremental))
        .bind(params.schedule_cron)
        .bind(params.keep_daily_days)
        .bind(i64::from(params.keep_weekly))
        .bind(i64::from(params.enabled))
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_config(params.id).await
    }

    /// Overwrite a backup configuration's mutable fields.
    pub async fn update_config(
        &self,
        params: &ConfigParams<'_>,
    ) -> Result<BackupConfig, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            r"
            UPDATE backup_configs SET
                name = ?, agent_id = ?, source_path = ?, remote_type = ?,
                remote_name = ?, remote_path = ?, profile_id = ?,
                sealed_credentials = ?, is_incremental = ?, schedule_cron = ?,
                keep_daily_days = ?, keep_weekly = ?, enabled = ?, updated_at = ?
            WHERE id = ? AND owner_id = ?
            ",
        )
        .bind(params.name)
        .bind(params.agent_id)
        .bind(params.source_path)
        .bind(params.remote_type)
        .bind(params.remote_name)
        .bind(params.remote_path)
        .bind(params.profile_id)
        .bind(params.sealed_credentials)
        .bind(i64::from(params.is_incremental))
        .bind(params.schedule_cron)
        .bind(params.keep_daily_days)
        .bind(i64::from(params.keep_weekly))
        .bind(i64::from(params.enabled))
        .bind(now)
        .bind(params.id)
        .bind(params.owner_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Config {}", params.id)));
        }

        self.get_config(params.id).await
    }

    /// Get a configuration by ID.
    pub async fn get_config(&self, id: &str) -> Result<BackupConfig, DatabaseError> {
        sqlx::query_as::<_, BackupConfig>("SELECT * FROM backup_configs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Config {id}")))
    }

    /// List configurations for an owner.
    pub async fn list_configs(&self, owner_id: &str) -> Result<Vec<BackupConfig>, DatabaseError> {
        let configs = sqlx::query_as::<_, BackupConfig>(
            "SELECT * FROM backup_configs WHERE owner_id = ? ORDER BY name",
        )
        .bind(owner_id)
        .fetch_all(self.pool())
        .await?;

        Ok(configs)
    }

    /// Enabled configurations with no pending or running job.
    ///
    /// This is the candidate set for the scheduler tick; due-time filtering
    /// happens in the evaluator, which needs the parsed cron expression.
    pub async fn list_dispatchable_configs(&self) -> Result<Vec<BackupConfig>, DatabaseError> {
        let configs = sqlx::query_as::<_, BackupConfig>(
            r"
            SELECT * FROM backup_configs c
            WHERE c.enabled = 1
              AND NOT EXISTS (
                  SELECT 1 FROM backup_jobs j
                  WHERE j.config_id = c.id AND j.status IN ('pending', 'running')
              )
            ",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(configs)
    }

    /// Set a configuration's last-run timestamp.
    pub async fn set_config_last_run(&self, id: &str, at: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE backup_configs SET last_run = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Remove a configuration. Jobs cascade via the foreign key.
    pub async fn remove_config(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM backup_configs WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn params<'a>(id: &'a str, name: &'a str) -> ConfigParams<'a> {
        ConfigParams {
            id,
            owner_id: "owner-1",
            name,
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
        }
    }

    #[tokio::test]
    async fn create_and_get_config() {
        let db = Database::open_in_memory().await.unwrap();
        let config = db.create_config(&params("c1", "nightly")).await.unwrap();

        assert_eq!(config.id, "c1");
        assert_eq!(config.schedule_cron, "0 2 * * *");
        assert_eq!(config.is_incremental, 1);
        assert!(config.last_run.is_none());
    }

    #[tokio::test]
    async fn update_requires_matching_owner() {
        let db = Database::open_in_memory().await.unwrap();
        db.create_config(&params("c1", "nightly")).await.unwrap();

        let mut p = params("c1", "renamed");
        p.owner_id = "someone-else";
        assert!(db.update_config(&p).await.is_err());

        let p = params("c1", "renamed");
        let updated = db.update_config(&p).await.unwrap();
        assert_eq!(updated.name, "renamed");
    }

    #[tokio::test]
    async fn dispatchable_excludes_disabled() {
        let db = Database::open_in_memory().await.unwrap();
        db.create_config(&params("c1", "on")).await.unwrap();
        let mut off = params("c2", "off");
        off.enabled = false;
        db.create_config(&off).await.unwrap();

        let configs = db.list_dispatchable_configs().await.unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].id, "c1");
    }

    #[tokio::test]
    async fn profile_reference_counting() {
        let db = Database::open_in_memory().await.unwrap();
        db.create_profile(&ProfileParams {
            id: "p1",
            owner_id: "owner-1",
            name: "wasabi",
            remote_type: "s3",
            sealed_credentials: "deadbeef",
            region: Some("us-east-1"),
            endpoint: None,
        })
        .await
        .unwrap();

        let mut p = params("c1", "nightly");
        p.profile_id = Some("p1");
        p.sealed_credentials = None;
        db.create_config(&p).await.unwrap();

        assert_eq!(db.count_configs_for_profile("p1").await.unwrap(), 1);
        assert_eq!(db.count_configs_for_profile("p2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_config_cascades_jobs() {
        let db = Database::open_in_memory().await.unwrap();
        db.create_config(&params("c1", "nightly")).await.unwrap();
        db.insert_job("j1", "c1", None).await.unwrap();

        assert!(db.remove_config("c1").await.unwrap());
        assert!(db.get_job("j1").await.is_err());
    }
}
