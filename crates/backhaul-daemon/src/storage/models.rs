//! Database models for the Backhaul daemon.

use serde::{Deserialize, Serialize};

/// Agent record from the database.
///
/// Status is not stored: it is derived from `last_seen` against the
/// liveness window at read time.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Agent {
    pub id: String,
    pub hostname: String,
    pub platform: String,
    pub ip_address: String,
    pub version: String,
    pub last_seen: i64,
    pub created_at: i64,
}

/// One-time enrollment token record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EnrollmentToken {
    pub token: String,
    pub owner_id: String,
    pub expires_at: i64,
    pub consumed_at: Option<i64>,
    pub created_at: i64,
}

/// Reusable sealed credential profile.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CredentialProfile {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub remote_type: String,
    pub sealed_credentials: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Backup configuration record.
///
/// Exactly one of `profile_id` / `sealed_credentials` is the credential
/// source; the write path enforces the exclusivity.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BackupConfig {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub agent_id: Option<String>,
    pub source_path: String,
    pub remote_type: String,
    pub remote_name: String,
    pub remote_path: String,
    pub profile_id: Option<String>,
    pub sealed_credentials: Option<String>,
    pub is_incremental: i64,
    pub schedule_cron: String,
    pub keep_daily_days: i64,
    pub keep_weekly: i64,
    pub enabled: i64,
    pub last_run: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Backup job record.
///
/// `progress_at` is refreshed on every progress report and drives the
/// stuck-job watchdog.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BackupJob {
    pub id: String,
    pub config_id: String,
    pub agent_id: Option<String>,
    pub status: String,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub bytes_transferred: i64,
    pub error_message: Option<String>,
    pub log: String,
    pub progress_at: i64,
    pub created_at: i64,
}

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived agent liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => f.write_str("online"),
            Self::Offline => f.write_str("offline"),
        }
    }
}

/// Supported remote storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteType {
    S3,
    Gdrive,
}

impl RemoteType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Gdrive => "gdrive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "s3" => Some(Self::S3),
            "gdrive" => Some(Self::Gdrive),
            _ => None,
        }
    }
}

impl std::fmt::Display for RemoteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
