//! Snapshot retention: pure pruning plan plus a retried enforcer.
//!
//! A remote holds one dated snapshot directory per completed incremental
//! run. After a job succeeds the enforcer lists those snapshots, builds a
//! plan, and deletes what the policy no longer keeps. Enforcement is
//! best effort: failures are logged and retried a bounded number of
//! times, and never affect the job that triggered them.

use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use tracing::{error, info, warn};

use crate::jobs::RetentionTrigger;
use crate::storage::BackupConfig;

/// A dated snapshot directory on the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub name: String,
    pub date: NaiveDate,
}

impl Snapshot {
    /// Parse a snapshot directory name of the form `YYYY-MM-DD`.
    pub fn parse(name: &str) -> Option<Self> {
        let date = NaiveDate::parse_from_str(name, "%Y-%m-%d").ok()?;
        Some(Self {
            name: name.to_owned(),
            date,
        })
    }
}

/// Retention policy taken from a backup configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Snapshots younger than this many days are always kept.
    pub keep_daily_days: i64,
    /// Among older snapshots, keep the oldest per ISO week.
    pub keep_weekly: bool,
}

impl RetentionPolicy {
    pub const fn from_config(config: &BackupConfig) -> Self {
        Self {
            keep_daily_days: config.keep_daily_days,
            keep_weekly: config.keep_weekly != 0,
        }
    }
}

/// The classification of every snapshot under a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunePlan {
    pub keep: Vec<Snapshot>,
    pub delete: Vec<Snapshot>,
}

impl PrunePlan {
    /// Classify snapshots against a policy, relative to `today`.
    ///
    /// Weekly keepers are the oldest snapshot of each ISO week among those
    /// past the daily window; everything else past the window is deleted.
    pub fn build(snapshots: &[Snapshot], policy: RetentionPolicy, today: NaiveDate) -> Self {
        let mut sorted: Vec<Snapshot> = snapshots.to_vec();
        sorted.sort_by_key(|s| s.date);

        let mut keep = Vec::new();
        let mut delete = Vec::new();
        let mut kept_weeks: Vec<(i32, u32)> = Vec::new();

        for snapshot in sorted {
            let age_days = (today - snapshot.date).num_days();
            if age_days < policy.keep_daily_days {
                keep.push(snapshot);
                continue;
            }

            if policy.keep_weekly {
                let week = snapshot.date.iso_week();
                let key = (week.year(), week.week());
                // Oldest-first iteration: the first snapshot seen for a
                // week claims the weekly slot.
                if !kept_weeks.contains(&key) {
                    kept_weeks.push(key);
                    keep.push(snapshot);
                    continue;
                }
            }

            delete.push(snapshot);
        }

        Self { keep, delete }
    }
}

/// Access to the snapshots a configuration has on its remote.
pub trait SnapshotStore: Send + Sync {
    fn list(
        &self,
        config: &BackupConfig,
    ) -> impl Future<Output = anyhow::Result<Vec<Snapshot>>> + Send;

    fn delete(
        &self,
        config: &BackupConfig,
        snapshot: &Snapshot,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Applies retention plans against a snapshot store with bounded retries.
#[derive(Clone)]
pub struct RetentionEnforcer<S> {
    store: S,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<S: SnapshotStore> RetentionEnforcer<S> {
    pub const fn new(store: S, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            store,
            max_attempts,
            retry_delay,
        }
    }

    /// Enforce the config's policy once: list, plan, delete.
    async fn enforce_once(&self, config: &BackupConfig) -> anyhow::Result<usize> {
        let snapshots = self.store.list(config).await?;
        let policy = RetentionPolicy::from_config(config);
        let today = chrono::Utc::now().date_naive();

        let plan = PrunePlan::build(&snapshots, policy, today);
        for snapshot in &plan.delete {
            self.store.delete(config, snapshot).await?;
        }

        Ok(plan.delete.len())
    }

    /// Enforce with retries. Gives up after `max_attempts`, logging only.
    pub async fn enforce(&self, config: &BackupConfig) {
        for attempt in 1..=self.max_attempts {
            match self.enforce_once(config).await {
                Ok(0) => return,
                Ok(pruned) => {
                    info!(config_id = %config.id, pruned, "Retention pruned snapshots");
                    return;
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(config_id = %config.id, attempt, error = %e, "Retention attempt failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    error!(config_id = %config.id, error = %e, "Retention gave up");
                }
            }
        }
    }
}

impl<S: SnapshotStore + Clone + 'static> RetentionTrigger for RetentionEnforcer<S> {
    fn prune_after_success(&self, config: BackupConfig) {
        let enforcer = self.clone();
        tokio::spawn(async move {
            enforcer.enforce(&config).await;
        });
    }
}
