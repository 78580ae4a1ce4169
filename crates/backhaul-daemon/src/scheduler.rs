//! Scheduler tick: find due configurations and dispatch them.
//!
//! Catch-up, not replay: a config that missed several fire times while a
//! job ran (or the daemon was down) gets exactly one dispatch as soon as
//! it is free again. Dispatch failures leave the config untouched, so it
//! stays due for the next tick.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, error, info, warn};

use backhaul_core::CronSchedule;
use backhaul_core::db::unix_timestamp;

use crate::dispatch::Dispatcher;
use crate::storage::{BackupConfig, Database};

/// Whether a configuration is due at `now`.
///
/// The reference point is the last run, or creation time for a config
/// that never ran. A malformed stored expression makes the config never
/// due; write-time validation should have prevented it.
pub fn is_due(config: &BackupConfig, now: DateTime<Utc>) -> bool {
    let schedule = match CronSchedule::parse(&config.schedule_cron) {
        Ok(s) => s,
        Err(e) => {
            warn!(config_id = %config.id, error = %e, "Stored cron expression is invalid");
            return false;
        }
    };

    let base = config.last_run.unwrap_or(config.created_at);
    let Some(base) = Utc.timestamp_opt(base, 0).single() else {
        return false;
    };

    schedule.next_after(base).is_some_and(|due| due <= now)
}

/// Run the scheduler loop until the task is aborted.
pub async fn run_scheduler(db: Database, dispatcher: Dispatcher, tick_interval: Duration) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(interval_secs = tick_interval.as_secs(), "Scheduler started");

    loop {
        ticker.tick().await;

        // Expired, unredeemed tokens are dead weight; drop them in passing
        match db.purge_expired_tokens(unix_timestamp()).await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Purged expired enrollment tokens"),
            Err(e) => warn!(error = %e, "Token purge failed"),
        }

        let candidates = match db.list_dispatchable_configs().await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "Scheduler failed to load configs");
                continue;
            }
        };

        let now = Utc
            .timestamp_opt(unix_timestamp(), 0)
            .single()
            .unwrap_or_else(Utc::now);

        for config in candidates {
            if !is_due(&config, now) {
                continue;
            }

            match dispatcher.dispatch(&config).await {
                Ok(job) => debug!(config_id = %config.id, job_id = %job.id, "Scheduled dispatch"),
                Err(e) => warn!(config_id = %config.id, error = %e, "Dispatch deferred"),
            }
        }
    }
}
