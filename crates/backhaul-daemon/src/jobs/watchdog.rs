//! Stuck-job watchdog task.

use std::time::Duration;

use tracing::{debug, error, info};

use super::JobManager;

/// Periodically sweep for jobs whose progress went stale.
///
/// Runs until the task is aborted. Sweep failures are logged and the loop
/// continues; a transient database error must not kill the watchdog.
pub async fn run_watchdog(manager: JobManager, sweep_interval: Duration, stuck_threshold: i64) {
    let mut ticker = tokio::time::interval(sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(
        interval_secs = sweep_interval.as_secs(),
        stuck_threshold, "Watchdog started"
    );

    loop {
        ticker.tick().await;

        match manager.reset_stuck(stuck_threshold).await {
            Ok(stuck) if stuck.is_empty() => debug!("Watchdog sweep: nothing stuck"),
            Ok(stuck) => info!(count = stuck.len(), "Watchdog reset stuck jobs"),
            Err(e) => error!(error = %e, "Watchdog sweep failed"),
        }
    }
}
