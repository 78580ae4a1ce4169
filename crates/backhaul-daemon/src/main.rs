//! Backhaul Daemon
//!
//! Long-running orchestration process: evaluates backup schedules,
//! dispatches jobs to the local runner or enrolled agents, and sweeps
//! for stuck jobs.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use backhaul_core::config::{default_database_path, default_key_path, load_config_from};
use backhaul_crypto::{CredentialSealer, MasterKey};
use backhaul_daemon::dispatch::Dispatcher;
use backhaul_daemon::executor::{LocalRunner, RemoteSnapshotStore};
use backhaul_daemon::jobs::JobManager;
use backhaul_daemon::registry::AgentRegistry;
use backhaul_daemon::retention::RetentionEnforcer;
use backhaul_daemon::scheduler::run_scheduler;
use backhaul_daemon::storage::Database;
use backhaul_daemon::vault::CredentialVault;

#[derive(Parser, Debug)]
#[command(name = "backhaul-daemon")]
#[command(version, about = "Backhaul daemon - backup orchestration core")]
struct Args {
    /// Config file path (defaults to the global settings file)
    #[arg(long, env = "BACKHAUL_CONFIG")]
    config: Option<PathBuf>,

    /// Database file path
    #[arg(long, env = "BACKHAUL_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Credential sealing key path
    #[arg(long, env = "BACKHAUL_KEY_PATH")]
    key_path: Option<PathBuf>,

    /// Seconds between schedule evaluation ticks
    #[arg(long, env = "BACKHAUL_TICK_INTERVAL")]
    tick_interval: Option<u64>,

    /// Seconds between stuck-job sweeps
    #[arg(long, env = "BACKHAUL_SWEEP_INTERVAL")]
    sweep_interval: Option<u64>,

    /// Seconds without progress before a job counts as stuck
    #[arg(long, env = "BACKHAUL_STUCK_THRESHOLD")]
    stuck_threshold: Option<u64>,

    /// Seconds since last check-in within which an agent is online
    #[arg(long, env = "BACKHAUL_LIVENESS_WINDOW")]
    liveness_window: Option<i64>,

    /// Transfer tool binary for locally executed jobs
    #[arg(long, env = "BACKHAUL_TRANSFER_BIN")]
    transfer_bin: Option<String>,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long, env = "BACKHAUL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation)
    #[arg(long, env = "BACKHAUL_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = load_config_from(args.config.as_deref())?;

    // CLI arguments override file and environment
    if let Some(v) = args.tick_interval {
        config.scheduler.tick_interval_secs = v;
    }
    if let Some(v) = args.sweep_interval {
        config.scheduler.sweep_interval_secs = v;
    }
    if let Some(v) = args.stuck_threshold {
        config.scheduler.stuck_threshold_secs = v;
    }
    if let Some(v) = args.liveness_window {
        config.agents.liveness_window_secs = v;
    }
    if let Some(v) = args.transfer_bin {
        config.daemon.transfer_bin = v;
    }
    if let Some(v) = args.log_level {
        config.daemon.log_level = v;
    }

    let log_filter = format!("backhaul_daemon={}", config.daemon.log_level);
    backhaul_core::tracing_init::init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        tick = config.scheduler.tick_interval_secs,
        sweep = config.scheduler.sweep_interval_secs,
        "Starting backhaul-daemon"
    );

    let db_path = args
        .db_path
        .or_else(|| config.daemon.database_path.clone())
        .or_else(default_database_path)
        .ok_or_else(|| anyhow::anyhow!("Cannot determine database path"))?;
    info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).await?;

    let key_path = args
        .key_path
        .or_else(|| config.daemon.key_path.clone())
        .or_else(default_key_path)
        .ok_or_else(|| anyhow::anyhow!("Cannot determine sealing key path"))?;
    let master_key = MasterKey::load_or_generate(&key_path)?;
    let sealer = CredentialSealer::new(&master_key)?;

    let vault = CredentialVault::new(db.clone(), sealer);
    let registry = AgentRegistry::new(
        db.clone(),
        config.agents.liveness_window_secs,
        config.agents.token_ttl_secs,
    );

    let snapshot_store =
        RemoteSnapshotStore::new(vault.clone(), config.daemon.transfer_bin.clone());
    let enforcer = RetentionEnforcer::new(
        snapshot_store,
        config.retention.max_attempts,
        Duration::from_secs(config.retention.retry_delay_secs),
    );
    let jobs = JobManager::new(db.clone()).with_retention(enforcer);
    let runner = LocalRunner::new(jobs.clone(), config.daemon.transfer_bin.clone());
    let dispatcher = Dispatcher::new(
        db.clone(),
        vault,
        registry.clone(),
        jobs.clone(),
        runner,
    );

    let scheduler_handle = tokio::spawn(run_scheduler(
        db.clone(),
        dispatcher,
        Duration::from_secs(config.scheduler.tick_interval_secs),
    ));

    #[allow(clippy::cast_possible_wrap)]
    let stuck_threshold = config.scheduler.stuck_threshold_secs as i64;
    let watchdog_handle = tokio::spawn(backhaul_daemon::jobs::run_watchdog(
        jobs,
        Duration::from_secs(config.scheduler.sweep_interval_secs),
        stuck_threshold,
    ));

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // Notify systemd that the daemon is ready (unix only).
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    info!("Daemon ready");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    scheduler_handle.abort();
    watchdog_handle.abort();

    info!("Daemon stopped");
    Ok(())
}
