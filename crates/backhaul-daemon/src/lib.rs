//! Backhaul Daemon Library
//!
//! The orchestration core for scheduled backups:
//! - SQLite storage for agents, credentials, configs, and jobs
//! - Agent registry with one-time enrollment and derived liveness
//! - Credential vault resolving sealed secrets at dispatch time
//! - Cron-driven scheduler, dispatcher, and local transfer runner
//! - Job state machine with a stuck-job watchdog
//! - Retention pruning of dated remote snapshots

pub mod dispatch;
pub mod executor;
pub mod jobs;
pub mod registry;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod vault;
