//! Backhaul Core Library
//!
//! Shared functionality for Backhaul components:
//! - Cron schedule parsing and evaluation
//! - Configuration resolution and hierarchy
//! - SQLite storage helpers
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod schedule;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use schedule::{CronSchedule, ScheduleError};
