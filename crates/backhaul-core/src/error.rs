//! Error types for the Backhaul core library.

use thiserror::Error;

/// Result type alias using the Backhaul core Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Backhaul operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid cron schedule
    #[error("Invalid schedule: {0}")]
    Schedule(#[from] crate::schedule::ScheduleError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
