//! `SQLite` storage for the Backhaul daemon.
//!
//! Provides persistence for agents, enrollment tokens, credential profiles,
//! backup configurations, and jobs.

mod db;
mod models;
mod queries_agents;
mod queries_configs;
mod queries_jobs;

pub use db::{Database, DatabaseError};
pub use models::*;
pub use queries_configs::{ConfigParams, ProfileParams};
pub use queries_jobs::StuckJob;
