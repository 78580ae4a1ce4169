//! Local job execution against the transfer tool.

pub mod rclone;
mod runner;
mod snapshots;

pub use runner::LocalRunner;
pub use snapshots::RemoteSnapshotStore;
