//! Transfer tool configuration rendering.
//!
//! The daemon drives an rclone-compatible binary. Each dispatch renders a
//! throwaway config file for the job's remote from the resolved
//! credentials; the file lives in a private tempdir and dies with the run.

use std::fmt::Write as _;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

#[allow(clippy::unwrap_used)] // literal pattern
static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]+").unwrap());

#[allow(clippy::unwrap_used)] // literal pattern
static TRANSFERRED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Transferred:\s*([\d.]+)\s*(B|KiB|MiB|GiB|TiB)").unwrap());

use crate::storage::{BackupConfig, RemoteType};
use crate::vault::ResolvedCredentials;

/// Parent directory for dated snapshot directories on the remote.
pub const SNAPSHOT_ROOT: &str = "BACKUPS";

/// Render an INI config section for the job's remote.
pub fn render_remote_config(remote_name: &str, creds: &ResolvedCredentials) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[{remote_name}]");

    match creds.remote_type {
        RemoteType::S3 => {
            out.push_str("type = s3\nprovider = Other\n");
            if let Some(v) = creds.secrets.get("access_key") {
                let _ = writeln!(out, "access_key_id = {v}");
            }
            if let Some(v) = creds.secrets.get("secret_key") {
                let _ = writeln!(out, "secret_access_key = {v}");
            }
            if let Some(region) = &creds.region {
                let _ = writeln!(out, "region = {region}");
            }
            if let Some(endpoint) = &creds.endpoint {
                let _ = writeln!(out, "endpoint = {endpoint}");
            }
        }
        RemoteType::Gdrive => {
            out.push_str("type = drive\n");
            for key in ["client_id", "client_secret", "token"] {
                if let Some(v) = creds.secrets.get(key) {
                    let _ = writeln!(out, "{key} = {v}");
                }
            }
        }
    }

    out
}

/// `remote:path` target spec for the sync destination.
pub fn remote_spec(config: &BackupConfig) -> String {
    format!("{}:{}", config.remote_name, config.remote_path)
}

/// Snapshot parent prefix for a config: `BACKUPS/{config_id}-{safe_name}`.
pub fn snapshot_prefix(config: &BackupConfig) -> String {
    format!(
        "{}:{}/{SNAPSHOT_ROOT}/{}-{}",
        config.remote_name,
        config.remote_path,
        config.id,
        safe_name(&config.name),
    )
}

/// Snapshot directory for an incremental run on `date`.
///
/// Files displaced by the sync land here, giving one dated snapshot per
/// run under the config's prefix.
pub fn backup_dir(config: &BackupConfig, date: NaiveDate) -> String {
    format!("{}/{}", snapshot_prefix(config), date.format("%Y-%m-%d"))
}

/// Collapse a config name into a path-safe token.
fn safe_name(name: &str) -> String {
    UNSAFE_NAME_CHARS.replace_all(name, "_").into_owned()
}

/// Command-line arguments for a sync run.
pub fn sync_args(config: &BackupConfig, config_path: &str, date: NaiveDate) -> Vec<String> {
    let mut args = vec![
        "sync".to_owned(),
        config.source_path.clone(),
        remote_spec(config),
        "--config".to_owned(),
        config_path.to_owned(),
        "--stats".to_owned(),
        "5s".to_owned(),
        "--stats-one-line".to_owned(),
        "-v".to_owned(),
    ];

    if config.is_incremental != 0 {
        args.push("--backup-dir".to_owned());
        args.push(backup_dir(config, date));
    }

    args
}

/// Total bytes from a progress line, if it is one.
///
/// Matches the transfer tool's stats output, e.g.
/// `Transferred:   12.345 MiB / 100 MiB, 12%, ...`.
pub fn parse_transferred_bytes(line: &str) -> Option<i64> {
    let caps = TRANSFERRED_LINE.captures(line)?;

    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let scale: f64 = match caps.get(2)?.as_str() {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        _ => 1024.0 * 1024.0 * 1024.0 * 1024.0,
    };

    #[allow(clippy::cast_possible_truncation)]
    Some((value * scale) as i64)
}
