//! Local runner: drives the transfer tool for jobs with no agent.
//!
//! One spawned task per job. The runner streams the tool's output into
//! progress reports, reports exactly one terminal outcome, and honors the
//! abort signal by killing the child. A job cancelled or reset while the
//! tool still runs keeps its stored state; the late terminal report is
//! rejected by the state machine and only logged here.

use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::jobs::{JobError, JobManager, JobOutcome};
use crate::storage::{BackupConfig, BackupJob};
use crate::vault::ResolvedCredentials;

use super::rclone;

/// Executes jobs on the daemon host.
#[derive(Clone)]
pub struct LocalRunner {
    jobs: JobManager,
    transfer_bin: String,
}

impl LocalRunner {
    pub const fn new(jobs: JobManager, transfer_bin: String) -> Self {
        Self { jobs, transfer_bin }
    }

    /// Hand a started job to a background task.
    pub fn spawn(&self, job: BackupJob, config: BackupConfig, creds: ResolvedCredentials) {
        let runner = self.clone();
        tokio::spawn(async move {
            let job_id = job.id.clone();
            if let Err(e) = runner.run(job, &config, creds).await {
                warn!(job_id, error = %e, "Runner error");
                runner.finish(&job_id, JobOutcome::Failed, Some(&e.to_string())).await;
            }
        });
    }

    async fn run(
        &self,
        job: BackupJob,
        config: &BackupConfig,
        creds: ResolvedCredentials,
    ) -> anyhow::Result<()> {
        let dir = tempfile::tempdir().context("creating config tempdir")?;
        let config_path = dir.path().join("transfer.conf");

        let rendered = rclone::render_remote_config(&config.remote_name, &creds);
        std::fs::write(&config_path, rendered).context("writing transfer config")?;
        drop(creds);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .context("restricting transfer config permissions")?;
        }

        let date = chrono::Utc::now().date_naive();
        let args = rclone::sync_args(config, &config_path.display().to_string(), date);

        let mut child = Command::new(&self.transfer_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.transfer_bin))?;

        let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, line_tx);
        }

        let mut abort_rx = self.jobs.abort_handles().register(&job.id);
        let mut last_total: i64 = 0;

        loop {
            tokio::select! {
                line = line_rx.recv() => {
                    let Some(line) = line else { break };

                    let delta = rclone::parse_transferred_bytes(&line)
                        .map_or(0, |total| {
                            let d = total - last_total;
                            last_total = last_total.max(total);
                            d
                        });

                    if let Err(e) = self
                        .jobs
                        .report_progress(&job.id, delta, &format!("{line}\n"))
                        .await
                    {
                        warn!(job_id = %job.id, error = %e, "Progress report failed");
                    }
                }
                _ = &mut abort_rx => {
                    info!(job_id = %job.id, "Abort signal, killing transfer");
                    child.kill().await.ok();
                    let _ = child.wait().await;
                    return Ok(());
                }
            }
        }

        let status = child.wait().await.context("waiting for transfer tool")?;
        if status.success() {
            self.finish(&job.id, JobOutcome::Succeeded, None).await;
        } else {
            let message = format!("transfer tool exited with {status}");
            self.finish(&job.id, JobOutcome::Failed, Some(&message)).await;
        }

        Ok(())
    }

    /// Report the terminal outcome, tolerating a job that already moved.
    async fn finish(&self, job_id: &str, outcome: JobOutcome, message: Option<&str>) {
        match self.jobs.complete(job_id, outcome, message, "").await {
            Ok(_) => {}
            Err(JobError::InvalidTransition { from, .. }) => {
                warn!(job_id, from, "Terminal report for a job already settled");
            }
            Err(e) => warn!(job_id, error = %e, "Failed to record outcome"),
        }
    }
}

fn forward_lines<R: AsyncRead + Unpin + Send + 'static>(reader: R, tx: mpsc::Sender<String>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}
