//! Agent-facing and agent-management commands.

use serde::Serialize;

use crate::dispatch::AgentWorkItem;
use crate::jobs::JobOutcome;
use crate::registry::MachineFacts;
use crate::storage::{Agent, AgentStatus, BackupJob, EnrollmentToken};

use super::{Orchestrator, ServiceError};

/// An agent with its derived liveness, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
    pub status: AgentStatus,
}

/// Check-in acknowledgement: the refreshed record plus pulled work.
#[derive(Debug, Clone, Serialize)]
pub struct CheckInResponse {
    pub agent: Agent,
    pub work: Vec<AgentWorkItem>,
}

impl Orchestrator {
    /// Issue a one-time enrollment token.
    pub async fn issue_enrollment_token(
        &self,
        owner_id: &str,
    ) -> Result<EnrollmentToken, ServiceError> {
        Ok(self.registry.issue_token(owner_id).await?)
    }

    /// Redeem a token; the calling machine becomes (or resumes being) an
    /// agent.
    pub async fn enroll_agent(
        &self,
        token: &str,
        facts: &MachineFacts,
    ) -> Result<Agent, ServiceError> {
        Ok(self.registry.redeem(token, facts).await?)
    }

    /// Agent heartbeat: refresh liveness and pull pending work.
    pub async fn agent_check_in(
        &self,
        agent_id: &str,
        ip_address: &str,
        version: &str,
    ) -> Result<CheckInResponse, ServiceError> {
        let agent = self.registry.check_in(agent_id, ip_address, version).await?;
        let work = self.dispatcher.fetch_work(agent_id).await?;

        Ok(CheckInResponse { agent, work })
    }

    /// Progress report from an agent for a pulled job.
    pub async fn agent_report_progress(
        &self,
        agent_id: &str,
        job_id: &str,
        bytes_delta: i64,
        log_chunk: &str,
    ) -> Result<(), ServiceError> {
        self.dispatcher
            .report_remote_progress(agent_id, job_id, bytes_delta, log_chunk)
            .await?;
        Ok(())
    }

    /// Terminal report from an agent for a pulled job.
    pub async fn agent_complete_job(
        &self,
        agent_id: &str,
        job_id: &str,
        success: bool,
        error_message: Option<&str>,
        final_log: &str,
    ) -> Result<BackupJob, ServiceError> {
        let outcome = if success {
            JobOutcome::Succeeded
        } else {
            JobOutcome::Failed
        };

        Ok(self
            .dispatcher
            .complete_remote(agent_id, job_id, outcome, error_message, final_log)
            .await?)
    }

    /// All agents with computed status.
    pub async fn list_agents(&self) -> Result<Vec<AgentView>, ServiceError> {
        let agents = self.registry.list().await?;
        Ok(agents
            .into_iter()
            .map(|(agent, status)| AgentView { agent, status })
            .collect())
    }

    /// Remove an agent. Conflict while it is online or has active jobs.
    pub async fn delete_agent(&self, agent_id: &str) -> Result<(), ServiceError> {
        Ok(self.registry.remove(agent_id).await?)
    }
}
