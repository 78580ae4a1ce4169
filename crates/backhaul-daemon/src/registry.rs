//! Agent registry: enrollment tokens, check-ins, derived liveness.
//!
//! Enrollment is a one-time handshake: an operator issues a token, the
//! machine redeems it exactly once, and from then on the agent proves
//! liveness by checking in. Status is never stored; it is always derived
//! from the last check-in against the liveness window.

use rand::RngCore;
use rand::rngs::OsRng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::storage::{Agent, AgentStatus, Database, DatabaseError, EnrollmentToken};
use backhaul_core::db::unix_timestamp;

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Enrollment token not recognized")]
    TokenInvalid,

    #[error("Enrollment token expired")]
    TokenExpired,

    #[error("Enrollment token already used")]
    TokenAlreadyUsed,

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent {0} is busy: {1}")]
    AgentBusy(String, String),

    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// Facts an enrolling or checking-in machine reports about itself.
#[derive(Debug, Clone)]
pub struct MachineFacts {
    pub hostname: String,
    pub platform: String,
    pub ip_address: String,
    pub version: String,
}

/// Derive an agent's liveness from its last check-in.
pub const fn agent_status(last_seen: i64, now: i64, liveness_window: i64) -> AgentStatus {
    if now - last_seen <= liveness_window {
        AgentStatus::Online
    } else {
        AgentStatus::Offline
    }
}

/// Agent registry backed by the daemon database.
#[derive(Clone)]
pub struct AgentRegistry {
    db: Database,
    liveness_window: i64,
    token_ttl: i64,
}

impl AgentRegistry {
    pub const fn new(db: Database, liveness_window: i64, token_ttl: i64) -> Self {
        Self {
            db,
            liveness_window,
            token_ttl,
        }
    }

    pub const fn liveness_window(&self) -> i64 {
        self.liveness_window
    }

    /// Issue a fresh one-time enrollment token for an owner.
    pub async fn issue_token(&self, owner_id: &str) -> Result<EnrollmentToken, RegistryError> {
        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        let token = hex::encode(raw);

        let expires_at = unix_timestamp() + self.token_ttl;
        let row = self
            .db
            .create_enrollment_token(&token, owner_id, expires_at)
            .await?;

        info!(owner_id, expires_at, "Enrollment token issued");
        Ok(row)
    }

    /// Redeem an enrollment token, creating or reactivating an agent.
    ///
    /// The token is consumed atomically; when consumption fails the stored
    /// row is re-read only to pick the right error. A hostname that enrolled
    /// before keeps its agent ID so its configs stay attached.
    pub async fn redeem(
        &self,
        token: &str,
        facts: &MachineFacts,
    ) -> Result<Agent, RegistryError> {
        let now = unix_timestamp();

        if !self.db.consume_enrollment_token(token, now).await? {
            let err = match self.db.get_enrollment_token(token).await? {
                None => RegistryError::TokenInvalid,
                Some(row) if row.consumed_at.is_some() => RegistryError::TokenAlreadyUsed,
                Some(_) => RegistryError::TokenExpired,
            };
            warn!(error = %err, "Enrollment rejected");
            return Err(err);
        }

        let agent = match self.db.get_agent_by_hostname(&facts.hostname).await? {
            Some(existing) => {
                let agent = self
                    .db
                    .reactivate_agent(
                        &existing.id,
                        &facts.platform,
                        &facts.ip_address,
                        &facts.version,
                        now,
                    )
                    .await?;
                info!(agent_id = %agent.id, hostname = %agent.hostname, "Agent re-enrolled");
                agent
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let agent = self
                    .db
                    .create_agent(
                        &id,
                        &facts.hostname,
                        &facts.platform,
                        &facts.ip_address,
                        &facts.version,
                    )
                    .await?;
                info!(agent_id = %agent.id, hostname = %agent.hostname, "Agent enrolled");
                agent
            }
        };

        Ok(agent)
    }

    /// Record a periodic check-in from an enrolled agent.
    pub async fn check_in(
        &self,
        agent_id: &str,
        ip_address: &str,
        version: &str,
    ) -> Result<Agent, RegistryError> {
        // Existence check first so an unknown agent is a typed error, not
        // a silently ignored update.
        self.db
            .get_agent(agent_id)
            .await
            .map_err(|_| RegistryError::UnknownAgent(agent_id.to_owned()))?;

        self.db
            .touch_agent(agent_id, ip_address, version, unix_timestamp())
            .await?;

        Ok(self.db.get_agent(agent_id).await?)
    }

    /// Get an agent with its derived status.
    pub async fn get(&self, agent_id: &str) -> Result<(Agent, AgentStatus), RegistryError> {
        let agent = self
            .db
            .get_agent(agent_id)
            .await
            .map_err(|_| RegistryError::UnknownAgent(agent_id.to_owned()))?;
        let status = agent_status(agent.last_seen, unix_timestamp(), self.liveness_window);
        Ok((agent, status))
    }

    /// List all agents with derived statuses.
    pub async fn list(&self) -> Result<Vec<(Agent, AgentStatus)>, RegistryError> {
        let now = unix_timestamp();
        let agents = self.db.list_agents().await?;

        Ok(agents
            .into_iter()
            .map(|a| {
                let status = agent_status(a.last_seen, now, self.liveness_window);
                (a, status)
            })
            .collect())
    }

    /// Remove an agent. Refused while the agent is online or has active
    /// jobs; configs that targeted it fall back to unassigned via the
    /// foreign key.
    pub async fn remove(&self, agent_id: &str) -> Result<(), RegistryError> {
        let (_, status) = self.get(agent_id).await?;
        if status == AgentStatus::Online {
            return Err(RegistryError::AgentBusy(
                agent_id.to_owned(),
                "still checking in".to_owned(),
            ));
        }

        let active = self.db.count_active_jobs_for_agent(agent_id).await?;
        if active > 0 {
            return Err(RegistryError::AgentBusy(
                agent_id.to_owned(),
                format!("{active} active job(s)"),
            ));
        }

        if !self.db.remove_agent(agent_id).await? {
            return Err(RegistryError::UnknownAgent(agent_id.to_owned()));
        }

        info!(agent_id, "Agent removed");
        Ok(())
    }
}
