//! Agent and enrollment token queries.

use backhaul_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::{Agent, EnrollmentToken};

impl Database {
    // =========================================================================
    // Enrollment token queries
    // =========================================================================

    /// Persist a freshly issued enrollment token.
    pub async fn create_enrollment_token(
        &self,
        token: &str,
        owner_id: &str,
        expires_at: i64,
    ) -> Result<EnrollmentToken, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO enrollment_tokens (token, owner_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token)
        .bind(owner_id)
        .bind(expires_at)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_enrollment_token(token)
            .await?
            .ok_or_else(|| DatabaseError::NotFound("enrollment token".into()))
    }

    /// Get a token row, if it exists.
    pub async fn get_enrollment_token(
        &self,
        token: &str,
    ) -> Result<Option<EnrollmentToken>, DatabaseError> {
        let row = sqlx::query_as::<_, EnrollmentToken>(
            "SELECT * FROM enrollment_tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// Atomically consume a token.
    ///
    /// Succeeds (returns `true`) only when the token exists, is unconsumed,
    /// and has not expired. The single guarded UPDATE is what guarantees
    /// that concurrent redemptions of the same token cannot both win.
    pub async fn consume_enrollment_token(
        &self,
        token: &str,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE enrollment_tokens SET consumed_at = ? WHERE token = ? AND consumed_at IS NULL AND expires_at > ?",
        )
        .bind(now)
        .bind(token)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Remove tokens that expired before `cutoff`. Returns the count removed.
    pub async fn purge_expired_tokens(&self, cutoff: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM enrollment_tokens WHERE expires_at < ?")
            .bind(cutoff)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Agent queries
    // =========================================================================

    /// Create an agent row.
    pub async fn create_agent(
        &self,
        id: &str,
        hostname: &str,
        platform: &str,
        ip_address: &str,
        version: &str,
    ) -> Result<Agent, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO agents (id, hostname, platform, ip_address, version, last_seen, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(hostname)
        .bind(platform)
        .bind(ip_address)
        .bind(version)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_agent(id).await
    }

    /// Get an agent by ID.
    pub async fn get_agent(&self, id: &str) -> Result<Agent, DatabaseError> {
        sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Agent {id}")))
    }

    /// Get an agent by hostname, if enrolled before.
    pub async fn get_agent_by_hostname(
        &self,
        hostname: &str,
    ) -> Result<Option<Agent>, DatabaseError> {
        let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE hostname = ?")
            .bind(hostname)
            .fetch_optional(self.pool())
            .await?;

        Ok(agent)
    }

    /// List all agents, most recently seen first.
    pub async fn list_agents(&self) -> Result<Vec<Agent>, DatabaseError> {
        let agents = sqlx::query_as::<_, Agent>("SELECT * FROM agents ORDER BY last_seen DESC")
            .fetch_all(self.pool())
            .await?;

        Ok(agents)
    }

    /// Record a check-in: refresh reported fields and `last_seen`.
    ///
    /// `last_seen` is monotonic; an out-of-order report with an older
    /// timestamp leaves the row untouched and returns `false`.
    pub async fn touch_agent(
        &self,
        id: &str,
        ip_address: &str,
        version: &str,
        seen_at: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE agents SET last_seen = ?, ip_address = ?, version = ? WHERE id = ? AND last_seen <= ?",
        )
        .bind(seen_at)
        .bind(ip_address)
        .bind(version)
        .bind(id)
        .bind(seen_at)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Refresh an existing agent on re-enrollment.
    pub async fn reactivate_agent(
        &self,
        id: &str,
        platform: &str,
        ip_address: &str,
        version: &str,
        seen_at: i64,
    ) -> Result<Agent, DatabaseError> {
        sqlx::query(
            "UPDATE agents SET platform = ?, ip_address = ?, version = ?, last_seen = ? WHERE id = ?",
        )
        .bind(platform)
        .bind(ip_address)
        .bind(version)
        .bind(seen_at)
        .bind(id)
        .execute(self.pool())
        .await?;

        self.get_agent(id).await
    }

    /// Remove an agent row. Historical jobs keep their `agent_id`.
    pub async fn remove_agent(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count configs that target the given agent.
    pub async fn count_configs_for_agent(&self, agent_id: &str) -> Result<i64, DatabaseError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM backup_configs WHERE agent_id = ?")
                .bind(agent_id)
                .fetch_one(self.pool())
                .await?;

        Ok(row.0)
    }
}
