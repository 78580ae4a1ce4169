//! Service-level error taxonomy.
//!
//! Every failure crossing the service boundary is classified so a
//! presentation layer can react uniformly: validation and conflicts map
//! to client errors, unavailability to retry-later, the rest to server
//! errors. Internals never leak raw driver messages for the typed cases.

use crate::dispatch::DispatchError;
use crate::jobs::JobError;
use crate::registry::RegistryError;
use crate::storage::DatabaseError;
use crate::vault::VaultError;
use backhaul_core::ScheduleError;
use backhaul_crypto::CryptoError;

/// Coarse classification of a service failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request; nothing was persisted.
    Validation,
    /// The request lost a race or contradicts current state; no change.
    Conflict,
    /// A dependency (agent, credentials) is not usable right now.
    Unavailable,
    /// An execution-time failure recorded on the affected job.
    TransientExecution,
    /// Constraint violation or corrupted state; operation aborted.
    Internal,
}

/// A classified service failure with human-readable detail.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    TransientExecution(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::NotFound(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::TransientExecution(_) => ErrorKind::TransientExecution,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<DatabaseError> for ServiceError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => Self::NotFound(what),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ScheduleError> for ServiceError {
    fn from(e: ScheduleError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<CryptoError> for ServiceError {
    fn from(e: CryptoError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<RegistryError> for ServiceError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::TokenInvalid | RegistryError::TokenExpired => {
                Self::Validation(e.to_string())
            }
            RegistryError::TokenAlreadyUsed | RegistryError::AgentBusy(_, _) => {
                Self::Conflict(e.to_string())
            }
            RegistryError::UnknownAgent(id) => Self::NotFound(format!("Agent {id}")),
            RegistryError::Db(db) => db.into(),
        }
    }
}

impl From<VaultError> for ServiceError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::CredentialsUnresolved => Self::Unavailable(e.to_string()),
            VaultError::CrossOwnerAccess(_) | VaultError::UnsupportedRemote(_) => {
                Self::Validation(e.to_string())
            }
            VaultError::Crypto(c) => c.into(),
            VaultError::Db(db) => db.into(),
        }
    }
}

impl From<JobError> for ServiceError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::AlreadyActive(_) | JobError::InvalidTransition { .. } => {
                Self::Conflict(e.to_string())
            }
            JobError::NotFound(id) => Self::NotFound(format!("Job {id}")),
            JobError::Db(db) => db.into(),
        }
    }
}

impl From<DispatchError> for ServiceError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::AgentOffline(_) => Self::Unavailable(e.to_string()),
            DispatchError::NotAssigned(_) => Self::Conflict(e.to_string()),
            DispatchError::Vault(v) => v.into(),
            DispatchError::Job(j) => j.into(),
            DispatchError::Registry(r) => r.into(),
            DispatchError::Db(db) => db.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        let e: ServiceError = JobError::AlreadyActive("c1".into()).into();
        assert_eq!(e.kind(), ErrorKind::Conflict);

        let e: ServiceError = VaultError::CredentialsUnresolved.into();
        assert_eq!(e.kind(), ErrorKind::Unavailable);

        let e: ServiceError = DispatchError::AgentOffline("a1".into()).into();
        assert_eq!(e.kind(), ErrorKind::Unavailable);

        let e: ServiceError = RegistryError::TokenAlreadyUsed.into();
        assert_eq!(e.kind(), ErrorKind::Conflict);

        let e: ServiceError = DatabaseError::Query("disk I/O".into()).into();
        assert_eq!(e.kind(), ErrorKind::Internal);
    }

    #[test]
    fn detail_is_human_readable() {
        let e: ServiceError = RegistryError::TokenExpired.into();
        assert_eq!(e.to_string(), "Enrollment token expired");
    }
}
