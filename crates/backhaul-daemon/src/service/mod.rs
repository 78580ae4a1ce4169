//! Command and read surface for presentation layers.
//!
//! The `Orchestrator` is the single entry point a UI or API server talks
//! to. Identity is explicit: every owner-scoped call takes `owner_id` as
//! a parameter, and every failure is a classified [`ServiceError`].

mod agents;
mod configs;
mod error;
mod jobs_api;
mod profiles;

pub use agents::{AgentView, CheckInResponse};
pub use configs::ConfigInput;
pub use error::{ErrorKind, ServiceError};
pub use profiles::ProfileInput;

use crate::dispatch::Dispatcher;
use crate::jobs::JobManager;
use crate::registry::AgentRegistry;
use crate::storage::Database;
use crate::vault::CredentialVault;

/// The orchestration core's service facade.
#[derive(Clone)]
pub struct Orchestrator {
    db: Database,
    vault: CredentialVault,
    registry: AgentRegistry,
    jobs: JobManager,
    dispatcher: Dispatcher,
}

impl Orchestrator {
    pub const fn new(
        db: Database,
        vault: CredentialVault,
        registry: AgentRegistry,
        jobs: JobManager,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            db,
            vault,
            registry,
            jobs,
            dispatcher,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod test_support {
    use super::*;
    use crate::executor::LocalRunner;
    use backhaul_crypto::{CredentialSealer, MasterKey};

    /// An orchestrator on an in-memory database, transfer tool stubbed
    /// with `true`.
    pub async fn orchestrator() -> Orchestrator {
        let db = Database::open_in_memory().await.unwrap();
        let sealer = CredentialSealer::new(&MasterKey::generate()).unwrap();
        let vault = CredentialVault::new(db.clone(), sealer);
        let registry = AgentRegistry::new(db.clone(), 30, 3600);
        let jobs = JobManager::new(db.clone());
        let runner = LocalRunner::new(jobs.clone(), "true".to_owned());
        let dispatcher = Dispatcher::new(
            db.clone(),
            vault.clone(),
            registry.clone(),
            jobs.clone(),
            runner,
        );

        Orchestrator::new(db, vault, registry, jobs, dispatcher)
    }
}
