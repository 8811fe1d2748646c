//! Process-wide lookup of the running orchestrator and its workers.

use std::collections::HashMap;
use std::sync::LazyLock;

use parking_lot::RwLock;
use ractor::ActorRef;

use crate::messages::WorkerMessage;
use crate::supervisor::Orchestrator;

/// Global registry for the orchestrator handle.
///
/// This provides a way to reach the orchestrator from entry points that do
/// not get the handle passed down.
pub struct OrchestratorRegistry {
    orchestrator: RwLock<Option<Orchestrator>>,
    workers: RwLock<HashMap<String, ActorRef<WorkerMessage>>>,
}

impl OrchestratorRegistry {
    pub fn new() -> Self {
        Self {
            orchestrator: RwLock::new(None),
            workers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_orchestrator(&self, orchestrator: Orchestrator) {
        *self.orchestrator.write() = Some(orchestrator);
    }

    /// Forget the orchestrator and every worker, returning the old handle.
    pub fn clear(&self) -> Option<Orchestrator> {
        self.workers.write().clear();
        self.orchestrator.write().take()
    }

    pub fn register_worker(&self, name: &str, worker: ActorRef<WorkerMessage>) {
        self.workers.write().insert(name.to_string(), worker);
    }

    pub fn unregister_worker(&self, name: &str) -> Option<ActorRef<WorkerMessage>> {
        self.workers.write().remove(name)
    }
}

impl Default for OrchestratorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: LazyLock<OrchestratorRegistry> = LazyLock::new(OrchestratorRegistry::new);

/// Get the global orchestrator registry.
pub fn global_registry() -> &'static OrchestratorRegistry {
    &REGISTRY
}
