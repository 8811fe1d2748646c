//! Daemon initialization for the transfer orchestrator.

use std::sync::Arc;

use actors::{
    Collaborators, Orchestrator, OrchestratorConfig, global_registry, local_handlers,
    start_orchestrator,
};
use db::{DbConfig, SurrealStore, init as init_db};
use repository::{BaseLocationResolver, CatalogConfig, MemoryCatalog};
use transfer_core::Capacity;

pub type InitError = Box<dyn std::error::Error + Send + Sync>;

/// Name of the in-process worker the daemon starts.
pub const LOCAL_WORKER: &str = "local";

/// Start the orchestrator and register it globally.
///
/// Should be called once at startup.
pub async fn init_orchestrator() -> Result<Orchestrator, InitError> {
    tracing::info!("Initializing transfer orchestrator...");

    let db_config = DbConfig::from_env();
    tracing::info!("Using database at {}", db_config.endpoint);
    init_db(db_config).await?;

    let catalog_config = CatalogConfig::from_env()?;
    let catalog = Arc::new(MemoryCatalog::new(&catalog_config));
    let resolver = Arc::new(BaseLocationResolver::new(&catalog_config)?);
    let config = OrchestratorConfig::from_env()?;

    let orchestrator = start_orchestrator(
        config,
        SurrealStore::stores(),
        Collaborators::new(catalog, resolver),
    )
    .await?;
    global_registry().register_orchestrator(orchestrator.clone());

    let handlers = Arc::new(local_handlers());
    let slots = local_worker_slots();
    let task_types = handlers.task_types();
    let capacities = task_types
        .iter()
        .copied()
        .map(|task_type| Capacity::new(task_type, slots))
        .collect();
    let worker = orchestrator
        .spawn_worker(LOCAL_WORKER, capacities, handlers)
        .await?;
    global_registry().register_worker(LOCAL_WORKER, worker);

    tracing::info!(
        ?task_types,
        "Transfer orchestrator initialized with {} local slots per task type",
        slots
    );
    Ok(orchestrator)
}

/// `TRANSFER_LOCAL_SLOTS` (default: 2, 0 disables local execution).
fn local_worker_slots() -> u32 {
    std::env::var("TRANSFER_LOCAL_SLOTS")
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(2)
}

/// Stop the registered orchestrator, if any.
pub fn shutdown() {
    if let Some(worker) = global_registry().unregister_worker(LOCAL_WORKER) {
        worker.stop(None);
    }
    if let Some(orchestrator) = global_registry().clear() {
        orchestrator.shutdown();
    }
}
