//! SurrealDB persistence for the transfer orchestrator.
//!
//! This crate provides database connectivity, repositories for jobs, tasks,
//! task groups, workers and pipelines, and [`SurrealStore`], which implements
//! the orchestrator's store traits on top of them.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
mod store;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, get_db, init_db};
pub use schema::{TABLES, init_schema};
pub use store::SurrealStore;

/// Initialize the database with the given configuration.
///
/// This should be called once at application startup.
pub async fn init(config: DbConfig) -> Result<(), DbError> {
    init_db(config).await?;
    init_schema().await?;
    Ok(())
}
