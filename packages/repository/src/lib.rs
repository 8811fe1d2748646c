//! Repository configuration, asset catalog and location handling.
//!
//! - [`CatalogConfig`] declares repositories and the base location from the environment
//! - [`MemoryCatalog`] implements the orchestrator's content manager over that config
//! - [`BaseLocationResolver`] expands caller-supplied URIs
//! - [`StorageLocation`] gives in-process workers byte access to `file://` and `s3://` objects

mod catalog;
mod config;
mod resolver;
mod storage;

use transfer_core::OrchestrationError;

pub use catalog::MemoryCatalog;
pub use config::{CatalogConfig, RepositoryConfig};
pub use resolver::BaseLocationResolver;
pub use storage::{S3Config, StorageLocation};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("invalid repository config: {0}")]
    InvalidConfig(String),

    #[error("invalid uri: {0}")]
    Uri(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("object path error: {0}")]
    Path(#[from] object_store::path::Error),
}

impl From<RepositoryError> for OrchestrationError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::InvalidConfig(_) | RepositoryError::Uri(_) => {
                OrchestrationError::invalid(err.to_string())
            }
            RepositoryError::ObjectStore(object_store::Error::NotFound { .. }) => {
                OrchestrationError::not_found(err.to_string())
            }
            other => OrchestrationError::runtime(other.to_string()),
        }
    }
}
