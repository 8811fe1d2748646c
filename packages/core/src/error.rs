//! Error taxonomy shared by every orchestration component.

use thiserror::Error;

/// Errors raised by the job/task orchestration engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestrationError {
    /// Malformed caller input (priority out of range, missing type or configuration).
    #[error("Invalid property: {0}")]
    InvalidProperty(String),

    /// Unknown job, task, worker, pipeline or repository reference.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation violates a state-machine or business invariant.
    #[error("Not updateable: {0}")]
    NotUpdateable(String),

    /// Internal-consistency failure; indicates a bug or an upstream protocol violation.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// The persistence layer failed.
    #[error("Store error: {0}")]
    Store(String),
}

impl OrchestrationError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidProperty(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn not_updateable(message: impl Into<String>) -> Self {
        Self::NotUpdateable(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }
}

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, OrchestrationError>;
