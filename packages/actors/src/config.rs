//! Orchestrator tuning read from the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use transfer_core::{DEFAULT_PART_SIZE, OrchestrationError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Manifest parse rounds allowed before a manifest transfer fails.
    pub max_manifest_depth: usize,
    /// Part size for repositories that do not configure one.
    pub default_part_size: u64,
    /// Buffer of the lifecycle event channel.
    pub event_capacity: usize,
    /// How long callers wait on an actor reply.
    pub rpc_timeout_ms: u64,
    /// How often in-process workers ask for work.
    pub worker_poll_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_manifest_depth: 8,
            default_part_size: DEFAULT_PART_SIZE,
            event_capacity: 1024,
            rpc_timeout_ms: 30_000,
            worker_poll_interval_ms: 200,
        }
    }
}

impl OrchestratorConfig {
    /// Read overrides from the environment.
    ///
    /// - `TRANSFER_MAX_MANIFEST_DEPTH` (default: 8)
    /// - `TRANSFER_DEFAULT_PART_SIZE` in bytes (default: 8 MiB)
    /// - `TRANSFER_EVENT_CAPACITY` (default: 1024)
    /// - `TRANSFER_RPC_TIMEOUT_MS` (default: 30000)
    /// - `TRANSFER_WORKER_POLL_INTERVAL_MS` (default: 200)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |name: &str, default: u64| -> Result<u64> {
            match lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                Some(value) => value.parse().map_err(|_| {
                    OrchestrationError::invalid(format!("{} must be a number, got {}", name, value))
                }),
                None => Ok(default),
            }
        };

        let config = Self {
            max_manifest_depth: read(
                "TRANSFER_MAX_MANIFEST_DEPTH",
                defaults.max_manifest_depth as u64,
            )? as usize,
            default_part_size: read("TRANSFER_DEFAULT_PART_SIZE", defaults.default_part_size)?,
            event_capacity: read("TRANSFER_EVENT_CAPACITY", defaults.event_capacity as u64)?
                as usize,
            rpc_timeout_ms: read("TRANSFER_RPC_TIMEOUT_MS", defaults.rpc_timeout_ms)?,
            worker_poll_interval_ms: read(
                "TRANSFER_WORKER_POLL_INTERVAL_MS",
                defaults.worker_poll_interval_ms,
            )?,
        };
        if config.default_part_size == 0
            || config.event_capacity == 0
            || config.worker_poll_interval_ms == 0
        {
            return Err(OrchestrationError::invalid(
                "TRANSFER_DEFAULT_PART_SIZE, TRANSFER_EVENT_CAPACITY and \
                 TRANSFER_WORKER_POLL_INTERVAL_MS must be positive",
            ));
        }
        Ok(config)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }
}
