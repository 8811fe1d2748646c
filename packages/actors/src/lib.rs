//! Actor system for the transfer orchestrator.
//!
//! This crate provides the Ractor-based actors that run jobs: the job
//! manager, the pipeline engine, the task broker and in-process workers.
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor that owns the orchestration actors
//! - `JobManager` - Validates jobs and drives the job status state machine
//! - `PipelineEngine` - Runs the stages of each job's pipeline
//! - `TaskBroker` - Hands queued tasks to workers and aggregates task groups
//! - `WorkerActor` - Executes tasks with registered handlers
//!
//! # Usage
//!
//! ```ignore
//! use actors::{Collaborators, OrchestratorConfig, start_orchestrator};
//!
//! let orchestrator = start_orchestrator(config, stores, collaborators).await?;
//! let job = orchestrator.create_job(job.with_status(JobStatus::Queued)).await?;
//! ```

mod broker_actor;
mod config;
mod engine_actor;
mod handler;
mod job_manager;
mod local;
mod messages;
pub mod registry;
pub mod stages;
mod supervisor;
mod worker_actor;

pub use broker_actor::TaskBroker;
pub use config::OrchestratorConfig;
pub use engine_actor::PipelineEngine;
pub use handler::{
    FnHandler, HandlerFuture, HandlerResult, TaskFailure, TaskHandler, TaskHandlerRegistry,
    status_update,
};
pub use job_manager::JobManager;
pub use local::{StorageDeleteHandler, StorageTransferHandler, local_handlers};
pub use messages::{
    ActorError, ActorResult, BrokerMessage, EngineMessage, JobManagerMessage, SupervisorMessage,
    WorkerMessage,
};
pub use registry::{OrchestratorRegistry, global_registry};
pub use supervisor::{Children, Collaborators, Orchestrator, Supervisor, start_orchestrator};
pub use worker_actor::WorkerActor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
