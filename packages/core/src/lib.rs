//! Core domain types for the media transfer orchestrator.
//!
//! This crate contains the types shared by all packages:
//! - Job, JobStatus and the job status state machine
//! - Task, TaskGroup and status aggregation
//! - Pipeline, stages and the typed pipeline context
//! - Transfer and manifest models, multipart planning
//! - Store and collaborator traits, plus an in-memory store

mod content;
mod error;
mod events;
mod ids;
mod job;
pub mod manifest;
pub mod multipart;
mod pipeline;
pub mod store;
mod task;
mod task_group;
mod transfer;
mod worker;

pub use content::{
    ContentManager, DEFAULT_PART_SIZE, LocationResolver, RepositoryDescriptor, RepositoryFile,
    RepositoryFileId, RepositoryId, RepositoryKind, ResolvedLocation, SubmitListener, VariantId,
    join_uri,
};
pub use error::{OrchestrationError, Result};
pub use events::{DeleteEvent, OrchestrationEvent, PipelineReport, TaskGroupCallback};
pub use job::{
    DEFAULT_PRIORITY, DeleteConfiguration, ExportConfiguration, IngestConfiguration, IngestFile,
    Job, JobConfiguration, JobId, JobMessage, JobStatus, JobType, MAX_PRIORITY, MIN_PRIORITY,
    ReplicationConfiguration, TransformationConfiguration, validate_priority,
};
pub use manifest::{ManifestTransfer, ManifestTransferFile, ManifestType};
pub use pipeline::{
    FailureKind, Pipeline, PipelineContext, PipelineId, PipelineStatus, PlannedTask,
    PlannedTaskGroup, StageKind, StageResult, StageStatus, stages_for,
};
pub use store::{
    JobFilter, JobStore, MemoryStore, PipelineStore, Stores, TaskGroupStore, TaskStore,
    WorkerStore,
};
pub use task::{
    Task, TaskConfiguration, TaskId, TaskOutput, TaskStatus, TaskStatusUpdate, TaskType,
    TransferredFile, dispatch_order,
};
pub use task_group::{TaskGroup, TaskGroupId, aggregate_status};
pub use transfer::{
    Hash, HashAlgorithm, Transfer, TransferFile, TransferFileGroup, TransferItemId, UploadPart,
};
pub use worker::{Capacity, Worker, WorkerId, free_slots};
