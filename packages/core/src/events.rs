//! Event types exchanged between the broker, the pipeline engine and the job
//! manager, and broadcast to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::{RepositoryId, VariantId};
use crate::job::{JobId, JobStatus, JobType};
use crate::pipeline::{PipelineId, StageKind};
use crate::task::{TaskId, TaskStatus};
use crate::task_group::TaskGroupId;
use crate::worker::WorkerId;

/// Broker to engine: a task group's aggregate status changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroupCallback {
    pub task_group_id: TaskGroupId,
    pub pipeline_id: PipelineId,
    pub job_id: JobId,
    pub status: TaskStatus,
}

/// Engine to job manager: the job status a pipeline step resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub job_id: JobId,
    pub pipeline_id: PipelineId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

/// Catalog deletions the job manager may veto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeleteEvent {
    DeleteAsset {
        variant_ids: Vec<VariantId>,
    },
    DeleteVariant {
        variant_id: VariantId,
    },
    DeleteVariantFromRepository {
        variant_id: VariantId,
        repository_id: RepositoryId,
    },
}

impl DeleteEvent {
    pub fn variant_ids(&self) -> Vec<&VariantId> {
        match self {
            DeleteEvent::DeleteAsset { variant_ids } => variant_ids.iter().collect(),
            DeleteEvent::DeleteVariant { variant_id }
            | DeleteEvent::DeleteVariantFromRepository { variant_id, .. } => vec![variant_id],
        }
    }
}

/// Lifecycle events broadcast to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    JobCreated {
        job_id: JobId,
        job_type: JobType,
        status: JobStatus,
        timestamp: DateTime<Utc>,
    },
    JobStatusChanged {
        job_id: JobId,
        old_status: JobStatus,
        new_status: JobStatus,
        timestamp: DateTime<Utc>,
    },
    JobDeleted {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    StageStarted {
        job_id: JobId,
        pipeline_id: PipelineId,
        stage: StageKind,
        timestamp: DateTime<Utc>,
    },
    TaskGroupStatusChanged {
        job_id: JobId,
        task_group_id: TaskGroupId,
        status: TaskStatus,
        timestamp: DateTime<Utc>,
    },
    TasksAssigned {
        worker_id: WorkerId,
        task_ids: Vec<TaskId>,
        timestamp: DateTime<Utc>,
    },
    TaskFinished {
        job_id: JobId,
        task_id: TaskId,
        status: TaskStatus,
        timestamp: DateTime<Utc>,
    },
    WorkerRegistered {
        worker_id: WorkerId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    WorkerUnregistered {
        worker_id: WorkerId,
        timestamp: DateTime<Utc>,
    },
}

impl OrchestrationEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            OrchestrationEvent::JobCreated { timestamp, .. }
            | OrchestrationEvent::JobStatusChanged { timestamp, .. }
            | OrchestrationEvent::JobDeleted { timestamp, .. }
            | OrchestrationEvent::StageStarted { timestamp, .. }
            | OrchestrationEvent::TaskGroupStatusChanged { timestamp, .. }
            | OrchestrationEvent::TasksAssigned { timestamp, .. }
            | OrchestrationEvent::TaskFinished { timestamp, .. }
            | OrchestrationEvent::WorkerRegistered { timestamp, .. }
            | OrchestrationEvent::WorkerUnregistered { timestamp, .. } => *timestamp,
        }
    }

    /// The job this event concerns, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            OrchestrationEvent::JobCreated { job_id, .. }
            | OrchestrationEvent::JobStatusChanged { job_id, .. }
            | OrchestrationEvent::JobDeleted { job_id, .. }
            | OrchestrationEvent::StageStarted { job_id, .. }
            | OrchestrationEvent::TaskGroupStatusChanged { job_id, .. }
            | OrchestrationEvent::TaskFinished { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Short description for logging.
    pub fn description(&self) -> String {
        match self {
            OrchestrationEvent::JobCreated {
                job_id,
                job_type,
                status,
                ..
            } => format!("{} job {} created as {}", job_type, job_id, status),
            OrchestrationEvent::JobStatusChanged {
                job_id,
                old_status,
                new_status,
                ..
            } => format!("Job {} {} -> {}", job_id, old_status, new_status),
            OrchestrationEvent::JobDeleted { job_id, .. } => format!("Job {} deleted", job_id),
            OrchestrationEvent::StageStarted { job_id, stage, .. } => {
                format!("Job {} entered stage {}", job_id, stage)
            }
            OrchestrationEvent::TaskGroupStatusChanged {
                task_group_id,
                status,
                ..
            } => format!("Task group {} -> {}", task_group_id, status),
            OrchestrationEvent::TasksAssigned {
                worker_id,
                task_ids,
                ..
            } => format!("{} tasks assigned to worker {}", task_ids.len(), worker_id),
            OrchestrationEvent::TaskFinished {
                task_id, status, ..
            } => format!("Task {} finished {}", task_id, status),
            OrchestrationEvent::WorkerRegistered {
                worker_id, name, ..
            } => format!("Worker {} ({}) registered", worker_id, name),
            OrchestrationEvent::WorkerUnregistered { worker_id, .. } => {
                format!("Worker {} unregistered", worker_id)
            }
        }
    }
}
