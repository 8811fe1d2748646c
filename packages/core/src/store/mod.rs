//! Persistence interfaces for jobs, tasks, task groups, workers and pipelines.
//!
//! Lookups of unknown ids fail with [`OrchestrationError::NotFound`].
//!
//! [`OrchestrationError::NotFound`]: crate::OrchestrationError::NotFound

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::content::VariantId;
use crate::error::Result;
use crate::job::{Job, JobId, JobStatus, JobType};
use crate::pipeline::{Pipeline, PipelineId};
use crate::task::{Task, TaskId, TaskType};
use crate::task_group::{TaskGroup, TaskGroupId};
use crate::worker::{Worker, WorkerId};

pub use memory::MemoryStore;

/// Criteria for [`JobStore::find_jobs`]. Empty criteria match every job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<JobType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<VariantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn with_statuses(mut self, statuses: &[JobStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn with_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    pub fn with_variant(mut self, variant_id: VariantId) -> Self {
        self.variant_id = Some(variant_id);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Active jobs of any type touching a variant.
    pub fn active_for_variant(variant_id: VariantId) -> Self {
        Self::default()
            .with_statuses(&[JobStatus::Queued, JobStatus::Executing])
            .with_variant(variant_id)
    }

    pub fn matches(&self, job: &Job) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self.job_type.is_none_or(|t| t == job.job_type)
            && self
                .variant_id
                .as_ref()
                .is_none_or(|v| job.variant_id() == Some(v))
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<()>;
    async fn get_job(&self, id: JobId) -> Result<Job>;
    async fn update_job(&self, job: &Job) -> Result<()>;
    async fn delete_job(&self, id: JobId) -> Result<()>;
    /// Matching jobs, oldest first.
    async fn find_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_tasks(&self, tasks: &[Task]) -> Result<()>;
    async fn get_task(&self, id: TaskId) -> Result<Task>;
    async fn update_task(&self, task: &Task) -> Result<()>;
    async fn tasks_for_group(&self, task_group_id: TaskGroupId) -> Result<Vec<Task>>;
    /// Queued tasks of a type, highest priority first, then oldest first.
    async fn queued_tasks(&self, task_type: TaskType, limit: usize) -> Result<Vec<Task>>;
    /// Set a task EXECUTING for `worker_id` only if it is still QUEUED.
    /// Returns `None` when another worker claimed it first.
    async fn claim_task(&self, id: TaskId, worker_id: WorkerId) -> Result<Option<Task>>;
    /// Fail a task clean with `message` only if it is still QUEUED.
    /// Returns whether the task was withdrawn.
    async fn withdraw_task(&self, id: TaskId, message: &str) -> Result<bool>;
    /// Tasks of a type currently EXECUTING on a worker.
    async fn count_executing(&self, worker_id: WorkerId, task_type: TaskType) -> Result<usize>;
    async fn delete_tasks_for_job(&self, job_id: JobId) -> Result<()>;
}

#[async_trait]
pub trait TaskGroupStore: Send + Sync {
    async fn create_task_group(&self, group: &TaskGroup) -> Result<()>;
    async fn get_task_group(&self, id: TaskGroupId) -> Result<TaskGroup>;
    async fn update_task_group(&self, group: &TaskGroup) -> Result<()>;
    async fn delete_task_groups_for_job(&self, job_id: JobId) -> Result<()>;
}

#[async_trait]
pub trait WorkerStore: Send + Sync {
    async fn register_worker(&self, worker: &Worker) -> Result<()>;
    async fn get_worker(&self, id: WorkerId) -> Result<Worker>;
    async fn unregister_worker(&self, id: WorkerId) -> Result<()>;
    async fn list_workers(&self) -> Result<Vec<Worker>>;
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn create_pipeline(&self, pipeline: &Pipeline) -> Result<()>;
    async fn get_pipeline(&self, id: PipelineId) -> Result<Pipeline>;
    async fn update_pipeline(&self, pipeline: &Pipeline) -> Result<()>;
    async fn pipelines_for_job(&self, job_id: JobId) -> Result<Vec<Pipeline>>;
    async fn delete_pipelines_for_job(&self, job_id: JobId) -> Result<()>;
}

/// Every store the orchestrator needs, usually backed by one database.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub task_groups: Arc<dyn TaskGroupStore>,
    pub workers: Arc<dyn WorkerStore>,
    pub pipelines: Arc<dyn PipelineStore>,
}

impl Stores {
    /// Use one backend for every store.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: JobStore + TaskStore + TaskGroupStore + WorkerStore + PipelineStore + 'static,
    {
        Self {
            jobs: store.clone(),
            tasks: store.clone(),
            task_groups: store.clone(),
            workers: store.clone(),
            pipelines: store,
        }
    }

    pub fn memory() -> Self {
        Self::shared(Arc::new(MemoryStore::new()))
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
