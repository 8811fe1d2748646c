//! Store traits implemented over the global SurrealDB connection.

use std::sync::Arc;

use async_trait::async_trait;
use transfer_core::{
    Job, JobFilter, JobId, JobStore, Pipeline, PipelineId, PipelineStore, Result, Stores, Task,
    TaskGroup, TaskGroupId, TaskGroupStore, TaskId, TaskStore, TaskType, Worker, WorkerId,
    WorkerStore,
};

use crate::repositories::{
    JobRepository, PipelineRepository, TaskGroupRepository, TaskRepository, WorkerRepository,
};

/// Persists orchestration state in SurrealDB. Requires [`crate::init`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SurrealStore;

impl SurrealStore {
    pub fn new() -> Self {
        Self
    }

    /// A store bundle backed entirely by SurrealDB.
    pub fn stores() -> Stores {
        Stores::shared(Arc::new(Self))
    }
}

#[async_trait]
impl JobStore for SurrealStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        Ok(JobRepository::create(job).await?)
    }

    async fn get_job(&self, id: JobId) -> Result<Job> {
        Ok(JobRepository::get(id).await?)
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        Ok(JobRepository::update(job).await?)
    }

    async fn delete_job(&self, id: JobId) -> Result<()> {
        Ok(JobRepository::delete(id).await?)
    }

    async fn find_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        Ok(JobRepository::find(filter).await?)
    }
}

#[async_trait]
impl TaskStore for SurrealStore {
    async fn create_tasks(&self, tasks: &[Task]) -> Result<()> {
        Ok(TaskRepository::create_many(tasks).await?)
    }

    async fn get_task(&self, id: TaskId) -> Result<Task> {
        Ok(TaskRepository::get(id).await?)
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        Ok(TaskRepository::update(task).await?)
    }

    async fn tasks_for_group(&self, task_group_id: TaskGroupId) -> Result<Vec<Task>> {
        Ok(TaskRepository::for_group(task_group_id).await?)
    }

    async fn queued_tasks(&self, task_type: TaskType, limit: usize) -> Result<Vec<Task>> {
        Ok(TaskRepository::queued(task_type, limit).await?)
    }

    async fn claim_task(&self, id: TaskId, worker_id: WorkerId) -> Result<Option<Task>> {
        Ok(TaskRepository::claim(id, worker_id).await?)
    }

    async fn withdraw_task(&self, id: TaskId, message: &str) -> Result<bool> {
        Ok(TaskRepository::withdraw(id, message).await?)
    }

    async fn count_executing(&self, worker_id: WorkerId, task_type: TaskType) -> Result<usize> {
        Ok(TaskRepository::count_executing(worker_id, task_type).await?)
    }

    async fn delete_tasks_for_job(&self, job_id: JobId) -> Result<()> {
        Ok(TaskRepository::delete_for_job(job_id).await?)
    }
}

#[async_trait]
impl TaskGroupStore for SurrealStore {
    async fn create_task_group(&self, group: &TaskGroup) -> Result<()> {
        Ok(TaskGroupRepository::create(group).await?)
    }

    async fn get_task_group(&self, id: TaskGroupId) -> Result<TaskGroup> {
        Ok(TaskGroupRepository::get(id).await?)
    }

    async fn update_task_group(&self, group: &TaskGroup) -> Result<()> {
        Ok(TaskGroupRepository::update(group).await?)
    }

    async fn delete_task_groups_for_job(&self, job_id: JobId) -> Result<()> {
        Ok(TaskGroupRepository::delete_for_job(job_id).await?)
    }
}

#[async_trait]
impl WorkerStore for SurrealStore {
    async fn register_worker(&self, worker: &Worker) -> Result<()> {
        Ok(WorkerRepository::register(worker).await?)
    }

    async fn get_worker(&self, id: WorkerId) -> Result<Worker> {
        Ok(WorkerRepository::get(id).await?)
    }

    async fn unregister_worker(&self, id: WorkerId) -> Result<()> {
        Ok(WorkerRepository::unregister(id).await?)
    }

    async fn list_workers(&self) -> Result<Vec<Worker>> {
        Ok(WorkerRepository::list().await?)
    }
}

#[async_trait]
impl PipelineStore for SurrealStore {
    async fn create_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        Ok(PipelineRepository::create(pipeline).await?)
    }

    async fn get_pipeline(&self, id: PipelineId) -> Result<Pipeline> {
        Ok(PipelineRepository::get(id).await?)
    }

    async fn update_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        Ok(PipelineRepository::update(pipeline).await?)
    }

    async fn pipelines_for_job(&self, job_id: JobId) -> Result<Vec<Pipeline>> {
        Ok(PipelineRepository::for_job(job_id).await?)
    }

    async fn delete_pipelines_for_job(&self, job_id: JobId) -> Result<()> {
        Ok(PipelineRepository::delete_for_job(job_id).await?)
    }
}
