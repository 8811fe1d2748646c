//! In-memory store used by tests and single-process deployments.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{JobFilter, JobStore, PipelineStore, TaskGroupStore, TaskStore, WorkerStore};
use crate::error::{OrchestrationError, Result};
use crate::job::{Job, JobId};
use crate::pipeline::{Pipeline, PipelineId};
use crate::task::{Task, TaskId, TaskStatus, TaskStatusUpdate, TaskType, dispatch_order};
use crate::task_group::{TaskGroup, TaskGroupId};
use crate::worker::{Worker, WorkerId};

#[derive(Default)]
struct Tables {
    jobs: BTreeMap<JobId, Job>,
    tasks: BTreeMap<TaskId, Task>,
    task_groups: BTreeMap<TaskGroupId, TaskGroup>,
    workers: BTreeMap<WorkerId, Worker>,
    pipelines: BTreeMap<PipelineId, Pipeline>,
}

/// All tables behind one lock; every operation is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(kind: &str, id: impl std::fmt::Display) -> OrchestrationError {
    OrchestrationError::not_found(format!("{} {} does not exist", kind, id))
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        self.tables.write().jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Job> {
        self.tables
            .read()
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("Job", id))
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let mut tables = self.tables.write();
        let slot = tables.jobs.get_mut(&job.id).ok_or_else(|| missing("Job", job.id))?;
        *slot = job.clone();
        Ok(())
    }

    async fn delete_job(&self, id: JobId) -> Result<()> {
        self.tables
            .write()
            .jobs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| missing("Job", id))
    }

    async fn find_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let tables = self.tables.read();
        let matching = tables.jobs.values().filter(|job| filter.matches(job)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create_tasks(&self, tasks: &[Task]) -> Result<()> {
        let mut tables = self.tables.write();
        for task in tasks {
            tables.tasks.insert(task.id, task.clone());
        }
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Task> {
        self.tables
            .read()
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("Task", id))
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let mut tables = self.tables.write();
        let slot = tables.tasks.get_mut(&task.id).ok_or_else(|| missing("Task", task.id))?;
        *slot = task.clone();
        Ok(())
    }

    async fn tasks_for_group(&self, task_group_id: TaskGroupId) -> Result<Vec<Task>> {
        Ok(self
            .tables
            .read()
            .tasks
            .values()
            .filter(|t| t.task_group_id == task_group_id)
            .cloned()
            .collect())
    }

    async fn queued_tasks(&self, task_type: TaskType, limit: usize) -> Result<Vec<Task>> {
        let mut queued: Vec<Task> = self
            .tables
            .read()
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued && t.task_type() == task_type)
            .cloned()
            .collect();
        queued.sort_by(dispatch_order);
        queued.truncate(limit);
        Ok(queued)
    }

    async fn claim_task(&self, id: TaskId, worker_id: WorkerId) -> Result<Option<Task>> {
        let mut tables = self.tables.write();
        let task = tables.tasks.get_mut(&id).ok_or_else(|| missing("Task", id))?;
        if task.status != TaskStatus::Queued {
            return Ok(None);
        }
        task.assign(worker_id);
        Ok(Some(task.clone()))
    }

    async fn withdraw_task(&self, id: TaskId, message: &str) -> Result<bool> {
        let mut tables = self.tables.write();
        let task = tables.tasks.get_mut(&id).ok_or_else(|| missing("Task", id))?;
        if task.status != TaskStatus::Queued {
            return Ok(false);
        }
        task.finish(TaskStatusUpdate::failed(false, message));
        Ok(true)
    }

    async fn count_executing(&self, worker_id: WorkerId, task_type: TaskType) -> Result<usize> {
        Ok(self
            .tables
            .read()
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Executing
                    && t.worker_id == Some(worker_id)
                    && t.task_type() == task_type
            })
            .count())
    }

    async fn delete_tasks_for_job(&self, job_id: JobId) -> Result<()> {
        self.tables.write().tasks.retain(|_, t| t.job_id != job_id);
        Ok(())
    }
}

#[async_trait]
impl TaskGroupStore for MemoryStore {
    async fn create_task_group(&self, group: &TaskGroup) -> Result<()> {
        self.tables.write().task_groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn get_task_group(&self, id: TaskGroupId) -> Result<TaskGroup> {
        self.tables
            .read()
            .task_groups
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("Task group", id))
    }

    async fn update_task_group(&self, group: &TaskGroup) -> Result<()> {
        let mut tables = self.tables.write();
        let slot = tables
            .task_groups
            .get_mut(&group.id)
            .ok_or_else(|| missing("Task group", group.id))?;
        *slot = group.clone();
        Ok(())
    }

    async fn delete_task_groups_for_job(&self, job_id: JobId) -> Result<()> {
        self.tables.write().task_groups.retain(|_, g| g.job_id != job_id);
        Ok(())
    }
}

#[async_trait]
impl WorkerStore for MemoryStore {
    async fn register_worker(&self, worker: &Worker) -> Result<()> {
        self.tables.write().workers.insert(worker.id, worker.clone());
        Ok(())
    }

    async fn get_worker(&self, id: WorkerId) -> Result<Worker> {
        self.tables
            .read()
            .workers
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("Worker", id))
    }

    async fn unregister_worker(&self, id: WorkerId) -> Result<()> {
        self.tables
            .write()
            .workers
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| missing("Worker", id))
    }

    async fn list_workers(&self) -> Result<Vec<Worker>> {
        Ok(self.tables.read().workers.values().cloned().collect())
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn create_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        self.tables.write().pipelines.insert(pipeline.id, pipeline.clone());
        Ok(())
    }

    async fn get_pipeline(&self, id: PipelineId) -> Result<Pipeline> {
        self.tables
            .read()
            .pipelines
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("Pipeline", id))
    }

    async fn update_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        let mut tables = self.tables.write();
        let slot = tables
            .pipelines
            .get_mut(&pipeline.id)
            .ok_or_else(|| missing("Pipeline", pipeline.id))?;
        *slot = pipeline.clone();
        Ok(())
    }

    async fn pipelines_for_job(&self, job_id: JobId) -> Result<Vec<Pipeline>> {
        Ok(self
            .tables
            .read()
            .pipelines
            .values()
            .filter(|p| p.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn delete_pipelines_for_job(&self, job_id: JobId) -> Result<()> {
        self.tables.write().pipelines.retain(|_, p| p.job_id != job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::content::{RepositoryFileId, RepositoryId, VariantId};
    use crate::job::{DeleteConfiguration, JobConfiguration, JobStatus};
    use crate::task::TaskConfiguration;

    fn delete_task(job_id: JobId, group: TaskGroupId, priority: i32) -> Task {
        Task::new(
            job_id,
            group,
            priority,
            "delete",
            TaskConfiguration::Delete {
                repository_file_id: RepositoryFileId::from("rf"),
                repository_id: RepositoryId::from("fs"),
                uri: "file:///fs/a".into(),
            },
        )
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_job(JobId::new()).await,
            Err(OrchestrationError::NotFound(_))
        ));
        assert!(matches!(
            store.claim_task(TaskId::new(), WorkerId::new()).await,
            Err(OrchestrationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn find_jobs_filters_by_status_and_variant() {
        let store = MemoryStore::new();
        for (variant, status) in [
            ("a", JobStatus::Queued),
            ("a", JobStatus::Completed),
            ("b", JobStatus::Executing),
        ] {
            let job = Job::new(JobConfiguration::Delete(DeleteConfiguration {
                variant_id: VariantId::from(variant),
                repository_ids: vec!["fs".into()],
            }))
            .with_status(status);
            store.create_job(&job).await.unwrap();
        }

        let active_a = store
            .find_jobs(&JobFilter::active_for_variant(VariantId::from("a")))
            .await
            .unwrap();
        assert_eq!(active_a.len(), 1);
        assert_eq!(active_a[0].status, JobStatus::Queued);

        let all = store.find_jobs(&JobFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        let limited = store
            .find_jobs(&JobFilter::default().with_limit(2))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn claim_is_compare_and_set() {
        let store = MemoryStore::new();
        let task = delete_task(JobId::new(), TaskGroupId::new(), 5);
        store.create_tasks(std::slice::from_ref(&task)).await.unwrap();

        let first = WorkerId::new();
        let claimed = store.claim_task(task.id, first).await.unwrap().unwrap();
        assert_eq!(claimed.status, TaskStatus::Executing);
        assert_eq!(claimed.worker_id, Some(first));
        assert!(store.claim_task(task.id, WorkerId::new()).await.unwrap().is_none());
        assert_eq!(store.count_executing(first, TaskType::Delete).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn withdraw_only_touches_queued_tasks() {
        let store = MemoryStore::new();
        let group = TaskGroupId::new();
        let claimed = delete_task(JobId::new(), group, 5);
        let waiting = delete_task(JobId::new(), group, 5);
        store
            .create_tasks(&[claimed.clone(), waiting.clone()])
            .await
            .unwrap();
        store.claim_task(claimed.id, WorkerId::new()).await.unwrap();

        assert!(!store.withdraw_task(claimed.id, "pipeline failed").await.unwrap());
        assert!(store.withdraw_task(waiting.id, "pipeline failed").await.unwrap());
        assert!(!store.withdraw_task(waiting.id, "pipeline failed").await.unwrap());

        let withdrawn = store.get_task(waiting.id).await.unwrap();
        assert_eq!(withdrawn.status, TaskStatus::FailedClean);
        assert_eq!(withdrawn.message.as_deref(), Some("pipeline failed"));
        assert_eq!(
            store.get_task(claimed.id).await.unwrap().status,
            TaskStatus::Executing
        );
        assert!(store.queued_tasks(TaskType::Delete, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_claims_never_duplicate() {
        let store = Arc::new(MemoryStore::new());
        let job_id = JobId::new();
        let group = TaskGroupId::new();
        let tasks: Vec<Task> = (0..20).map(|_| delete_task(job_id, group, 5)).collect();
        store.create_tasks(&tasks).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let worker = WorkerId::new();
                let mut won = Vec::new();
                for task in store.queued_tasks(TaskType::Delete, 20).await.unwrap() {
                    if let Some(task) = store.claim_task(task.id, worker).await.unwrap() {
                        won.push(task.id);
                    }
                }
                won
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "task {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), 20);
    }

    #[tokio::test]
    async fn queued_tasks_follow_dispatch_order() {
        let store = MemoryStore::new();
        let job_id = JobId::new();
        let group = TaskGroupId::new();
        let low = delete_task(job_id, group, 1);
        let high = delete_task(job_id, group, 9);
        store.create_tasks(&[low.clone(), high.clone()]).await.unwrap();

        let queued = store.queued_tasks(TaskType::Delete, 10).await.unwrap();
        assert_eq!(queued.iter().map(|t| t.id).collect::<Vec<_>>(), vec![high.id, low.id]);
        assert!(store.queued_tasks(TaskType::Hash, 10).await.unwrap().is_empty());

        store.delete_tasks_for_job(job_id).await.unwrap();
        assert!(store.tasks_for_group(group).await.unwrap().is_empty());
    }
}
