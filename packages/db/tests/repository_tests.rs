#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashSet;
use std::error::Error;

use transfer_core::{
    Capacity, DeleteConfiguration, Job, JobConfiguration, JobFilter, JobId, JobStatus, JobStore,
    JobType, Pipeline, PipelineContext, PipelineStore, RepositoryFileId, RepositoryId, StageKind,
    Task, TaskConfiguration, TaskGroup, TaskGroupStore, TaskStatus, TaskStatusUpdate, TaskStore,
    TaskType, VariantId, Worker, WorkerStore,
};

use db::{DbError, SurrealStore, repositories::JobRepository};

fn delete_job(variant: &str) -> Job {
    Job::new(JobConfiguration::Delete(DeleteConfiguration {
        variant_id: VariantId::from(variant),
        repository_ids: vec![RepositoryId::from("fs")],
    }))
}

fn delete_task(job_id: JobId, group: &TaskGroup, priority: i32) -> Task {
    Task::new(
        job_id,
        group.id,
        priority,
        "delete file",
        TaskConfiguration::Delete {
            repository_file_id: RepositoryFileId::from("rf-1"),
            repository_id: RepositoryId::from("fs"),
            uri: "file:///fs/a.mp4".into(),
        },
    )
}

#[test]
fn test_job_store() -> Result<(), Box<dyn Error>> {
    common::block_on(test_job_store_body())
}

async fn test_job_store_body() -> Result<(), Box<dyn Error>> {
    let _guard = common::setup_db().await?;
    let store = SurrealStore::new();

    let mut job = delete_job("variant-a").with_priority(7);
    store.create_job(&job).await?;

    let loaded = store.get_job(job.id).await?;
    assert_eq!(loaded, job);

    job.transition(JobStatus::Queued)?;
    job.push_message("queued for deletion");
    store.update_job(&job).await?;
    let loaded = store.get_job(job.id).await?;
    assert_eq!(loaded.status, JobStatus::Queued);
    assert_eq!(loaded.messages.len(), 1);

    let other = delete_job("variant-b");
    store.create_job(&other).await?;

    let active = store
        .find_jobs(&JobFilter::active_for_variant(VariantId::from("variant-a")))
        .await?;
    assert_eq!(active.iter().map(|j| j.id).collect::<Vec<_>>(), vec![job.id]);

    let deletes = store
        .find_jobs(&JobFilter::default().with_type(JobType::Delete))
        .await?;
    assert_eq!(deletes.len(), 2);
    assert_eq!(deletes[0].id, job.id, "oldest job first");

    store.delete_job(job.id).await?;
    let missing = JobRepository::get(job.id).await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));
    assert!(matches!(
        store.get_job(job.id).await,
        Err(transfer_core::OrchestrationError::NotFound(_))
    ));

    Ok(())
}

#[test]
fn test_task_store_claim_and_counts() -> Result<(), Box<dyn Error>> {
    common::block_on(test_task_store_claim_and_counts_body())
}

async fn test_task_store_claim_and_counts_body() -> Result<(), Box<dyn Error>> {
    let _guard = common::setup_db().await?;
    let store = SurrealStore::new();

    let job = delete_job("variant-a");
    let context = PipelineContext::for_job(&job)?;
    let pipeline = Pipeline::new(context, vec![StageKind::Delete]);
    let group = TaskGroup::new(job.id, pipeline.id, StageKind::Delete);
    store.create_task_group(&group).await?;

    let low = delete_task(job.id, &group, 2);
    let high = delete_task(job.id, &group, 8);
    let newer_high = delete_task(job.id, &group, 8);
    store
        .create_tasks(&[low.clone(), high.clone(), newer_high.clone()])
        .await?;

    let queued = store.queued_tasks(TaskType::Delete, 10).await?;
    assert_eq!(
        queued.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![high.id, newer_high.id, low.id]
    );
    assert_eq!(store.queued_tasks(TaskType::Delete, 1).await?.len(), 1);

    let worker = Worker::new("w1", vec![Capacity::new(TaskType::Delete, 2)]);
    store.register_worker(&worker).await?;

    let claimed = store.claim_task(high.id, worker.id).await?;
    let claimed = claimed.ok_or("task should be claimable")?;
    assert_eq!(claimed.status, TaskStatus::Executing);
    assert_eq!(claimed.worker_id, Some(worker.id));

    let second = Worker::new("w2", vec![Capacity::new(TaskType::Delete, 2)]);
    assert!(store.claim_task(high.id, second.id).await?.is_none());
    assert_eq!(store.count_executing(worker.id, TaskType::Delete).await?, 1);
    assert_eq!(store.count_executing(second.id, TaskType::Delete).await?, 0);

    let mut finished = store.get_task(high.id).await?;
    finished.finish(TaskStatusUpdate::failed(false, "source missing"));
    store.update_task(&finished).await?;
    assert_eq!(store.count_executing(worker.id, TaskType::Delete).await?, 0);

    let statuses: HashSet<TaskStatus> = store
        .tasks_for_group(group.id)
        .await?
        .into_iter()
        .map(|t| t.status)
        .collect();
    assert!(statuses.contains(&TaskStatus::FailedClean));
    assert!(statuses.contains(&TaskStatus::Queued));

    assert!(!store.withdraw_task(high.id, "pipeline failed").await?);
    assert!(store.withdraw_task(low.id, "pipeline failed").await?);
    assert_eq!(store.get_task(low.id).await?.status, TaskStatus::FailedClean);
    assert!(store.claim_task(low.id, worker.id).await?.is_none());

    store.delete_tasks_for_job(job.id).await?;
    assert!(store.tasks_for_group(group.id).await?.is_empty());

    Ok(())
}

#[test]
fn test_workers_groups_and_pipelines() -> Result<(), Box<dyn Error>> {
    common::block_on(test_workers_groups_and_pipelines_body())
}

async fn test_workers_groups_and_pipelines_body() -> Result<(), Box<dyn Error>> {
    let _guard = common::setup_db().await?;
    let store = SurrealStore::new();

    let worker = Worker::new("w1", vec![Capacity::new(TaskType::Transfer, 4)]);
    store.register_worker(&worker).await?;
    assert_eq!(store.get_worker(worker.id).await?, worker);
    assert_eq!(store.list_workers().await?.len(), 1);
    store.unregister_worker(worker.id).await?;
    assert!(store.get_worker(worker.id).await.is_err());

    let job = delete_job("variant-a");
    let context = PipelineContext::for_job(&job)?;
    let mut pipeline = Pipeline::new(context, vec![StageKind::Delete]);
    store.create_pipeline(&pipeline).await?;

    let mut group = TaskGroup::new(job.id, pipeline.id, StageKind::Delete);
    store.create_task_group(&group).await?;
    group.status = TaskStatus::Executing;
    store.update_task_group(&group).await?;
    assert_eq!(
        store.get_task_group(group.id).await?.status,
        TaskStatus::Executing
    );

    pipeline.active_task_groups.push(group.id);
    pipeline.context.manifest_depth = 2;
    store.update_pipeline(&pipeline).await?;
    let loaded = store.get_pipeline(pipeline.id).await?;
    assert_eq!(loaded, pipeline);
    assert_eq!(store.pipelines_for_job(job.id).await?.len(), 1);

    store.delete_pipelines_for_job(job.id).await?;
    store.delete_task_groups_for_job(job.id).await?;
    assert!(store.pipelines_for_job(job.id).await?.is_empty());
    assert!(store.get_task_group(group.id).await.is_err());

    Ok(())
}
