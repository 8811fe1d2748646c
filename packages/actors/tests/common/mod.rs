#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use actors::{Collaborators, Orchestrator, OrchestratorConfig, start_orchestrator};
use repository::{BaseLocationResolver, CatalogConfig, MemoryCatalog, RepositoryConfig};
use transfer_core::{
    Capacity, Hash, Job, JobId, JobStatus, RepositoryKind, Stores, SubmitListener, Task,
    TaskConfiguration, TaskOutput, TaskStatusUpdate, TaskType, TransferredFile, Worker,
    manifest::ManifestParseOutput, multipart::byte_ranges,
};

/// Size fake workers report for files whose size is unknown.
pub const UNKNOWN_SIZE: u64 = 10;

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub catalog: Arc<MemoryCatalog>,
    pub stores: Stores,
}

pub fn catalog_config() -> CatalogConfig {
    CatalogConfig::default()
        .with_repository(RepositoryConfig::new(
            "fs",
            RepositoryKind::Filesystem,
            "file:///srv/media",
        ))
        .with_repository(
            RepositoryConfig::new("s3", RepositoryKind::S3, "s3://bucket/media").with_part_size(4),
        )
        .with_repository(RepositoryConfig::new(
            "vault",
            RepositoryKind::Glacier,
            "glacier://vault",
        ))
        .with_location_base("file:///ingest")
}

pub async fn start() -> Harness {
    start_with(OrchestratorConfig::default(), catalog_config(), Vec::new()).await
}

pub async fn start_with(
    config: OrchestratorConfig,
    catalog_config: CatalogConfig,
    listeners: Vec<Arc<dyn SubmitListener>>,
) -> Harness {
    let catalog = Arc::new(MemoryCatalog::new(&catalog_config));
    let resolver = Arc::new(BaseLocationResolver::new(&catalog_config).unwrap());
    let mut collaborators = Collaborators::new(catalog.clone(), resolver);
    for listener in listeners {
        collaborators = collaborators.with_submit_listener(listener);
    }
    let stores = Stores::memory();
    let orchestrator = start_orchestrator(config, stores.clone(), collaborators)
        .await
        .unwrap();
    Harness {
        orchestrator,
        catalog,
        stores,
    }
}

/// A remote worker driven step by step from the test.
pub struct FakeWorker {
    pub orchestrator: Orchestrator,
    pub worker: Worker,
}

impl FakeWorker {
    pub async fn register(orchestrator: &Orchestrator, name: &str, slots: u32) -> Self {
        let capacities = TaskType::ALL
            .iter()
            .map(|t| Capacity::new(*t, slots))
            .collect();
        let worker = orchestrator
            .register_worker(Worker::new(name, capacities))
            .await
            .unwrap();
        Self {
            orchestrator: orchestrator.clone(),
            worker,
        }
    }

    pub async fn poll(&self) -> Vec<Task> {
        self.orchestrator
            .next_tasks(self.worker.id, self.worker.capacities.clone())
            .await
            .unwrap()
    }

    pub async fn report(&self, task: &Task, update: TaskStatusUpdate) {
        self.orchestrator
            .report_task_status(task.id, update)
            .await
            .unwrap();
    }

    /// Poll and answer tasks with `respond` until the job leaves the active
    /// statuses. Returns the job and every task the worker saw.
    pub async fn drive<F>(&self, job_id: JobId, mut respond: F) -> (Job, Vec<Task>)
    where
        F: FnMut(&Task) -> TaskStatusUpdate,
    {
        let mut seen = Vec::new();
        for _ in 0..500 {
            for task in self.poll().await {
                let update = respond(&task);
                self.report(&task, update).await;
                seen.push(task);
            }
            let job = self.orchestrator.get_job(job_id).await.unwrap();
            if !job.status.is_active() {
                return (job, seen);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", job_id);
    }
}

/// Wait until a job reaches `status`.
pub async fn wait_for_status(orchestrator: &Orchestrator, job_id: JobId, status: JobStatus) -> Job {
    for _ in 0..500 {
        let job = orchestrator.get_job(job_id).await.unwrap();
        if job.status == status {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached {}", job_id, status);
}

/// What a healthy worker reports for a task.
pub fn succeed(task: &Task) -> TaskStatusUpdate {
    TaskStatusUpdate::completed(output_for(task))
}

pub fn output_for(task: &Task) -> TaskOutput {
    match &task.configuration {
        TaskConfiguration::Transfer { group }
        | TaskConfiguration::S3Upload { group }
        | TaskConfiguration::GlacierUpload { group } => TaskOutput::Transfer {
            files: group
                .files
                .iter()
                .map(|file| TransferredFile {
                    transfer_file_id: file.id,
                    size: Some(file.size.unwrap_or(UNKNOWN_SIZE)),
                    output_hashes: Vec::new(),
                    archive_id: matches!(task.task_type(), TaskType::GlacierUpload)
                        .then(|| format!("archive-{}", file.relative_path)),
                })
                .collect(),
        },
        TaskConfiguration::Hash {
            algorithms,
            part_size,
            ranges,
            ..
        } => {
            let ranges = if ranges.is_empty() {
                byte_ranges(UNKNOWN_SIZE, *part_size).unwrap()
            } else {
                ranges.clone()
            };
            TaskOutput::Hash {
                hashes: ranges
                    .iter()
                    .flat_map(|range| {
                        algorithms.iter().map(move |algorithm| {
                            Hash::for_range(
                                *algorithm,
                                format!("{}-{}", algorithm, range.offset),
                                range.offset,
                                range.length,
                            )
                        })
                    })
                    .collect(),
            }
        }
        TaskConfiguration::Restore { source_uri, .. } => TaskOutput::Restore {
            restored_uri: format!("{}.restored", source_uri),
        },
        TaskConfiguration::ManifestTransfer { .. } => {
            TaskOutput::ManifestTransfer(ManifestParseOutput {
                size: Some(UNKNOWN_SIZE),
                files: vec!["seg0.ts".into()],
                ..Default::default()
            })
        }
        TaskConfiguration::Delete { .. } => TaskOutput::Delete,
    }
}
