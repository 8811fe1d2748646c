//! Pipeline model: ordered stages, the persisted context they share and the
//! result protocol stages report back with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::{RepositoryDescriptor, RepositoryFileId, ResolvedLocation, VariantId};
use crate::error::{OrchestrationError, Result};
use crate::ids::ulid_id;
use crate::job::{Job, JobConfiguration, JobId, JobType};
use crate::manifest::ManifestTransfer;
use crate::task::TaskConfiguration;
use crate::task_group::TaskGroupId;
use crate::transfer::Transfer;

ulid_id!(
    /// Unique identifier for a pipeline run.
    PipelineId
);

/// The closed set of pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    IngestPrepare,
    ExportPrepare,
    ReplicationPrepare,
    ManifestParsing,
    Restore,
    MultipartPrepare,
    Transfer,
    Delete,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::IngestPrepare => "ingest_prepare",
            StageKind::ExportPrepare => "export_prepare",
            StageKind::ReplicationPrepare => "replication_prepare",
            StageKind::ManifestParsing => "manifest_parsing",
            StageKind::Restore => "restore",
            StageKind::MultipartPrepare => "multipart_prepare",
            StageKind::Transfer => "transfer",
            StageKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed stages of a job type. Optional stages are inserted at run time.
pub fn stages_for(job_type: JobType) -> Result<Vec<StageKind>> {
    match job_type {
        JobType::Ingest => Ok(vec![StageKind::IngestPrepare, StageKind::Transfer]),
        JobType::Export => Ok(vec![StageKind::ExportPrepare, StageKind::Transfer]),
        JobType::Replication => Ok(vec![StageKind::ReplicationPrepare, StageKind::Transfer]),
        JobType::Delete => Ok(vec![StageKind::Delete]),
        JobType::Transformation => Err(OrchestrationError::not_updateable(format!(
            "No pipeline is defined for job type {}",
            job_type
        ))),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    #[default]
    Queued,
    Executing,
    Completed,
    Failed,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStatus::Completed | PipelineStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStatus::Queued => "QUEUED",
            PipelineStatus::Executing => "EXECUTING",
            PipelineStatus::Completed => "COMPLETED",
            PipelineStatus::Failed => "FAILED",
        }
    }
}

/// Whether a failure may have left partial output behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Dirty,
    Clean,
}

/// Outcome of a stage step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Queued,
    Executing,
    Completed,
    Failed(FailureKind),
}

/// A task a stage wants created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask {
    pub description: String,
    pub configuration: TaskConfiguration,
}

impl PlannedTask {
    pub fn new(description: impl Into<String>, configuration: TaskConfiguration) -> Self {
        Self {
            description: description.into(),
            configuration,
        }
    }
}

/// Tasks that report back to the stage as one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlannedTaskGroup {
    pub tasks: Vec<PlannedTask>,
}

impl PlannedTaskGroup {
    pub fn new(tasks: Vec<PlannedTask>) -> Self {
        Self { tasks }
    }
}

/// What a stage reports from `prepare` or `on_callback`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub status: StageStatus,
    pub messages: Vec<String>,
    /// Stages to run right after the current one, in order.
    pub additional_stages: Vec<StageKind>,
    pub task_groups: Vec<PlannedTaskGroup>,
}

impl StageResult {
    fn with_status(status: StageStatus) -> Self {
        Self {
            status,
            messages: Vec::new(),
            additional_stages: Vec::new(),
            task_groups: Vec::new(),
        }
    }

    pub fn completed() -> Self {
        Self::with_status(StageStatus::Completed)
    }

    pub fn executing() -> Self {
        Self::with_status(StageStatus::Executing)
    }

    /// New task groups were created; the stage waits for them.
    pub fn queued(task_groups: Vec<PlannedTaskGroup>) -> Self {
        Self {
            task_groups,
            ..Self::with_status(StageStatus::Queued)
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::with_status(StageStatus::Failed(kind)).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_additional_stages(mut self, stages: Vec<StageKind>) -> Self {
        self.additional_stages = stages;
        self
    }
}

/// Typed state shared by the stages of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineContext {
    pub job_id: JobId,
    pub job_type: JobType,
    pub priority: i32,
    pub variant_id: VariantId,
    pub configuration: JobConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_repository: Option<RepositoryDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_repositories: Vec<RepositoryDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_locations: Vec<ResolvedLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer: Option<Transfer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_transfer: Option<ManifestTransfer>,
    /// Parse rounds completed so far.
    #[serde(default)]
    pub manifest_depth: usize,
    /// Placeholders created for this run, removed on dirty failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_repository_files: Vec<RepositoryFileId>,
}

impl PipelineContext {
    pub fn for_job(job: &Job) -> Result<Self> {
        let configuration = job
            .configuration
            .clone()
            .ok_or_else(|| OrchestrationError::invalid("Job configuration is required"))?;
        Ok(Self {
            job_id: job.id,
            job_type: job.job_type,
            priority: job.priority,
            variant_id: configuration.variant_id().clone(),
            configuration,
            source_repository: None,
            destination_repositories: Vec::new(),
            destination_locations: Vec::new(),
            transfer: None,
            manifest_transfer: None,
            manifest_depth: 0,
            created_repository_files: Vec::new(),
        })
    }

    pub fn transfer(&self) -> Result<&Transfer> {
        self.transfer
            .as_ref()
            .ok_or_else(|| missing_property("transfer"))
    }

    pub fn transfer_mut(&mut self) -> Result<&mut Transfer> {
        self.transfer
            .as_mut()
            .ok_or_else(|| missing_property("transfer"))
    }

    pub fn source_repository(&self) -> Result<&RepositoryDescriptor> {
        self.source_repository
            .as_ref()
            .ok_or_else(|| missing_property("source repository"))
    }

    pub fn manifest_transfer_mut(&mut self) -> Result<&mut ManifestTransfer> {
        self.manifest_transfer
            .as_mut()
            .ok_or_else(|| missing_property("manifest transfer"))
    }

    pub fn destination_repository(
        &self,
        id: &crate::content::RepositoryId,
    ) -> Option<&RepositoryDescriptor> {
        self.destination_repositories.iter().find(|r| &r.id == id)
    }
}

fn missing_property(name: &str) -> OrchestrationError {
    OrchestrationError::runtime(format!("Pipeline context is missing the {}", name))
}

/// One run of the stages for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub job_id: JobId,
    pub stages: Vec<StageKind>,
    pub current_stage: usize,
    pub status: PipelineStatus,
    /// Groups the current stage is waiting on.
    #[serde(default)]
    pub active_task_groups: Vec<TaskGroupId>,
    pub context: PipelineContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pipeline {
    pub fn new(context: PipelineContext, stages: Vec<StageKind>) -> Self {
        let now = Utc::now();
        Self {
            id: PipelineId::new(),
            job_id: context.job_id,
            stages,
            current_stage: 0,
            status: PipelineStatus::Queued,
            active_task_groups: Vec::new(),
            context,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self) -> Option<StageKind> {
        self.stages.get(self.current_stage).copied()
    }

    /// Insert stages to run directly after the current one.
    pub fn insert_after_current(&mut self, stages: &[StageKind]) {
        let at = (self.current_stage + 1).min(self.stages.len());
        self.stages.splice(at..at, stages.iter().copied());
    }

    /// Move to the next stage; `None` when the last one finished.
    pub fn advance(&mut self) -> Option<StageKind> {
        self.active_task_groups.clear();
        self.current_stage += 1;
        self.touch();
        self.stage()
    }

    pub fn is_active_group(&self, id: TaskGroupId) -> bool {
        self.active_task_groups.contains(&id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{IngestConfiguration, IngestFile, JobConfiguration};

    fn ingest_job() -> Job {
        Job::new(JobConfiguration::Ingest(IngestConfiguration {
            variant_id: VariantId::from("v1"),
            repository_ids: vec!["fs".into()],
            files: vec![IngestFile::new("file:///in/a.mp4")],
        }))
    }

    #[test]
    fn additional_stages_run_before_the_remaining_ones() {
        let context = PipelineContext::for_job(&ingest_job()).unwrap();
        let mut pipeline = Pipeline::new(context, stages_for(JobType::Ingest).unwrap());
        pipeline.insert_after_current(&[StageKind::ManifestParsing, StageKind::MultipartPrepare]);
        assert_eq!(
            pipeline.stages,
            vec![
                StageKind::IngestPrepare,
                StageKind::ManifestParsing,
                StageKind::MultipartPrepare,
                StageKind::Transfer
            ]
        );
        assert_eq!(pipeline.advance(), Some(StageKind::ManifestParsing));
        assert_eq!(pipeline.advance(), Some(StageKind::MultipartPrepare));
        assert_eq!(pipeline.advance(), Some(StageKind::Transfer));
        assert_eq!(pipeline.advance(), None);
    }

    #[test]
    fn transformation_has_no_pipeline() {
        assert!(matches!(
            stages_for(JobType::Transformation),
            Err(OrchestrationError::NotUpdateable(_))
        ));
        assert_eq!(stages_for(JobType::Delete).unwrap(), vec![StageKind::Delete]);
    }

    #[test]
    fn missing_context_property_is_a_runtime_error() {
        let context = PipelineContext::for_job(&ingest_job()).unwrap();
        assert!(matches!(context.transfer(), Err(OrchestrationError::Runtime(_))));
    }

    #[test]
    fn pipeline_round_trips() {
        let mut context = PipelineContext::for_job(&ingest_job()).unwrap();
        context.transfer = Some(Transfer::default());
        let pipeline = Pipeline::new(context, vec![StageKind::Transfer]);
        let json = serde_json::to_string(&pipeline).unwrap();
        let back: Pipeline = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pipeline);
    }
}
