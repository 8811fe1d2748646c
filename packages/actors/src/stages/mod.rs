//! Pipeline stages.
//!
//! A stage plans task groups in `prepare` and folds their results back into
//! the pipeline context in `on_callback`. Stages are stateless; everything
//! they know lives in the persisted [`PipelineContext`].

mod delete;
mod export;
mod failure;
mod ingest;
mod manifest;
mod multipart;
mod replication;
mod restore;
mod transfer;

use std::sync::Arc;

use async_trait::async_trait;
use transfer_core::{
    ContentManager, FailureKind, LocationResolver, OrchestrationError, PipelineContext,
    RepositoryDescriptor, RepositoryFile, RepositoryId, RepositoryKind, Result, StageKind,
    StageResult, Task, TaskGroup, TaskOutput, TaskStatus, TransferFile, VariantId,
};

use crate::config::OrchestratorConfig;

pub use delete::DeleteStage;
pub use export::ExportPrepareStage;
pub use failure::FailureStage;
pub use ingest::IngestPrepareStage;
pub use manifest::ManifestParsingStage;
pub use multipart::MultipartPrepareStage;
pub use replication::ReplicationPrepareStage;
pub use restore::RestoreStage;
pub use transfer::TransferStage;

/// Collaborators available to stages.
#[derive(Clone)]
pub struct StageEnv {
    pub content: Arc<dyn ContentManager>,
    pub resolver: Arc<dyn LocationResolver>,
    pub config: OrchestratorConfig,
}

impl std::fmt::Debug for StageEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageEnv")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Plan work for this stage.
    async fn prepare(&self, env: &StageEnv, context: &mut PipelineContext) -> Result<StageResult>;

    /// React to a status change of one of this stage's task groups.
    async fn on_callback(
        &self,
        _env: &StageEnv,
        _context: &mut PipelineContext,
        group: &TaskGroup,
        tasks: &[Task],
    ) -> Result<StageResult> {
        Ok(follow_group(group, tasks))
    }
}

static INGEST_PREPARE: IngestPrepareStage = IngestPrepareStage;
static EXPORT_PREPARE: ExportPrepareStage = ExportPrepareStage;
static REPLICATION_PREPARE: ReplicationPrepareStage = ReplicationPrepareStage;
static MANIFEST_PARSING: ManifestParsingStage = ManifestParsingStage;
static RESTORE: RestoreStage = RestoreStage;
static MULTIPART_PREPARE: MultipartPrepareStage = MultipartPrepareStage;
static TRANSFER: TransferStage = TransferStage;
static DELETE: DeleteStage = DeleteStage;

pub fn stage_for(kind: StageKind) -> &'static dyn PipelineStage {
    match kind {
        StageKind::IngestPrepare => &INGEST_PREPARE,
        StageKind::ExportPrepare => &EXPORT_PREPARE,
        StageKind::ReplicationPrepare => &REPLICATION_PREPARE,
        StageKind::ManifestParsing => &MANIFEST_PARSING,
        StageKind::Restore => &RESTORE,
        StageKind::MultipartPrepare => &MULTIPART_PREPARE,
        StageKind::Transfer => &TRANSFER,
        StageKind::Delete => &DELETE,
    }
}

/// Map a group status straight onto the stage status.
pub(crate) fn follow_group(group: &TaskGroup, tasks: &[Task]) -> StageResult {
    match failure_kind(group.status) {
        Some(kind) => StageResult::failed(kind, group_failure_message(group, tasks)),
        None if group.status == TaskStatus::Completed => StageResult::completed(),
        None => StageResult::executing(),
    }
}

pub(crate) fn failure_kind(status: TaskStatus) -> Option<FailureKind> {
    match status {
        TaskStatus::FailedDirty => Some(FailureKind::Dirty),
        TaskStatus::FailedClean => Some(FailureKind::Clean),
        _ => None,
    }
}

pub(crate) fn group_failure_message(group: &TaskGroup, tasks: &[Task]) -> String {
    let reasons: Vec<String> = tasks
        .iter()
        .filter(|t| t.status.is_failed())
        .map(|t| match &t.message {
            Some(message) => format!("{}: {}", t.description, message),
            None => t.description.clone(),
        })
        .collect();
    if reasons.is_empty() {
        format!("{} tasks failed", group.stage)
    } else {
        format!("{} tasks failed: {}", group.stage, reasons.join("; "))
    }
}

pub(crate) fn completed_output(task: &Task) -> Result<&TaskOutput> {
    task.output.as_ref().ok_or_else(|| {
        OrchestrationError::runtime(format!("Task {} completed without output", task.id))
    })
}

pub(crate) fn unexpected_output(task: &Task) -> OrchestrationError {
    OrchestrationError::runtime(format!(
        "Task {} reported output of the wrong type for {}",
        task.id,
        task.task_type()
    ))
}

pub(crate) fn unexpected_configuration(
    context: &PipelineContext,
    stage: StageKind,
) -> OrchestrationError {
    OrchestrationError::runtime(format!(
        "Stage {} can not run for a {} job",
        stage,
        context.configuration.job_type()
    ))
}

pub(crate) async fn load_repositories(
    env: &StageEnv,
    ids: &[RepositoryId],
) -> Result<Vec<RepositoryDescriptor>> {
    let mut repositories = Vec::with_capacity(ids.len());
    for id in ids {
        repositories.push(env.content.repository(id).await?);
    }
    Ok(repositories)
}

/// First candidate repository that holds files of the variant.
pub(crate) async fn select_source(
    env: &StageEnv,
    variant_id: &VariantId,
    candidates: &[RepositoryId],
) -> Result<Option<(RepositoryDescriptor, Vec<RepositoryFile>)>> {
    for id in candidates {
        let files = env.content.repository_files(variant_id, id).await?;
        if !files.is_empty() {
            return Ok(Some((env.content.repository(id).await?, files)));
        }
    }
    Ok(None)
}

pub(crate) fn no_source_files(variant_id: &VariantId, candidates: &[RepositoryId]) -> StageResult {
    let names: Vec<&str> = candidates.iter().map(RepositoryId::as_str).collect();
    StageResult::failed(
        FailureKind::Clean,
        format!(
            "Variant {} has no files in repositories [{}]",
            variant_id,
            names.join(", ")
        ),
    )
}

/// Create (or reuse) the destination placeholder for one file and remember
/// it for cleanup.
pub(crate) async fn placeholder_file(
    env: &StageEnv,
    context: &mut PipelineContext,
    repository: &RepositoryDescriptor,
    source_uri: &str,
    relative_path: &str,
) -> Result<TransferFile> {
    let placeholder = env
        .content
        .create_repository_file(&context.variant_id, &repository.id, relative_path)
        .await?;
    if !context.created_repository_files.contains(&placeholder.id) {
        context.created_repository_files.push(placeholder.id.clone());
    }
    Ok(
        TransferFile::new(source_uri, placeholder.uri, placeholder.relative_path)
            .with_destination_repository(repository.id.clone())
            .with_repository_file(placeholder.id),
    )
}

/// Backend and configured part size behind a file's destination.
pub(crate) fn destination_kind(
    context: &PipelineContext,
    file: &TransferFile,
) -> Result<(RepositoryKind, Option<u64>)> {
    if let Some(id) = &file.destination_repository_id {
        let repository = context.destination_repository(id).ok_or_else(|| {
            OrchestrationError::runtime(format!(
                "Repository {} is not a destination of this pipeline",
                id
            ))
        })?;
        return Ok((repository.kind, repository.part_size));
    }
    if let Some(location) = context
        .destination_locations
        .iter()
        .find(|l| file.destination_uri.starts_with(l.uri.trim_end_matches('/')))
    {
        return Ok((location.kind, None));
    }
    let url = url::Url::parse(&file.destination_uri).map_err(|e| {
        OrchestrationError::runtime(format!(
            "Invalid destination {}: {}",
            file.destination_uri, e
        ))
    })?;
    RepositoryKind::from_scheme(url.scheme())
        .map(|kind| (kind, None))
        .ok_or_else(|| {
            OrchestrationError::runtime(format!(
                "Unsupported destination scheme in {}",
                file.destination_uri
            ))
        })
}

/// Last path segment of a URI.
pub(crate) fn file_name(uri: &str) -> Result<String> {
    url::Url::parse(uri)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            OrchestrationError::invalid(format!("Can not derive a file name from {}", uri))
        })
}
