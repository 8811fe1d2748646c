use async_trait::async_trait;
use transfer_core::{
    PipelineContext, PlannedTask, PlannedTaskGroup, RepositoryFile, RepositoryKind, Result,
    StageKind, StageResult, Task, TaskConfiguration, TaskGroup, TaskOutput, TaskStatus,
};

use super::{
    PipelineStage, StageEnv, completed_output, destination_kind, follow_group, unexpected_output,
};

/// Moves every transfer group with one task each and records what the
/// workers wrote back into the catalog.
pub struct TransferStage;

#[async_trait]
impl PipelineStage for TransferStage {
    fn kind(&self) -> StageKind {
        StageKind::Transfer
    }

    async fn prepare(&self, _env: &StageEnv, context: &mut PipelineContext) -> Result<StageResult> {
        let transfer = context.transfer()?;
        let mut tasks = Vec::with_capacity(transfer.groups.len());
        for group in transfer.groups.iter().filter(|g| !g.files.is_empty()) {
            let (kind, _) = destination_kind(context, &group.files[0])?;
            let description = group
                .description
                .clone()
                .unwrap_or_else(|| format!("Transfer {} files", group.files.len()));
            let group = group.clone();
            let configuration = match kind {
                RepositoryKind::Filesystem => TaskConfiguration::Transfer { group },
                RepositoryKind::S3 => TaskConfiguration::S3Upload { group },
                RepositoryKind::Glacier => TaskConfiguration::GlacierUpload { group },
            };
            tasks.push(PlannedTask::new(description, configuration));
        }

        if tasks.is_empty() {
            return Ok(StageResult::completed().with_message("Nothing to transfer"));
        }
        let message = format!(
            "Transferring {} files in {} groups",
            transfer.file_count(),
            tasks.len()
        );
        Ok(StageResult::queued(vec![PlannedTaskGroup::new(tasks)]).with_message(message))
    }

    async fn on_callback(
        &self,
        env: &StageEnv,
        context: &mut PipelineContext,
        group: &TaskGroup,
        tasks: &[Task],
    ) -> Result<StageResult> {
        if group.status != TaskStatus::Completed {
            return Ok(follow_group(group, tasks));
        }

        let transfer = context.transfer_mut()?;
        for task in tasks {
            let TaskOutput::Transfer { files } = completed_output(task)? else {
                return Err(unexpected_output(task));
            };
            for reported in files {
                let Some(file) = transfer.file_mut(reported.transfer_file_id) else {
                    tracing::warn!(
                        task_id = %task.id,
                        transfer_file_id = %reported.transfer_file_id,
                        "Ignoring output for unknown transfer file"
                    );
                    continue;
                };
                if reported.size.is_some() {
                    file.size = reported.size;
                }
                file.output_hashes = reported.output_hashes.clone();
                if reported.archive_id.is_some() {
                    file.archive_id = reported.archive_id.clone();
                }
            }
        }

        let mut recorded = 0;
        for file in context.transfer()?.files() {
            let (Some(id), Some(repository_id)) =
                (&file.repository_file_id, &file.destination_repository_id)
            else {
                continue;
            };
            let hashes = if file.output_hashes.is_empty() {
                file.source_hashes.clone()
            } else {
                file.output_hashes.clone()
            };
            env.content
                .update_repository_file(RepositoryFile {
                    id: id.clone(),
                    variant_id: context.variant_id.clone(),
                    repository_id: repository_id.clone(),
                    relative_path: file.relative_path.clone(),
                    uri: file.destination_uri.clone(),
                    size: file.size,
                    hashes,
                    archive_id: file.archive_id.clone(),
                })
                .await?;
            recorded += 1;
        }

        Ok(StageResult::completed().with_message(format!(
            "Transferred {} files, {} recorded in repositories",
            context.transfer()?.file_count(),
            recorded
        )))
    }
}

#[cfg(test)]
mod tests {
    use transfer_core::{
        FailureKind, IngestConfiguration, IngestFile, JobConfiguration, PipelineId, RepositoryId,
        StageStatus, TaskStatusUpdate, TransferredFile, VariantId,
    };

    use super::*;
    use crate::stages::test_support::{context, env};
    use crate::stages::{IngestPrepareStage, PipelineStage};

    #[tokio::test]
    async fn one_task_per_group_by_destination_kind() -> Result<()> {
        let (env, catalog) = env();
        let mut context = context(JobConfiguration::Ingest(IngestConfiguration {
            variant_id: VariantId::from("v1"),
            repository_ids: vec![RepositoryId::from("fs"), RepositoryId::from("s3")],
            files: vec![IngestFile::new("pkg/a.mp4"), IngestFile::new("pkg/b.mp4")],
        }));
        IngestPrepareStage.prepare(&env, &mut context).await?;

        let result = TransferStage.prepare(&env, &mut context).await?;
        let planned = &result.task_groups[0].tasks;
        assert_eq!(planned.len(), 2);
        assert!(matches!(planned[0].configuration, TaskConfiguration::Transfer { .. }));
        assert!(matches!(planned[1].configuration, TaskConfiguration::S3Upload { .. }));

        let mut group = TaskGroup::new(context.job_id, PipelineId::new(), StageKind::Transfer);
        group.status = TaskStatus::Completed;
        let tasks: Vec<Task> = planned
            .iter()
            .map(|p| {
                let files = p
                    .configuration
                    .transfer_group()
                    .unwrap()
                    .files
                    .iter()
                    .map(|f| TransferredFile {
                        transfer_file_id: f.id,
                        size: Some(42),
                        output_hashes: Vec::new(),
                        archive_id: None,
                    })
                    .collect();
                let mut task = Task::new(
                    context.job_id,
                    group.id,
                    0,
                    p.description.clone(),
                    p.configuration.clone(),
                );
                task.finish(TaskStatusUpdate::completed(TaskOutput::Transfer { files }));
                task
            })
            .collect();

        let done = TransferStage
            .on_callback(&env, &mut context, &group, &tasks)
            .await?;
        assert_eq!(done.status, StageStatus::Completed);
        let files = catalog.files_for_variant(&VariantId::from("v1"));
        assert_eq!(files.len(), 4);
        assert!(files.iter().all(|f| f.size == Some(42)));
        Ok(())
    }

    #[tokio::test]
    async fn dirty_group_fails_dirty() -> Result<()> {
        let (env, _) = env();
        let mut context = context(JobConfiguration::Ingest(IngestConfiguration {
            variant_id: VariantId::from("v1"),
            repository_ids: vec![RepositoryId::from("fs")],
            files: vec![IngestFile::new("pkg/a.mp4")],
        }));
        let mut group = TaskGroup::new(context.job_id, PipelineId::new(), StageKind::Transfer);
        group.status = TaskStatus::FailedDirty;
        let result = TransferStage
            .on_callback(&env, &mut context, &group, &[])
            .await?;
        assert_eq!(result.status, StageStatus::Failed(FailureKind::Dirty));
        Ok(())
    }
}
