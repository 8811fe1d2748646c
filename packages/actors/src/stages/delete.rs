use async_trait::async_trait;
use transfer_core::{
    JobConfiguration, OrchestrationError, PipelineContext, PlannedTask, PlannedTaskGroup, Result,
    StageKind, StageResult, Task, TaskConfiguration, TaskGroup, TaskStatus,
};

use super::{PipelineStage, StageEnv, follow_group, load_repositories, unexpected_configuration};

/// Removes a variant's files from repositories, one task per file, and drops
/// the catalog entries once the files are gone.
pub struct DeleteStage;

#[async_trait]
impl PipelineStage for DeleteStage {
    fn kind(&self) -> StageKind {
        StageKind::Delete
    }

    async fn prepare(&self, env: &StageEnv, context: &mut PipelineContext) -> Result<StageResult> {
        let JobConfiguration::Delete(config) = &context.configuration else {
            return Err(unexpected_configuration(context, self.kind()));
        };
        let config = config.clone();
        context.destination_repositories = load_repositories(env, &config.repository_ids).await?;

        let mut tasks = Vec::new();
        for repository in &context.destination_repositories {
            for file in env
                .content
                .repository_files(&context.variant_id, &repository.id)
                .await?
            {
                tasks.push(PlannedTask::new(
                    format!("Delete {} from {}", file.relative_path, repository.name),
                    TaskConfiguration::Delete {
                        repository_file_id: file.id,
                        repository_id: repository.id.clone(),
                        uri: file.uri,
                    },
                ));
            }
        }

        if tasks.is_empty() {
            return Ok(StageResult::completed().with_message(format!(
                "Variant {} has no files to delete",
                context.variant_id
            )));
        }
        let message = format!("Deleting {} files", tasks.len());
        Ok(StageResult::queued(vec![PlannedTaskGroup::new(tasks)]).with_message(message))
    }

    async fn on_callback(
        &self,
        env: &StageEnv,
        _context: &mut PipelineContext,
        group: &TaskGroup,
        tasks: &[Task],
    ) -> Result<StageResult> {
        if group.status != TaskStatus::Completed {
            return Ok(follow_group(group, tasks));
        }

        let mut removed = 0;
        for task in tasks {
            let TaskConfiguration::Delete {
                repository_file_id, ..
            } = &task.configuration
            else {
                continue;
            };
            match env.content.remove_repository_file(repository_file_id).await {
                Ok(()) => removed += 1,
                Err(OrchestrationError::NotFound(_)) => {
                    tracing::debug!(%repository_file_id, "Repository file already removed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(StageResult::completed().with_message(format!("Deleted {} files", removed)))
    }
}

#[cfg(test)]
mod tests {
    use transfer_core::{
        DeleteConfiguration, PipelineId, RepositoryId, StageStatus, TaskOutput, TaskStatusUpdate,
        VariantId,
    };

    use super::*;
    use crate::stages::test_support::{context, env};

    #[tokio::test]
    async fn deletes_files_and_catalog_entries() -> Result<()> {
        let (env, catalog) = env();
        let variant = VariantId::from("v1");
        catalog.add_file(&variant, &RepositoryId::from("fs"), "a.mp4", None)?;
        catalog.add_file(&variant, &RepositoryId::from("s3"), "a.mp4", None)?;

        let mut context = context(JobConfiguration::Delete(DeleteConfiguration {
            variant_id: variant.clone(),
            repository_ids: vec![RepositoryId::from("fs")],
        }));
        let result = DeleteStage.prepare(&env, &mut context).await?;
        let planned = &result.task_groups[0].tasks;
        assert_eq!(planned.len(), 1);

        let mut group = TaskGroup::new(context.job_id, PipelineId::new(), StageKind::Delete);
        group.status = TaskStatus::Completed;
        let mut task = Task::new(
            context.job_id,
            group.id,
            0,
            planned[0].description.clone(),
            planned[0].configuration.clone(),
        );
        task.finish(TaskStatusUpdate::completed(TaskOutput::Delete));

        let done = DeleteStage
            .on_callback(&env, &mut context, &group, &[task.clone()])
            .await?;
        assert_eq!(done.status, StageStatus::Completed);
        assert_eq!(catalog.files_for_variant(&variant).len(), 1);

        // a repeated report finds nothing left to remove
        DeleteStage
            .on_callback(&env, &mut context, &group, &[task])
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn nothing_to_delete_completes() -> Result<()> {
        let (env, _) = env();
        let mut context = context(JobConfiguration::Delete(DeleteConfiguration {
            variant_id: VariantId::from("v1"),
            repository_ids: vec![RepositoryId::from("fs")],
        }));
        let result = DeleteStage.prepare(&env, &mut context).await?;
        assert_eq!(result.status, StageStatus::Completed);
        Ok(())
    }
}
