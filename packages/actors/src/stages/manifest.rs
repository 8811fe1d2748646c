use async_trait::async_trait;
use transfer_core::{
    FailureKind, OrchestrationError, PipelineContext, PlannedTask, PlannedTaskGroup, Result,
    StageKind, StageResult, StageStatus, Task, TaskConfiguration, TaskGroup, TaskOutput,
    TaskStatus, Transfer, TransferFileGroup,
};

use super::{
    PipelineStage, StageEnv, completed_output, follow_group, placeholder_file, unexpected_output,
};

/// Expands manifests level by level until only terminal files remain, then
/// adds their files to the transfer.
///
/// Every level is one task group of MANIFEST_TRANSFER tasks. The number of
/// levels is bounded by `max_manifest_depth`.
pub struct ManifestParsingStage;

impl ManifestParsingStage {
    fn plan_level(env: &StageEnv, context: &mut PipelineContext) -> Result<StageResult> {
        let max_depth = env.config.max_manifest_depth;
        if context.manifest_depth >= max_depth {
            return Ok(StageResult::failed(
                FailureKind::Clean,
                format!("Manifest nesting exceeds {} levels", max_depth),
            ));
        }

        let manifests = context.manifest_transfer_mut()?;
        let manifest_type = manifests.manifest_type;
        let tasks: Vec<PlannedTask> = manifests
            .pending()
            .into_iter()
            .map(|manifest| {
                PlannedTask::new(
                    format!("Parse {}", manifest.relative_path),
                    TaskConfiguration::ManifestTransfer {
                        manifest_file_id: manifest.id,
                        source_uri: manifest.source_uri.clone(),
                        manifest_type,
                    },
                )
            })
            .collect();

        context.manifest_depth += 1;
        Ok(StageResult::queued(vec![PlannedTaskGroup::new(tasks.clone())]).with_message(format!(
            "Parsing {} manifests at level {}",
            tasks.len(),
            context.manifest_depth
        )))
    }

    /// Add manifest files and the manifests themselves to the transfer, once
    /// per destination repository.
    async fn flatten(env: &StageEnv, context: &mut PipelineContext) -> Result<StageResult> {
        let manifests = context.manifest_transfer.clone().ok_or_else(|| {
            OrchestrationError::runtime("Pipeline context is missing the manifest transfer")
        })?;
        let repositories = context.destination_repositories.clone();

        let mut groups = Vec::new();
        for repository in &repositories {
            let base = repository.uri_for(context.variant_id.as_str());
            let planned = manifests.to_transfer(&base)?;
            for group in planned.groups {
                let mut files = Vec::with_capacity(group.files.len());
                for file in group.files {
                    files.push(
                        placeholder_file(
                            env,
                            context,
                            repository,
                            &file.source_uri,
                            &file.relative_path,
                        )
                        .await?,
                    );
                }
                groups.push(TransferFileGroup::new(group.description, files));
            }

            let mut files = Vec::new();
            for manifest in manifests.manifests() {
                let file = placeholder_file(
                    env,
                    context,
                    repository,
                    &manifest.source_uri,
                    &manifest.relative_path,
                )
                .await?;
                files.push(
                    file.with_size(manifest.size)
                        .with_source_hashes(manifest.output_hashes.clone()),
                );
            }
            groups.push(TransferFileGroup::new(
                Some(format!("{} manifests", manifests.manifest_type)),
                files,
            ));
        }

        let expanded = Transfer::new(groups);
        let message = format!(
            "Expanded {} manifests into {} files",
            manifests.manifests().len(),
            expanded.file_count()
        );
        context
            .transfer
            .get_or_insert_with(Transfer::default)
            .extend(expanded);
        Ok(StageResult::completed().with_message(message))
    }
}

#[async_trait]
impl PipelineStage for ManifestParsingStage {
    fn kind(&self) -> StageKind {
        StageKind::ManifestParsing
    }

    async fn prepare(&self, env: &StageEnv, context: &mut PipelineContext) -> Result<StageResult> {
        if context.manifest_transfer_mut()?.pending().is_empty() {
            return Self::flatten(env, context).await;
        }
        Self::plan_level(env, context)
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

        let manifests = context.manifest_transfer_mut()?;
        let mut added = 0;
        for task in tasks {
            let TaskConfiguration::ManifestTransfer {
                manifest_file_id, ..
            } = &task.configuration
            else {
                continue;
            };
            let TaskOutput::ManifestTransfer(output) = completed_output(task)? else {
                return Err(unexpected_output(task));
            };
            added += manifests.apply_parse_output(*manifest_file_id, output.clone())?;
        }

        if manifests.pending().is_empty() {
            return Self::flatten(env, context).await;
        }

        let next = Self::plan_level(env, context)?;
        if next.status != StageStatus::Queued {
            return Ok(next);
        }
        Ok(StageResult {
            status: StageStatus::Executing,
            ..next.with_message(format!("Found {} child manifests", added))
        })
    }
}

#[cfg(test)]
mod tests {
    use transfer_core::{
        IngestConfiguration, IngestFile, JobConfiguration, ManifestType, RepositoryId,
        TaskStatusUpdate, VariantId,
        manifest::{ChildManifest, ManifestParseOutput},
    };

    use super::*;
    use crate::stages::test_support::{context, env};
    use crate::stages::{IngestPrepareStage, PipelineStage};

    fn manifest_job() -> JobConfiguration {
        JobConfiguration::Ingest(IngestConfiguration {
            variant_id: VariantId::from("v1"),
            repository_ids: vec![RepositoryId::from("fs")],
            files: vec![IngestFile::new("pkg/master.m3u8").as_manifest(ManifestType::Hls)],
        })
    }

    /// Complete every planned task of a level with the output `parse` gives.
    fn run_level<F>(
        context: &PipelineContext,
        result: &StageResult,
        parse: F,
    ) -> (TaskGroup, Vec<Task>)
    where
        F: Fn(&str) -> ManifestParseOutput,
    {
        let mut group = TaskGroup::new(
            context.job_id,
            transfer_core::PipelineId::new(),
            StageKind::ManifestParsing,
        );
        group.status = TaskStatus::Completed;
        let tasks = result.task_groups[0]
            .tasks
            .iter()
            .map(|planned| {
                let mut task = Task::new(
                    context.job_id,
                    group.id,
                    0,
                    planned.description.clone(),
                    planned.configuration.clone(),
                );
                let TaskConfiguration::ManifestTransfer { source_uri, .. } = &planned.configuration
                else {
                    panic!("expected a manifest task");
                };
                task.finish(TaskStatusUpdate::completed(TaskOutput::ManifestTransfer(parse(
                    source_uri,
                ))));
                task
            })
            .collect();
        (group, tasks)
    }

    fn renditions(uri: &str) -> ManifestParseOutput {
        if uri.ends_with("master.m3u8") {
            ManifestParseOutput {
                child_manifests: vec![
                    ChildManifest {
                        uri: "low/index.m3u8".into(),
                        description: Some("low".into()),
                    },
                    ChildManifest {
                        uri: "high/index.m3u8".into(),
                        description: Some("high".into()),
                    },
                ],
                ..Default::default()
            }
        } else {
            ManifestParseOutput {
                size: Some(120),
                files: vec!["seg0.ts".into(), "seg1.ts".into()],
                ..Default::default()
            }
        }
    }

    #[tokio::test]
    async fn expands_two_levels_into_transfer_groups() -> Result<()> {
        let (env, _) = env();
        let mut context = context(manifest_job());
        IngestPrepareStage.prepare(&env, &mut context).await?;

        let level = ManifestParsingStage.prepare(&env, &mut context).await?;
        assert_eq!(level.status, StageStatus::Queued);
        assert_eq!(level.task_groups[0].tasks.len(), 1);

        let (group, tasks) = run_level(&context, &level, renditions);
        let level = ManifestParsingStage
            .on_callback(&env, &mut context, &group, &tasks)
            .await?;
        assert_eq!(level.status, StageStatus::Executing);
        assert_eq!(level.task_groups[0].tasks.len(), 2);
        assert_eq!(context.manifest_depth, 2);

        let (group, tasks) = run_level(&context, &level, renditions);
        let done = ManifestParsingStage
            .on_callback(&env, &mut context, &group, &tasks)
            .await?;
        assert_eq!(done.status, StageStatus::Completed);

        let transfer = context.transfer()?;
        // two renditions plus the manifests group
        assert_eq!(transfer.groups.len(), 3);
        assert_eq!(transfer.file_count(), 7);
        let segment = &transfer.groups[0].files[0];
        assert_eq!(segment.source_uri, "file:///ingest/pkg/low/seg0.ts");
        assert_eq!(segment.destination_uri, "file:///srv/media/v1/low/seg0.ts");
        assert!(transfer.groups[2]
            .files
            .iter()
            .any(|f| f.relative_path == "master.m3u8"));
        Ok(())
    }

    #[tokio::test]
    async fn nesting_beyond_the_limit_fails_clean() -> Result<()> {
        let (mut env, _) = env();
        env.config.max_manifest_depth = 1;
        let mut context = context(manifest_job());
        IngestPrepareStage.prepare(&env, &mut context).await?;

        let level = ManifestParsingStage.prepare(&env, &mut context).await?;
        let (group, tasks) = run_level(&context, &level, renditions);
        let result = ManifestParsingStage
            .on_callback(&env, &mut context, &group, &tasks)
            .await?;
        assert_eq!(result.status, StageStatus::Failed(FailureKind::Clean));
        Ok(())
    }

    #[tokio::test]
    async fn mixed_manifest_content_is_rejected() -> Result<()> {
        let (env, _) = env();
        let mut context = context(manifest_job());
        IngestPrepareStage.prepare(&env, &mut context).await?;

        let level = ManifestParsingStage.prepare(&env, &mut context).await?;
        let (group, tasks) = run_level(&context, &level, |_| ManifestParseOutput {
            child_manifests: vec![ChildManifest {
                uri: "low/index.m3u8".into(),
                description: None,
            }],
            files: vec!["seg0.ts".into()],
            ..Default::default()
        });
        assert!(ManifestParsingStage
            .on_callback(&env, &mut context, &group, &tasks)
            .await
            .is_err());
        assert_eq!(context.manifest_transfer.as_ref().unwrap().pending().len(), 1);
        Ok(())
    }
}
