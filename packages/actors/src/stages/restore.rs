use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use transfer_core::{
    FailureKind, PipelineContext, PlannedTask, PlannedTaskGroup, Result, StageKind, StageResult,
    Task, TaskConfiguration, TaskGroup, TaskOutput, TaskStatus,
};

use super::{
    PipelineStage, StageEnv, completed_output, follow_group, group_failure_message,
    unexpected_output,
};

/// Brings archived sources back online. Every distinct source URI is
/// restored once; on completion the transfer reads from the restored copy.
pub struct RestoreStage;

#[async_trait]
impl PipelineStage for RestoreStage {
    fn kind(&self) -> StageKind {
        StageKind::Restore
    }

    async fn prepare(&self, _env: &StageEnv, context: &mut PipelineContext) -> Result<StageResult> {
        let source = context.source_repository()?.clone();
        let mut seen = BTreeSet::new();
        let tasks: Vec<PlannedTask> = context
            .transfer()?
            .files()
            .filter(|file| seen.insert(file.source_uri.clone()))
            .map(|file| {
                PlannedTask::new(
                    format!("Restore {}", file.relative_path),
                    TaskConfiguration::Restore {
                        transfer_file_id: file.id,
                        source_uri: file.source_uri.clone(),
                        archive_id: file.archive_id.clone(),
                        repository_id: source.id.clone(),
                    },
                )
            })
            .collect();

        if tasks.is_empty() {
            return Ok(StageResult::completed());
        }
        let message = format!("Restoring {} files from {}", tasks.len(), source.name);
        Ok(StageResult::queued(vec![PlannedTaskGroup::new(tasks)]).with_message(message))
    }

    async fn on_callback(
        &self,
        _env: &StageEnv,
        context: &mut PipelineContext,
        group: &TaskGroup,
        tasks: &[Task],
    ) -> Result<StageResult> {
        match group.status {
            TaskStatus::Completed => {}
            // nothing was written yet, so a failed restore never needs cleanup
            status if status.is_failed() => {
                return Ok(StageResult::failed(
                    FailureKind::Clean,
                    group_failure_message(group, tasks),
                ));
            }
            _ => return Ok(follow_group(group, tasks)),
        }

        let mut restored = BTreeMap::new();
        for task in tasks {
            let TaskConfiguration::Restore { source_uri, .. } = &task.configuration else {
                continue;
            };
            let TaskOutput::Restore { restored_uri } = completed_output(task)? else {
                return Err(unexpected_output(task));
            };
            restored.insert(source_uri.clone(), restored_uri.clone());
        }

        for file in context.transfer_mut()?.files_mut() {
            if let Some(uri) = restored.get(&file.source_uri) {
                file.source_uri = uri.clone();
            }
        }
        Ok(StageResult::completed().with_message(format!("Restored {} files", restored.len())))
    }
}
