use async_trait::async_trait;
use transfer_core::{
    FailureKind, OrchestrationError, PipelineContext, PlannedTask, PlannedTaskGroup, Result, StageKind,
    StageResult, Task, TaskConfiguration, TaskGroup, TaskOutput, TaskStatus, TransferItemId,
    multipart::{assemble_parts, byte_ranges},
};

use super::{
    PipelineStage, StageEnv, completed_output, destination_kind, follow_group,
    group_failure_message, unexpected_output,
};

/// Plans per-part hashes for files going to object and archival stores and
/// turns the reported hashes into upload parts.
pub struct MultipartPrepareStage;

#[async_trait]
impl PipelineStage for MultipartPrepareStage {
    fn kind(&self) -> StageKind {
        StageKind::MultipartPrepare
    }

    async fn prepare(&self, env: &StageEnv, context: &mut PipelineContext) -> Result<StageResult> {
        let mut part_sizes: Vec<(TransferItemId, u64)> = Vec::new();
        let mut tasks = Vec::new();
        for file in context.transfer()?.files() {
            let (kind, configured) = destination_kind(context, file)?;
            if !kind.requires_multipart() {
                continue;
            }
            let part_size = configured
                .filter(|size| *size > 0)
                .unwrap_or(env.config.default_part_size);
            // unknown sizes are split by the hashing worker
            let ranges = match file.size {
                Some(size) => byte_ranges(size, part_size)?,
                None => Vec::new(),
            };
            part_sizes.push((file.id, part_size));
            tasks.push(PlannedTask::new(
                format!("Hash {}", file.relative_path),
                TaskConfiguration::Hash {
                    transfer_file_id: file.id,
                    source_uri: file.source_uri.clone(),
                    algorithms: kind.multipart_algorithms(),
                    part_size,
                    ranges,
                },
            ));
        }

        if tasks.is_empty() {
            return Ok(StageResult::completed());
        }
        let transfer = context.transfer_mut()?;
        for (id, part_size) in part_sizes {
            if let Some(file) = transfer.file_mut(id) {
                file.part_size = Some(part_size);
            }
        }
        let message = format!("Hashing parts of {} files", tasks.len());
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
            // hashing reads the source only, so nothing needs cleanup
            status if status.is_failed() => {
                return Ok(StageResult::failed(
                    FailureKind::Clean,
                    group_failure_message(group, tasks),
                ));
            }
            _ => return Ok(follow_group(group, tasks)),
        }

        let transfer = context.transfer_mut()?;
        for task in tasks {
            let TaskConfiguration::Hash {
                transfer_file_id,
                algorithms,
                ..
            } = &task.configuration
            else {
                continue;
            };
            let TaskOutput::Hash { hashes } = completed_output(task)? else {
                return Err(unexpected_output(task));
            };
            let [signing, part] = algorithms.as_slice() else {
                return Err(OrchestrationError::runtime(format!(
                    "Task {} needs a signing and a part hash algorithm",
                    task.id
                )));
            };
            let parts = assemble_parts(hashes, *signing, *part)?;
            let file = transfer.file_mut(*transfer_file_id).ok_or_else(|| {
                OrchestrationError::runtime(format!(
                    "Task {} refers to unknown transfer file {}",
                    task.id, transfer_file_id
                ))
            })?;
            if file.size.is_none() {
                file.size = Some(parts.iter().map(|p| p.length).sum());
            }
            file.parts = parts;
        }
        Ok(StageResult::completed())
    }
}

#[cfg(test)]
mod tests {
    use transfer_core::{
        FailureKind, Hash, HashAlgorithm, IngestConfiguration, IngestFile, JobConfiguration,
        PipelineId, RepositoryId, StageStatus, TaskStatusUpdate, VariantId,
    };

    use super::*;
    use crate::stages::test_support::{context, env};
    use crate::stages::{IngestPrepareStage, PipelineStage};

    async fn ingest_to_s3(size: u64) -> Result<(crate::stages::StageEnv, PipelineContext)> {
        let (env, _) = env();
        let mut context = context(JobConfiguration::Ingest(IngestConfiguration {
            variant_id: VariantId::from("v1"),
            repository_ids: vec![RepositoryId::from("fs"), RepositoryId::from("s3")],
            files: vec![IngestFile::new("pkg/a.mp4").with_size(size)],
        }));
        IngestPrepareStage.prepare(&env, &mut context).await?;
        Ok((env, context))
    }

    fn range_hashes(ranges: &[transfer_core::multipart::ByteRange]) -> Vec<Hash> {
        ranges
            .iter()
            .flat_map(|r| {
                let sha = format!("sha-{}", r.offset);
                let md5 = format!("md5-{}", r.offset);
                [
                    Hash::for_range(HashAlgorithm::Sha256, sha, r.offset, r.length),
                    Hash::for_range(HashAlgorithm::Md5, md5, r.offset, r.length),
                ]
            })
            .collect()
    }

    #[tokio::test]
    async fn hashes_only_multipart_destinations() -> Result<()> {
        // the s3 test repository uses 4 byte parts
        let (env, mut context) = ingest_to_s3(10).await?;
        let result = MultipartPrepareStage.prepare(&env, &mut context).await?;
        assert_eq!(result.status, StageStatus::Queued);
        let planned = &result.task_groups[0].tasks;
        assert_eq!(planned.len(), 1);

        let TaskConfiguration::Hash {
            ranges, part_size, ..
        } = &planned[0].configuration
        else {
            panic!("expected a hash task");
        };
        assert_eq!(*part_size, 4);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[2].length, 2);

        let mut group =
            TaskGroup::new(context.job_id, PipelineId::new(), StageKind::MultipartPrepare);
        group.status = TaskStatus::Completed;
        let mut task = Task::new(
            context.job_id,
            group.id,
            0,
            planned[0].description.clone(),
            planned[0].configuration.clone(),
        );
        task.finish(TaskStatusUpdate::completed(TaskOutput::Hash {
            hashes: range_hashes(ranges),
        }));

        let done = MultipartPrepareStage
            .on_callback(&env, &mut context, &group, &[task])
            .await?;
        assert_eq!(done.status, StageStatus::Completed);

        let transfer = context.transfer()?;
        let s3_file = &transfer.groups[1].files[0];
        assert_eq!(s3_file.part_size, Some(4));
        assert_eq!(s3_file.parts.len(), 3);
        assert_eq!(s3_file.parts[1].signing_hash, "sha-4");
        assert_eq!(s3_file.parts[1].part_hash, "md5-4");
        assert!(transfer.groups[0].files[0].parts.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_hashing_is_always_clean() -> Result<()> {
        let (env, mut context) = ingest_to_s3(10).await?;
        for status in [TaskStatus::FailedClean, TaskStatus::FailedDirty] {
            let mut group =
                TaskGroup::new(context.job_id, PipelineId::new(), StageKind::MultipartPrepare);
            group.status = status;
            let result = MultipartPrepareStage
                .on_callback(&env, &mut context, &group, &[])
                .await?;
            assert_eq!(
                result.status,
                StageStatus::Failed(FailureKind::Clean),
                "{status} hashing"
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn hashing_in_progress_keeps_waiting() -> Result<()> {
        let (env, mut context) = ingest_to_s3(10).await?;
        let mut group =
            TaskGroup::new(context.job_id, PipelineId::new(), StageKind::MultipartPrepare);
        group.status = TaskStatus::Executing;
        let result = MultipartPrepareStage
            .on_callback(&env, &mut context, &group, &[])
            .await?;
        assert_eq!(result.status, StageStatus::Executing);
        Ok(())
    }
}
