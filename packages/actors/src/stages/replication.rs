use async_trait::async_trait;
use transfer_core::{
    JobConfiguration, PipelineContext, Result, StageKind, StageResult, Transfer,
    TransferFileGroup,
};

use super::{
    PipelineStage, StageEnv, load_repositories, no_source_files, placeholder_file, select_source,
    unexpected_configuration,
};

/// Copies the files of a variant between repositories, creating placeholders
/// in every destination.
pub struct ReplicationPrepareStage;

#[async_trait]
impl PipelineStage for ReplicationPrepareStage {
    fn kind(&self) -> StageKind {
        StageKind::ReplicationPrepare
    }

    async fn prepare(&self, env: &StageEnv, context: &mut PipelineContext) -> Result<StageResult> {
        let JobConfiguration::Replication(config) = &context.configuration else {
            return Err(unexpected_configuration(context, self.kind()));
        };
        let config = config.clone();

        let Some((source, files)) =
            select_source(env, &context.variant_id, &config.source_repository_ids).await?
        else {
            return Ok(no_source_files(
                &context.variant_id,
                &config.source_repository_ids,
            ));
        };
        let destinations = load_repositories(env, &config.destination_repository_ids).await?;
        context.destination_repositories = destinations.clone();

        let mut groups = Vec::with_capacity(destinations.len());
        for repository in &destinations {
            let mut planned = Vec::with_capacity(files.len());
            for file in &files {
                let transfer_file =
                    placeholder_file(env, context, repository, &file.uri, &file.relative_path)
                        .await?;
                planned.push(
                    transfer_file
                        .with_size(file.size)
                        .with_source_hashes(file.hashes.clone())
                        .with_archive_id(file.archive_id.clone()),
                );
            }
            groups.push(TransferFileGroup::new(
                Some(format!("Replicate to {}", repository.name)),
                planned,
            ));
        }

        let mut additional = Vec::new();
        if source.requires_restore() {
            additional.push(StageKind::Restore);
        }
        if destinations.iter().any(|r| r.requires_multipart()) {
            additional.push(StageKind::MultipartPrepare);
        }

        let message = format!(
            "Replicating {} files from {} to {} repositories",
            files.len(),
            source.name,
            destinations.len()
        );
        context.transfer = Some(Transfer::new(groups));
        context.source_repository = Some(source);
        Ok(StageResult::completed()
            .with_message(message)
            .with_additional_stages(additional))
    }
}
