use async_trait::async_trait;
use transfer_core::{
    IngestFile, JobConfiguration, ManifestTransfer, OrchestrationError, PipelineContext, Result,
    StageKind, StageResult, Transfer, TransferFileGroup,
};

use super::{
    PipelineStage, StageEnv, file_name, load_repositories, placeholder_file,
    unexpected_configuration,
};

/// Resolves ingest sources and plans one transfer group per destination
/// repository. Manifests are handed to manifest parsing.
pub struct IngestPrepareStage;

#[async_trait]
impl PipelineStage for IngestPrepareStage {
    fn kind(&self) -> StageKind {
        StageKind::IngestPrepare
    }

    async fn prepare(&self, env: &StageEnv, context: &mut PipelineContext) -> Result<StageResult> {
        let JobConfiguration::Ingest(config) = &context.configuration else {
            return Err(unexpected_configuration(context, self.kind()));
        };
        let config = config.clone();
        context.destination_repositories = load_repositories(env, &config.repository_ids).await?;

        let mut manifests = Vec::new();
        let mut plain: Vec<(&IngestFile, String)> = Vec::new();
        for file in &config.files {
            let location = env.resolver.resolve(&file.uri).await?;
            match file.manifest {
                Some(manifest_type) => manifests.push((manifest_type, location.uri)),
                None => plain.push((file, location.uri)),
            }
        }

        let mut groups = Vec::new();
        for repository in context.destination_repositories.clone() {
            let mut files = Vec::with_capacity(plain.len());
            for (file, source_uri) in &plain {
                let relative = match &file.relative_path {
                    Some(path) => path.clone(),
                    None => file_name(source_uri)?,
                };
                let transfer_file =
                    placeholder_file(env, context, &repository, source_uri, &relative).await?;
                files.push(
                    transfer_file
                        .with_size(file.size)
                        .with_source_hashes(file.hashes.clone()),
                );
            }
            if !files.is_empty() {
                groups.push(TransferFileGroup::new(
                    Some(format!("Ingest into {}", repository.name)),
                    files,
                ));
            }
        }
        let planned = Transfer::new(groups);
        let mut result = StageResult::completed().with_message(format!(
            "Planned {} files into {} repositories",
            planned.file_count(),
            context.destination_repositories.len()
        ));
        context.transfer = Some(planned);

        let mut additional = Vec::new();
        if let Some((manifest_type, _)) = manifests.first() {
            let manifest_type = *manifest_type;
            if manifests.iter().any(|(t, _)| *t != manifest_type) {
                return Err(OrchestrationError::invalid(
                    "An ingest job can only contain manifests of one type",
                ));
            }
            let uris: Vec<String> = manifests.into_iter().map(|(_, uri)| uri).collect();
            context.manifest_transfer = Some(ManifestTransfer::new(manifest_type, None, &uris)?);
            result = result.with_message(format!(
                "Expanding {} {} manifests",
                uris.len(),
                manifest_type
            ));
            additional.push(StageKind::ManifestParsing);
        }
        if context
            .destination_repositories
            .iter()
            .any(|r| r.requires_multipart())
        {
            additional.push(StageKind::MultipartPrepare);
        }

        Ok(result.with_additional_stages(additional))
    }
}

#[cfg(test)]
mod tests {
    use transfer_core::{IngestConfiguration, ManifestType, RepositoryId, StageStatus, VariantId};

    use super::*;
    use crate::stages::test_support::{context, env};

    fn ingest(repositories: &[&str], files: Vec<IngestFile>) -> JobConfiguration {
        JobConfiguration::Ingest(IngestConfiguration {
            variant_id: VariantId::from("v1"),
            repository_ids: repositories.iter().map(|r| RepositoryId::from(*r)).collect(),
            files,
        })
    }

    #[tokio::test]
    async fn plans_one_group_per_repository() -> Result<()> {
        let (env, catalog) = env();
        let mut context = context(ingest(
            &["fs", "s3"],
            vec![
                IngestFile::new("pkg/a.mp4").with_size(10),
                IngestFile::new("file:///ingest/pkg/b.mp4").with_relative_path("audio/b.mp4"),
            ],
        ));

        let result = IngestPrepareStage.prepare(&env, &mut context).await?;
        assert_eq!(result.status, StageStatus::Completed);
        assert_eq!(result.additional_stages, vec![StageKind::MultipartPrepare]);

        let transfer = context.transfer()?;
        assert_eq!(transfer.groups.len(), 2);
        let first = &transfer.groups[0].files[0];
        assert_eq!(first.source_uri, "file:///ingest/pkg/a.mp4");
        assert_eq!(first.destination_uri, "file:///srv/media/v1/a.mp4");
        assert_eq!(first.size, Some(10));
        assert_eq!(
            transfer.groups[1].files[1].destination_uri,
            "s3://bucket/media/v1/audio/b.mp4"
        );

        assert_eq!(context.created_repository_files.len(), 4);
        assert_eq!(catalog.files_for_variant(&VariantId::from("v1")).len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn manifests_schedule_parsing() -> Result<()> {
        let (env, _) = env();
        let mut context = context(ingest(
            &["fs"],
            vec![IngestFile::new("pkg/master.m3u8").as_manifest(ManifestType::Hls)],
        ));

        let result = IngestPrepareStage.prepare(&env, &mut context).await?;
        assert_eq!(result.additional_stages, vec![StageKind::ManifestParsing]);
        let manifests = context.manifest_transfer.as_ref().unwrap();
        assert_eq!(manifests.root_path, "file:///ingest/pkg/");
        assert_eq!(manifests.pending().len(), 1);
        assert!(context.transfer()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_repository_is_an_error() {
        let (env, _) = env();
        let mut context = context(ingest(&["missing"], vec![IngestFile::new("pkg/a.mp4")]));
        assert!(matches!(
            IngestPrepareStage.prepare(&env, &mut context).await,
            Err(OrchestrationError::NotFound(_))
        ));
    }
}
