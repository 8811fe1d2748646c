use async_trait::async_trait;
use transfer_core::{
    JobConfiguration, PipelineContext, Result, StageKind, StageResult, Transfer, TransferFile,
    TransferFileGroup, join_uri,
};

use super::{PipelineStage, StageEnv, no_source_files, select_source, unexpected_configuration};

/// Copies the files of a variant from the first repository that has them to
/// caller-supplied locations.
pub struct ExportPrepareStage;

#[async_trait]
impl PipelineStage for ExportPrepareStage {
    fn kind(&self) -> StageKind {
        StageKind::ExportPrepare
    }

    async fn prepare(&self, env: &StageEnv, context: &mut PipelineContext) -> Result<StageResult> {
        let JobConfiguration::Export(config) = &context.configuration else {
            return Err(unexpected_configuration(context, self.kind()));
        };
        let config = config.clone();

        let Some((source, files)) =
            select_source(env, &context.variant_id, &config.repository_ids).await?
        else {
            return Ok(no_source_files(&context.variant_id, &config.repository_ids));
        };

        let mut locations = Vec::with_capacity(config.locations.len());
        for uri in &config.locations {
            locations.push(env.resolver.resolve(uri).await?);
        }

        let groups = locations
            .iter()
            .map(|location| {
                let planned = files
                    .iter()
                    .map(|file| {
                        TransferFile::new(
                            file.uri.clone(),
                            join_uri(&location.uri, &file.relative_path),
                            file.relative_path.clone(),
                        )
                        .with_size(file.size)
                        .with_source_hashes(file.hashes.clone())
                        .with_archive_id(file.archive_id.clone())
                    })
                    .collect();
                TransferFileGroup::new(Some(format!("Export to {}", location.uri)), planned)
            })
            .collect();

        let mut additional = Vec::new();
        if source.requires_restore() {
            additional.push(StageKind::Restore);
        }
        if locations.iter().any(|l| l.kind.requires_multipart()) {
            additional.push(StageKind::MultipartPrepare);
        }

        let message = format!(
            "Exporting {} files from {} to {} locations",
            files.len(),
            source.name,
            locations.len()
        );
        context.transfer = Some(Transfer::new(groups));
        context.source_repository = Some(source);
        context.destination_locations = locations;
        Ok(StageResult::completed()
            .with_message(message)
            .with_additional_stages(additional))
    }
}

#[cfg(test)]
mod tests {
    use transfer_core::{ExportConfiguration, FailureKind, RepositoryId, StageStatus, VariantId};

    use super::*;
    use crate::stages::test_support::{context, env};

    fn export(repositories: &[&str], locations: &[&str]) -> JobConfiguration {
        JobConfiguration::Export(ExportConfiguration {
            variant_id: VariantId::from("v1"),
            repository_ids: repositories.iter().map(|r| RepositoryId::from(*r)).collect(),
            locations: locations.iter().map(|l| l.to_string()).collect(),
        })
    }

    #[tokio::test]
    async fn exports_from_the_first_repository_with_files() -> Result<()> {
        let (env, catalog) = env();
        let variant = VariantId::from("v1");
        catalog.add_file(&variant, &RepositoryId::from("vault"), "a.mp4", Some(9))?;

        let mut context = context(export(&["fs", "vault"], &["out/", "s3://bucket/export"]));
        let result = ExportPrepareStage.prepare(&env, &mut context).await?;

        assert_eq!(result.status, StageStatus::Completed);
        assert_eq!(
            result.additional_stages,
            vec![StageKind::Restore, StageKind::MultipartPrepare]
        );
        assert_eq!(context.source_repository()?.id, RepositoryId::from("vault"));
        let transfer = context.transfer()?;
        assert_eq!(transfer.groups.len(), 2);
        assert_eq!(
            transfer.groups[0].files[0].destination_uri,
            "file:///ingest/out/a.mp4"
        );
        assert_eq!(
            transfer.groups[1].files[0].destination_uri,
            "s3://bucket/export/a.mp4"
        );
        assert_eq!(transfer.groups[1].files[0].size, Some(9));
        Ok(())
    }

    #[tokio::test]
    async fn no_files_fails_clean() -> Result<()> {
        let (env, _) = env();
        let mut context = context(export(&["fs"], &["out/"]));
        let result = ExportPrepareStage.prepare(&env, &mut context).await?;
        assert_eq!(result.status, StageStatus::Failed(FailureKind::Clean));
        Ok(())
    }
}
