//! In-memory asset catalog: repository descriptors and the physical files
//! each variant has in them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use transfer_core::{
    ContentManager, OrchestrationError, RepositoryDescriptor, RepositoryFile, RepositoryFileId,
    RepositoryId, Result, VariantId,
};

use crate::config::CatalogConfig;

pub struct MemoryCatalog {
    repositories: BTreeMap<RepositoryId, RepositoryDescriptor>,
    files: RwLock<BTreeMap<RepositoryFileId, RepositoryFile>>,
    next_file: AtomicU64,
}

impl MemoryCatalog {
    pub fn new(config: &CatalogConfig) -> Self {
        let repositories = config
            .repositories
            .iter()
            .map(|r| {
                let descriptor = r.descriptor();
                (descriptor.id.clone(), descriptor)
            })
            .collect();
        Self {
            repositories,
            files: RwLock::new(BTreeMap::new()),
            next_file: AtomicU64::new(1),
        }
    }

    pub fn repositories(&self) -> impl Iterator<Item = &RepositoryDescriptor> {
        self.repositories.values()
    }

    /// Record a file that already exists in a repository.
    pub fn add_file(
        &self,
        variant_id: &VariantId,
        repository_id: &RepositoryId,
        relative_path: &str,
        size: Option<u64>,
    ) -> Result<RepositoryFile> {
        let descriptor = self.descriptor(repository_id)?;
        let mut file = self.placeholder(variant_id, descriptor, relative_path);
        file.size = size;
        self.files.write().insert(file.id.clone(), file.clone());
        Ok(file)
    }

    /// Every file of a variant across repositories.
    pub fn files_for_variant(&self, variant_id: &VariantId) -> Vec<RepositoryFile> {
        self.files
            .read()
            .values()
            .filter(|f| &f.variant_id == variant_id)
            .cloned()
            .collect()
    }

    pub fn file(&self, id: &RepositoryFileId) -> Option<RepositoryFile> {
        self.files.read().get(id).cloned()
    }

    fn descriptor(&self, id: &RepositoryId) -> Result<&RepositoryDescriptor> {
        self.repositories
            .get(id)
            .ok_or_else(|| OrchestrationError::not_found(format!("Repository {} does not exist", id)))
    }

    fn placeholder(
        &self,
        variant_id: &VariantId,
        descriptor: &RepositoryDescriptor,
        relative_path: &str,
    ) -> RepositoryFile {
        let n = self.next_file.fetch_add(1, Ordering::Relaxed);
        let relative_path = relative_path.trim_start_matches('/').to_string();
        RepositoryFile {
            id: RepositoryFileId::new(format!("{}-{:06}", descriptor.id, n)),
            variant_id: variant_id.clone(),
            repository_id: descriptor.id.clone(),
            uri: descriptor.uri_for(&format!("{}/{}", variant_id, relative_path)),
            relative_path,
            size: None,
            hashes: Vec::new(),
            archive_id: None,
        }
    }
}

#[async_trait]
impl ContentManager for MemoryCatalog {
    async fn repository(&self, id: &RepositoryId) -> Result<RepositoryDescriptor> {
        self.descriptor(id).cloned()
    }

    async fn repository_files(
        &self,
        variant_id: &VariantId,
        repository_id: &RepositoryId,
    ) -> Result<Vec<RepositoryFile>> {
        self.descriptor(repository_id)?;
        let mut files: Vec<RepositoryFile> = self
            .files
            .read()
            .values()
            .filter(|f| &f.variant_id == variant_id && &f.repository_id == repository_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(files)
    }

    async fn create_repository_file(
        &self,
        variant_id: &VariantId,
        repository_id: &RepositoryId,
        relative_path: &str,
    ) -> Result<RepositoryFile> {
        let descriptor = self.descriptor(repository_id)?;
        let relative = relative_path.trim_start_matches('/');

        let mut files = self.files.write();
        if let Some(existing) = files.values().find(|f| {
            &f.variant_id == variant_id
                && &f.repository_id == repository_id
                && f.relative_path == relative
        }) {
            return Ok(existing.clone());
        }

        let file = self.placeholder(variant_id, descriptor, relative);
        files.insert(file.id.clone(), file.clone());
        tracing::debug!(
            repository_file_id = %file.id,
            uri = %file.uri,
            "Created repository file placeholder"
        );
        Ok(file)
    }

    async fn update_repository_file(&self, file: RepositoryFile) -> Result<()> {
        let mut files = self.files.write();
        let slot = files.get_mut(&file.id).ok_or_else(|| {
            OrchestrationError::not_found(format!("Repository file {} does not exist", file.id))
        })?;
        *slot = file;
        Ok(())
    }

    async fn remove_repository_file(&self, id: &RepositoryFileId) -> Result<()> {
        self.files
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| {
                OrchestrationError::not_found(format!("Repository file {} does not exist", id))
            })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use transfer_core::RepositoryKind;

    use super::*;
    use crate::config::RepositoryConfig;

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::new(
            &CatalogConfig::default()
                .with_repository(RepositoryConfig::new(
                    "fs",
                    RepositoryKind::Filesystem,
                    "file:///srv/media",
                ))
                .with_repository(
                    RepositoryConfig::new("s3", RepositoryKind::S3, "s3://bucket/media")
                        .with_part_size(1024),
                ),
        )
    }

    #[tokio::test]
    async fn placeholders_live_under_the_variant() -> Result<()> {
        let catalog = catalog();
        let variant = VariantId::from("v1");
        let repo = RepositoryId::from("s3");

        let file = catalog
            .create_repository_file(&variant, &repo, "/hls/seg0.ts")
            .await?;
        assert_eq!(file.relative_path, "hls/seg0.ts");
        assert_eq!(file.uri, "s3://bucket/media/v1/hls/seg0.ts");

        let again = catalog
            .create_repository_file(&variant, &repo, "hls/seg0.ts")
            .await?;
        assert_eq!(again.id, file.id);

        let descriptor = catalog.repository(&repo).await?;
        assert_eq!(descriptor.part_size, Some(1024));
        assert!(descriptor.requires_multipart());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_references_are_not_found() {
        let catalog = catalog();
        assert!(matches!(
            catalog.repository(&RepositoryId::from("nope")).await,
            Err(OrchestrationError::NotFound(_))
        ));
        assert!(matches!(
            catalog
                .remove_repository_file(&RepositoryFileId::from("missing"))
                .await,
            Err(OrchestrationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn files_are_listed_per_repository() -> Result<()> {
        let catalog = catalog();
        let variant = VariantId::from("v1");
        catalog.add_file(&variant, &RepositoryId::from("fs"), "b.mp4", Some(20))?;
        catalog.add_file(&variant, &RepositoryId::from("fs"), "a.mp4", Some(10))?;
        let s3 = catalog.add_file(&variant, &RepositoryId::from("s3"), "a.mp4", None)?;

        let fs_files = catalog
            .repository_files(&variant, &RepositoryId::from("fs"))
            .await?;
        assert_eq!(
            fs_files.iter().map(|f| f.relative_path.as_str()).collect::<Vec<_>>(),
            vec!["a.mp4", "b.mp4"]
        );

        let mut updated = s3.clone();
        updated.size = Some(99);
        catalog.update_repository_file(updated).await?;
        assert_eq!(catalog.file(&s3.id).and_then(|f| f.size), Some(99));

        catalog.remove_repository_file(&s3.id).await?;
        assert_eq!(catalog.files_for_variant(&variant).len(), 2);
        Ok(())
    }
}
