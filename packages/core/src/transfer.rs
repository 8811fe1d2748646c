//! Flat transfer model: what is being moved from where to where.

use serde::{Deserialize, Serialize};

use crate::content::{RepositoryFileId, RepositoryId};
use crate::ids::ulid_id;

ulid_id!(
    /// Identifier of a transfer file or group inside a transfer.
    TransferItemId
);

/// Hash algorithms workers compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    /// SHA-256 tree hash used by archival stores.
    Sha256Tree,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha256Tree => "sha256_tree",
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hash over a whole file, or over a byte range when `offset` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hash {
    pub algorithm: HashAlgorithm,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

impl Hash {
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> Self {
        Self {
            algorithm,
            value: value.into(),
            offset: None,
            length: None,
        }
    }

    pub fn for_range(
        algorithm: HashAlgorithm,
        value: impl Into<String>,
        offset: u64,
        length: u64,
    ) -> Self {
        Self {
            algorithm,
            value: value.into(),
            offset: Some(offset),
            length: Some(length),
        }
    }
}

/// One part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPart {
    pub part_index: u32,
    pub offset: u64,
    pub length: u64,
    pub signing_hash: String,
    pub part_hash: String,
}

/// A single file to move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFile {
    pub id: TransferItemId,
    pub source_uri: String,
    pub destination_uri: String,
    /// Path relative to the destination root.
    pub relative_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_repository_id: Option<RepositoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_file_id: Option<RepositoryFileId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_hashes: Vec<Hash>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_hashes: Vec<Hash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<UploadPart>,
    /// Archive id of the source object in an archival store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_id: Option<String>,
}

impl TransferFile {
    pub fn new(
        source_uri: impl Into<String>,
        destination_uri: impl Into<String>,
        relative_path: impl Into<String>,
    ) -> Self {
        Self {
            id: TransferItemId::new(),
            source_uri: source_uri.into(),
            destination_uri: destination_uri.into(),
            relative_path: relative_path.into(),
            destination_repository_id: None,
            repository_file_id: None,
            size: None,
            source_hashes: Vec::new(),
            output_hashes: Vec::new(),
            part_size: None,
            parts: Vec::new(),
            archive_id: None,
        }
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    pub fn with_destination_repository(mut self, repository_id: RepositoryId) -> Self {
        self.destination_repository_id = Some(repository_id);
        self
    }

    pub fn with_repository_file(mut self, repository_file_id: RepositoryFileId) -> Self {
        self.repository_file_id = Some(repository_file_id);
        self
    }

    pub fn with_source_hashes(mut self, hashes: Vec<Hash>) -> Self {
        self.source_hashes = hashes;
        self
    }

    pub fn with_archive_id(mut self, archive_id: Option<String>) -> Self {
        self.archive_id = archive_id;
        self
    }

    pub fn is_multipart(&self) -> bool {
        !self.parts.is_empty()
    }
}

/// Files that are moved together by a single task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFileGroup {
    pub id: TransferItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub files: Vec<TransferFile>,
}

impl TransferFileGroup {
    pub fn new(description: Option<String>, files: Vec<TransferFile>) -> Self {
        Self {
            id: TransferItemId::new(),
            description,
            files,
        }
    }

    /// The single destination repository of this group, if all files agree.
    pub fn destination_repository_id(&self) -> Option<&RepositoryId> {
        let first = self.files.first()?.destination_repository_id.as_ref()?;
        self.files
            .iter()
            .all(|f| f.destination_repository_id.as_ref() == Some(first))
            .then_some(first)
    }
}

/// Ordered groups of files to move.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub groups: Vec<TransferFileGroup>,
}

impl Transfer {
    pub fn new(groups: Vec<TransferFileGroup>) -> Self {
        Self { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.files.is_empty())
    }

    pub fn file_count(&self) -> usize {
        self.groups.iter().map(|g| g.files.len()).sum()
    }

    pub fn files(&self) -> impl Iterator<Item = &TransferFile> {
        self.groups.iter().flat_map(|g| g.files.iter())
    }

    pub fn files_mut(&mut self) -> impl Iterator<Item = &mut TransferFile> {
        self.groups.iter_mut().flat_map(|g| g.files.iter_mut())
    }

    pub fn file_mut(&mut self, id: TransferItemId) -> Option<&mut TransferFile> {
        self.files_mut().find(|f| f.id == id)
    }

    pub fn extend(&mut self, other: Transfer) {
        self.groups.extend(other.groups);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transfer() -> Transfer {
        let mut multipart = TransferFile::new(
            "file:///ingest/a.mp4",
            "s3://bucket/variant/a.mp4",
            "a.mp4",
        )
        .with_size(Some(1024))
        .with_destination_repository(RepositoryId::from("s3"))
        .with_repository_file(RepositoryFileId::from("rf-1"))
        .with_source_hashes(vec![Hash::new(HashAlgorithm::Md5, "abc")]);
        multipart.part_size = Some(512);
        multipart.parts = vec![UploadPart {
            part_index: 0,
            offset: 0,
            length: 512,
            signing_hash: "s0".into(),
            part_hash: "p0".into(),
        }];
        multipart.output_hashes = vec![Hash::for_range(HashAlgorithm::Sha256, "x", 0, 512)];

        let archived = TransferFile::new("glacier://vault/b", "file:///out/b", "b")
            .with_archive_id(Some("archive-1".into()));

        Transfer::new(vec![
            TransferFileGroup::new(Some("stream 0".into()), vec![multipart]),
            TransferFileGroup::new(None, vec![archived]),
        ])
    }

    #[test]
    fn transfer_wire_form_round_trips() {
        let transfer = sample_transfer();
        let json = serde_json::to_string(&transfer).unwrap();
        let back: Transfer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, transfer);
    }

    #[test]
    fn group_destination_requires_agreement() {
        let mut transfer = sample_transfer();
        assert_eq!(
            transfer.groups[0].destination_repository_id(),
            Some(&RepositoryId::from("s3"))
        );
        assert_eq!(transfer.groups[1].destination_repository_id(), None);

        let id = transfer.groups[0].files[0].id;
        transfer.file_mut(id).unwrap().size = Some(7);
        assert_eq!(transfer.files().next().unwrap().size, Some(7));
        assert_eq!(transfer.file_count(), 2);
    }
}
