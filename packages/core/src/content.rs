//! Collaborator interfaces consumed by the orchestration engine.
//!
//! The asset catalog, repository configuration and URI expansion live outside
//! the engine; stages reach them only through the traits in this module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::transfer::{Hash, HashAlgorithm};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Reference to a variant in the external asset catalog.
    VariantId
);
string_id!(
    /// Reference to a configured storage repository.
    RepositoryId
);
string_id!(
    /// Reference to a physical file placeholder inside a repository.
    RepositoryFileId
);

/// Default multipart part size (8 MiB).
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Storage backend behind a repository or location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryKind {
    Filesystem,
    S3,
    Glacier,
}

impl RepositoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RepositoryKind::Filesystem => "filesystem",
            RepositoryKind::S3 => "s3",
            RepositoryKind::Glacier => "glacier",
        }
    }

    /// Archival stores must restore an object before it can be read.
    pub fn requires_restore(self) -> bool {
        matches!(self, RepositoryKind::Glacier)
    }

    /// Object and archival stores upload in hashed byte-range parts.
    pub fn requires_multipart(self) -> bool {
        matches!(self, RepositoryKind::S3 | RepositoryKind::Glacier)
    }

    /// Hash algorithms computed per part, signing hash first.
    pub fn multipart_algorithms(self) -> Vec<HashAlgorithm> {
        match self {
            RepositoryKind::Filesystem => Vec::new(),
            RepositoryKind::S3 => vec![HashAlgorithm::Sha256, HashAlgorithm::Md5],
            RepositoryKind::Glacier => vec![HashAlgorithm::Sha256, HashAlgorithm::Sha256Tree],
        }
    }

    /// Guess the backend from a URI scheme.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "file" => Some(RepositoryKind::Filesystem),
            "s3" => Some(RepositoryKind::S3),
            "glacier" => Some(RepositoryKind::Glacier),
            _ => None,
        }
    }
}

impl std::fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the engine needs to know about a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub id: RepositoryId,
    pub name: String,
    pub kind: RepositoryKind,
    /// Base URI that repository-relative paths are appended to.
    pub base_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_size: Option<u64>,
}

impl RepositoryDescriptor {
    pub fn requires_restore(&self) -> bool {
        self.kind.requires_restore()
    }

    pub fn requires_multipart(&self) -> bool {
        self.kind.requires_multipart()
    }

    pub fn part_size_or(&self, default: u64) -> u64 {
        self.part_size.filter(|size| *size > 0).unwrap_or(default)
    }

    /// Absolute URI of a repository-relative path.
    pub fn uri_for(&self, relative_path: &str) -> String {
        join_uri(&self.base_uri, relative_path)
    }
}

/// A physical file placeholder for a variant inside a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryFile {
    pub id: RepositoryFileId,
    pub variant_id: VariantId,
    pub repository_id: RepositoryId,
    pub relative_path: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashes: Vec<Hash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_id: Option<String>,
}

/// A caller-supplied location after expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub uri: String,
    pub kind: RepositoryKind,
}

/// Asset catalog and repository configuration.
#[async_trait]
pub trait ContentManager: Send + Sync {
    /// Describe a repository. `NotFound` for unknown ids.
    async fn repository(&self, id: &RepositoryId) -> Result<RepositoryDescriptor>;

    /// Files of a variant currently held by a repository.
    async fn repository_files(
        &self,
        variant_id: &VariantId,
        repository_id: &RepositoryId,
    ) -> Result<Vec<RepositoryFile>>;

    /// Create a placeholder before bytes are transferred into the repository.
    async fn create_repository_file(
        &self,
        variant_id: &VariantId,
        repository_id: &RepositoryId,
        relative_path: &str,
    ) -> Result<RepositoryFile>;

    /// Record size, hashes or archive id after a completed transfer.
    async fn update_repository_file(&self, file: RepositoryFile) -> Result<()>;

    async fn remove_repository_file(&self, id: &RepositoryFileId) -> Result<()>;
}

/// Expands caller-supplied URIs against configured base locations.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    async fn resolve(&self, uri: &str) -> Result<ResolvedLocation>;
}

/// Notified before a job for a variant is submitted; may veto with an error.
#[async_trait]
pub trait SubmitListener: Send + Sync {
    async fn on_submit(&self, variant_id: &VariantId) -> Result<()>;
}

/// Join a base URI and a relative path with exactly one separator.
pub fn join_uri(base: &str, relative_path: &str) -> String {
    let relative = relative_path.trim_start_matches('/');
    if relative.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_uri_normalizes_separators() {
        assert_eq!(join_uri("s3://bucket/root/", "/a/b.ts"), "s3://bucket/root/a/b.ts");
        assert_eq!(join_uri("file:///data", "x.mp4"), "file:///data/x.mp4");
        assert_eq!(join_uri("file:///data", ""), "file:///data");
    }

    #[test]
    fn repository_kind_requirements() {
        assert!(RepositoryKind::Glacier.requires_restore());
        assert!(!RepositoryKind::S3.requires_restore());
        assert!(RepositoryKind::S3.requires_multipart());
        assert!(!RepositoryKind::Filesystem.requires_multipart());
        assert_eq!(
            RepositoryKind::S3.multipart_algorithms(),
            vec![HashAlgorithm::Sha256, HashAlgorithm::Md5]
        );
        assert_eq!(RepositoryKind::from_scheme("S3"), Some(RepositoryKind::S3));
        assert_eq!(RepositoryKind::from_scheme("http"), None);
    }
}
