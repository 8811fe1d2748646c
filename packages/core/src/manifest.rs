//! Hierarchical manifest model and its breadth-first expansion.
//!
//! A manifest transfer starts with one or more root manifests (e.g. an HLS
//! master playlist). Every parse round reports, per manifest, either child
//! manifests or terminal files. Child manifests are parsed in the next round;
//! once a round yields no children the tree is flattened into a [`Transfer`].

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::content::join_uri;
use crate::error::{OrchestrationError, Result};
use crate::transfer::{Hash, Transfer, TransferFile, TransferFileGroup, TransferItemId};

/// Playlist format of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestType {
    Hls,
    Dash,
}

impl ManifestType {
    pub fn as_str(self) -> &'static str {
        match self {
            ManifestType::Hls => "hls",
            ManifestType::Dash => "dash",
        }
    }
}

impl std::fmt::Display for ManifestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal file referenced by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFileReference {
    /// Absolute URI.
    pub uri: String,
    /// Path relative to the manifest transfer root.
    pub relative_path: String,
}

/// A child manifest reported by a parse task, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildManifest {
    /// URI as written in the parent manifest; may be relative.
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// What a MANIFEST_TRANSFER task reports for one manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestParseOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_hashes: Vec<Hash>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_manifests: Vec<ChildManifest>,
    /// Terminal file URIs as written in the manifest; may be relative.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

/// One manifest in the expansion tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestTransferFile {
    pub id: TransferItemId,
    /// Absolute URI of the manifest.
    pub source_uri: String,
    /// Path relative to the manifest transfer root.
    pub relative_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_hashes: Vec<Hash>,
    /// Set once a parse task reported on this manifest.
    #[serde(default)]
    pub parsed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_manifests: Vec<ManifestTransferFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ManifestFileReference>,
}

impl ManifestTransferFile {
    fn new(source_uri: String, relative_path: String, description: Option<String>) -> Self {
        Self {
            id: TransferItemId::new(),
            source_uri,
            relative_path,
            description,
            size: None,
            output_hashes: Vec::new(),
            parsed: false,
            child_manifests: Vec::new(),
            files: Vec::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.child_manifests.is_empty() && !self.files.is_empty() {
            return Err(mixed_content(&self.source_uri));
        }
        self.child_manifests.iter().try_for_each(Self::validate)
    }
}

fn mixed_content(uri: &str) -> OrchestrationError {
    OrchestrationError::runtime(format!(
        "Manifest {} references both child manifests and files",
        uri
    ))
}

/// A set of manifests rooted at a common directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestTransfer {
    /// Absolute directory URI; always ends with `/`.
    pub root_path: String,
    pub manifest_type: ManifestType,
    pub files: Vec<ManifestTransferFile>,
}

impl ManifestTransfer {
    /// Start a transfer for root manifests. The root path defaults to the
    /// directory of the first manifest.
    pub fn new(
        manifest_type: ManifestType,
        root_path: Option<&str>,
        manifest_uris: &[String],
    ) -> Result<Self> {
        let first = manifest_uris
            .first()
            .ok_or_else(|| OrchestrationError::runtime("A manifest transfer needs a manifest"))?;
        let root_path = match root_path {
            Some(root) if root.ends_with('/') => root.to_string(),
            Some(root) => format!("{}/", root),
            None => parent_directory(first)?,
        };

        let files = manifest_uris
            .iter()
            .map(|uri| {
                let uri = parse_uri(uri)?.to_string();
                let relative = relative_path(&root_path, &uri)?;
                let description = Some(relative.clone());
                Ok(ManifestTransferFile::new(uri, relative, description))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            root_path,
            manifest_type,
            files,
        })
    }

    /// Manifests still waiting for a parse task, in breadth-first order.
    pub fn pending(&self) -> Vec<&ManifestTransferFile> {
        self.breadth_first()
            .into_iter()
            .filter(|file| !file.parsed)
            .collect()
    }

    /// Every manifest in the tree, in breadth-first order.
    pub fn manifests(&self) -> Vec<&ManifestTransferFile> {
        self.breadth_first()
    }

    fn breadth_first(&self) -> Vec<&ManifestTransferFile> {
        let mut out = Vec::new();
        let mut queue: VecDeque<&ManifestTransferFile> = self.files.iter().collect();
        while let Some(file) = queue.pop_front() {
            out.push(file);
            queue.extend(file.child_manifests.iter());
        }
        out
    }

    /// Number of manifest levels in the tree.
    pub fn depth(&self) -> usize {
        fn depth_of(file: &ManifestTransferFile) -> usize {
            1 + file.child_manifests.iter().map(depth_of).max().unwrap_or(0)
        }
        self.files.iter().map(depth_of).max().unwrap_or(0)
    }

    fn find_mut(&mut self, id: TransferItemId) -> Option<&mut ManifestTransferFile> {
        let mut stack: Vec<&mut ManifestTransferFile> = self.files.iter_mut().collect();
        while let Some(file) = stack.pop() {
            if file.id == id {
                return Some(file);
            }
            stack.extend(file.child_manifests.iter_mut());
        }
        None
    }

    /// Record a parse result. References are resolved against the manifest's
    /// own URI. Returns the number of child manifests that were added.
    ///
    /// A result with both child manifests and files is rejected and leaves
    /// the tree unchanged.
    pub fn apply_parse_output(
        &mut self,
        id: TransferItemId,
        output: ManifestParseOutput,
    ) -> Result<usize> {
        let root_path = self.root_path.clone();
        let file = self
            .find_mut(id)
            .ok_or_else(|| OrchestrationError::runtime(format!("Unknown manifest file {}", id)))?;

        if !output.child_manifests.is_empty() && !output.files.is_empty() {
            return Err(mixed_content(&file.source_uri));
        }
        if file.parsed {
            return Err(OrchestrationError::runtime(format!(
                "Manifest {} was already parsed",
                file.source_uri
            )));
        }

        let children = output
            .child_manifests
            .iter()
            .map(|child| {
                let uri = resolve_reference(&file.source_uri, &child.uri)?;
                let relative = relative_path(&root_path, &uri)?;
                Ok(ManifestTransferFile::new(uri, relative, child.description.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        let files = output
            .files
            .iter()
            .map(|reference| {
                let uri = resolve_reference(&file.source_uri, reference)?;
                let relative_path = relative_path(&root_path, &uri)?;
                Ok(ManifestFileReference { uri, relative_path })
            })
            .collect::<Result<Vec<_>>>()?;

        let added = children.len();
        file.size = output.size;
        file.output_hashes = output.output_hashes;
        file.child_manifests = children;
        file.files = files;
        file.parsed = true;
        Ok(added)
    }

    /// Check the structural invariant over the whole tree.
    pub fn validate(&self) -> Result<()> {
        self.files.iter().try_for_each(ManifestTransferFile::validate)
    }

    /// Manifests that reference terminal files, with those files.
    pub fn leaf_groups(&self) -> Vec<&ManifestTransferFile> {
        self.breadth_first()
            .into_iter()
            .filter(|file| !file.files.is_empty())
            .collect()
    }

    /// Flatten into a transfer with one group per file-bearing manifest.
    /// Destination URIs are the relative paths under `destination_base`.
    pub fn to_transfer(&self, destination_base: &str) -> Result<Transfer> {
        if let Some(pending) = self.pending().first() {
            return Err(OrchestrationError::runtime(format!(
                "Manifest {} has not been parsed yet",
                pending.source_uri
            )));
        }
        self.validate()?;

        let groups = self
            .leaf_groups()
            .into_iter()
            .map(|manifest| {
                let files = manifest
                    .files
                    .iter()
                    .map(|reference| {
                        TransferFile::new(
                            reference.uri.clone(),
                            join_uri(destination_base, &reference.relative_path),
                            reference.relative_path.clone(),
                        )
                    })
                    .collect();
                TransferFileGroup::new(manifest.description.clone(), files)
            })
            .collect();
        Ok(Transfer::new(groups))
    }
}

fn parse_uri(uri: &str) -> Result<Url> {
    Url::parse(uri)
        .map_err(|e| OrchestrationError::runtime(format!("Invalid manifest uri {}: {}", uri, e)))
}

/// Resolve a manifest reference against the URI of the manifest containing it.
pub fn resolve_reference(base: &str, reference: &str) -> Result<String> {
    let base_url = parse_uri(base)?;
    base_url.join(reference).map(String::from).map_err(|e| {
        OrchestrationError::runtime(format!(
            "Can not resolve {} against {}: {}",
            reference, base, e
        ))
    })
}

/// Directory URI (with trailing `/`) containing `uri`.
pub fn parent_directory(uri: &str) -> Result<String> {
    let url = parse_uri(uri)?;
    url.join("./").map(String::from).map_err(|e| {
        OrchestrationError::runtime(format!("Can not derive directory of {}: {}", uri, e))
    })
}

/// Logical path of `uri` below `root`. Files outside the root keep only
/// their file name.
pub fn relative_path(root: &str, uri: &str) -> Result<String> {
    let root_url = parse_uri(root)?;
    let url = parse_uri(uri)?;

    match root_url.make_relative(&url) {
        Some(relative) if !relative.is_empty() && !relative.starts_with("../") => Ok(relative),
        _ => url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                OrchestrationError::runtime(format!("Can not derive a file name from {}", uri))
            }),
    }
}
