//! Repository and location configuration read from the environment.

use transfer_core::{RepositoryDescriptor, RepositoryId, RepositoryKind};

use crate::RepositoryError;

/// One configured repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub id: String,
    pub name: String,
    pub kind: RepositoryKind,
    pub base_uri: String,
    pub part_size: Option<u64>,
}

impl RepositoryConfig {
    pub fn new(id: impl Into<String>, kind: RepositoryKind, base_uri: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            base_uri: base_uri.into(),
            part_size: None,
        }
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    pub fn descriptor(&self) -> RepositoryDescriptor {
        RepositoryDescriptor {
            id: RepositoryId::new(self.id.clone()),
            name: self.name.clone(),
            kind: self.kind,
            base_uri: self.base_uri.clone(),
            part_size: self.part_size,
        }
    }
}

/// Repositories plus the base location for relative URIs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogConfig {
    pub repositories: Vec<RepositoryConfig>,
    /// Base URI that relative caller URIs are resolved against.
    pub location_base: Option<String>,
    /// Reject absolute URIs outside the location base and repository roots.
    pub strict_locations: bool,
}

impl CatalogConfig {
    pub fn with_repository(mut self, repository: RepositoryConfig) -> Self {
        self.repositories.push(repository);
        self
    }

    pub fn with_location_base(mut self, base: impl Into<String>) -> Self {
        self.location_base = Some(base.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `REPOSITORIES`: comma separated repository ids
    /// - `REPOSITORY_<ID>_KIND`: `filesystem`, `s3` or `glacier` (default: from the base URI scheme)
    /// - `REPOSITORY_<ID>_BASE_URI` (required)
    /// - `REPOSITORY_<ID>_NAME` (default: the id)
    /// - `REPOSITORY_<ID>_PART_SIZE`: multipart part size in bytes
    /// - `LOCATION_BASE_URI`: base for relative caller URIs
    /// - `LOCATION_STRICT` (`true`/`false`, default: false)
    ///
    /// `<ID>` is the repository id upper-cased with `-` replaced by `_`.
    pub fn from_env() -> Result<Self, RepositoryError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`CatalogConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RepositoryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).and_then(non_empty);

        let ids: Vec<String> = var("REPOSITORIES")
            .map(|list| {
                list.split(',')
                    .filter_map(|id| non_empty(id.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let mut repositories = Vec::with_capacity(ids.len());
        for id in ids {
            let key = env_key(&id);
            let base_uri = var(&format!("REPOSITORY_{key}_BASE_URI")).ok_or_else(|| {
                RepositoryError::InvalidConfig(format!(
                    "REPOSITORY_{key}_BASE_URI is required for repository {id}"
                ))
            })?;
            let kind = match var(&format!("REPOSITORY_{key}_KIND")) {
                Some(kind) => parse_kind(&kind)?,
                None => kind_from_uri(&base_uri)?,
            };
            let part_size = var(&format!("REPOSITORY_{key}_PART_SIZE"))
                .map(|size| {
                    size.parse::<u64>().ok().filter(|s| *s > 0).ok_or_else(|| {
                        RepositoryError::InvalidConfig(format!(
                            "invalid REPOSITORY_{key}_PART_SIZE={size} (expected a positive integer)"
                        ))
                    })
                })
                .transpose()?;
            let name = var(&format!("REPOSITORY_{key}_NAME")).unwrap_or_else(|| id.clone());

            repositories.push(RepositoryConfig {
                id,
                name,
                kind,
                base_uri,
                part_size,
            });
        }

        let strict_locations = match lookup("LOCATION_STRICT") {
            Some(value) => parse_bool("LOCATION_STRICT", &value)?,
            None => false,
        };

        Ok(Self {
            repositories,
            location_base: var("LOCATION_BASE_URI"),
            strict_locations,
        })
    }
}

fn env_key(id: &str) -> String {
    id.to_ascii_uppercase().replace('-', "_")
}

fn parse_kind(value: &str) -> Result<RepositoryKind, RepositoryError> {
    match value.to_ascii_lowercase().as_str() {
        "filesystem" | "fs" | "file" => Ok(RepositoryKind::Filesystem),
        "s3" => Ok(RepositoryKind::S3),
        "glacier" => Ok(RepositoryKind::Glacier),
        other => Err(RepositoryError::InvalidConfig(format!(
            "unsupported repository kind {other} (expected filesystem|s3|glacier)"
        ))),
    }
}

fn kind_from_uri(uri: &str) -> Result<RepositoryKind, RepositoryError> {
    let url = url::Url::parse(uri)?;
    RepositoryKind::from_scheme(url.scheme()).ok_or_else(|| {
        RepositoryError::InvalidConfig(format!("can not infer repository kind from {uri}"))
    })
}

pub(crate) fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(var_name: &str, v: &str) -> Result<bool, RepositoryError> {
    let normalized = v.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "y" => Ok(true),
        "0" | "false" | "no" | "n" => Ok(false),
        _ => Err(RepositoryError::InvalidConfig(format!(
            "invalid boolean for {var_name}={v} (expected true/false)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn repositories_are_read_from_variables() -> Result<(), RepositoryError> {
        let config = CatalogConfig::from_lookup(lookup(&[
            ("REPOSITORIES", "fs, cold-archive"),
            ("REPOSITORY_FS_BASE_URI", "file:///srv/media"),
            ("REPOSITORY_COLD_ARCHIVE_BASE_URI", "glacier://vault"),
            ("REPOSITORY_COLD_ARCHIVE_PART_SIZE", "1048576"),
            ("REPOSITORY_COLD_ARCHIVE_NAME", "Cold archive"),
            ("LOCATION_BASE_URI", "file:///ingest/"),
            ("LOCATION_STRICT", "yes"),
        ]))?;

        assert_eq!(config.repositories.len(), 2);
        assert_eq!(config.repositories[0].kind, RepositoryKind::Filesystem);
        assert_eq!(config.repositories[0].name, "fs");
        let archive = &config.repositories[1];
        assert_eq!(archive.id, "cold-archive");
        assert_eq!(archive.kind, RepositoryKind::Glacier);
        assert_eq!(archive.part_size, Some(1_048_576));
        assert_eq!(archive.name, "Cold archive");
        assert_eq!(config.location_base.as_deref(), Some("file:///ingest/"));
        assert!(config.strict_locations);
        Ok(())
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(CatalogConfig::from_lookup(lookup(&[("REPOSITORIES", "fs")])).is_err());
        assert!(
            CatalogConfig::from_lookup(lookup(&[
                ("REPOSITORIES", "fs"),
                ("REPOSITORY_FS_BASE_URI", "file:///srv"),
                ("REPOSITORY_FS_KIND", "tape"),
            ]))
            .is_err()
        );
        assert!(
            CatalogConfig::from_lookup(lookup(&[
                ("REPOSITORIES", "fs"),
                ("REPOSITORY_FS_BASE_URI", "file:///srv"),
                ("REPOSITORY_FS_PART_SIZE", "0"),
            ]))
            .is_err()
        );
        assert!(CatalogConfig::from_lookup(lookup(&[("LOCATION_STRICT", "maybe")])).is_err());
    }

    #[test]
    fn empty_environment_gives_empty_catalog() -> Result<(), RepositoryError> {
        let config = CatalogConfig::from_lookup(|_| None)?;
        assert_eq!(config, CatalogConfig::default());
        Ok(())
    }
}
