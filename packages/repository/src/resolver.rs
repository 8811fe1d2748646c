//! Expansion of caller-supplied URIs against configured base locations.

use async_trait::async_trait;
use transfer_core::{
    LocationResolver, OrchestrationError, RepositoryKind, ResolvedLocation, Result,
};
use url::Url;

use crate::RepositoryError;
use crate::config::CatalogConfig;

/// Resolves relative URIs against a base and classifies the backend by scheme.
#[derive(Debug, Clone)]
pub struct BaseLocationResolver {
    base: Option<Url>,
    /// Roots absolute URIs must live under when strict.
    roots: Vec<Url>,
    strict: bool,
}

impl BaseLocationResolver {
    pub fn new(config: &CatalogConfig) -> std::result::Result<Self, RepositoryError> {
        let base = config
            .location_base
            .as_deref()
            .map(|b| Url::parse(&directory(b)))
            .transpose()?;
        let mut roots = config
            .repositories
            .iter()
            .map(|r| Url::parse(&directory(&r.base_uri)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        roots.extend(base.clone());
        Ok(Self {
            base,
            roots,
            strict: config.strict_locations,
        })
    }

    fn expand(&self, uri: &str) -> Result<Url> {
        match Url::parse(uri) {
            Ok(url) => {
                if self.strict && !self.roots.iter().any(|root| is_under(root, &url)) {
                    return Err(OrchestrationError::invalid(format!(
                        "Location {} is outside the configured locations",
                        uri
                    )));
                }
                Ok(url)
            }
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.base.as_ref().ok_or_else(|| {
                    OrchestrationError::invalid(format!(
                        "Relative location {} needs a configured base location",
                        uri
                    ))
                })?;
                base.join(uri.trim_start_matches('/')).map_err(|e| {
                    OrchestrationError::invalid(format!("Invalid location {}: {}", uri, e))
                })
            }
            Err(e) => Err(OrchestrationError::invalid(format!(
                "Invalid location {}: {}",
                uri, e
            ))),
        }
    }
}

#[async_trait]
impl LocationResolver for BaseLocationResolver {
    async fn resolve(&self, uri: &str) -> Result<ResolvedLocation> {
        let url = self.expand(uri.trim())?;
        let kind = RepositoryKind::from_scheme(url.scheme()).ok_or_else(|| {
            OrchestrationError::invalid(format!(
                "Unsupported location scheme {} in {}",
                url.scheme(),
                uri
            ))
        })?;
        Ok(ResolvedLocation {
            uri: url.into(),
            kind,
        })
    }
}

fn directory(uri: &str) -> String {
    if uri.ends_with('/') {
        uri.to_string()
    } else {
        format!("{}/", uri)
    }
}

fn is_under(root: &Url, url: &Url) -> bool {
    url.scheme() == root.scheme()
        && url.host_str() == root.host_str()
        && url.path().starts_with(root.path())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use crate::config::RepositoryConfig;

    fn config() -> CatalogConfig {
        CatalogConfig::default()
            .with_repository(RepositoryConfig::new(
                "s3",
                RepositoryKind::S3,
                "s3://bucket/media",
            ))
            .with_location_base("file:///ingest")
    }

    #[tokio::test]
    async fn relative_uris_use_the_base() -> Result<()> {
        let resolver = BaseLocationResolver::new(&config()).map_err(OrchestrationError::from)?;
        let location = resolver.resolve("pkg/master.m3u8").await?;
        assert_eq!(location.uri, "file:///ingest/pkg/master.m3u8");
        assert_eq!(location.kind, RepositoryKind::Filesystem);

        let location = resolver.resolve("s3://other/a.mp4").await?;
        assert_eq!(location.kind, RepositoryKind::S3);
        Ok(())
    }

    #[tokio::test]
    async fn strict_mode_limits_absolute_uris() -> Result<()> {
        let mut config = config();
        config.strict_locations = true;
        let resolver = BaseLocationResolver::new(&config).map_err(OrchestrationError::from)?;

        assert!(resolver.resolve("s3://bucket/media/v1/a.mp4").await.is_ok());
        assert!(matches!(
            resolver.resolve("s3://other/a.mp4").await,
            Err(OrchestrationError::InvalidProperty(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_schemes_and_missing_base_are_invalid() {
        let resolver = BaseLocationResolver::new(&CatalogConfig::default()).unwrap();
        assert!(resolver.resolve("http://example.com/a.mp4").await.is_err());
        assert!(resolver.resolve("relative/a.mp4").await.is_err());
    }
}
