//! Byte access to `file://` and `s3://` locations for in-process workers.
//!
//! A thin wrapper around `object_store`, which already provides the local
//! filesystem and S3 backends.

use std::sync::Arc;

use bytes::Bytes;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;
use url::Url;

use crate::RepositoryError;
use crate::config::non_empty;

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

impl S3Config {
    /// Read connection settings for `bucket` from the environment.
    ///
    /// - `AWS_REGION` (default: `us-east-1`)
    /// - `S3_ENDPOINT` (optional, e.g. `http://localhost:9000`)
    /// - `S3_ALLOW_HTTP` (`true`/`false`, default: auto true if endpoint is http://)
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` (optional)
    pub fn from_env(bucket: impl Into<String>) -> Result<Self, RepositoryError> {
        let region = std::env::var("AWS_REGION")
            .ok()
            .and_then(non_empty)
            .unwrap_or_else(|| "us-east-1".to_string());

        let endpoint = std::env::var("S3_ENDPOINT").ok().and_then(non_empty);
        let allow_http = match std::env::var("S3_ALLOW_HTTP").ok().and_then(non_empty) {
            Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y"),
            None => endpoint
                .as_deref()
                .is_some_and(|e| e.trim_start().to_ascii_lowercase().starts_with("http://")),
        };

        Ok(Self {
            bucket: bucket.into(),
            region,
            endpoint,
            allow_http,
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok().and_then(non_empty),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY")
                .ok()
                .and_then(non_empty),
            session_token: std::env::var("AWS_SESSION_TOKEN").ok().and_then(non_empty),
        })
    }
}

/// A single object addressed by URI.
#[derive(Clone)]
pub struct StorageLocation {
    store: Arc<dyn ObjectStore>,
    path: Path,
    uri: String,
}

impl std::fmt::Debug for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageLocation")
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}

impl StorageLocation {
    /// Open the object behind a `file://` or `s3://` URI.
    pub fn for_uri(uri: &str) -> Result<Self, RepositoryError> {
        let url = Url::parse(uri)?;
        let (store, path): (Arc<dyn ObjectStore>, Path) = match url.scheme() {
            "file" => {
                let fs_path = url.to_file_path().map_err(|_| {
                    RepositoryError::InvalidConfig(format!("not a local file path: {uri}"))
                })?;
                let path = Path::from_absolute_path(&fs_path)?;
                (Arc::new(object_store::local::LocalFileSystem::new()), path)
            }
            "s3" => {
                let bucket = url.host_str().ok_or_else(|| {
                    RepositoryError::InvalidConfig(format!("missing bucket in {uri}"))
                })?;
                let key = url.path().trim_start_matches('/');
                if key.is_empty() {
                    return Err(RepositoryError::InvalidConfig(
                        "object key must not be empty".to_string(),
                    ));
                }
                let s3 = build_s3(S3Config::from_env(bucket)?)?;
                (Arc::new(s3), Path::from(key))
            }
            other => {
                return Err(RepositoryError::InvalidConfig(format!(
                    "unsupported storage scheme {other} (expected file|s3)"
                )));
            }
        };

        Ok(Self {
            store,
            path,
            uri: uri.to_string(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub async fn get_bytes(&self) -> Result<Bytes, RepositoryError> {
        let res = self.store.get(&self.path).await?;
        Ok(res.bytes().await?)
    }

    pub async fn put_bytes(&self, bytes: Bytes) -> Result<(), RepositoryError> {
        self.store
            .put(&self.path, object_store::PutPayload::from(bytes))
            .await?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<(), RepositoryError> {
        self.store.delete(&self.path).await?;
        Ok(())
    }

    /// Copy this object to `destination`, returning the number of bytes.
    pub async fn copy_to(&self, destination: &StorageLocation) -> Result<u64, RepositoryError> {
        let bytes = self.get_bytes().await?;
        let size = bytes.len() as u64;
        destination.put_bytes(bytes).await?;
        Ok(size)
    }
}

fn build_s3(cfg: S3Config) -> Result<object_store::aws::AmazonS3, RepositoryError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region);

    if let Some(endpoint) = cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if cfg.allow_http {
        builder = builder.with_allow_http(true);
    }
    if let Some(access_key_id) = cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }
    if let Some(session_token) = cfg.session_token {
        builder = builder.with_token(session_token);
    }

    Ok(builder.build()?)
}
