//! Database connection management with lazy initialization.

use std::sync::LazyLock;
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;
use tokio::sync::OnceCell;
use transfer_core::OrchestrationError;

/// Global database instance using lazy initialization.
static DB: LazyLock<OnceCell<Surreal<Any>>> = LazyLock::new(OnceCell::new);

/// Database connection wrapper.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection endpoint: "mem://", "file://path" or "rocksdb://path"
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "transfer".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for file-based persistence.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("file://{}", path.into()),
            ..Default::default()
        }
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Read `DATABASE_URL`, `DATABASE_NAMESPACE`, `DATABASE_NAME`,
    /// `DATABASE_USER` and `DATABASE_PASSWORD`, falling back to memory.
    pub fn from_env() -> Self {
        let mut config = non_empty_env("DATABASE_URL")
            .map(|endpoint| Self {
                endpoint,
                ..Default::default()
            })
            .unwrap_or_default();
        if let Some(namespace) = non_empty_env("DATABASE_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Some(database) = non_empty_env("DATABASE_NAME") {
            config.database = database;
        }
        if let (Some(user), Some(password)) = (
            non_empty_env("DATABASE_USER"),
            non_empty_env("DATABASE_PASSWORD"),
        ) {
            config.credentials = Some((user, password));
        }
        config
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not initialized - call init_db first")]
    NotInitialized,
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

impl From<DbError> for OrchestrationError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(message) => OrchestrationError::NotFound(message),
            other => OrchestrationError::Store(other.to_string()),
        }
    }
}

/// Initialize the database connection.
///
/// This should be called once at application startup before any database operations.
pub async fn init_db(config: DbConfig) -> Result<&'static Database, DbError> {
    DB.get_or_try_init(|| async {
        tracing::info!("Connecting to database: {}", config.endpoint);

        let db = connect(&config.endpoint).await?;

        if let Some((username, password)) = &config.credentials {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;

        tracing::info!(
            "Connected to database: {}/{}",
            config.namespace,
            config.database
        );

        Ok(db)
    })
    .await
}

/// Get the database connection.
pub fn get_db() -> Result<&'static Database, DbError> {
    DB.get().ok_or(DbError::NotInitialized)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[test]
    fn builders_set_endpoint_and_names() {
        let config = DbConfig::rocksdb("/var/lib/transferd")
            .with_namespace("ns")
            .with_database("db")
            .with_credentials("root", "secret");
        assert_eq!(config.endpoint, "rocksdb:///var/lib/transferd");
        assert_eq!(config.namespace, "ns");
        assert_eq!(config.database, "db");
        assert_eq!(
            config.credentials,
            Some(("root".to_string(), "secret".to_string()))
        );
        assert_eq!(DbConfig::memory().endpoint, "mem://");
    }

    #[test]
    fn not_found_maps_to_orchestration_not_found() {
        let err: OrchestrationError = DbError::NotFound("Job x".into()).into();
        assert!(matches!(err, OrchestrationError::NotFound(_)));
        let err: OrchestrationError = DbError::Query("boom".into()).into();
        assert!(matches!(err, OrchestrationError::Store(_)));
    }
}
