//! Worker registration repository.

use serde::Serialize;
use transfer_core::{Worker, WorkerId};

use super::{StoredRecord, decode_all};
use crate::{DbError, get_db};

/// Repository for worker registrations.
pub struct WorkerRepository;

#[derive(Debug, Serialize)]
struct WorkerWrite {
    ulid: String,
    name: String,
    data: String,
}

impl WorkerRepository {
    /// Register a worker, replacing an earlier registration with the same id.
    pub async fn register(worker: &Worker) -> Result<(), DbError> {
        let db = get_db()?;

        let content = WorkerWrite {
            ulid: worker.id.to_string(),
            name: worker.name.clone(),
            data: serde_json::to_string(worker)?,
        };

        let record: Option<StoredRecord> = db
            .upsert(("worker", worker.id.to_string()))
            .content(content)
            .await?;

        record
            .map(|_| ())
            .ok_or_else(|| DbError::Query("Failed to register worker".into()))
    }

    pub async fn get(id: WorkerId) -> Result<Worker, DbError> {
        let db = get_db()?;

        let record: Option<StoredRecord> = db.select(("worker", id.to_string())).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Worker {} does not exist", id)))?
            .decode()
    }

    pub async fn unregister(id: WorkerId) -> Result<(), DbError> {
        let db = get_db()?;

        let record: Option<StoredRecord> = db.delete(("worker", id.to_string())).await?;

        record
            .map(|_| ())
            .ok_or_else(|| DbError::NotFound(format!("Worker {} does not exist", id)))
    }

    pub async fn list() -> Result<Vec<Worker>, DbError> {
        let db = get_db()?;

        let mut result = db.query("SELECT data, ulid FROM worker ORDER BY ulid ASC").await?;
        let records: Vec<StoredRecord> = result.take(0)?;

        decode_all(records)
    }
}
