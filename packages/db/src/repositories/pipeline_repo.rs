//! Pipeline repository. The pipeline context travels inside `data`.

use serde::Serialize;
use transfer_core::{JobId, Pipeline, PipelineId};

use super::{StoredRecord, decode_all};
use crate::{DbError, get_db};

/// Repository for pipeline persistence operations.
pub struct PipelineRepository;

#[derive(Debug, Serialize)]
struct PipelineWrite {
    ulid: String,
    job_id: String,
    status: String,
    data: String,
}

impl PipelineWrite {
    fn from_pipeline(pipeline: &Pipeline) -> Result<Self, DbError> {
        Ok(Self {
            ulid: pipeline.id.to_string(),
            job_id: pipeline.job_id.to_string(),
            status: pipeline.status.as_str().to_string(),
            data: serde_json::to_string(pipeline)?,
        })
    }
}

impl PipelineRepository {
    pub async fn create(pipeline: &Pipeline) -> Result<(), DbError> {
        let db = get_db()?;

        let record: Option<StoredRecord> = db
            .create(("pipeline", pipeline.id.to_string()))
            .content(PipelineWrite::from_pipeline(pipeline)?)
            .await?;

        record
            .map(|_| ())
            .ok_or_else(|| DbError::Query("Failed to create pipeline".into()))
    }

    pub async fn get(id: PipelineId) -> Result<Pipeline, DbError> {
        let db = get_db()?;

        let record: Option<StoredRecord> = db.select(("pipeline", id.to_string())).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Pipeline {} does not exist", id)))?
            .decode()
    }

    pub async fn update(pipeline: &Pipeline) -> Result<(), DbError> {
        let db = get_db()?;

        let record: Option<StoredRecord> = db
            .update(("pipeline", pipeline.id.to_string()))
            .content(PipelineWrite::from_pipeline(pipeline)?)
            .await?;

        record
            .map(|_| ())
            .ok_or_else(|| DbError::NotFound(format!("Pipeline {} does not exist", pipeline.id)))
    }

    pub async fn for_job(job_id: JobId) -> Result<Vec<Pipeline>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT data, ulid FROM pipeline WHERE job_id = $job_id ORDER BY ulid ASC")
            .bind(("job_id", job_id.to_string()))
            .await?;

        let records: Vec<StoredRecord> = result.take(0)?;

        decode_all(records)
    }

    pub async fn delete_for_job(job_id: JobId) -> Result<(), DbError> {
        let db = get_db()?;

        db.query("DELETE pipeline WHERE job_id = $job_id")
            .bind(("job_id", job_id.to_string()))
            .await?
            .check()?;

        Ok(())
    }
}
