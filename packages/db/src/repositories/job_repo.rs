//! Job repository for CRUD operations.

use serde::Serialize;
use transfer_core::{Job, JobFilter, JobId};

use super::{StoredRecord, decode_all};
use crate::{DbError, get_db};

/// Repository for job persistence operations.
pub struct JobRepository;

/// Struct for creating/updating jobs.
#[derive(Debug, Serialize)]
struct JobWrite {
    ulid: String,
    status: String,
    job_type: String,
    variant_id: Option<String>,
    data: String,
}

impl JobWrite {
    fn from_job(job: &Job) -> Result<Self, DbError> {
        Ok(Self {
            ulid: job.id.to_string(),
            status: job.status.as_str().to_string(),
            job_type: job.job_type.as_str().to_string(),
            variant_id: job.variant_id().map(|v| v.to_string()),
            data: serde_json::to_string(job)?,
        })
    }
}

impl JobRepository {
    /// Create a new job in the database.
    pub async fn create(job: &Job) -> Result<(), DbError> {
        let db = get_db()?;

        let record: Option<StoredRecord> = db
            .create(("job", job.id.to_string()))
            .content(JobWrite::from_job(job)?)
            .await?;

        record
            .map(|_| ())
            .ok_or_else(|| DbError::Query("Failed to create job".into()))
    }

    /// Get a job by ID.
    pub async fn get(id: JobId) -> Result<Job, DbError> {
        let db = get_db()?;

        let record: Option<StoredRecord> = db.select(("job", id.to_string())).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Job {} does not exist", id)))?
            .decode()
    }

    /// Replace a stored job.
    pub async fn update(job: &Job) -> Result<(), DbError> {
        let db = get_db()?;

        let record: Option<StoredRecord> = db
            .update(("job", job.id.to_string()))
            .content(JobWrite::from_job(job)?)
            .await?;

        record
            .map(|_| ())
            .ok_or_else(|| DbError::NotFound(format!("Job {} does not exist", job.id)))
    }

    /// Delete a job.
    pub async fn delete(id: JobId) -> Result<(), DbError> {
        let db = get_db()?;

        let record: Option<StoredRecord> = db.delete(("job", id.to_string())).await?;

        record
            .map(|_| ())
            .ok_or_else(|| DbError::NotFound(format!("Job {} does not exist", id)))
    }

    /// List jobs with optional filtering, oldest first.
    pub async fn find(filter: &JobFilter) -> Result<Vec<Job>, DbError> {
        let db = get_db()?;

        let mut conditions = Vec::new();
        let mut bindings: Vec<(&str, serde_json::Value)> = Vec::new();

        if !filter.statuses.is_empty() {
            conditions.push("status IN $statuses");
            let statuses: Vec<&str> = filter.statuses.iter().map(|s| s.as_str()).collect();
            bindings.push(("statuses", serde_json::json!(statuses)));
        }

        if let Some(job_type) = filter.job_type {
            conditions.push("job_type = $job_type");
            bindings.push(("job_type", serde_json::json!(job_type.as_str())));
        }

        if let Some(variant_id) = &filter.variant_id {
            conditions.push("variant_id = $variant_id");
            bindings.push(("variant_id", serde_json::json!(variant_id.as_str())));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit_clause = filter
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let query = format!(
            "SELECT data, ulid FROM job {} ORDER BY ulid ASC {}",
            where_clause, limit_clause
        );

        let mut result = db.query(&query);

        for (name, value) in bindings {
            result = result.bind((name, value));
        }

        let mut response = result.await?;
        let records: Vec<StoredRecord> = response.take(0)?;

        decode_all(records)
    }
}
