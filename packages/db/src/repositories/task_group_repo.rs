//! Task group repository.

use serde::Serialize;
use transfer_core::{JobId, TaskGroup, TaskGroupId};

use super::StoredRecord;
use crate::{DbError, get_db};

/// Repository for task group persistence operations.
pub struct TaskGroupRepository;

#[derive(Debug, Serialize)]
struct TaskGroupWrite {
    job_id: String,
    pipeline_id: String,
    data: String,
}

impl TaskGroupWrite {
    fn from_group(group: &TaskGroup) -> Result<Self, DbError> {
        Ok(Self {
            job_id: group.job_id.to_string(),
            pipeline_id: group.pipeline_id.to_string(),
            data: serde_json::to_string(group)?,
        })
    }
}

impl TaskGroupRepository {
    pub async fn create(group: &TaskGroup) -> Result<(), DbError> {
        let db = get_db()?;

        let record: Option<StoredRecord> = db
            .create(("task_group", group.id.to_string()))
            .content(TaskGroupWrite::from_group(group)?)
            .await?;

        record
            .map(|_| ())
            .ok_or_else(|| DbError::Query("Failed to create task group".into()))
    }

    pub async fn get(id: TaskGroupId) -> Result<TaskGroup, DbError> {
        let db = get_db()?;

        let record: Option<StoredRecord> = db.select(("task_group", id.to_string())).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Task group {} does not exist", id)))?
            .decode()
    }

    pub async fn update(group: &TaskGroup) -> Result<(), DbError> {
        let db = get_db()?;

        let record: Option<StoredRecord> = db
            .update(("task_group", group.id.to_string()))
            .content(TaskGroupWrite::from_group(group)?)
            .await?;

        record
            .map(|_| ())
            .ok_or_else(|| DbError::NotFound(format!("Task group {} does not exist", group.id)))
    }

    pub async fn delete_for_job(job_id: JobId) -> Result<(), DbError> {
        let db = get_db()?;

        db.query("DELETE task_group WHERE job_id = $job_id")
            .bind(("job_id", job_id.to_string()))
            .await?
            .check()?;

        Ok(())
    }
}
