//! Task repository, including the broker's compare-and-set claim.

use serde::{Deserialize, Serialize};
use transfer_core::{
    JobId, Task, TaskGroupId, TaskId, TaskStatus, TaskStatusUpdate, TaskType, WorkerId,
};

use super::{StoredRecord, decode_all};
use crate::{DbError, get_db};

/// Repository for task persistence operations.
pub struct TaskRepository;

#[derive(Debug, Serialize)]
struct TaskWrite {
    ulid: String,
    status: String,
    task_type: String,
    priority: i64,
    job_id: String,
    task_group_id: String,
    worker_id: Option<String>,
    data: String,
}

impl TaskWrite {
    fn from_task(task: &Task) -> Result<Self, DbError> {
        Ok(Self {
            ulid: task.id.to_string(),
            status: task.status.as_str().to_string(),
            task_type: task.task_type().as_str().to_string(),
            priority: i64::from(task.priority),
            job_id: task.job_id.to_string(),
            task_group_id: task.task_group_id.to_string(),
            worker_id: task.worker_id.map(|w| w.to_string()),
            data: serde_json::to_string(task)?,
        })
    }
}

impl TaskRepository {
    /// Create tasks, one record each.
    pub async fn create_many(tasks: &[Task]) -> Result<(), DbError> {
        let db = get_db()?;

        for task in tasks {
            let record: Option<StoredRecord> = db
                .create(("task", task.id.to_string()))
                .content(TaskWrite::from_task(task)?)
                .await?;
            if record.is_none() {
                return Err(DbError::Query(format!("Failed to create task {}", task.id)));
            }
        }

        Ok(())
    }

    pub async fn get(id: TaskId) -> Result<Task, DbError> {
        let db = get_db()?;

        let record: Option<StoredRecord> = db.select(("task", id.to_string())).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Task {} does not exist", id)))?
            .decode()
    }

    pub async fn update(task: &Task) -> Result<(), DbError> {
        let db = get_db()?;

        let record: Option<StoredRecord> = db
            .update(("task", task.id.to_string()))
            .content(TaskWrite::from_task(task)?)
            .await?;

        record
            .map(|_| ())
            .ok_or_else(|| DbError::NotFound(format!("Task {} does not exist", task.id)))
    }

    pub async fn for_group(task_group_id: TaskGroupId) -> Result<Vec<Task>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                SELECT data, ulid FROM task
                WHERE task_group_id = $task_group_id
                ORDER BY ulid ASC
                "#,
            )
            .bind(("task_group_id", task_group_id.to_string()))
            .await?;

        let records: Vec<StoredRecord> = result.take(0)?;

        decode_all(records)
    }

    /// Queued tasks of a type by priority, then creation order.
    pub async fn queued(task_type: TaskType, limit: usize) -> Result<Vec<Task>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                SELECT data, priority, ulid FROM task
                WHERE status = "QUEUED" AND task_type = $task_type
                ORDER BY priority DESC, ulid ASC
                LIMIT $limit
                "#,
            )
            .bind(("task_type", task_type.as_str().to_string()))
            .bind(("limit", limit as i64))
            .await?;

        let records: Vec<StoredRecord> = result.take(0)?;

        decode_all(records)
    }

    /// Assign a task to a worker if, and only if, it is still queued.
    pub async fn claim(id: TaskId, worker_id: WorkerId) -> Result<Option<Task>, DbError> {
        let mut task = Self::get(id).await?;
        if task.status != TaskStatus::Queued {
            return Ok(None);
        }
        task.assign(worker_id);
        Self::replace_if_queued(&task).await
    }

    /// Fail a task clean if, and only if, no worker has claimed it yet.
    pub async fn withdraw(id: TaskId, message: &str) -> Result<bool, DbError> {
        let mut task = Self::get(id).await?;
        if task.status != TaskStatus::Queued {
            return Ok(false);
        }
        task.finish(TaskStatusUpdate::failed(false, message));
        Ok(Self::replace_if_queued(&task).await?.is_some())
    }

    /// The status check and the write happen in one UPDATE statement.
    async fn replace_if_queued(task: &Task) -> Result<Option<Task>, DbError> {
        let db = get_db()?;
        let mut result = db
            .query(
                r#"
                UPDATE type::thing("task", $id)
                SET status = $status, worker_id = $worker_id, data = $data
                WHERE status = "QUEUED"
                RETURN AFTER
                "#,
            )
            .bind(("id", task.id.to_string()))
            .bind(("status", task.status.as_str().to_string()))
            .bind(("worker_id", task.worker_id.map(|w| w.to_string())))
            .bind(("data", serde_json::to_string(task)?))
            .await?;

        let records: Vec<StoredRecord> = result.take(0)?;

        match records.into_iter().next() {
            Some(record) => Ok(Some(record.decode()?)),
            None => Ok(None),
        }
    }

    /// Count tasks of a type executing on a worker.
    pub async fn count_executing(worker_id: WorkerId, task_type: TaskType) -> Result<usize, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                SELECT count() AS count FROM task
                WHERE status = "EXECUTING" AND worker_id = $worker_id AND task_type = $task_type
                GROUP ALL
                "#,
            )
            .bind(("worker_id", worker_id.to_string()))
            .bind(("task_type", task_type.as_str().to_string()))
            .await?;

        #[derive(Deserialize)]
        struct Count {
            count: i64,
        }

        let counts: Vec<Count> = result.take(0)?;

        Ok(counts.first().map(|c| c.count.max(0) as usize).unwrap_or(0))
    }

    pub async fn delete_for_job(job_id: JobId) -> Result<(), DbError> {
        let db = get_db()?;

        db.query("DELETE task WHERE job_id = $job_id")
            .bind(("job_id", job_id.to_string()))
            .await?
            .check()?;

        Ok(())
    }
}
