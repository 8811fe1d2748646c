//! Repository implementations for database operations.

mod job_repo;
mod pipeline_repo;
mod task_group_repo;
mod task_repo;
mod worker_repo;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::DbError;

pub use job_repo::JobRepository;
pub use pipeline_repo::PipelineRepository;
pub use task_group_repo::TaskGroupRepository;
pub use task_repo::TaskRepository;
pub use worker_repo::WorkerRepository;

/// The part of a stored record that holds the domain value.
#[derive(Debug, Deserialize)]
struct StoredRecord {
    data: String,
}

impl StoredRecord {
    fn decode<T: DeserializeOwned>(self) -> Result<T, DbError> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

fn decode_all<T: DeserializeOwned>(records: Vec<StoredRecord>) -> Result<Vec<T>, DbError> {
    records.into_iter().map(StoredRecord::decode).collect()
}

