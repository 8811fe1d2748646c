//! Task groups and status aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ulid_id;
use crate::job::JobId;
use crate::pipeline::{PipelineId, StageKind};
use crate::task::TaskStatus;

ulid_id!(
    /// Unique identifier for a task group.
    TaskGroupId
);

/// A set of tasks created by one pipeline stage, reported back as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroup {
    pub id: TaskGroupId,
    pub job_id: JobId,
    pub pipeline_id: PipelineId,
    /// Stage that receives callbacks for this group.
    pub stage: StageKind,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskGroup {
    pub fn new(job_id: JobId, pipeline_id: PipelineId, stage: StageKind) -> Self {
        let now = Utc::now();
        Self {
            id: TaskGroupId::new(),
            job_id,
            pipeline_id,
            stage,
            status: TaskStatus::Queued,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Aggregate task statuses into a group status.
///
/// Failures win (dirty over clean), then all-completed, then any executing.
/// A group with no tasks has nothing left to do.
pub fn aggregate_status<I>(statuses: I) -> TaskStatus
where
    I: IntoIterator<Item = TaskStatus>,
{
    let mut total = 0usize;
    let mut completed = 0usize;
    let mut executing = false;
    let mut dirty = false;
    let mut clean = false;

    for status in statuses {
        total += 1;
        match status {
            TaskStatus::Completed => completed += 1,
            TaskStatus::Executing => executing = true,
            TaskStatus::FailedDirty => dirty = true,
            TaskStatus::FailedClean => clean = true,
            TaskStatus::Queued => {}
        }
    }

    if dirty {
        TaskStatus::FailedDirty
    } else if clean {
        TaskStatus::FailedClean
    } else if completed == total {
        TaskStatus::Completed
    } else if executing {
        TaskStatus::Executing
    } else {
        TaskStatus::Queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn aggregation_rules() {
        assert_eq!(aggregate_status([Completed, Completed]), Completed);
        assert_eq!(aggregate_status([Completed, FailedDirty]), FailedDirty);
        assert_eq!(aggregate_status([Executing, Queued]), Executing);
        assert_eq!(aggregate_status([Queued, Queued]), Queued);
        assert_eq!(aggregate_status([FailedClean, Executing]), FailedClean);
        assert_eq!(aggregate_status([FailedClean, FailedDirty]), FailedDirty);
        assert_eq!(aggregate_status([Completed, Queued]), Queued);
        assert_eq!(aggregate_status([Completed, Executing]), Executing);
    }

    #[test]
    fn empty_group_is_complete() {
        assert_eq!(aggregate_status(std::iter::empty()), Completed);
    }
}
