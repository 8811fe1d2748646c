//! Tasks: the unit of work a worker executes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::{RepositoryFileId, RepositoryId};
use crate::ids::ulid_id;
use crate::job::JobId;
use crate::manifest::{ManifestParseOutput, ManifestType};
use crate::multipart::ByteRange;
use crate::task_group::TaskGroupId;
use crate::transfer::{Hash, HashAlgorithm, TransferFileGroup, TransferItemId};
use crate::worker::WorkerId;

ulid_id!(
    /// Unique identifier for a task. Ordering follows creation order.
    TaskId
);

/// Kind of work a task asks a worker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Transfer,
    Hash,
    S3Upload,
    GlacierUpload,
    Restore,
    ManifestTransfer,
    Delete,
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::Transfer,
        TaskType::Hash,
        TaskType::S3Upload,
        TaskType::GlacierUpload,
        TaskType::Restore,
        TaskType::ManifestTransfer,
        TaskType::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Transfer => "TRANSFER",
            TaskType::Hash => "HASH",
            TaskType::S3Upload => "S3_UPLOAD",
            TaskType::GlacierUpload => "GLACIER_UPLOAD",
            TaskType::Restore => "RESTORE",
            TaskType::ManifestTransfer => "MANIFEST_TRANSFER",
            TaskType::Delete => "DELETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Queued,
    Executing,
    Completed,
    /// Failed after partially writing to a destination.
    FailedDirty,
    /// Failed without side effects.
    FailedClean,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::FailedDirty | TaskStatus::FailedClean
        )
    }

    pub fn is_failed(self) -> bool {
        matches!(self, TaskStatus::FailedDirty | TaskStatus::FailedClean)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Executing => "EXECUTING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::FailedDirty => "FAILED_DIRTY",
            TaskStatus::FailedClean => "FAILED_CLEAN",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific task configuration. The variant determines the task type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskConfiguration {
    /// Copy a group of files to a filesystem location.
    Transfer { group: TransferFileGroup },
    /// Multipart upload of a group of files to an object store.
    S3Upload { group: TransferFileGroup },
    /// Multipart upload of a group of files to an archival store.
    GlacierUpload { group: TransferFileGroup },
    /// Hash byte ranges of one file, one hash per algorithm per range.
    /// Without ranges the worker splits the object into `part_size` parts.
    Hash {
        transfer_file_id: TransferItemId,
        source_uri: String,
        algorithms: Vec<HashAlgorithm>,
        part_size: u64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ranges: Vec<ByteRange>,
    },
    /// Bring an archived object back online.
    Restore {
        transfer_file_id: TransferItemId,
        source_uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        archive_id: Option<String>,
        repository_id: RepositoryId,
    },
    /// Fetch and parse one manifest.
    ManifestTransfer {
        manifest_file_id: TransferItemId,
        source_uri: String,
        manifest_type: ManifestType,
    },
    /// Remove one file from a repository.
    Delete {
        repository_file_id: RepositoryFileId,
        repository_id: RepositoryId,
        uri: String,
    },
}

impl TaskConfiguration {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskConfiguration::Transfer { .. } => TaskType::Transfer,
            TaskConfiguration::S3Upload { .. } => TaskType::S3Upload,
            TaskConfiguration::GlacierUpload { .. } => TaskType::GlacierUpload,
            TaskConfiguration::Hash { .. } => TaskType::Hash,
            TaskConfiguration::Restore { .. } => TaskType::Restore,
            TaskConfiguration::ManifestTransfer { .. } => TaskType::ManifestTransfer,
            TaskConfiguration::Delete { .. } => TaskType::Delete,
        }
    }

    /// The file group moved by a transfer-like task.
    pub fn transfer_group(&self) -> Option<&TransferFileGroup> {
        match self {
            TaskConfiguration::Transfer { group }
            | TaskConfiguration::S3Upload { group }
            | TaskConfiguration::GlacierUpload { group } => Some(group),
            _ => None,
        }
    }
}

/// Per-file result of a transfer task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferredFile {
    pub transfer_file_id: TransferItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_hashes: Vec<Hash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_id: Option<String>,
}

/// Type-specific output a worker reports with a completed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOutput {
    Transfer { files: Vec<TransferredFile> },
    Hash { hashes: Vec<Hash> },
    Restore { restored_uri: String },
    ManifestTransfer(ManifestParseOutput),
    Delete,
}

/// A status report from a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusUpdate {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskStatusUpdate {
    pub fn completed(output: TaskOutput) -> Self {
        Self {
            status: TaskStatus::Completed,
            output: Some(output),
            message: None,
        }
    }

    pub fn failed(dirty: bool, message: impl Into<String>) -> Self {
        Self {
            status: if dirty {
                TaskStatus::FailedDirty
            } else {
                TaskStatus::FailedClean
            },
            output: None,
            message: Some(message.into()),
        }
    }

    pub fn progress() -> Self {
        Self {
            status: TaskStatus::Executing,
            output: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub priority: i32,
    pub configuration: TaskConfiguration,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    pub task_group_id: TaskGroupId,
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    /// Failure message reported by the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        job_id: JobId,
        task_group_id: TaskGroupId,
        priority: i32,
        description: impl Into<String>,
        configuration: TaskConfiguration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            description: description.into(),
            priority,
            configuration,
            status: TaskStatus::Queued,
            output: None,
            task_group_id,
            job_id,
            worker_id: None,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.configuration.task_type()
    }

    /// Mark as claimed by a worker.
    pub fn assign(&mut self, worker_id: WorkerId) {
        self.status = TaskStatus::Executing;
        self.worker_id = Some(worker_id);
        self.updated_at = Utc::now();
    }

    /// Apply a terminal worker report.
    pub fn finish(&mut self, update: TaskStatusUpdate) {
        self.status = update.status;
        self.output = update.output;
        self.message = update.message;
        self.updated_at = Utc::now();
    }
}

/// Order in which queued tasks are handed out: priority descending, then
/// creation order.
pub fn dispatch_order(a: &Task, b: &Task) -> std::cmp::Ordering {
    b.priority.cmp(&a.priority).then(a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delete_task(priority: i32) -> Task {
        Task::new(
            JobId::new(),
            TaskGroupId::new(),
            priority,
            "delete",
            TaskConfiguration::Delete {
                repository_file_id: RepositoryFileId::from("rf"),
                repository_id: RepositoryId::from("repo"),
                uri: "file:///repo/a".into(),
            },
        )
    }

    #[test]
    fn task_type_follows_configuration() {
        let task = delete_task(5);
        assert_eq!(task.task_type(), TaskType::Delete);

        let group = TransferFileGroup::new(None, Vec::new());
        let upload = TaskConfiguration::GlacierUpload { group };
        assert_eq!(upload.task_type(), TaskType::GlacierUpload);
        assert!(upload.transfer_group().is_some());
    }

    #[test]
    fn configuration_tag_matches_task_type_name() {
        for configuration in [
            TaskConfiguration::S3Upload {
                group: TransferFileGroup::new(None, Vec::new()),
            },
            TaskConfiguration::ManifestTransfer {
                manifest_file_id: TransferItemId::new(),
                source_uri: "file:///m.m3u8".into(),
                manifest_type: ManifestType::Hls,
            },
        ] {
            let json = serde_json::to_value(&configuration).unwrap();
            assert_eq!(json["type"], configuration.task_type().as_str());
        }
        assert_eq!(TaskType::parse("GLACIER_UPLOAD"), Some(TaskType::GlacierUpload));
        assert_eq!(TaskType::parse("nope"), None);
    }

    #[test]
    fn dispatch_prefers_priority_then_age() {
        let old_low = delete_task(1);
        let old_high = delete_task(9);
        let new_high = delete_task(9);
        let mut tasks = vec![new_high.clone(), old_low.clone(), old_high.clone()];
        tasks.sort_by(dispatch_order);
        assert_eq!(
            tasks.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![old_high.id, new_high.id, old_low.id]
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Executing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::FailedDirty.is_failed());
        assert!(TaskStatus::FailedClean.is_terminal());
    }

    #[test]
    fn output_round_trips() {
        let update = TaskStatusUpdate::completed(TaskOutput::Restore {
            restored_uri: "file:///restored/a".into(),
        });
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(serde_json::from_str::<TaskStatusUpdate>(&json).unwrap(), update);
    }
}
