//! Handlers that execute tasks against `file://` and `s3://` storage from
//! inside the orchestrator process.

use repository::StorageLocation;
use transfer_core::{
    OrchestrationError, Task, TaskConfiguration, TaskOutput, TaskType, TransferredFile,
};

use crate::handler::{HandlerFuture, TaskFailure, TaskHandler, TaskHandlerRegistry};

/// Copies every file of a transfer group from its source to its destination.
///
/// A failure after the first written file is reported dirty.
pub struct StorageTransferHandler {
    task_type: TaskType,
}

impl StorageTransferHandler {
    /// Handle `task_type`, which must carry a transfer file group.
    pub fn new(task_type: TaskType) -> Self {
        Self { task_type }
    }
}

impl TaskHandler for StorageTransferHandler {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn handle(&self, task: &Task) -> HandlerFuture {
        let group = task.configuration.transfer_group().cloned();
        let task_id = task.id;
        Box::pin(async move {
            let group = group.ok_or_else(|| {
                TaskFailure::clean(format!("Task {} carries no transfer group", task_id))
            })?;

            let mut files = Vec::with_capacity(group.files.len());
            for file in &group.files {
                let failure = |e: repository::RepositoryError| {
                    let message = format!("{} -> {}: {}", file.source_uri, file.destination_uri, e);
                    if files.is_empty() {
                        TaskFailure::clean(message)
                    } else {
                        TaskFailure::dirty(message)
                    }
                };
                let source = StorageLocation::for_uri(&file.source_uri).map_err(failure)?;
                let destination = StorageLocation::for_uri(&file.destination_uri).map_err(failure)?;
                let size = source.copy_to(&destination).await.map_err(failure)?;
                tracing::debug!(%task_id, uri = %file.destination_uri, size, "Copied file");
                files.push(TransferredFile {
                    transfer_file_id: file.id,
                    size: Some(size),
                    output_hashes: Vec::new(),
                    archive_id: None,
                });
            }
            Ok(TaskOutput::Transfer { files })
        })
    }
}

/// Deletes repository objects. Objects that are already gone count as deleted.
pub struct StorageDeleteHandler;

impl TaskHandler for StorageDeleteHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Delete
    }

    fn handle(&self, task: &Task) -> HandlerFuture {
        let uri = match &task.configuration {
            TaskConfiguration::Delete { uri, .. } => Some(uri.clone()),
            _ => None,
        };
        let task_id = task.id;
        Box::pin(async move {
            let uri = uri
                .ok_or_else(|| TaskFailure::clean(format!("Task {} is not a delete", task_id)))?;
            let location = StorageLocation::for_uri(&uri)
                .map_err(|e| TaskFailure::clean(format!("{}: {}", uri, e)))?;
            match location.delete().await.map_err(OrchestrationError::from) {
                Ok(()) => {}
                Err(OrchestrationError::NotFound(_)) => {
                    tracing::debug!(%task_id, %uri, "Object already deleted");
                }
                Err(e) => return Err(TaskFailure::dirty(format!("{}: {}", uri, e))),
            }
            Ok(TaskOutput::Delete)
        })
    }
}

/// Handlers for everything the process can do without external services:
/// filesystem and S3 copies plus deletes.
pub fn local_handlers() -> TaskHandlerRegistry {
    let mut registry = TaskHandlerRegistry::new();
    registry.register(StorageTransferHandler::new(TaskType::Transfer));
    registry.register(StorageTransferHandler::new(TaskType::S3Upload));
    registry.register(StorageDeleteHandler);
    registry
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use transfer_core::{
        JobId, RepositoryFileId, RepositoryId, TaskGroupId, TransferFile, TransferFileGroup,
    };
    use url::Url;

    use super::*;

    fn file_uri(path: &Path) -> String {
        Url::from_file_path(path).unwrap().to_string()
    }

    fn task(configuration: TaskConfiguration) -> Task {
        Task::new(JobId::new(), TaskGroupId::new(), 0, "test", configuration)
    }

    #[tokio::test]
    async fn copies_every_file_of_the_group() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), b"segment-a").unwrap();
        std::fs::write(dir.path().join("b.ts"), b"b").unwrap();

        let files = ["a.ts", "b.ts"]
            .iter()
            .map(|name| {
                TransferFile::new(
                    file_uri(&dir.path().join(name)),
                    file_uri(&dir.path().join("out").join(name)),
                    name.to_string(),
                )
            })
            .collect();
        let group = TransferFileGroup::new(None, files);
        let output = StorageTransferHandler::new(TaskType::Transfer)
            .handle(&task(TaskConfiguration::Transfer { group }))
            .await
            .unwrap();

        let TaskOutput::Transfer { files } = output else {
            panic!("expected transfer output");
        };
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].size, Some(9));
        assert_eq!(
            std::fs::read(dir.path().join("out/b.ts")).unwrap(),
            b"b".to_vec()
        );
    }

    #[tokio::test]
    async fn failure_after_a_written_file_is_dirty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), b"a").unwrap();

        let files = vec![
            TransferFile::new(
                file_uri(&dir.path().join("a.ts")),
                file_uri(&dir.path().join("out/a.ts")),
                "a.ts",
            ),
            TransferFile::new(
                file_uri(&dir.path().join("missing.ts")),
                file_uri(&dir.path().join("out/missing.ts")),
                "missing.ts",
            ),
        ];
        let group = TransferFileGroup::new(None, files);
        let failure = StorageTransferHandler::new(TaskType::Transfer)
            .handle(&task(TaskConfiguration::Transfer { group }))
            .await
            .unwrap_err();
        assert!(failure.dirty);
    }

    #[tokio::test]
    async fn deleting_a_missing_object_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v1/a.ts");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"a").unwrap();

        let delete = task(TaskConfiguration::Delete {
            repository_file_id: RepositoryFileId::from("rf"),
            repository_id: RepositoryId::from("fs"),
            uri: file_uri(&path),
        });
        assert_eq!(
            StorageDeleteHandler.handle(&delete).await.unwrap(),
            TaskOutput::Delete
        );
        assert!(!path.exists());
        assert_eq!(
            StorageDeleteHandler.handle(&delete).await.unwrap(),
            TaskOutput::Delete
        );
    }
}
