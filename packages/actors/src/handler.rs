//! Task handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use transfer_core::{Task, TaskOutput, TaskStatusUpdate, TaskType};

/// Why a handler gave up on a task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TaskFailure {
    /// Whether the handler may have left partial output behind.
    pub dirty: bool,
    pub message: String,
}

impl TaskFailure {
    pub fn clean(message: impl Into<String>) -> Self {
        Self {
            dirty: false,
            message: message.into(),
        }
    }

    pub fn dirty(message: impl Into<String>) -> Self {
        Self {
            dirty: true,
            message: message.into(),
        }
    }
}

/// Result type for task handlers.
pub type HandlerResult = Result<TaskOutput, TaskFailure>;

/// Future type for async task handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// The status report a handler result turns into.
pub fn status_update(result: HandlerResult) -> TaskStatusUpdate {
    match result {
        Ok(output) => TaskStatusUpdate::completed(output),
        Err(failure) => TaskStatusUpdate::failed(failure.dirty, failure.message),
    }
}

/// Trait for task handlers.
///
/// Implement this trait to define how tasks of a specific type are executed
/// by an in-process worker.
pub trait TaskHandler: Send + Sync + 'static {
    /// The task type this handler executes.
    fn task_type(&self) -> TaskType;

    /// Execute a task and return its output.
    fn handle(&self, task: &Task) -> HandlerFuture;
}

/// Registry for task handlers, keyed by task type.
#[derive(Default)]
pub struct TaskHandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any handler for the same type.
    pub fn register<H: TaskHandler>(&mut self, handler: H) {
        self.handlers.insert(handler.task_type(), Arc::new(handler));
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    pub fn has_handler(&self, task_type: TaskType) -> bool {
        self.handlers.contains_key(&task_type)
    }

    /// Registered task types in dispatch order.
    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }
}

/// A simple function-based task handler.
pub struct FnHandler<F>
where
    F: Fn(&Task) -> HandlerFuture + Send + Sync + 'static,
{
    task_type: TaskType,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Task) -> HandlerFuture + Send + Sync + 'static,
{
    pub fn new(task_type: TaskType, handler: F) -> Self {
        Self { task_type, handler }
    }
}

impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(&Task) -> HandlerFuture + Send + Sync + 'static,
{
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn handle(&self, task: &Task) -> HandlerFuture {
        (self.handler)(task)
    }
}

/// Helper macro for creating task handlers from async blocks.
#[macro_export]
macro_rules! task_handler {
    ($task_type:expr, |$task:ident| $body:expr) => {
        $crate::FnHandler::new($task_type, |$task: &transfer_core::Task| {
            let $task = $task.clone();
            Box::pin(async move { $body })
        })
    };
}

#[cfg(test)]
mod tests {
    use transfer_core::TaskStatus;

    use super::*;

    #[test]
    fn registry_is_keyed_by_task_type() {
        let mut registry = TaskHandlerRegistry::new();
        registry.register(FnHandler::new(TaskType::Delete, |_task: &Task| {
            Box::pin(async { Ok(TaskOutput::Delete) })
        }));
        registry.register(FnHandler::new(TaskType::Transfer, |_task: &Task| {
            Box::pin(async { Err(TaskFailure::clean("offline")) })
        }));

        assert!(registry.has_handler(TaskType::Delete));
        assert!(!registry.has_handler(TaskType::Hash));
        assert_eq!(
            registry.task_types(),
            vec![TaskType::Transfer, TaskType::Delete]
        );
    }

    #[test]
    fn failures_keep_their_kind() {
        let update = status_update(Err(TaskFailure::dirty("half written")));
        assert_eq!(update.status, TaskStatus::FailedDirty);
        assert_eq!(update.message.as_deref(), Some("half written"));

        let update = status_update(Ok(TaskOutput::Delete));
        assert_eq!(update.status, TaskStatus::Completed);
    }
}
