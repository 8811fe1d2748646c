//! Task broker actor.
//!
//! Hands queued tasks to workers within their registered capacity, applies
//! worker status reports and keeps task group status in step with its
//! tasks. Group changes are forwarded to the engine.
//!
//! Every claim goes through this actor's mailbox and a compare-and-set in
//! the store, so a task is never given to two workers.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use transfer_core::{
    Capacity, OrchestrationError, OrchestrationEvent, Result, Stores, Task, TaskGroupCallback,
    TaskGroupId, TaskId, TaskStatus, TaskStatusUpdate, TaskType, Worker, WorkerId,
    aggregate_status, free_slots,
};

use crate::messages::{BrokerMessage, EngineMessage};

/// Broker actor arguments.
pub struct BrokerArgs {
    pub stores: Stores,
    pub engine: ActorRef<EngineMessage>,
    pub event_tx: broadcast::Sender<OrchestrationEvent>,
}

/// State for the broker actor.
pub struct BrokerState {
    stores: Stores,
    engine: ActorRef<EngineMessage>,
    event_tx: broadcast::Sender<OrchestrationEvent>,
}

impl BrokerState {
    async fn register(&self, worker: Worker) -> Result<Worker> {
        if worker.name.trim().is_empty() {
            return Err(OrchestrationError::invalid("Worker name must not be empty"));
        }
        self.stores.workers.register_worker(&worker).await?;
        tracing::info!(
            worker_id = %worker.id,
            name = %worker.name,
            "Registered worker with {} capacities",
            worker.capacities.len()
        );
        let _ = self.event_tx.send(OrchestrationEvent::WorkerRegistered {
            worker_id: worker.id,
            name: worker.name.clone(),
            timestamp: Utc::now(),
        });
        Ok(worker)
    }

    async fn unregister(&self, worker_id: WorkerId) -> Result<()> {
        self.stores.workers.unregister_worker(worker_id).await?;
        tracing::info!(%worker_id, "Unregistered worker");
        let _ = self.event_tx.send(OrchestrationEvent::WorkerUnregistered {
            worker_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn next_tasks(&self, worker_id: WorkerId, requested: Vec<Capacity>) -> Result<Vec<Task>> {
        let worker = self.stores.workers.get_worker(worker_id).await?;

        let mut wanted: BTreeMap<TaskType, u32> = BTreeMap::new();
        for capacity in requested {
            let slots = wanted.entry(capacity.task_type).or_default();
            *slots = slots.saturating_add(capacity.slots);
        }

        let mut assigned = Vec::new();
        let mut touched: BTreeSet<TaskGroupId> = BTreeSet::new();
        for (task_type, slots) in wanted {
            let executing = self.stores.tasks.count_executing(worker_id, task_type).await?;
            let limit = free_slots(worker.slots_for(task_type), executing).min(slots as usize);
            if limit == 0 {
                continue;
            }
            for candidate in self.stores.tasks.queued_tasks(task_type, limit).await? {
                if let Some(task) = self.stores.tasks.claim_task(candidate.id, worker_id).await? {
                    touched.insert(task.task_group_id);
                    assigned.push(task);
                }
            }
        }

        // the claims are committed, so the worker must learn about them
        for group_id in touched {
            if let Err(e) = self.refresh_group(group_id).await {
                tracing::warn!(task_group_id = %group_id, "Failed to refresh task group: {}", e);
            }
        }
        if !assigned.is_empty() {
            tracing::debug!(%worker_id, "Assigned {} tasks", assigned.len());
            let _ = self.event_tx.send(OrchestrationEvent::TasksAssigned {
                worker_id,
                task_ids: assigned.iter().map(|t| t.id).collect(),
                timestamp: Utc::now(),
            });
        }
        Ok(assigned)
    }

    async fn task_status(&self, task_id: TaskId, update: TaskStatusUpdate) -> Result<()> {
        let mut task = self.stores.tasks.get_task(task_id).await?;
        if task.status.is_terminal() {
            tracing::debug!(%task_id, status = %task.status, "Ignoring report for a finished task");
            return Ok(());
        }
        if task.status != TaskStatus::Executing {
            return Err(OrchestrationError::not_updateable(format!(
                "Task {} is {} and can not be updated",
                task_id, task.status
            )));
        }

        match update.status {
            TaskStatus::Executing => Ok(()),
            TaskStatus::Queued => Err(OrchestrationError::not_updateable(format!(
                "Task {} can not be returned to QUEUED",
                task_id
            ))),
            status => {
                task.finish(update);
                self.stores.tasks.update_task(&task).await?;
                if status.is_failed() {
                    tracing::warn!(
                        %task_id,
                        %status,
                        "Task failed: {}",
                        task.message.as_deref().unwrap_or("no message")
                    );
                } else {
                    tracing::debug!(%task_id, "Task completed");
                }
                let _ = self.event_tx.send(OrchestrationEvent::TaskFinished {
                    job_id: task.job_id,
                    task_id,
                    status,
                    timestamp: Utc::now(),
                });
                self.refresh_group(task.task_group_id).await
            }
        }
    }

    /// Recompute a group's status from its tasks and tell the engine when
    /// it changed.
    async fn refresh_group(&self, group_id: TaskGroupId) -> Result<()> {
        let mut group = self.stores.task_groups.get_task_group(group_id).await?;
        let tasks = self.stores.tasks.tasks_for_group(group_id).await?;
        let status = aggregate_status(tasks.iter().map(|t| t.status));
        if status == group.status {
            return Ok(());
        }

        tracing::debug!(
            task_group_id = %group_id,
            "Task group {} -> {}",
            group.status,
            status
        );
        group.status = status;
        group.updated_at = Utc::now();
        self.stores.task_groups.update_task_group(&group).await?;

        let _ = self.event_tx.send(OrchestrationEvent::TaskGroupStatusChanged {
            job_id: group.job_id,
            task_group_id: group.id,
            status,
            timestamp: Utc::now(),
        });
        let callback = TaskGroupCallback {
            task_group_id: group.id,
            pipeline_id: group.pipeline_id,
            job_id: group.job_id,
            status,
        };
        if let Err(e) = self
            .engine
            .send_message(EngineMessage::TaskGroupCallback(callback))
        {
            tracing::warn!(task_group_id = %group_id, "Failed to notify engine: {}", e);
        }
        Ok(())
    }
}

/// Broker actor that dispatches tasks to workers.
pub struct TaskBroker;

impl Actor for TaskBroker {
    type Msg = BrokerMessage;
    type State = BrokerState;
    type Arguments = BrokerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> std::result::Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting task broker");
        Ok(BrokerState {
            stores: args.stores,
            engine: args.engine,
            event_tx: args.event_tx,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        match message {
            BrokerMessage::RegisterWorker { worker, reply } => {
                let _ = reply.send(state.register(worker).await);
            }

            BrokerMessage::UnregisterWorker { worker_id, reply } => {
                let _ = reply.send(state.unregister(worker_id).await);
            }

            BrokerMessage::NextTasks {
                worker_id,
                requested,
                reply,
            } => {
                let _ = reply.send(state.next_tasks(worker_id, requested).await);
            }

            BrokerMessage::TaskStatus {
                task_id,
                update,
                reply,
            } => {
                let _ = reply.send(state.task_status(task_id, update).await);
            }
        }

        Ok(())
    }
}
