//! In-process worker actor.
//!
//! Registers with the broker, polls for tasks within its free capacity and
//! runs them on registered handlers, reporting every result back.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorProcessingErr, ActorRef};
use transfer_core::{Capacity, Task, TaskId, TaskStatusUpdate, TaskType, Worker, WorkerId};

use crate::handler::{TaskHandlerRegistry, status_update};
use crate::messages::{BrokerMessage, WorkerMessage, call};

/// State for the worker actor.
pub struct WorkerActorState {
    pub worker_id: WorkerId,
    pub name: String,
    capacities: BTreeMap<TaskType, u32>,
    broker: ActorRef<BrokerMessage>,
    handlers: Arc<TaskHandlerRegistry>,
    /// Tasks handed to a handler and not yet reported.
    running: HashMap<TaskId, TaskType>,
    rpc_timeout: Duration,
}

impl WorkerActorState {
    /// Capacity still free per task type, limited to types with a handler.
    fn free_capacity(&self) -> Vec<Capacity> {
        self.capacities
            .iter()
            .filter(|(task_type, _)| self.handlers.has_handler(**task_type))
            .filter_map(|(task_type, slots)| {
                let busy = self.running.values().filter(|t| *t == task_type).count() as u32;
                let free = slots.saturating_sub(busy);
                (free > 0).then(|| Capacity::new(*task_type, free))
            })
            .collect()
    }

    fn start(&mut self, myself: &ActorRef<WorkerMessage>, task: Task) {
        let task_id = task.id;
        let task_type = task.task_type();
        let Some(handler) = self.handlers.get(task_type) else {
            let _ = myself.send_message(WorkerMessage::TaskFinished {
                task_id,
                task_type,
                update: TaskStatusUpdate::failed(false, format!("No handler for {}", task_type)),
            });
            return;
        };

        tracing::debug!(worker = %self.name, %task_id, %task_type, "Starting task");
        self.running.insert(task_id, task_type);
        let myself = myself.clone();
        tokio::spawn(async move {
            let update = status_update(handler.handle(&task).await);
            if let Err(e) = myself.send_message(WorkerMessage::TaskFinished {
                task_id,
                task_type,
                update,
            }) {
                tracing::warn!(%task_id, "Worker stopped before task finished: {}", e);
            }
        });
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub name: String,
    pub capacities: Vec<Capacity>,
    pub broker: ActorRef<BrokerMessage>,
    pub handlers: Arc<TaskHandlerRegistry>,
    pub poll_interval: Duration,
    pub rpc_timeout: Duration,
}

/// Worker actor that executes tasks with local handlers.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let worker = Worker::new(args.name.clone(), args.capacities);
        let worker = call(
            &args.broker,
            |reply| BrokerMessage::RegisterWorker { worker, reply },
            args.rpc_timeout,
        )
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to register worker: {}", e)))?;
        tracing::info!(worker_id = %worker.id, "Starting worker: {}", args.name);
        let capacities = worker.capacity_map();

        let poller = myself.clone();
        let poll_interval = args.poll_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                interval.tick().await;
                if poller.send_message(WorkerMessage::Poll).is_err() {
                    break;
                }
            }
        });

        Ok(WorkerActorState {
            worker_id: worker.id,
            name: args.name,
            capacities,
            broker: args.broker,
            handlers: args.handlers,
            running: HashMap::new(),
            rpc_timeout: args.rpc_timeout,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let worker_id = state.worker_id;
        if let Err(e) = call(
            &state.broker,
            |reply| BrokerMessage::UnregisterWorker { worker_id, reply },
            state.rpc_timeout,
        )
        .await
        {
            tracing::warn!(%worker_id, "Failed to unregister worker: {}", e);
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                let requested = state.free_capacity();
                if requested.is_empty() {
                    return Ok(());
                }
                let worker_id = state.worker_id;
                match call(
                    &state.broker,
                    |reply| BrokerMessage::NextTasks {
                        worker_id,
                        requested,
                        reply,
                    },
                    state.rpc_timeout,
                )
                .await
                {
                    Ok(tasks) => {
                        for task in tasks {
                            state.start(&myself, task);
                        }
                    }
                    Err(e) => tracing::warn!(%worker_id, "Failed to poll for tasks: {}", e),
                }
            }

            WorkerMessage::TaskFinished {
                task_id,
                task_type,
                update,
            } => {
                state.running.remove(&task_id);
                tracing::debug!(%task_id, %task_type, status = %update.status, "Task finished");
                if let Err(e) = call(
                    &state.broker,
                    |reply| BrokerMessage::TaskStatus {
                        task_id,
                        update,
                        reply,
                    },
                    state.rpc_timeout,
                )
                .await
                {
                    tracing::warn!(%task_id, "Failed to report task status: {}", e);
                }
            }

            WorkerMessage::Running { reply } => {
                let _ = reply.send(state.running.len());
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.name);
                myself.stop(None);
            }
        }

        Ok(())
    }
}
