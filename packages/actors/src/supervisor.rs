//! Supervisor actor and the orchestrator handle.
//!
//! The supervisor owns the engine, the broker and the job manager as linked
//! children. [`Orchestrator`] is the cloneable front door callers use.

use std::sync::Arc;

use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;
use transfer_core::{
    Capacity, ContentManager, DeleteEvent, Job, JobFilter, JobId, JobStatus, LocationResolver,
    OrchestrationEvent, Stores, SubmitListener, Task, TaskId, TaskStatusUpdate, Worker, WorkerId,
};

use crate::broker_actor::{BrokerArgs, TaskBroker};
use crate::config::OrchestratorConfig;
use crate::engine_actor::{EngineArgs, PipelineEngine};
use crate::handler::TaskHandlerRegistry;
use crate::job_manager::{JobManager, JobManagerArgs};
use crate::messages::{
    ActorError, ActorResult, BrokerMessage, EngineMessage, JobManagerMessage, SupervisorMessage,
    WorkerMessage, call,
};
use crate::stages::StageEnv;
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Services the orchestrator calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub content: Arc<dyn ContentManager>,
    pub resolver: Arc<dyn LocationResolver>,
    pub submit_listeners: Vec<Arc<dyn SubmitListener>>,
}

impl Collaborators {
    pub fn new(content: Arc<dyn ContentManager>, resolver: Arc<dyn LocationResolver>) -> Self {
        Self {
            content,
            resolver,
            submit_listeners: Vec::new(),
        }
    }

    /// Add a check that runs before every job submission.
    pub fn with_submit_listener(mut self, listener: Arc<dyn SubmitListener>) -> Self {
        self.submit_listeners.push(listener);
        self
    }
}

/// References to the supervised actors.
#[derive(Debug, Clone)]
pub struct Children {
    pub engine: ActorRef<EngineMessage>,
    pub broker: ActorRef<BrokerMessage>,
    pub job_manager: ActorRef<JobManagerMessage>,
}

/// Supervisor actor arguments.
pub struct SupervisorArgs {
    pub config: OrchestratorConfig,
    pub stores: Stores,
    pub collaborators: Collaborators,
    pub event_tx: broadcast::Sender<OrchestrationEvent>,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    children: Children,
}

/// Supervisor actor that owns the orchestration actors.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting orchestrator supervisor");
        let env = StageEnv {
            content: args.collaborators.content,
            resolver: args.collaborators.resolver,
            config: args.config.clone(),
        };

        let (engine, _) = Actor::spawn_linked(
            None,
            PipelineEngine,
            EngineArgs {
                stores: args.stores.clone(),
                env,
                event_tx: args.event_tx.clone(),
            },
            myself.get_cell(),
        )
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn engine: {}", e)))?;

        let (broker, _) = Actor::spawn_linked(
            None,
            TaskBroker,
            BrokerArgs {
                stores: args.stores.clone(),
                engine: engine.clone(),
                event_tx: args.event_tx.clone(),
            },
            myself.get_cell(),
        )
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn broker: {}", e)))?;

        let (job_manager, _) = Actor::spawn_linked(
            None,
            JobManager,
            JobManagerArgs {
                stores: args.stores,
                engine: engine.clone(),
                submit_listeners: args.collaborators.submit_listeners,
                event_tx: args.event_tx,
                rpc_timeout: args.config.rpc_timeout(),
            },
            myself.get_cell(),
        )
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn job manager: {}", e)))?;

        engine.send_message(EngineMessage::AttachJobManager(job_manager.clone()))?;

        Ok(SupervisorState {
            children: Children {
                engine,
                broker,
                job_manager,
            },
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Children { reply } => {
                let _ = reply.send(state.children.clone());
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down orchestrator supervisor");
                state.children.job_manager.stop(None);
                state.children.broker.stop(None);
                state.children.engine.stop(None);
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                tracing::info!(actor_id = %cell.get_id(), "Child actor stopped: {:?}", reason);
            }
            SupervisionEvent::ActorFailed(cell, error) => {
                tracing::error!(actor_id = %cell.get_id(), "Child actor failed: {}", error);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Handle to a running orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    supervisor: ActorRef<SupervisorMessage>,
    children: Children,
    event_tx: broadcast::Sender<OrchestrationEvent>,
    config: OrchestratorConfig,
}

/// Start the supervisor and its children.
pub async fn start_orchestrator(
    config: OrchestratorConfig,
    stores: Stores,
    collaborators: Collaborators,
) -> ActorResult<Orchestrator> {
    let (event_tx, _) = broadcast::channel(config.event_capacity);
    let (supervisor, _handle) = Actor::spawn(
        None,
        Supervisor,
        SupervisorArgs {
            config: config.clone(),
            stores,
            collaborators,
            event_tx: event_tx.clone(),
        },
    )
    .await?;

    let children = match ractor::rpc::call(
        &supervisor,
        |reply| SupervisorMessage::Children { reply },
        Some(config.rpc_timeout()),
    )
    .await
    {
        Ok(ractor::rpc::CallResult::Success(children)) => children,
        Ok(_) => return Err(ActorError::Timeout),
        Err(e) => return Err(ActorError::Actor(format!("Failed to reach supervisor: {}", e))),
    };

    Ok(Orchestrator {
        supervisor,
        children,
        event_tx,
        config,
    })
}

impl Orchestrator {
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn children(&self) -> &Children {
        &self.children
    }

    /// Observe lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.event_tx.subscribe()
    }

    pub async fn create_job(&self, job: Job) -> ActorResult<Job> {
        call(
            &self.children.job_manager,
            |reply| JobManagerMessage::CreateJob {
                job: Box::new(job),
                reply,
            },
            self.config.rpc_timeout(),
        )
        .await
    }

    pub async fn update_job(&self, job: Job) -> ActorResult<Job> {
        call(
            &self.children.job_manager,
            |reply| JobManagerMessage::UpdateJob {
                job: Box::new(job),
                reply,
            },
            self.config.rpc_timeout(),
        )
        .await
    }

    pub async fn update_job_status(&self, job_id: JobId, status: JobStatus) -> ActorResult<Job> {
        call(
            &self.children.job_manager,
            |reply| JobManagerMessage::UpdateJobStatus {
                job_id,
                status,
                reply,
            },
            self.config.rpc_timeout(),
        )
        .await
    }

    pub async fn delete_job(&self, job_id: JobId, force: bool) -> ActorResult<()> {
        call(
            &self.children.job_manager,
            |reply| JobManagerMessage::DeleteJob {
                job_id,
                force,
                reply,
            },
            self.config.rpc_timeout(),
        )
        .await
    }

    pub async fn get_job(&self, job_id: JobId) -> ActorResult<Job> {
        call(
            &self.children.job_manager,
            |reply| JobManagerMessage::GetJob { job_id, reply },
            self.config.rpc_timeout(),
        )
        .await
    }

    pub async fn find_jobs(&self, filter: JobFilter) -> ActorResult<Vec<Job>> {
        call(
            &self.children.job_manager,
            |reply| JobManagerMessage::FindJobs { filter, reply },
            self.config.rpc_timeout(),
        )
        .await
    }

    /// Fails with `NotUpdateable` while a variant in `event` has active jobs.
    pub async fn check_delete(&self, event: DeleteEvent) -> ActorResult<()> {
        call(
            &self.children.job_manager,
            |reply| JobManagerMessage::CheckDelete { event, reply },
            self.config.rpc_timeout(),
        )
        .await
    }

    pub async fn register_worker(&self, worker: Worker) -> ActorResult<Worker> {
        call(
            &self.children.broker,
            |reply| BrokerMessage::RegisterWorker { worker, reply },
            self.config.rpc_timeout(),
        )
        .await
    }

    pub async fn unregister_worker(&self, worker_id: WorkerId) -> ActorResult<()> {
        call(
            &self.children.broker,
            |reply| BrokerMessage::UnregisterWorker { worker_id, reply },
            self.config.rpc_timeout(),
        )
        .await
    }

    pub async fn next_tasks(
        &self,
        worker_id: WorkerId,
        requested: Vec<Capacity>,
    ) -> ActorResult<Vec<Task>> {
        call(
            &self.children.broker,
            |reply| BrokerMessage::NextTasks {
                worker_id,
                requested,
                reply,
            },
            self.config.rpc_timeout(),
        )
        .await
    }

    pub async fn report_task_status(
        &self,
        task_id: TaskId,
        update: TaskStatusUpdate,
    ) -> ActorResult<()> {
        call(
            &self.children.broker,
            |reply| BrokerMessage::TaskStatus {
                task_id,
                update,
                reply,
            },
            self.config.rpc_timeout(),
        )
        .await
    }

    /// Spawn an in-process worker supervised alongside the orchestrator.
    pub async fn spawn_worker(
        &self,
        name: impl Into<String>,
        capacities: Vec<Capacity>,
        handlers: Arc<TaskHandlerRegistry>,
    ) -> ActorResult<ActorRef<WorkerMessage>> {
        let args = WorkerArgs {
            name: name.into(),
            capacities,
            broker: self.children.broker.clone(),
            handlers,
            poll_interval: self.config.worker_poll_interval(),
            rpc_timeout: self.config.rpc_timeout(),
        };
        let (worker, _) =
            Actor::spawn_linked(None, WorkerActor, args, self.supervisor.get_cell()).await?;
        Ok(worker)
    }

    /// Stop the supervisor and everything it owns.
    pub fn shutdown(&self) {
        if let Err(e) = self.supervisor.send_message(SupervisorMessage::Shutdown) {
            tracing::warn!("Orchestrator already stopped: {}", e);
        }
    }
}
