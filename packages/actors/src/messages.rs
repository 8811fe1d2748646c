//! Message types for actor communication.

use ractor::{ActorRef, RpcReplyPort};
use transfer_core::{
    Capacity, DeleteEvent, Job, JobFilter, JobId, JobStatus, OrchestrationError, PipelineId,
    PipelineReport, Task, TaskGroupCallback, TaskId, TaskStatusUpdate, TaskType, Worker, WorkerId,
};

/// Reply carrying an orchestration result.
pub type Reply<T> = RpcReplyPort<Result<T, OrchestrationError>>;

/// Messages for the JobManager.
#[derive(Debug)]
pub enum JobManagerMessage {
    /// Validate and store a new job, starting it when it asks for QUEUED.
    CreateJob { job: Box<Job>, reply: Reply<Job> },

    /// Replace priority, configuration and external id of an
    /// UNSUBMITTED or FAILED job.
    UpdateJob { job: Box<Job>, reply: Reply<Job> },

    /// Caller-requested status change. Only QUEUED is accepted.
    UpdateJobStatus {
        job_id: JobId,
        status: JobStatus,
        reply: Reply<Job>,
    },

    DeleteJob {
        job_id: JobId,
        force: bool,
        reply: Reply<()>,
    },

    GetJob { job_id: JobId, reply: Reply<Job> },

    FindJobs {
        filter: JobFilter,
        reply: Reply<Vec<Job>>,
    },

    /// Veto catalog deletions while the variant has active jobs.
    CheckDelete {
        event: DeleteEvent,
        reply: Reply<()>,
    },

    /// Status report from the engine.
    PipelineCallback(PipelineReport),
}

/// Messages for the pipeline engine.
#[derive(Debug)]
pub enum EngineMessage {
    /// Build a pipeline for a queued job and prepare its first stage.
    StartPipeline {
        job: Box<Job>,
        reply: Reply<PipelineId>,
    },

    /// Aggregated task group status from the broker.
    TaskGroupCallback(TaskGroupCallback),

    /// Where pipeline reports go.
    AttachJobManager(ActorRef<JobManagerMessage>),
}

/// Messages for the task broker.
#[derive(Debug)]
pub enum BrokerMessage {
    RegisterWorker { worker: Worker, reply: Reply<Worker> },

    UnregisterWorker {
        worker_id: WorkerId,
        reply: Reply<()>,
    },

    /// Claim queued tasks for a worker, bounded by its free slots.
    NextTasks {
        worker_id: WorkerId,
        requested: Vec<Capacity>,
        reply: Reply<Vec<Task>>,
    },

    /// A worker's report on a task it holds.
    TaskStatus {
        task_id: TaskId,
        update: TaskStatusUpdate,
        reply: Reply<()>,
    },
}

/// Messages for an in-process worker.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Ask the broker for work.
    Poll,

    /// A handler finished.
    TaskFinished {
        task_id: TaskId,
        task_type: TaskType,
        update: TaskStatusUpdate,
    },

    /// Number of tasks currently running.
    Running { reply: RpcReplyPort<usize> },

    Shutdown,
}

/// Messages for the orchestrator supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    Children {
        reply: RpcReplyPort<crate::supervisor::Children>,
    },

    Shutdown,
}

/// Result type for actor operations.
pub type ActorResult<T> = Result<T, ActorError>;

/// Error type for actor operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Timeout")]
    Timeout,
}

impl ActorError {
    /// The orchestration error behind this failure, if the actor answered.
    pub fn orchestration(&self) -> Option<&OrchestrationError> {
        match self {
            ActorError::Orchestration(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ractor::SpawnErr> for ActorError {
    fn from(err: ractor::SpawnErr) -> Self {
        ActorError::Actor(format!("Failed to spawn actor: {}", err))
    }
}

/// Call `actor` and unwrap the orchestration result it replies with.
pub(crate) async fn call<M, T, F>(
    actor: &ActorRef<M>,
    build: F,
    timeout: std::time::Duration,
) -> ActorResult<T>
where
    M: ractor::Message,
    T: Send + 'static,
    F: FnOnce(Reply<T>) -> M,
{
    match ractor::rpc::call(actor, build, Some(timeout)).await {
        Ok(ractor::rpc::CallResult::Success(result)) => Ok(result?),
        Ok(ractor::rpc::CallResult::Timeout) => Err(ActorError::Timeout),
        Ok(ractor::rpc::CallResult::SenderError) => {
            Err(ActorError::Actor("Actor dropped the reply".into()))
        }
        Err(e) => Err(ActorError::Actor(format!("Failed to reach actor: {}", e))),
    }
}
