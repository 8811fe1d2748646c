//! Job manager actor.
//!
//! The only writer of job records. Validates caller requests, enforces the
//! job status state machine, starts pipelines and applies the engine's
//! reports.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use transfer_core::{
    DeleteEvent, Job, JobFilter, JobId, JobStatus, JobType, OrchestrationError,
    OrchestrationEvent, PipelineReport, Result, Stores, SubmitListener, stages_for,
};

use crate::messages::{ActorError, EngineMessage, JobManagerMessage, call};

/// Job manager actor arguments.
pub struct JobManagerArgs {
    pub stores: Stores,
    pub engine: ActorRef<EngineMessage>,
    pub submit_listeners: Vec<Arc<dyn SubmitListener>>,
    pub event_tx: broadcast::Sender<OrchestrationEvent>,
    pub rpc_timeout: Duration,
}

/// State for the job manager actor.
pub struct JobManagerState {
    stores: Stores,
    engine: ActorRef<EngineMessage>,
    submit_listeners: Vec<Arc<dyn SubmitListener>>,
    event_tx: broadcast::Sender<OrchestrationEvent>,
    rpc_timeout: Duration,
}

impl JobManagerState {
    async fn create_job(&self, mut job: Job) -> Result<Job> {
        let requested = job.status;
        if !matches!(requested, JobStatus::Unsubmitted | JobStatus::Queued) {
            return Err(OrchestrationError::invalid(format!(
                "New jobs must be UNSUBMITTED or QUEUED, got {}",
                requested
            )));
        }
        job.validate()?;

        let now = Utc::now();
        job.id = JobId::new();
        job.status = JobStatus::Unsubmitted;
        job.status_timestamp = now;
        job.created_at = now;
        job.updated_at = now;
        job.messages.clear();

        if requested == JobStatus::Unsubmitted {
            self.stores.jobs.create_job(&job).await?;
            self.job_created(&job);
            return Ok(job);
        }

        self.check_submit(&job).await?;
        job.transition(JobStatus::Queued)?;
        self.stores.jobs.create_job(&job).await?;
        self.job_created(&job);
        self.start_pipeline(job).await
    }

    async fn update_job(&self, job: Job) -> Result<Job> {
        let mut existing = self.stores.jobs.get_job(job.id).await?;
        if !matches!(existing.status, JobStatus::Unsubmitted | JobStatus::Failed) {
            return Err(OrchestrationError::not_updateable(format!(
                "Job {} is {} and can not be updated",
                existing.id, existing.status
            )));
        }
        if job.job_type != existing.job_type {
            return Err(OrchestrationError::not_updateable(format!(
                "Job type can not be changed from {} to {}",
                existing.job_type, job.job_type
            )));
        }
        if job.status != existing.status {
            return Err(OrchestrationError::not_updateable(
                "Job status can only be changed through a status update",
            ));
        }
        job.validate()?;

        existing.priority = job.priority;
        existing.configuration = job.configuration;
        existing.external_id = job.external_id;
        existing.updated_at = Utc::now();
        self.stores.jobs.update_job(&existing).await?;
        tracing::info!(job_id = %existing.id, "Updated job");
        Ok(existing)
    }

    async fn update_job_status(&self, job_id: JobId, status: JobStatus) -> Result<Job> {
        let mut job = self.stores.jobs.get_job(job_id).await?;
        match status {
            JobStatus::Queued => {
                if !job.status.can_transition_to(JobStatus::Queued) {
                    return Err(OrchestrationError::not_updateable(format!(
                        "Job {} is {} and can not be submitted",
                        job_id, job.status
                    )));
                }
                job.validate()?;
                self.check_submit(&job).await?;
                let old_status = job.status;
                job.transition(JobStatus::Queued)?;
                self.stores.jobs.update_job(&job).await?;
                self.status_changed(&job, old_status);
                self.start_pipeline(job).await
            }
            JobStatus::Canceled => Err(OrchestrationError::not_updateable(
                "Canceling jobs is not supported",
            )),
            other => Err(OrchestrationError::not_updateable(format!(
                "Job status {} is set by the pipeline, not by callers",
                other
            ))),
        }
    }

    async fn delete_job(&self, job_id: JobId, force: bool) -> Result<()> {
        let job = self.stores.jobs.get_job(job_id).await?;
        if job.status.is_active() && !force {
            return Err(OrchestrationError::not_updateable(format!(
                "Job {} is {}; force is required to delete it",
                job_id, job.status
            )));
        }

        self.stores.tasks.delete_tasks_for_job(job_id).await?;
        self.stores.task_groups.delete_task_groups_for_job(job_id).await?;
        self.stores.pipelines.delete_pipelines_for_job(job_id).await?;
        self.stores.jobs.delete_job(job_id).await?;
        tracing::info!(%job_id, status = %job.status, force, "Deleted job");
        let _ = self.event_tx.send(OrchestrationEvent::JobDeleted {
            job_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Apply an engine report. Reports for jobs that are gone or terminal
    /// are dropped; the job is only written when something changed.
    async fn on_pipeline_report(&self, report: PipelineReport) -> Result<()> {
        let mut job = match self.stores.jobs.get_job(report.job_id).await {
            Ok(job) => job,
            Err(OrchestrationError::NotFound(_)) => {
                tracing::debug!(job_id = %report.job_id, "Ignoring report for a deleted job");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if job.status.is_terminal() {
            tracing::debug!(
                job_id = %job.id,
                status = %job.status,
                "Ignoring report for a finished job"
            );
            return Ok(());
        }

        let old_status = job.status;
        let mut changed = false;
        if report.status != job.status {
            match job.transition(report.status) {
                Ok(()) => changed = true,
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        pipeline_id = %report.pipeline_id,
                        "Ignoring pipeline report: {}",
                        e
                    );
                    return Ok(());
                }
            }
        }
        for message in report.messages {
            job.push_message(message);
            changed = true;
        }
        if !changed {
            return Ok(());
        }

        self.stores.jobs.update_job(&job).await?;
        if job.status != old_status {
            self.status_changed(&job, old_status);
        }
        Ok(())
    }

    /// Catalog deletions are refused while a job works on the variant.
    async fn check_delete(&self, event: DeleteEvent) -> Result<()> {
        for variant_id in event.variant_ids() {
            let active = self
                .stores
                .jobs
                .find_jobs(&JobFilter::active_for_variant(variant_id.clone()).with_limit(1))
                .await?;
            if let Some(job) = active.first() {
                return Err(OrchestrationError::not_updateable(format!(
                    "Variant {} has an active {} job {}",
                    variant_id, job.job_type, job.id
                )));
            }
        }
        Ok(())
    }

    /// Guards that run before a job becomes QUEUED.
    async fn check_submit(&self, job: &Job) -> Result<()> {
        stages_for(job.job_type)?;
        let variant_id = job
            .variant_id()
            .ok_or_else(|| OrchestrationError::invalid("Job configuration is required"))?;

        let deleting = self
            .stores
            .jobs
            .find_jobs(
                &JobFilter::active_for_variant(variant_id.clone()).with_type(JobType::Delete),
            )
            .await?;
        if let Some(other) = deleting.iter().find(|other| other.id != job.id) {
            return Err(OrchestrationError::not_updateable(format!(
                "Variant {} is being deleted by job {}",
                variant_id, other.id
            )));
        }

        for listener in &self.submit_listeners {
            listener.on_submit(variant_id).await?;
        }
        Ok(())
    }

    async fn start_pipeline(&self, mut job: Job) -> Result<Job> {
        let started = call(
            &self.engine,
            |reply| EngineMessage::StartPipeline {
                job: Box::new(job.clone()),
                reply,
            },
            self.rpc_timeout,
        )
        .await;

        match started {
            Ok(pipeline_id) => {
                tracing::info!(job_id = %job.id, %pipeline_id, "Job submitted");
                Ok(job)
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, "Failed to start pipeline: {}", e);
                let old_status = job.status;
                job.transition(JobStatus::Failed)?;
                job.push_message(format!("Failed to start pipeline: {}", e));
                self.stores.jobs.update_job(&job).await?;
                self.status_changed(&job, old_status);
                Err(match e {
                    ActorError::Orchestration(inner) => inner,
                    other => OrchestrationError::runtime(other.to_string()),
                })
            }
        }
    }

    fn job_created(&self, job: &Job) {
        tracing::info!(job_id = %job.id, job_type = %job.job_type, status = %job.status, "Created job");
        let _ = self.event_tx.send(OrchestrationEvent::JobCreated {
            job_id: job.id,
            job_type: job.job_type,
            status: job.status,
            timestamp: Utc::now(),
        });
    }

    fn status_changed(&self, job: &Job, old_status: JobStatus) {
        tracing::info!(job_id = %job.id, "Job {} -> {}", old_status, job.status);
        let _ = self.event_tx.send(OrchestrationEvent::JobStatusChanged {
            job_id: job.id,
            old_status,
            new_status: job.status,
            timestamp: Utc::now(),
        });
    }
}

/// Job manager actor.
pub struct JobManager;

impl Actor for JobManager {
    type Msg = JobManagerMessage;
    type State = JobManagerState;
    type Arguments = JobManagerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> std::result::Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting job manager");
        Ok(JobManagerState {
            stores: args.stores,
            engine: args.engine,
            submit_listeners: args.submit_listeners,
            event_tx: args.event_tx,
            rpc_timeout: args.rpc_timeout,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        match message {
            JobManagerMessage::CreateJob { job, reply } => {
                let _ = reply.send(state.create_job(*job).await);
            }

            JobManagerMessage::UpdateJob { job, reply } => {
                let _ = reply.send(state.update_job(*job).await);
            }

            JobManagerMessage::UpdateJobStatus {
                job_id,
                status,
                reply,
            } => {
                let _ = reply.send(state.update_job_status(job_id, status).await);
            }

            JobManagerMessage::DeleteJob {
                job_id,
                force,
                reply,
            } => {
                let _ = reply.send(state.delete_job(job_id, force).await);
            }

            JobManagerMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.stores.jobs.get_job(job_id).await);
            }

            JobManagerMessage::FindJobs { filter, reply } => {
                let _ = reply.send(state.stores.jobs.find_jobs(&filter).await);
            }

            JobManagerMessage::CheckDelete { event, reply } => {
                let _ = reply.send(state.check_delete(event).await);
            }

            JobManagerMessage::PipelineCallback(report) => {
                let job_id = report.job_id;
                if let Err(e) = state.on_pipeline_report(report).await {
                    tracing::error!(%job_id, "Failed to apply pipeline report: {}", e);
                }
            }
        }

        Ok(())
    }
}
