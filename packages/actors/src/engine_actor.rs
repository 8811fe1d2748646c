//! Pipeline engine actor.
//!
//! Owns the stage protocol: builds a pipeline for every started job, turns
//! stage results into persisted task groups and folds task group callbacks
//! from the broker back into the stages. Job status changes leave as
//! [`PipelineReport`]s to the job manager.

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use transfer_core::{
    FailureKind, Job, JobStatus, OrchestrationError, OrchestrationEvent, Pipeline,
    PipelineContext, PipelineId, PipelineReport, PipelineStatus, PlannedTaskGroup, Result,
    StageResult, StageStatus, Stores, Task, TaskGroup, TaskGroupCallback, TaskGroupId, TaskStatus,
    aggregate_status, stages_for,
};

use crate::messages::{EngineMessage, JobManagerMessage};
use crate::stages::{FailureStage, StageEnv, stage_for};

/// Engine actor arguments.
pub struct EngineArgs {
    pub stores: Stores,
    pub env: StageEnv,
    pub event_tx: broadcast::Sender<OrchestrationEvent>,
}

/// State for the engine actor.
pub struct EngineState {
    stores: Stores,
    env: StageEnv,
    event_tx: broadcast::Sender<OrchestrationEvent>,
    /// Where reports go; attached right after the job manager starts.
    job_manager: Option<ActorRef<JobManagerMessage>>,
}

impl EngineState {
    pub fn new(args: EngineArgs) -> Self {
        Self {
            stores: args.stores,
            env: args.env,
            event_tx: args.event_tx,
            job_manager: None,
        }
    }

    async fn start(&mut self, job: Job) -> Result<PipelineId> {
        let stages = stages_for(job.job_type)?;
        let context = PipelineContext::for_job(&job)?;
        let mut pipeline = Pipeline::new(context, stages);
        self.stores.pipelines.create_pipeline(&pipeline).await?;
        tracing::info!(
            job_id = %job.id,
            pipeline_id = %pipeline.id,
            "Starting {} pipeline",
            job.job_type
        );

        let previous = pipeline.status;
        let mut messages = Vec::new();
        let result = self.prepare_current(&mut pipeline).await;
        self.apply(&mut pipeline, result, &[], &mut messages).await?;
        pipeline.touch();
        self.stores.pipelines.update_pipeline(&pipeline).await?;
        self.report(&pipeline, previous, messages);
        Ok(pipeline.id)
    }

    async fn on_task_group(&mut self, callback: TaskGroupCallback) -> Result<()> {
        let mut pipeline = match self.stores.pipelines.get_pipeline(callback.pipeline_id).await {
            Ok(pipeline) => pipeline,
            Err(OrchestrationError::NotFound(_)) => {
                tracing::debug!(
                    pipeline_id = %callback.pipeline_id,
                    "Ignoring callback for a removed pipeline"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if pipeline.status.is_terminal() || !pipeline.is_active_group(callback.task_group_id) {
            tracing::debug!(
                pipeline_id = %pipeline.id,
                task_group_id = %callback.task_group_id,
                status = %callback.status,
                "Ignoring callback for an inactive task group"
            );
            return Ok(());
        }

        // The stored group is at least as recent as the callback.
        let group = self
            .stores
            .task_groups
            .get_task_group(callback.task_group_id)
            .await?;
        if group.status == TaskStatus::Queued || Some(group.stage) != pipeline.stage() {
            return Ok(());
        }
        let tasks = self.stores.tasks.tasks_for_group(group.id).await?;
        if group.status.is_terminal() {
            pipeline.active_task_groups.retain(|id| *id != group.id);
        }

        let previous = pipeline.status;
        let result = match stage_for(group.stage)
            .on_callback(&self.env, &mut pipeline.context, &group, &tasks)
            .await
        {
            Ok(result) => result,
            Err(e) => stage_error(group.stage, e),
        };
        let mut messages = Vec::new();
        self.apply(&mut pipeline, result, &[group.id], &mut messages)
            .await?;
        pipeline.touch();
        self.stores.pipelines.update_pipeline(&pipeline).await?;
        self.report(&pipeline, previous, messages);
        Ok(())
    }

    async fn prepare_current(&self, pipeline: &mut Pipeline) -> StageResult {
        let Some(kind) = pipeline.stage() else {
            return StageResult::completed();
        };
        tracing::debug!(pipeline_id = %pipeline.id, stage = %kind, "Preparing stage");
        let _ = self.event_tx.send(OrchestrationEvent::StageStarted {
            job_id: pipeline.job_id,
            pipeline_id: pipeline.id,
            stage: kind,
            timestamp: Utc::now(),
        });
        match stage_for(kind).prepare(&self.env, &mut pipeline.context).await {
            Ok(result) => result,
            Err(e) => stage_error(kind, e),
        }
    }

    /// Drive the pipeline with a stage result until it waits on task groups
    /// or reaches a terminal status.
    ///
    /// `settled` are groups that just left the active list; on failure their
    /// queued tasks are withdrawn along with those of the active groups.
    async fn apply(
        &self,
        pipeline: &mut Pipeline,
        mut result: StageResult,
        settled: &[TaskGroupId],
        messages: &mut Vec<String>,
    ) -> Result<()> {
        loop {
            messages.append(&mut result.messages);
            match result.status {
                StageStatus::Failed(kind) => {
                    tracing::warn!(
                        pipeline_id = %pipeline.id,
                        stage = ?pipeline.stage(),
                        "Pipeline failed ({:?})",
                        kind
                    );
                    pipeline.status = PipelineStatus::Failed;
                    let mut groups = std::mem::take(&mut pipeline.active_task_groups);
                    groups.extend_from_slice(settled);
                    self.withdraw_queued(pipeline.id, &groups).await;
                    messages.extend(FailureStage.run(&self.env, &mut pipeline.context, kind).await);
                    return Ok(());
                }
                StageStatus::Completed if pipeline.active_task_groups.is_empty() => {
                    pipeline.insert_after_current(&result.additional_stages);
                    if pipeline.advance().is_none() {
                        tracing::info!(pipeline_id = %pipeline.id, "Pipeline completed");
                        pipeline.status = PipelineStatus::Completed;
                        return Ok(());
                    }
                    result = self.prepare_current(pipeline).await;
                }
                StageStatus::Completed => return Ok(()),
                StageStatus::Queued | StageStatus::Executing => {
                    let planned = std::mem::take(&mut result.task_groups);
                    self.create_groups(pipeline, planned).await?;
                    if result.status == StageStatus::Executing {
                        pipeline.status = PipelineStatus::Executing;
                    }
                    if !pipeline.active_task_groups.is_empty() {
                        return Ok(());
                    }
                    // nothing to wait for
                    result = StageResult::completed();
                }
            }
        }
    }

    /// Fail the tasks no worker has claimed yet so they are never handed out
    /// for a failed pipeline. Claimed tasks finish and are ignored.
    async fn withdraw_queued(&self, pipeline_id: PipelineId, groups: &[TaskGroupId]) {
        for group_id in groups {
            match self.withdraw_group(*group_id).await {
                Ok(0) => {}
                Ok(withdrawn) => tracing::debug!(
                    %pipeline_id,
                    task_group_id = %group_id,
                    "Withdrew {} queued tasks",
                    withdrawn
                ),
                Err(e) => tracing::warn!(
                    %pipeline_id,
                    task_group_id = %group_id,
                    "Failed to withdraw queued tasks: {}",
                    e
                ),
            }
        }
    }

    async fn withdraw_group(&self, group_id: TaskGroupId) -> Result<usize> {
        let mut withdrawn = 0;
        for task in self.stores.tasks.tasks_for_group(group_id).await? {
            if task.status == TaskStatus::Queued
                && self
                    .stores
                    .tasks
                    .withdraw_task(task.id, "Pipeline failed before the task started")
                    .await?
            {
                withdrawn += 1;
            }
        }
        if withdrawn > 0 {
            let mut group = self.stores.task_groups.get_task_group(group_id).await?;
            let tasks = self.stores.tasks.tasks_for_group(group_id).await?;
            group.status = aggregate_status(tasks.iter().map(|t| t.status));
            group.updated_at = Utc::now();
            self.stores.task_groups.update_task_group(&group).await?;
        }
        Ok(withdrawn)
    }

    async fn create_groups(
        &self,
        pipeline: &mut Pipeline,
        planned: Vec<PlannedTaskGroup>,
    ) -> Result<()> {
        let stage = pipeline
            .stage()
            .ok_or_else(|| OrchestrationError::runtime("Pipeline has no current stage"))?;
        for plan in planned.into_iter().filter(|g| !g.tasks.is_empty()) {
            let group = TaskGroup::new(pipeline.job_id, pipeline.id, stage);
            let tasks: Vec<Task> = plan
                .tasks
                .into_iter()
                .map(|t| {
                    Task::new(
                        pipeline.job_id,
                        group.id,
                        pipeline.context.priority,
                        t.description,
                        t.configuration,
                    )
                })
                .collect();
            self.stores.task_groups.create_task_group(&group).await?;
            self.stores.tasks.create_tasks(&tasks).await?;
            tracing::debug!(
                pipeline_id = %pipeline.id,
                task_group_id = %group.id,
                stage = %stage,
                "Queued {} tasks",
                tasks.len()
            );
            pipeline.active_task_groups.push(group.id);
        }
        Ok(())
    }

    fn report(&self, pipeline: &Pipeline, previous: PipelineStatus, messages: Vec<String>) {
        if pipeline.status == previous && messages.is_empty() {
            return;
        }
        let Some(job_manager) = &self.job_manager else {
            tracing::warn!(job_id = %pipeline.job_id, "No job manager attached, dropping report");
            return;
        };
        let report = PipelineReport {
            job_id: pipeline.job_id,
            pipeline_id: pipeline.id,
            status: job_status(pipeline.status),
            messages,
        };
        if let Err(e) = job_manager.send_message(JobManagerMessage::PipelineCallback(report)) {
            tracing::warn!(job_id = %pipeline.job_id, "Failed to report pipeline status: {}", e);
        }
    }
}

fn stage_error(stage: transfer_core::StageKind, error: OrchestrationError) -> StageResult {
    tracing::warn!(stage = %stage, "Stage failed: {}", error);
    StageResult::failed(FailureKind::Dirty, format!("Stage {} failed: {}", stage, error))
}

fn job_status(status: PipelineStatus) -> JobStatus {
    match status {
        PipelineStatus::Queued => JobStatus::Queued,
        PipelineStatus::Executing => JobStatus::Executing,
        PipelineStatus::Completed => JobStatus::Completed,
        PipelineStatus::Failed => JobStatus::Failed,
    }
}

/// Engine actor that runs pipelines.
pub struct PipelineEngine;

impl Actor for PipelineEngine {
    type Msg = EngineMessage;
    type State = EngineState;
    type Arguments = EngineArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> std::result::Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting pipeline engine");
        Ok(EngineState::new(args))
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        match message {
            EngineMessage::StartPipeline { job, reply } => {
                let result = state.start(*job).await;
                let _ = reply.send(result);
            }

            EngineMessage::TaskGroupCallback(callback) => {
                let pipeline_id = callback.pipeline_id;
                if let Err(e) = state.on_task_group(callback).await {
                    tracing::error!(%pipeline_id, "Failed to process task group callback: {}", e);
                }
            }

            EngineMessage::AttachJobManager(job_manager) => {
                state.job_manager = Some(job_manager);
            }
        }

        Ok(())
    }
}
