use futures_util::future::join_all;
use transfer_core::{FailureKind, OrchestrationError, PipelineContext};

use super::StageEnv;

/// Cleanup after a failed stage. Dirty failures may have written partial
/// files, so every placeholder this pipeline created is removed; clean
/// failures leave everything in place.
pub struct FailureStage;

impl FailureStage {
    /// Returns messages for the job.
    pub async fn run(
        &self,
        env: &StageEnv,
        context: &mut PipelineContext,
        kind: FailureKind,
    ) -> Vec<String> {
        if kind == FailureKind::Clean || context.created_repository_files.is_empty() {
            return Vec::new();
        }

        let created = std::mem::take(&mut context.created_repository_files);
        let results = join_all(created.iter().map(|id| env.content.remove_repository_file(id))).await;

        let mut removed = 0;
        for (id, result) in created.iter().zip(results) {
            match result {
                Ok(()) => removed += 1,
                Err(OrchestrationError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(
                        job_id = %context.job_id,
                        repository_file_id = %id,
                        "Failed to remove placeholder after dirty failure: {}",
                        e
                    );
                }
            }
        }
        vec![format!(
            "Removed {} repository file placeholders after a dirty failure",
            removed
        )]
    }
}
