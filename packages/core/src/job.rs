//! Job domain types and the job status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::{RepositoryId, VariantId};
use crate::error::{OrchestrationError, Result};
use crate::ids::ulid_id;
use crate::manifest::ManifestType;
use crate::transfer::Hash;

ulid_id!(
    /// Unique identifier for a job.
    JobId
);

/// Lowest accepted job priority.
pub const MIN_PRIORITY: i32 = 1;
/// Highest accepted job priority.
pub const MAX_PRIORITY: i32 = 10;
/// Priority assigned when the caller does not choose one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Kind of operation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Ingest,
    Export,
    Replication,
    Delete,
    Transformation,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Ingest => "INGEST",
            JobType::Export => "EXPORT",
            JobType::Replication => "REPLICATION",
            JobType::Delete => "DELETE",
            JobType::Transformation => "TRANSFORMATION",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Saved but not handed to the pipeline engine.
    #[default]
    Unsubmitted,
    /// Submitted; the first stage has been prepared.
    Queued,
    /// At least one task of the job is running on a worker.
    Executing,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Unsubmitted,
        JobStatus::Queued,
        JobStatus::Executing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Canceled,
    ];

    /// COMPLETED and CANCELED never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Canceled)
    }

    /// Jobs the pipeline engine is still working on.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Executing)
    }

    /// The job status transition table.
    pub fn can_transition_to(self, target: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, target),
            (Unsubmitted, Queued)
                | (Failed, Queued)
                | (Queued, Executing)
                | (Queued, Completed)
                | (Queued, Failed)
                | (Queued, Canceled)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Executing, Canceled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Unsubmitted => "UNSUBMITTED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Executing => "EXECUTING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source file supplied with an ingest job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestFile {
    /// Source URI, possibly relative to a configured base location.
    pub uri: String,
    /// Path inside the destination repository; defaults to the file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashes: Vec<Hash>,
    /// Set when the file is a playlist whose references must be ingested too.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestType>,
}

impl IngestFile {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            relative_path: None,
            size: None,
            hashes: Vec::new(),
            manifest: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_relative_path(mut self, path: impl Into<String>) -> Self {
        self.relative_path = Some(path.into());
        self
    }

    pub fn as_manifest(mut self, manifest_type: ManifestType) -> Self {
        self.manifest = Some(manifest_type);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfiguration {
    pub variant_id: VariantId,
    /// Destination repositories.
    pub repository_ids: Vec<RepositoryId>,
    pub files: Vec<IngestFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfiguration {
    pub variant_id: VariantId,
    /// Candidate source repositories, tried in order.
    pub repository_ids: Vec<RepositoryId>,
    /// Destination locations.
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfiguration {
    pub variant_id: VariantId,
    pub source_repository_ids: Vec<RepositoryId>,
    pub destination_repository_ids: Vec<RepositoryId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteConfiguration {
    pub variant_id: VariantId,
    pub repository_ids: Vec<RepositoryId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationConfiguration {
    pub variant_id: VariantId,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Type-specific job configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobConfiguration {
    Ingest(IngestConfiguration),
    Export(ExportConfiguration),
    Replication(ReplicationConfiguration),
    Delete(DeleteConfiguration),
    Transformation(TransformationConfiguration),
}

impl JobConfiguration {
    /// The job type this configuration shape belongs to.
    pub fn job_type(&self) -> JobType {
        match self {
            JobConfiguration::Ingest(_) => JobType::Ingest,
            JobConfiguration::Export(_) => JobType::Export,
            JobConfiguration::Replication(_) => JobType::Replication,
            JobConfiguration::Delete(_) => JobType::Delete,
            JobConfiguration::Transformation(_) => JobType::Transformation,
        }
    }

    pub fn variant_id(&self) -> &VariantId {
        match self {
            JobConfiguration::Ingest(c) => &c.variant_id,
            JobConfiguration::Export(c) => &c.variant_id,
            JobConfiguration::Replication(c) => &c.variant_id,
            JobConfiguration::Delete(c) => &c.variant_id,
            JobConfiguration::Transformation(c) => &c.variant_id,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            JobConfiguration::Ingest(c) => {
                if c.repository_ids.is_empty() {
                    return Err(OrchestrationError::invalid(
                        "Ingest jobs require at least one destination repository",
                    ));
                }
                if c.files.is_empty() {
                    return Err(OrchestrationError::invalid(
                        "Ingest jobs require at least one file",
                    ));
                }
                if let Some(file) = c.files.iter().find(|f| f.uri.trim().is_empty()) {
                    return Err(OrchestrationError::invalid(format!(
                        "Ingest file uri must not be empty: {:?}",
                        file
                    )));
                }
            }
            JobConfiguration::Export(c) => {
                if c.locations.is_empty() {
                    return Err(OrchestrationError::invalid(
                        "Export jobs require at least one destination location",
                    ));
                }
            }
            JobConfiguration::Replication(c) => {
                if c.source_repository_ids.is_empty() || c.destination_repository_ids.is_empty() {
                    return Err(OrchestrationError::invalid(
                        "Replication jobs require source and destination repositories",
                    ));
                }
                if let Some(overlap) = c
                    .destination_repository_ids
                    .iter()
                    .find(|id| c.source_repository_ids.contains(id))
                {
                    return Err(OrchestrationError::invalid(format!(
                        "Repository {} can not be both source and destination",
                        overlap
                    )));
                }
            }
            JobConfiguration::Delete(c) => {
                if c.repository_ids.is_empty() {
                    return Err(OrchestrationError::invalid(
                        "Delete jobs require at least one repository",
                    ));
                }
            }
            JobConfiguration::Transformation(_) => {}
        }
        Ok(())
    }
}

/// A message reported by the pipeline while working on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl JobMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A user-requested operation tracked through the status state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    /// When `status` last changed.
    pub status_timestamp: DateTime<Utc>,
    pub priority: i32,
    pub configuration: Option<JobConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<JobMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new unsubmitted job whose type follows the configuration.
    pub fn new(configuration: JobConfiguration) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type: configuration.job_type(),
            status: JobStatus::Unsubmitted,
            status_timestamp: now,
            priority: DEFAULT_PRIORITY,
            configuration: Some(configuration),
            external_id: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn variant_id(&self) -> Option<&VariantId> {
        self.configuration.as_ref().map(JobConfiguration::variant_id)
    }

    /// Check priority range and that the configuration matches the type.
    pub fn validate(&self) -> Result<()> {
        validate_priority(self.priority)?;
        let configuration = self
            .configuration
            .as_ref()
            .ok_or_else(|| OrchestrationError::invalid("Job configuration is required"))?;
        if configuration.job_type() != self.job_type {
            return Err(OrchestrationError::invalid(format!(
                "Job configuration of type {} does not match job type {}",
                configuration.job_type(),
                self.job_type
            )));
        }
        configuration.validate()
    }

    /// Apply a status transition, updating the status timestamp with it.
    ///
    /// Leaves the job untouched when the transition is not allowed.
    pub fn transition(&mut self, status: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(OrchestrationError::not_updateable(format!(
                "Job status can not be updated from {} to {}",
                self.status, status
            )));
        }
        let now = Utc::now();
        self.status = status;
        self.status_timestamp = now;
        self.updated_at = now;
        Ok(())
    }

    pub fn push_message(&mut self, text: impl Into<String>) {
        self.messages.push(JobMessage::new(text));
        self.updated_at = Utc::now();
    }
}

pub fn validate_priority(priority: i32) -> Result<()> {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        Ok(())
    } else {
        Err(OrchestrationError::invalid(format!(
            "Job priority must be between {} and {}, got {}",
            MIN_PRIORITY, MAX_PRIORITY, priority
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delete_job() -> Job {
        Job::new(JobConfiguration::Delete(DeleteConfiguration {
            variant_id: VariantId::from("variant-1"),
            repository_ids: vec![RepositoryId::from("repo-1")],
        }))
    }

    #[test]
    fn priority_outside_range_is_rejected() {
        for priority in [i32::MIN, -1, 0, 11, 100, i32::MAX] {
            let job = delete_job().with_priority(priority);
            assert!(matches!(
                job.validate(),
                Err(OrchestrationError::InvalidProperty(_))
            ));
        }
        for priority in MIN_PRIORITY..=MAX_PRIORITY {
            assert!(delete_job().with_priority(priority).validate().is_ok());
        }
    }

    #[test]
    fn configuration_must_match_type() {
        let mut job = delete_job();
        job.job_type = JobType::Ingest;
        assert!(matches!(
            job.validate(),
            Err(OrchestrationError::InvalidProperty(_))
        ));

        let mut job = delete_job();
        job.configuration = None;
        assert!(matches!(
            job.validate(),
            Err(OrchestrationError::InvalidProperty(_))
        ));
    }

    #[test]
    fn replication_rejects_overlapping_repositories() {
        let job = Job::new(JobConfiguration::Replication(ReplicationConfiguration {
            variant_id: VariantId::from("v"),
            source_repository_ids: vec![RepositoryId::from("a")],
            destination_repository_ids: vec![RepositoryId::from("a")],
        }));
        assert!(job.validate().is_err());
    }

    #[test]
    fn transition_table_is_exhaustive() {
        let allowed = [
            (JobStatus::Unsubmitted, JobStatus::Queued),
            (JobStatus::Failed, JobStatus::Queued),
            (JobStatus::Queued, JobStatus::Executing),
            (JobStatus::Queued, JobStatus::Completed),
            (JobStatus::Queued, JobStatus::Failed),
            (JobStatus::Queued, JobStatus::Canceled),
            (JobStatus::Executing, JobStatus::Completed),
            (JobStatus::Executing, JobStatus::Failed),
            (JobStatus::Executing, JobStatus::Canceled),
        ];

        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                let mut job = delete_job().with_status(from);
                let before = job.status_timestamp;
                let result = job.transition(to);
                if allowed.contains(&(from, to)) {
                    assert!(result.is_ok(), "{from} -> {to} should be allowed");
                    assert_eq!(job.status, to);
                    assert!(job.status_timestamp >= before);
                } else {
                    assert!(
                        matches!(result, Err(OrchestrationError::NotUpdateable(_))),
                        "{from} -> {to} should be rejected"
                    );
                    assert_eq!(job.status, from);
                    assert_eq!(job.status_timestamp, before);
                }
            }
        }
    }

    #[test]
    fn transition_error_names_both_statuses() {
        let mut job = delete_job().with_status(JobStatus::Completed);
        let err = job.transition(JobStatus::Queued).unwrap_err();
        assert_eq!(
            err,
            OrchestrationError::NotUpdateable(
                "Job status can not be updated from COMPLETED to QUEUED".into()
            )
        );
    }

    #[test]
    fn configuration_serializes_with_type_tag() {
        let job = delete_job();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["job_type"], "DELETE");
        assert_eq!(json["configuration"]["type"], "DELETE");
        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }
}
