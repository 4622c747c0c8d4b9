//! Execution logs, artifacts and job results
//!
//! The execution log is the durable audit trail of a job: one record per
//! interpreted step, appended in order and never modified afterwards.

use crate::{
    ArtifactId, BrowserJobStatus, FailureReason, JobFailure, JobId, StepAction,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Step records ─────────────────────────────────────────────────────

/// What happened when a step was interpreted
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    /// An optional step failed, or a best-effort step could not run
    Skipped { reason: FailureReason, message: String },
    /// A required step failed and the job aborted here
    Failed { reason: FailureReason, message: String },
    /// Cancellation was observed before this step ran
    Cancelled,
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// One entry of the execution log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_index: usize,
    pub action: StepAction,
    /// Resolved selector the step targeted
    pub selector: Option<String>,
    /// Navigation target; fill/select values are never recorded
    pub url: Option<String>,
    pub outcome: StepOutcome,
    pub duration_ms: u64,
    pub artifacts: Vec<ArtifactId>,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only ordered list of step records
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    entries: Vec<StepRecord>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: StepRecord) {
        self.entries.push(record);
    }

    pub fn entries(&self) -> &[StepRecord] {
        &self.entries
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of navigation calls issued to the browser.
    pub fn navigation_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|r| r.action.is_navigation() && r.outcome == StepOutcome::Succeeded)
            .count()
    }

    /// Index of the last step that completed successfully.
    pub fn last_completed_step(&self) -> Option<usize> {
        self.entries
            .iter()
            .rev()
            .find(|r| r.outcome == StepOutcome::Succeeded)
            .map(|r| r.step_index)
    }

    /// Concatenate another log onto this one (e.g. across retry attempts).
    pub fn extend(&mut self, other: ExecutionLog) {
        self.entries.extend(other.entries);
    }
}

// ── Artifacts ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Reference to a screenshot blob held by the driver's storage
    Screenshot { reference: String },
    ExtractedField { name: String, value: String },
}

/// A byproduct of a step, owned by its job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobArtifact {
    pub id: ArtifactId,
    pub job_id: JobId,
    pub step_index: usize,
    pub kind: ArtifactKind,
    pub created_at: DateTime<Utc>,
}

impl JobArtifact {
    pub fn screenshot(job_id: JobId, step_index: usize, reference: impl Into<String>) -> Self {
        Self {
            id: ArtifactId::generate(),
            job_id,
            step_index,
            kind: ArtifactKind::Screenshot {
                reference: reference.into(),
            },
            created_at: Utc::now(),
        }
    }

    pub fn extracted(
        job_id: JobId,
        step_index: usize,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: ArtifactId::generate(),
            job_id,
            step_index,
            kind: ArtifactKind::ExtractedField {
                name: name.into(),
                value: value.into(),
            },
            created_at: Utc::now(),
        }
    }

    pub fn is_screenshot(&self) -> bool {
        matches!(self.kind, ArtifactKind::Screenshot { .. })
    }
}

// ── Result ───────────────────────────────────────────────────────────

/// Outcome of `execute_job`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobExecutionResult {
    pub job_id: JobId,
    pub success: bool,
    pub status: BrowserJobStatus,
    /// Values captured by `extract` steps
    pub extracted: BTreeMap<String, String>,
    pub artifacts: Vec<JobArtifact>,
    pub log: ExecutionLog,
    pub duration_ms: u64,
    pub error: Option<JobFailure>,
    /// Set when the job could not be admitted yet and stays waiting
    pub deferred: Option<String>,
    /// Whether the failure left the job eligible for an automatic retry
    pub retry_scheduled: bool,
}

impl JobExecutionResult {
    /// A result for a job that was not run this time (rate limited or resource busy).
    pub fn deferred(job_id: JobId, status: BrowserJobStatus, why: impl Into<String>) -> Self {
        Self {
            job_id,
            success: false,
            status,
            extracted: BTreeMap::new(),
            artifacts: Vec::new(),
            log: ExecutionLog::new(),
            duration_ms: 0,
            error: None,
            deferred: Some(why.into()),
            retry_scheduled: false,
        }
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred.is_some()
    }
}
