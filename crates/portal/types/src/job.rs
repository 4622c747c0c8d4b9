//! Browser automation jobs and their status lifecycle
//!
//! ```text
//! pending ──► approved ──► queued ──► running ──► completed
//!    │           │           │          │  ├──► failed ──► approved (manual retry)
//!    ▼           ▼           ▼          │  └──► queued   (automatic retry)
//! rejected   cancelled   cancelled      └──► cancelled
//! ```

use crate::{
    FailureReason, JobId, PortalConfigId, PortalError, PortalResult, TenantId, WorkflowDefinition,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Approver identity recorded for jobs that never needed a human.
pub const AUTO_APPROVER: &str = "system:auto_approval";

/// Default cap on manual retries of a failed job.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ── Job type ─────────────────────────────────────────────────────────

/// The kind of job; matches the workflow name that implements it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    AcceptOrder,
    CheckStatus,
    DownloadDocuments,
    SubmitReport,
    GetNewOrders,
    /// A tenant-authored workflow (e.g. produced by the recorder)
    CustomWorkflow,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AcceptOrder => "accept_order",
            Self::CheckStatus => "check_status",
            Self::DownloadDocuments => "download_documents",
            Self::SubmitReport => "submit_report",
            Self::GetNewOrders => "get_new_orders",
            Self::CustomWorkflow => "custom_workflow",
        }
    }

    pub fn all() -> [JobType; 6] {
        [
            Self::AcceptOrder,
            Self::CheckStatus,
            Self::DownloadDocuments,
            Self::SubmitReport,
            Self::GetNewOrders,
            Self::CustomWorkflow,
        ]
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| PortalError::InvalidRequest(format!("unknown job type: {}", s)))
    }
}

// ── Status ───────────────────────────────────────────────────────────

/// Job status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserJobStatus {
    /// Waiting for a human approval decision; invisible to the scheduler
    Pending,
    /// Approved; waiting for its resource key to be free before queueing
    Approved,
    /// Waiting for rate-limit admission
    Queued,
    Running,
    Completed,
    Failed,
    Rejected,
    Cancelled,
}

impl BrowserJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses a status may move to.
    pub fn valid_transitions(&self) -> &'static [BrowserJobStatus] {
        use BrowserJobStatus::*;
        match self {
            Pending => &[Approved, Rejected, Cancelled],
            Approved => &[Queued, Cancelled],
            Queued => &[Running, Failed, Cancelled],
            Running => &[Completed, Failed, Cancelled, Queued],
            Failed => &[Approved],
            Completed | Rejected | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: BrowserJobStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Statuses that count as "in flight" for duplicate detection.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Approved | Self::Queued | Self::Running
        )
    }

    /// Statuses that occupy a resource key.
    pub fn holds_resource(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

impl std::fmt::Display for BrowserJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Failure summary ──────────────────────────────────────────────────

/// Human-readable failure summary stored on a job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub reason: FailureReason,
    pub message: String,
    /// Index of the failing step, if the failure happened inside the workflow
    pub step_index: Option<usize>,
}

impl JobFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            step_index: None,
        }
    }

    pub fn at_step(mut self, index: usize) -> Self {
        self.step_index = Some(index);
        self
    }
}

impl From<&PortalError> for JobFailure {
    fn from(err: &PortalError) -> Self {
        let step_index = match err {
            PortalError::StepTimeout { step_index, .. }
            | PortalError::AssertionFailed { step_index, .. }
            | PortalError::ElementNotFound { step_index, .. }
            | PortalError::SessionExpired { step_index }
            | PortalError::UnresolvedPlaceholder { step_index, .. } => Some(*step_index),
            _ => None,
        };
        Self {
            reason: err.reason(),
            message: err.to_string(),
            step_index,
        }
    }
}

// ── Request ──────────────────────────────────────────────────────────

/// Request to create a browser automation job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub portal_config_id: PortalConfigId,
    pub job_type: JobType,
    /// Defaults to the portal's base URL
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub order_number: Option<String>,
    /// Explicit uniqueness key; defaults to the order id, then the order number
    #[serde(default)]
    pub resource_key: Option<String>,
    /// Values substituted into `{{placeholder}}` tokens
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Workflow to run instead of the portal's definition (custom workflows)
    #[serde(default)]
    pub workflow: Option<WorkflowDefinition>,
    pub triggered_by: String,
}

impl CreateJobRequest {
    pub fn new(
        portal_config_id: PortalConfigId,
        job_type: JobType,
        triggered_by: impl Into<String>,
    ) -> Self {
        Self {
            portal_config_id,
            job_type,
            target_url: None,
            order_id: None,
            order_number: None,
            resource_key: None,
            parameters: BTreeMap::new(),
            workflow: None,
            triggered_by: triggered_by.into(),
        }
    }

    pub fn with_target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_order_number(mut self, order_number: impl Into<String>) -> Self {
        self.order_number = Some(order_number.into());
        self
    }

    pub fn with_resource_key(mut self, key: impl Into<String>) -> Self {
        self.resource_key = Some(key.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_workflow(mut self, workflow: WorkflowDefinition) -> Self {
        self.workflow = Some(workflow);
        self
    }

    /// The uniqueness key for this request.
    pub fn effective_resource_key(&self) -> Option<String> {
        self.resource_key
            .clone()
            .or_else(|| self.order_id.clone())
            .or_else(|| self.order_number.clone())
    }
}

// ── Job ──────────────────────────────────────────────────────────────

/// One request to run a named workflow against a portal for a tenant
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowserAutomationJob {
    pub id: JobId,
    pub tenant_id: TenantId,
    pub portal_config_id: PortalConfigId,
    pub job_type: JobType,
    pub status: BrowserJobStatus,
    pub target_url: String,
    pub order_id: Option<String>,
    pub order_number: Option<String>,
    pub resource_key: Option<String>,
    pub parameters: BTreeMap<String, String>,
    /// Snapshot of the workflow taken at creation
    pub workflow: WorkflowDefinition,
    pub requires_approval: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Earliest time an automatic retry may be admitted
    pub not_before: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub result: BTreeMap<String, String>,
    pub error: Option<JobFailure>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub cancel_requested: bool,
    pub updated_at: DateTime<Utc>,
}

impl BrowserAutomationJob {
    /// Build a new pending job from a request and the workflow it will run.
    pub fn new(
        tenant_id: TenantId,
        request: &CreateJobRequest,
        target_url: String,
        workflow: WorkflowDefinition,
        requires_approval: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            tenant_id,
            portal_config_id: request.portal_config_id.clone(),
            job_type: request.job_type,
            status: BrowserJobStatus::Pending,
            target_url,
            order_id: request.order_id.clone(),
            order_number: request.order_number.clone(),
            resource_key: request.effective_resource_key(),
            parameters: request.parameters.clone(),
            workflow,
            requires_approval,
            approved_by: None,
            approved_at: None,
            triggered_by: request.triggered_by.clone(),
            created_at: now,
            queued_at: None,
            started_at: None,
            finished_at: None,
            not_before: None,
            duration_ms: None,
            result: BTreeMap::new(),
            error: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            cancel_requested: false,
            updated_at: now,
        }
    }

    /// Move to `next`, stamping the timestamps that status implies.
    pub fn transition_to(&mut self, next: BrowserJobStatus) -> PortalResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(PortalError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        match next {
            BrowserJobStatus::Queued => self.queued_at = Some(now),
            BrowserJobStatus::Running => {
                self.started_at = Some(now);
                self.finished_at = None;
                self.duration_ms = None;
            }
            BrowserJobStatus::Completed
            | BrowserJobStatus::Failed
            | BrowserJobStatus::Rejected
            | BrowserJobStatus::Cancelled => {
                self.finished_at = Some(now);
                if let Some(started) = self.started_at {
                    self.duration_ms = Some((now - started).num_milliseconds().max(0) as u64);
                }
            }
            BrowserJobStatus::Pending | BrowserJobStatus::Approved => {}
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Whether an approval record (time and approver) exists.
    pub fn is_approved(&self) -> bool {
        self.approved_at.is_some() && self.approved_by.is_some()
    }

    /// Whether `other` targets the same portal resource as this job.
    pub fn shares_resource_with(&self, other: &BrowserAutomationJob) -> bool {
        self.id != other.id
            && self.portal_config_id == other.portal_config_id
            && self.resource_key.is_some()
            && self.resource_key == other.resource_key
    }

    /// Manual retries remaining.
    pub fn can_retry(&self) -> bool {
        self.status == BrowserJobStatus::Failed && self.retry_count < self.max_retries
    }
}
