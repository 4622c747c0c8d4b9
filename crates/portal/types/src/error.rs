//! Error taxonomy for the portal automation layer

use crate::{JobId, JobType, PortalConfigId, RecordingId};
use serde::{Deserialize, Serialize};

/// Errors that can occur in portal automation operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortalError {
    #[error("Domain not allowed: {url} ({reason})")]
    DomainNotAllowed { url: String, reason: DomainDenial },

    #[error("Job {0} requires approval before it can run")]
    ApprovalRequired(JobId),

    #[error("Job {0} was rejected by an approver")]
    ApprovalRejected(JobId),

    #[error("No credential available for portal {0}")]
    CredentialMissing(PortalConfigId),

    #[error("Step {step_index} timed out after {timeout_ms}ms")]
    StepTimeout { step_index: usize, timeout_ms: u64 },

    #[error("Assertion failed at step {step_index}: {selector}")]
    AssertionFailed { step_index: usize, selector: String },

    #[error("Element not found at step {step_index}: {selector}")]
    ElementNotFound { step_index: usize, selector: String },

    #[error("Rate limit exceeded for portal {portal_config_id}: {limit}")]
    RateLimitExceeded {
        portal_config_id: PortalConfigId,
        limit: String,
    },

    #[error("Browser session expired at step {step_index}")]
    SessionExpired { step_index: usize },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Portal config not found: {0}")]
    PortalNotFound(PortalConfigId),

    #[error("Portal config is not active: {0}")]
    PortalInactive(PortalConfigId),

    #[error("Unknown portal type: {0}")]
    UnknownPortalType(String),

    #[error("No workflow defined for job type: {0}")]
    WorkflowNotFound(JobType),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Unresolved placeholder {{{{{token}}}}} in step {step_index}")]
    UnresolvedPlaceholder { token: String, step_index: usize },

    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition {
        from: crate::BrowserJobStatus,
        to: crate::BrowserJobStatus,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Recording not found: {0}")]
    RecordingNotFound(RecordingId),

    #[error("Recording is no longer active: {0}")]
    RecordingInactive(RecordingId),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl PortalError {
    /// Stable reason code recorded on failed jobs.
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::DomainNotAllowed { .. } => FailureReason::DomainNotAllowed,
            Self::ApprovalRequired(_) => FailureReason::ApprovalRequired,
            Self::ApprovalRejected(_) => FailureReason::ApprovalRejected,
            Self::CredentialMissing(_) => FailureReason::CredentialMissing,
            Self::StepTimeout { .. } => FailureReason::StepTimeout,
            Self::AssertionFailed { .. } => FailureReason::AssertionFailed,
            Self::ElementNotFound { .. } => FailureReason::ElementNotFound,
            Self::RateLimitExceeded { .. } => FailureReason::RateLimitExceeded,
            Self::SessionExpired { .. } => FailureReason::SessionExpired,
            Self::PortalNotFound(_) | Self::PortalInactive(_) => FailureReason::PortalUnavailable,
            Self::WorkflowNotFound(_)
            | Self::InvalidWorkflow(_)
            | Self::UnresolvedPlaceholder { .. } => FailureReason::InvalidWorkflow,
            _ => FailureReason::Internal,
        }
    }
}

/// Why a URL was refused by the domain validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainDenial {
    InvalidUrl,
    InsecureScheme,
    MissingHost,
    NotAllowlisted,
}

impl std::fmt::Display for DomainDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::InvalidUrl => "invalid URL",
            Self::InsecureScheme => "only HTTPS URLs are allowed",
            Self::MissingHost => "URL has no host",
            Self::NotAllowlisted => "host is not in the allowlist",
        };
        f.write_str(text)
    }
}

/// Reason code attached to a failed job or step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    DomainNotAllowed,
    ApprovalRequired,
    ApprovalRejected,
    CredentialMissing,
    StepTimeout,
    AssertionFailed,
    ElementNotFound,
    RateLimitExceeded,
    SessionExpired,
    /// Navigation or other transport failure reported by the browser driver
    DriverError,
    /// The workflow's overall time budget ran out
    WorkflowTimeout,
    PortalUnavailable,
    InvalidWorkflow,
    Cancelled,
    Internal,
}

impl FailureReason {
    /// Failures that happen before any vendor-visible action and may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::DriverError)
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::DomainNotAllowed => "DomainNotAllowed",
            Self::ApprovalRequired => "ApprovalRequired",
            Self::ApprovalRejected => "ApprovalRejected",
            Self::CredentialMissing => "CredentialMissing",
            Self::StepTimeout => "StepTimeout",
            Self::AssertionFailed => "AssertionFailed",
            Self::ElementNotFound => "ElementNotFound",
            Self::RateLimitExceeded => "RateLimitExceeded",
            Self::SessionExpired => "SessionExpired",
            Self::DriverError => "DriverError",
            Self::WorkflowTimeout => "WorkflowTimeout",
            Self::PortalUnavailable => "PortalUnavailable",
            Self::InvalidWorkflow => "InvalidWorkflow",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
        };
        f.write_str(text)
    }
}

/// Result type alias for portal automation operations
pub type PortalResult<T> = Result<T, PortalError>;
