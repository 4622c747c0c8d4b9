//! Core types for vendor portal browser automation
//!
//! Defines the data model shared by every portal crate:
//! - **Jobs**: [`BrowserAutomationJob`] and its status state machine
//! - **Workflows**: the closed step vocabulary and [`WorkflowDefinition`]
//! - **Portals**: [`VendorPortalConfig`], rate limits, selectors, status maps
//! - **Execution**: the append-only [`ExecutionLog`], artifacts and results
//! - **Errors**: the [`PortalError`] taxonomy and stable [`FailureReason`] codes

#![deny(unsafe_code)]

pub mod error;
pub mod execution;
pub mod ids;
pub mod job;
pub mod portal;
pub mod workflow;

pub use error::{DomainDenial, FailureReason, PortalError, PortalResult};
pub use execution::{
    ArtifactKind, ExecutionLog, JobArtifact, JobExecutionResult, StepOutcome, StepRecord,
};
pub use ids::{ArtifactId, JobId, PortalConfigId, RecordingId, TenantId};
pub use job::{
    BrowserAutomationJob, BrowserJobStatus, CreateJobRequest, JobFailure, JobType, AUTO_APPROVER,
    DEFAULT_MAX_RETRIES,
};
pub use portal::{
    join_url, NormalizedStatus, PortalSelectors, PortalStats, PortalType, RateLimitOverrides,
    RateLimits, StatusMap, VendorPortalConfig,
};
pub use workflow::{
    placeholder_tokens, render_placeholders, AssertCondition, StepAction, WorkflowDefinition,
    WorkflowStep,
};
