//! Browser driver seam
//!
//! The engine never talks to a browser directly. A [`BrowserDriver`] opens
//! isolated [`BrowserSession`]s; each session owns one page and exposes the
//! handful of primitives the workflow interpreter needs.
//!
//! Timeouts passed to session methods are hints for the driver's own
//! waiting. The interpreter always enforces a hard bound on top of them.

use async_trait::async_trait;
use portal_types::{AssertCondition, JobId, TenantId};

// ── Errors ───────────────────────────────────────────────────────────

/// Errors reported by a browser driver
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("browser session expired")]
    SessionExpired,

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("driver error: {0}")]
    Other(String),
}

impl DriverError {
    /// Whether the failure came from the transport rather than the page.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SessionExpired | Self::Navigation(_) | Self::Other(_)
        )
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

// ── Session ──────────────────────────────────────────────────────────

/// What a `wait` step waits for
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitTarget {
    /// Pause for a fixed number of milliseconds
    Duration(u64),
    /// Wait until the element is attached and visible
    Selector(String),
}

/// Who a session is opened for
#[derive(Clone, Debug)]
pub struct SessionRequest {
    pub job_id: JobId,
    pub tenant_id: TenantId,
}

/// One isolated browser page
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> DriverResult<()>;

    async fn fill(&mut self, selector: &str, value: &str, timeout_ms: u64) -> DriverResult<()>;

    async fn click(&mut self, selector: &str, timeout_ms: u64) -> DriverResult<()>;

    async fn select(&mut self, selector: &str, value: &str, timeout_ms: u64) -> DriverResult<()>;

    async fn wait_for(&mut self, target: &WaitTarget, timeout_ms: u64) -> DriverResult<()>;

    /// Evaluate `condition` against the element; `Ok(false)` means the check ran and did not hold.
    async fn check(
        &mut self,
        selector: &str,
        condition: &AssertCondition,
        timeout_ms: u64,
    ) -> DriverResult<bool>;

    async fn extract_text(&mut self, selector: &str, timeout_ms: u64) -> DriverResult<String>;

    /// Capture the page; returns a reference to the stored image.
    async fn screenshot(&mut self, timeout_ms: u64) -> DriverResult<String>;

    async fn close(&mut self) -> DriverResult<()>;
}

/// Factory for browser sessions
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open_session(&self, request: &SessionRequest) -> DriverResult<Box<dyn BrowserSession>>;
}
