//! Engine configuration

use portal_types::StepAction;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scheduler and worker pool
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Automatic retry of transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Workflow interpreter
    #[serde(default)]
    pub interpreter: InterpreterConfig,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the worker pool looks for admissible jobs (milliseconds)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Maximum jobs executing at once across all portals
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Default page size for `get_pending_jobs`
    #[serde(default = "default_pending_page_size")]
    pub pending_page_size: usize,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            worker_pool_size: default_worker_pool_size(),
            pending_page_size: default_pending_page_size(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Automatic retries of a transient failure before the job fails for good
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry (milliseconds)
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    /// Growth factor per further retry
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on a single backoff (milliseconds)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

/// Interpreter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    #[serde(default = "default_navigate_timeout")]
    pub navigate_timeout_ms: u64,

    /// Click, fill, select, assert, extract and wait-for-selector
    #[serde(default = "default_element_timeout")]
    pub element_timeout_ms: u64,

    #[serde(default = "default_screenshot_timeout")]
    pub screenshot_timeout_ms: u64,

    /// Pause used by a `wait` step that names neither selector nor duration
    #[serde(default = "default_wait")]
    pub default_wait_ms: u64,

    #[serde(default = "default_max_screenshots")]
    pub max_screenshots: usize,
}

impl InterpreterConfig {
    /// Default timeout for `action` when the step gives none.
    pub fn default_timeout(&self, action: StepAction) -> u64 {
        match action {
            StepAction::Navigate => self.navigate_timeout_ms,
            StepAction::Screenshot => self.screenshot_timeout_ms,
            StepAction::Wait
            | StepAction::Fill
            | StepAction::Click
            | StepAction::Select
            | StepAction::Assert
            | StepAction::Extract => self.element_timeout_ms,
        }
    }
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            navigate_timeout_ms: default_navigate_timeout(),
            element_timeout_ms: default_element_timeout(),
            screenshot_timeout_ms: default_screenshot_timeout(),
            default_wait_ms: default_wait(),
            max_screenshots: default_max_screenshots(),
        }
    }
}

// Default value helpers
fn default_tick_interval() -> u64 {
    1000
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_pending_page_size() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff() -> u64 {
    15 * 60 * 1000
}

fn default_navigate_timeout() -> u64 {
    30_000
}

fn default_element_timeout() -> u64 {
    10_000
}

fn default_screenshot_timeout() -> u64 {
    15_000
}

fn default_wait() -> u64 {
    1000
}

fn default_max_screenshots() -> usize {
    10
}
