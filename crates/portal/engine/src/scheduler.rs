//! Scheduling policy
//!
//! Pure decisions the engine applies under its admission lock:
//! which approved jobs may enter the queue (one job per portal resource
//! key at a time), in which order queued jobs are offered to the rate
//! limiter, and how long an automatic retry backs off.

use crate::config::RetryConfig;
use chrono::{DateTime, Duration, Utc};
use portal_types::{BrowserAutomationJob, BrowserJobStatus, JobId};
use std::collections::HashSet;

// ── Retry policy ─────────────────────────────────────────────────────

/// Exponential backoff for automatic retries of transient failures
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    base_ms: u64,
    multiplier: f64,
    max_ms: u64,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_ms: config.base_backoff_ms,
            multiplier: config.backoff_multiplier.max(1.0),
            max_ms: config.max_backoff_ms,
        }
    }
}

impl RetryPolicy {
    /// Whether a job that has already been retried `retries` times may be retried again.
    pub fn allows(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let ms = (self.base_ms as f64 * self.multiplier.powi(exponent)).min(self.max_ms as f64);
        Duration::milliseconds(ms as i64)
    }
}

// ── Resource keys ────────────────────────────────────────────────────

/// Whether no other job for the same portal resource is queued or running.
pub fn resource_is_free(job: &BrowserAutomationJob, others: &[BrowserAutomationJob]) -> bool {
    !others
        .iter()
        .any(|other| other.status.holds_resource() && job.shares_resource_with(other))
}

/// Approved jobs that may move to the queue now, oldest first.
///
/// At most one job per (portal, resource key) is promoted, and only when
/// no job already holds that key.
pub fn promotable(jobs: &[BrowserAutomationJob]) -> Vec<JobId> {
    let mut approved: Vec<&BrowserAutomationJob> = jobs
        .iter()
        .filter(|j| j.status == BrowserJobStatus::Approved)
        .collect();
    approved.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let mut claimed = HashSet::new();
    let mut promoted = Vec::new();
    for job in approved {
        if let Some(key) = &job.resource_key {
            let slot = (job.portal_config_id.clone(), key.clone());
            if claimed.contains(&slot) || !resource_is_free(job, jobs) {
                continue;
            }
            claimed.insert(slot);
        }
        promoted.push(job.id.clone());
    }
    promoted
}

/// Queued jobs whose backoff has elapsed, in queue order.
pub fn admission_queue(
    jobs: &[BrowserAutomationJob],
    now: DateTime<Utc>,
) -> Vec<&BrowserAutomationJob> {
    let mut queued: Vec<&BrowserAutomationJob> = jobs
        .iter()
        .filter(|j| j.status == BrowserJobStatus::Queued)
        .filter(|j| j.not_before.map_or(true, |t| t <= now))
        .collect();
    queued.sort_by(|a, b| {
        a.queued_at
            .cmp(&b.queued_at)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    queued
}
