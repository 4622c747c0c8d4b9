//! Per-portal rate limiter
//!
//! Keeps a rolling history of job starts per portal config and the set of
//! jobs currently running against it. A job is admitted only when all four
//! limits hold at once: concurrency, minimum spacing between starts, starts
//! in the last hour and starts in the last day.
//!
//! The limiter is not internally synchronized; the scheduler owns it behind
//! the admission lock so that checking and recording a start is atomic.

use chrono::{DateTime, Duration, Utc};
use portal_types::{JobId, PortalConfigId, RateLimits};
use std::collections::{HashMap, HashSet, VecDeque};

// ── Admission ────────────────────────────────────────────────────────

/// Which limit held a job back
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitKind {
    Concurrency,
    MinDelay,
    Hourly,
    Daily,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Concurrency => "max concurrent jobs",
            Self::MinDelay => "min delay between jobs",
            Self::Hourly => "max jobs per hour",
            Self::Daily => "max jobs per day",
        };
        f.write_str(text)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Deferred {
        limit: LimitKind,
        /// Earliest time the limit can clear; `None` when it waits on a running job
        retry_at: Option<DateTime<Utc>>,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

// ── Portal window ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PortalWindow {
    /// Start times, oldest first
    starts: VecDeque<DateTime<Utc>>,
    running: HashSet<JobId>,
}

impl PortalWindow {
    fn count_since(&self, cutoff: DateTime<Utc>) -> u32 {
        self.starts.iter().filter(|t| **t > cutoff).count() as u32
    }

    /// Oldest start after `cutoff`: the one whose expiry frees the next slot.
    fn oldest_since(&self, cutoff: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.starts.iter().find(|t| **t > cutoff).copied()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(1);
        while self.starts.front().is_some_and(|t| *t <= cutoff) {
            self.starts.pop_front();
        }
    }
}

// ── Rate limiter ─────────────────────────────────────────────────────

/// Rate limiter for job starts against vendor portals
#[derive(Debug)]
pub struct PortalRateLimiter {
    portals: HashMap<PortalConfigId, PortalWindow>,
    /// Maximum start records retained per portal
    max_history: usize,
}

impl Default for PortalRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl PortalRateLimiter {
    pub fn new() -> Self {
        Self {
            portals: HashMap::new(),
            max_history: 10_000,
        }
    }

    /// Check whether a job may start against `portal` at `now`.
    pub fn check(&self, portal: &PortalConfigId, limits: &RateLimits, now: DateTime<Utc>) -> Admission {
        let empty = PortalWindow::default();
        let window = self.portals.get(portal).unwrap_or(&empty);

        // 1. Concurrency
        if window.running.len() as u32 >= limits.max_concurrent_jobs {
            return Admission::Deferred {
                limit: LimitKind::Concurrency,
                retry_at: None,
            };
        }

        // 2. Spacing since the latest start
        if let Some(last) = window.starts.back() {
            let ready_at = *last + Duration::milliseconds(limits.min_delay_between_jobs_ms as i64);
            if now < ready_at {
                return Admission::Deferred {
                    limit: LimitKind::MinDelay,
                    retry_at: Some(ready_at),
                };
            }
        }

        // 3. Rolling windows
        let windows = [
            (LimitKind::Hourly, Duration::hours(1), limits.max_jobs_per_hour),
            (LimitKind::Daily, Duration::days(1), limits.max_jobs_per_day),
        ];
        for (limit, span, max) in windows {
            let cutoff = now - span;
            if window.count_since(cutoff) >= max {
                return Admission::Deferred {
                    limit,
                    retry_at: window.oldest_since(cutoff).map(|t| t + span),
                };
            }
        }

        Admission::Admitted
    }

    /// Check and, when admitted, record the start in one step.
    pub fn try_admit(
        &mut self,
        portal: &PortalConfigId,
        job_id: &JobId,
        limits: &RateLimits,
        now: DateTime<Utc>,
    ) -> Admission {
        let admission = self.check(portal, limits, now);
        if admission.is_admitted() {
            self.record_start(portal, job_id, now);
        }
        admission
    }

    fn record_start(&mut self, portal: &PortalConfigId, job_id: &JobId, at: DateTime<Utc>) {
        let window = self.portals.entry(portal.clone()).or_default();
        window.prune(at);
        window.starts.push_back(at);
        window.running.insert(job_id.clone());

        // FIFO eviction
        while window.starts.len() > self.max_history {
            window.starts.pop_front();
        }
    }

    /// A job stopped running; its start stays counted in the windows.
    pub fn release(&mut self, portal: &PortalConfigId, job_id: &JobId) {
        if let Some(window) = self.portals.get_mut(portal) {
            window.running.remove(job_id);
        }
    }

    pub fn running(&self, portal: &PortalConfigId) -> usize {
        self.portals.get(portal).map_or(0, |w| w.running.len())
    }

    /// Starts recorded against `portal` within `span` before `now`.
    pub fn starts_within(&self, portal: &PortalConfigId, span: Duration, now: DateTime<Utc>) -> u32 {
        self.portals
            .get(portal)
            .map_or(0, |w| w.count_since(now - span))
    }
}
