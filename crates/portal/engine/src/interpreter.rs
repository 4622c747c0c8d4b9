//! Workflow interpreter
//!
//! Executes a workflow's steps strictly in order against one browser
//! session, appending exactly one record per interpreted step to the
//! execution log.
//!
//! Rules enforced here:
//! - Every step runs under a hard timeout, never longer than what is left
//!   of the workflow's overall budget.
//! - A failed optional step is logged as skipped; a failed required step
//!   aborts the run after a best-effort failure screenshot.
//! - Screenshots never abort a run and are capped per job.
//! - Every navigation target is checked by a [`NavigationGuard`] first.
//! - Cancellation is observed between steps.

use crate::config::InterpreterConfig;
use crate::driver::{BrowserSession, DriverError, WaitTarget};
use crate::placeholder::{resolve_step, ResolvedStep};
use async_trait::async_trait;
use portal_security::DomainValidator;
use portal_types::{
    ArtifactId, ExecutionLog, FailureReason, JobArtifact, JobFailure, JobId, PortalError,
    PortalResult, StepAction, StepOutcome, StepRecord, TenantId, WorkflowDefinition,
    WorkflowStep,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ── Navigation guard ─────────────────────────────────────────────────

/// Decides whether a job may navigate to a URL
#[async_trait]
pub trait NavigationGuard: Send + Sync {
    async fn check_navigation(&self, tenant: &TenantId, url: &str) -> PortalResult<()>;
}

#[async_trait]
impl NavigationGuard for RwLock<DomainValidator> {
    async fn check_navigation(&self, tenant: &TenantId, url: &str) -> PortalResult<()> {
        self.read().await.check(tenant, url)
    }
}

// ── Run types ────────────────────────────────────────────────────────

/// Inputs of one interpreter run
pub struct RunContext<'a> {
    pub job_id: &'a JobId,
    pub tenant_id: &'a TenantId,
    /// Static bindings plus the runtime credential tokens
    pub bindings: &'a BTreeMap<String, String>,
    pub guard: &'a dyn NavigationGuard,
    pub cancel: &'a CancellationToken,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunStatus {
    Completed,
    Failed(JobFailure),
    Cancelled,
}

/// Everything a run produced
#[derive(Clone, Debug)]
pub struct WorkflowRun {
    pub status: RunStatus,
    pub log: ExecutionLog,
    pub extracted: BTreeMap<String, String>,
    pub artifacts: Vec<JobArtifact>,
    /// A required vendor-mutating step succeeded
    pub mutation_committed: bool,
    pub duration_ms: u64,
}

impl WorkflowRun {
    fn new() -> Self {
        Self {
            status: RunStatus::Completed,
            log: ExecutionLog::new(),
            extracted: BTreeMap::new(),
            artifacts: Vec::new(),
            mutation_committed: false,
            duration_ms: 0,
        }
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match &self.status {
            RunStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// A transient failure that happened before anything vendor-visible was done.
    pub fn retry_eligible(&self) -> bool {
        self.failure()
            .is_some_and(|f| f.reason.is_transient() && !self.mutation_committed)
    }

    fn screenshots_taken(&self) -> usize {
        self.artifacts.iter().filter(|a| a.is_screenshot()).count()
    }
}

/// What a successful step produced
enum StepEffect {
    Done,
    Extracted { name: String, value: String },
    Screenshot { reference: String },
}

// ── Interpreter ──────────────────────────────────────────────────────

/// Stateless step-by-step executor
#[derive(Clone, Debug, Default)]
pub struct WorkflowInterpreter {
    config: InterpreterConfig,
}

impl WorkflowInterpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Interpret `workflow` against `session`.
    pub async fn run(
        &self,
        workflow: &WorkflowDefinition,
        ctx: RunContext<'_>,
        session: &mut dyn BrowserSession,
    ) -> WorkflowRun {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(workflow.timeout_ms);
        let mut run = WorkflowRun::new();

        for (index, step) in workflow.steps.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                tracing::info!(
                    job_id = %ctx.job_id,
                    step_index = index,
                    last_completed_step = ?run.log.last_completed_step(),
                    "Workflow cancelled"
                );
                run.log
                    .append(step_record(index, step, None, StepOutcome::Cancelled, 0, vec![]));
                run.status = RunStatus::Cancelled;
                break;
            }

            let step_started = Instant::now();
            let remaining = deadline.saturating_duration_since(step_started);
            let (resolved, result) = match resolve_step(step, index, ctx.bindings, &run.extracted)
            {
                Ok(resolved) => {
                    let result = self
                        .perform(step, &resolved, index, remaining, &run, &ctx, session)
                        .await;
                    (Some(resolved), result)
                }
                Err(err) => (None, Err(JobFailure::from(&err))),
            };
            let duration_ms = elapsed_ms(step_started);

            match result {
                Ok(effect) => {
                    let mut artifacts = Vec::new();
                    match effect {
                        StepEffect::Done => {}
                        StepEffect::Extracted { name, value } => {
                            let artifact =
                                JobArtifact::extracted(ctx.job_id.clone(), index, &name, &value);
                            artifacts.push(artifact.id.clone());
                            run.artifacts.push(artifact);
                            run.extracted.insert(name, value);
                        }
                        StepEffect::Screenshot { reference } => {
                            let artifact =
                                JobArtifact::screenshot(ctx.job_id.clone(), index, reference);
                            artifacts.push(artifact.id.clone());
                            run.artifacts.push(artifact);
                        }
                    }
                    if !step.optional && workflow.is_vendor_mutation(index) {
                        run.mutation_committed = true;
                    }
                    tracing::debug!(
                        job_id = %ctx.job_id,
                        step_index = index,
                        action = %step.action,
                        duration_ms,
                        "Step succeeded"
                    );
                    run.log.append(step_record(
                        index,
                        step,
                        resolved.as_ref(),
                        StepOutcome::Succeeded,
                        duration_ms,
                        artifacts,
                    ));
                }
                Err(failure) if step.optional || step.action == StepAction::Screenshot => {
                    tracing::debug!(
                        job_id = %ctx.job_id,
                        step_index = index,
                        action = %step.action,
                        reason = %failure.reason,
                        "Step skipped"
                    );
                    run.log.append(step_record(
                        index,
                        step,
                        resolved.as_ref(),
                        StepOutcome::Skipped {
                            reason: failure.reason,
                            message: failure.message,
                        },
                        duration_ms,
                        vec![],
                    ));
                }
                Err(failure) => {
                    tracing::warn!(
                        job_id = %ctx.job_id,
                        step_index = index,
                        action = %step.action,
                        reason = %failure.reason,
                        error = %failure.message,
                        "Step failed"
                    );
                    let artifacts = self
                        .failure_screenshot(&failure, index, deadline, &mut run, &ctx, session)
                        .await;
                    run.log.append(step_record(
                        index,
                        step,
                        resolved.as_ref(),
                        StepOutcome::Failed {
                            reason: failure.reason,
                            message: failure.message.clone(),
                        },
                        duration_ms,
                        artifacts,
                    ));
                    run.status = RunStatus::Failed(failure.at_step(index));
                    break;
                }
            }
        }

        run.duration_ms = elapsed_ms(started);
        run
    }

    #[allow(clippy::too_many_arguments)]
    async fn perform(
        &self,
        step: &WorkflowStep,
        resolved: &ResolvedStep,
        index: usize,
        remaining: Duration,
        run: &WorkflowRun,
        ctx: &RunContext<'_>,
        session: &mut dyn BrowserSession,
    ) -> Result<StepEffect, JobFailure> {
        if remaining.is_zero() {
            return Err(budget_exhausted(index));
        }
        let selector = resolved.selector.clone().unwrap_or_default();
        let value = resolved.value.clone().unwrap_or_default();

        let configured_ms = match (step.action, &resolved.selector) {
            (StepAction::Wait, None) => self
                .pause_ms(step)
                .saturating_add(self.config.element_timeout_ms),
            _ => step
                .timeout_ms
                .unwrap_or_else(|| self.config.default_timeout(step.action)),
        };
        let remaining_ms = remaining.as_millis() as u64;
        let capped = remaining_ms < configured_ms;
        let bound_ms = configured_ms.min(remaining_ms);

        match step.action {
            StepAction::Navigate => {
                ctx.guard
                    .check_navigation(ctx.tenant_id, &value)
                    .await
                    .map_err(|e| JobFailure::from(&e))?;
            }
            StepAction::Screenshot if run.screenshots_taken() >= self.config.max_screenshots => {
                return Err(JobFailure::new(
                    FailureReason::Internal,
                    format!(
                        "screenshot limit of {} reached",
                        self.config.max_screenshots
                    ),
                ));
            }
            _ => {}
        }

        let pause_ms = self.pause_ms(step);
        let call = async {
            let outcome = match step.action {
                StepAction::Navigate => session.navigate(&value, bound_ms).await.map(|_| StepEffect::Done),
                StepAction::Fill => session
                    .fill(&selector, &value, bound_ms)
                    .await
                    .map(|_| StepEffect::Done),
                StepAction::Click => session.click(&selector, bound_ms).await.map(|_| StepEffect::Done),
                StepAction::Select => session
                    .select(&selector, &value, bound_ms)
                    .await
                    .map(|_| StepEffect::Done),
                StepAction::Wait => {
                    let target = match &resolved.selector {
                        Some(selector) => WaitTarget::Selector(selector.clone()),
                        None => WaitTarget::Duration(pause_ms),
                    };
                    session.wait_for(&target, bound_ms).await.map(|_| StepEffect::Done)
                }
                StepAction::Assert => {
                    let Some(condition) = &step.assert_condition else {
                        return Err(JobFailure::from(&PortalError::InvalidWorkflow(format!(
                            "step {} has no assert condition",
                            index
                        ))));
                    };
                    match session.check(&selector, condition, bound_ms).await {
                        Ok(true) => Ok(StepEffect::Done),
                        Ok(false) => {
                            return Err(JobFailure::from(&PortalError::AssertionFailed {
                                step_index: index,
                                selector: selector.clone(),
                            }))
                        }
                        Err(err) => Err(err),
                    }
                }
                StepAction::Extract => session
                    .extract_text(&selector, bound_ms)
                    .await
                    .map(|text| StepEffect::Extracted {
                        name: step.extract_as.clone().unwrap_or_default(),
                        value: text.trim().to_string(),
                    }),
                StepAction::Screenshot => session
                    .screenshot(bound_ms)
                    .await
                    .map(|reference| StepEffect::Screenshot { reference }),
            };
            outcome.map_err(|err| driver_failure(err, index, &selector))
        };

        match tokio::time::timeout(Duration::from_millis(bound_ms), call).await {
            Ok(result) => result,
            Err(_) if capped => Err(budget_exhausted(index)),
            Err(_) => Err(JobFailure::from(&PortalError::StepTimeout {
                step_index: index,
                timeout_ms: bound_ms,
            })),
        }
    }

    /// Pause length of a bare `wait` step.
    fn pause_ms(&self, step: &WorkflowStep) -> u64 {
        step.timeout_ms.unwrap_or(self.config.default_wait_ms)
    }

    /// Capture the page after a required step failed, if the session is still usable.
    async fn failure_screenshot(
        &self,
        failure: &JobFailure,
        index: usize,
        deadline: Instant,
        run: &mut WorkflowRun,
        ctx: &RunContext<'_>,
        session: &mut dyn BrowserSession,
    ) -> Vec<ArtifactId> {
        let unusable = matches!(
            failure.reason,
            FailureReason::SessionExpired | FailureReason::WorkflowTimeout
        );
        let remaining = deadline.saturating_duration_since(Instant::now());
        if unusable || remaining.is_zero() || run.screenshots_taken() >= self.config.max_screenshots
        {
            return vec![];
        }

        let bound = remaining.min(Duration::from_millis(self.config.screenshot_timeout_ms));
        match tokio::time::timeout(bound, session.screenshot(bound.as_millis() as u64)).await {
            Ok(Ok(reference)) => {
                let artifact = JobArtifact::screenshot(ctx.job_id.clone(), index, reference);
                let id = artifact.id.clone();
                run.artifacts.push(artifact);
                vec![id]
            }
            _ => {
                tracing::debug!(job_id = %ctx.job_id, step_index = index, "Failure screenshot unavailable");
                vec![]
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

fn budget_exhausted(index: usize) -> JobFailure {
    JobFailure::new(
        FailureReason::WorkflowTimeout,
        format!("workflow time budget exhausted at step {}", index),
    )
}

fn driver_failure(err: DriverError, index: usize, selector: &str) -> JobFailure {
    match err {
        DriverError::ElementNotFound(_) => JobFailure::from(&PortalError::ElementNotFound {
            step_index: index,
            selector: selector.to_string(),
        }),
        DriverError::Timeout(timeout_ms) => JobFailure::from(&PortalError::StepTimeout {
            step_index: index,
            timeout_ms,
        }),
        DriverError::SessionExpired => {
            JobFailure::from(&PortalError::SessionExpired { step_index: index })
        }
        DriverError::Navigation(_) | DriverError::Other(_) => JobFailure::new(
            FailureReason::DriverError,
            format!("step {}: {}", index, err),
        ),
    }
}

/// Build a log record; fill and select values are deliberately left out.
fn step_record(
    index: usize,
    step: &WorkflowStep,
    resolved: Option<&ResolvedStep>,
    outcome: StepOutcome,
    duration_ms: u64,
    artifacts: Vec<ArtifactId>,
) -> StepRecord {
    let url = match step.action {
        StepAction::Navigate => resolved.and_then(|r| r.value.clone()),
        _ => None,
    };
    StepRecord {
        step_index: index,
        action: step.action,
        selector: resolved.and_then(|r| r.selector.clone()),
        url,
        outcome,
        duration_ms,
        artifacts,
        recorded_at: chrono::Utc::now(),
    }
}
