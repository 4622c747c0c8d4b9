//! Automation engine
//!
//! [`AutomationEngine`] is the programmatic surface the rest of the system
//! uses: job creation and execution, approvals, the domain allowlist,
//! portal configs and workflow recordings.
//!
//! Every job status change goes through the admission lock (the mutex that
//! owns the rate limiter), so duplicate detection, resource-key promotion
//! and rate-limit admission never race each other. Browser work runs
//! outside the lock. When more than one lock is needed the admission lock
//! is taken first, then the registry, domain or approval locks.

use crate::config::EngineConfig;
use crate::credentials::{CredentialRequest, CredentialVault};
use crate::driver::{BrowserDriver, SessionRequest};
use crate::interpreter::{RunContext, RunStatus, WorkflowInterpreter, WorkflowRun};
use crate::placeholder::{job_bindings, static_navigation_targets, validate_placeholders, JobContext};
use crate::rate_limiter::{Admission, PortalRateLimiter};
use crate::recorder::{
    RecordedInput, RecordedStep, RecordedWorkflow, RecordingUpdate, RecordingValidation,
    WorkflowRecorder,
};
use crate::scheduler::{self, RetryPolicy};
use crate::store::{InMemoryJobStore, JobFilter, JobStore};
use chrono::Utc;
use portal_registry::{CreatePortalOptions, PortalConfigTemplate, PortalConfigUpdate, PortalRegistry};
use portal_security::{
    AllowlistScope, ApprovalGate, ApprovalRequest, DomainAllowlistEntry, DomainValidator,
    DEFAULT_PENDING_LIMIT,
};
use portal_types::{
    BrowserAutomationJob, BrowserJobStatus, CreateJobRequest, ExecutionLog, FailureReason,
    JobArtifact, JobExecutionResult, JobFailure, JobId, JobType, NormalizedStatus,
    PortalConfigId, PortalError, PortalResult, PortalStats, PortalType, RecordingId, TenantId,
    VendorPortalConfig, WorkflowDefinition, WorkflowStep,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reason stored on a job cancelled without an explicit reason
pub const DEFAULT_CANCEL_REASON: &str = "Cancelled by user";

const ACTIVE_STATUSES: [BrowserJobStatus; 4] = [
    BrowserJobStatus::Pending,
    BrowserJobStatus::Approved,
    BrowserJobStatus::Queued,
    BrowserJobStatus::Running,
];

/// Result of `submit_job`
#[derive(Clone, Debug)]
pub struct JobSubmission {
    pub job: BrowserAutomationJob,
    /// The request collapsed onto an existing active job for the same resource
    pub deduplicated: bool,
}

/// Outcome of the admission gates for one queued job
enum Admit {
    Started(BrowserAutomationJob),
    NotStarted(JobExecutionResult),
}

/// What happened between admission and finish
enum Attempt {
    Ran(WorkflowRun),
    /// Stopped before the workflow started
    Aborted(JobFailure),
}

enum Outcome {
    Completed,
    Failed { failure: JobFailure, retryable: bool },
    Cancelled,
}

struct AttemptParts {
    outcome: Outcome,
    log: ExecutionLog,
    extracted: BTreeMap<String, String>,
    artifacts: Vec<JobArtifact>,
    duration_ms: u64,
}

impl Attempt {
    fn into_parts(self) -> AttemptParts {
        match self {
            Attempt::Ran(run) => {
                let retryable = run.retry_eligible();
                let outcome = match run.status {
                    RunStatus::Completed => Outcome::Completed,
                    RunStatus::Cancelled => Outcome::Cancelled,
                    RunStatus::Failed(failure) => Outcome::Failed { failure, retryable },
                };
                AttemptParts {
                    outcome,
                    log: run.log,
                    extracted: run.extracted,
                    artifacts: run.artifacts,
                    duration_ms: run.duration_ms,
                }
            }
            Attempt::Aborted(failure) => AttemptParts {
                outcome: Outcome::Failed {
                    retryable: failure.reason.is_transient(),
                    failure,
                },
                log: ExecutionLog::new(),
                extracted: BTreeMap::new(),
                artifacts: Vec::new(),
                duration_ms: 0,
            },
        }
    }
}

fn failed_result(job: &BrowserAutomationJob) -> JobExecutionResult {
    JobExecutionResult {
        job_id: job.id.clone(),
        success: false,
        status: job.status,
        extracted: BTreeMap::new(),
        artifacts: Vec::new(),
        log: ExecutionLog::new(),
        duration_ms: 0,
        error: job.error.clone(),
        deferred: None,
        retry_scheduled: false,
    }
}

// ── Engine ───────────────────────────────────────────────────────────

/// Vendor portal automation engine
pub struct AutomationEngine {
    config: EngineConfig,
    store: Arc<dyn JobStore>,
    registry: RwLock<PortalRegistry>,
    domains: RwLock<DomainValidator>,
    approvals: RwLock<ApprovalGate>,
    recorder: RwLock<WorkflowRecorder>,
    admission: Mutex<PortalRateLimiter>,
    running: Mutex<HashMap<JobId, CancellationToken>>,
    driver: Arc<dyn BrowserDriver>,
    vault: Arc<dyn CredentialVault>,
    interpreter: WorkflowInterpreter,
    retry: RetryPolicy,
}

impl AutomationEngine {
    /// Create an engine with in-memory storage and the default approval policy.
    pub fn new(
        config: EngineConfig,
        driver: Arc<dyn BrowserDriver>,
        vault: Arc<dyn CredentialVault>,
    ) -> Self {
        Self {
            interpreter: WorkflowInterpreter::new(config.interpreter.clone()),
            retry: RetryPolicy::from(&config.retry),
            config,
            store: Arc::new(InMemoryJobStore::new()),
            registry: RwLock::new(PortalRegistry::new()),
            domains: RwLock::new(DomainValidator::new()),
            approvals: RwLock::new(ApprovalGate::new()),
            recorder: RwLock::new(WorkflowRecorder::new()),
            admission: Mutex::new(PortalRateLimiter::new()),
            running: Mutex::new(HashMap::new()),
            driver,
            vault,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_approval_gate(mut self, gate: ApprovalGate) -> Self {
        self.approvals = RwLock::new(gate);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Jobs ─────────────────────────────────────────────────────────

    /// Create a job, or return the active job already covering the same resource.
    pub async fn create_job(
        &self,
        tenant: &TenantId,
        request: CreateJobRequest,
    ) -> PortalResult<BrowserAutomationJob> {
        self.submit_job(tenant, request).await.map(|s| s.job)
    }

    /// Validate and create a job.
    ///
    /// Fails closed on an unknown or inactive portal, a caller workflow on a
    /// non-custom job, a disallowed target or navigation URL, a missing
    /// workflow and unresolvable placeholders.
    pub async fn submit_job(
        &self,
        tenant: &TenantId,
        request: CreateJobRequest,
    ) -> PortalResult<JobSubmission> {
        if request.triggered_by.trim().is_empty() {
            return Err(PortalError::InvalidRequest("triggered_by is required".into()));
        }

        let portal = self
            .registry
            .read()
            .await
            .get_portal_config(tenant, &request.portal_config_id)?;
        if !portal.is_active {
            return Err(PortalError::PortalInactive(portal.id));
        }

        if request.workflow.is_some() && request.job_type != JobType::CustomWorkflow {
            return Err(PortalError::InvalidRequest(format!(
                "{} jobs run the portal's own workflow; only custom_workflow jobs may supply one",
                request.job_type
            )));
        }
        let workflow = match &request.workflow {
            Some(workflow) => {
                workflow.validate()?;
                workflow.clone()
            }
            None => portal
                .workflow(request.job_type)
                .cloned()
                .ok_or(PortalError::WorkflowNotFound(request.job_type))?,
        };
        let target_url = request
            .target_url
            .clone()
            .unwrap_or_else(|| portal.base_url.clone());

        self.check_job_targets(tenant, &portal, &request, &target_url, &workflow)
            .await
            .inspect_err(|err| {
                warn!(
                    tenant_id = %tenant,
                    portal_config_id = %portal.id,
                    job_type = %request.job_type,
                    error = %err,
                    "Job rejected at creation"
                );
            })?;

        let _admission = self.admission.lock().await;

        if let Some(key) = request.effective_resource_key() {
            let filter = JobFilter::new()
                .tenant(tenant)
                .portal(&request.portal_config_id)
                .job_type(request.job_type)
                .statuses(ACTIVE_STATUSES);
            let existing = self
                .store
                .list_jobs(&filter)
                .await?
                .into_iter()
                .find(|j| j.resource_key.as_deref() == Some(key.as_str()));
            if let Some(job) = existing {
                info!(
                    job_id = %job.id,
                    resource_key = %key,
                    status = %job.status,
                    "Duplicate job request collapsed onto active job"
                );
                return Ok(JobSubmission {
                    job,
                    deduplicated: true,
                });
            }
        }

        let requires_approval = self.approvals.read().await.requires_approval(
            request.job_type,
            Some(&portal),
            request.workflow.as_ref(),
        );
        let mut job = BrowserAutomationJob::new(
            tenant.clone(),
            &request,
            target_url,
            workflow,
            requires_approval,
        );
        {
            let mut approvals = self.approvals.write().await;
            if requires_approval {
                approvals.request_approval(&job, &portal.portal_name);
            } else {
                approvals.auto_approve(&mut job)?;
            }
        }
        if job.status == BrowserJobStatus::Approved {
            self.promote_if_free(&mut job).await?;
        }
        self.store.insert_job(job.clone()).await?;

        info!(
            job_id = %job.id,
            tenant_id = %tenant,
            portal_config_id = %job.portal_config_id,
            job_type = %job.job_type,
            status = %job.status,
            requires_approval,
            "Browser automation job created"
        );
        Ok(JobSubmission {
            job,
            deduplicated: false,
        })
    }

    /// Domain and placeholder checks done before a job exists.
    async fn check_job_targets(
        &self,
        tenant: &TenantId,
        portal: &VendorPortalConfig,
        request: &CreateJobRequest,
        target_url: &str,
        workflow: &WorkflowDefinition,
    ) -> PortalResult<()> {
        let domains = self.domains.read().await;
        domains.check(tenant, target_url)?;

        let context = JobContext {
            target_url,
            order_id: request.order_id.as_deref(),
            order_number: request.order_number.as_deref(),
            parameters: &request.parameters,
        };
        let bindings = job_bindings(portal, &context);
        validate_placeholders(workflow, &bindings)?;
        for (_, url) in static_navigation_targets(workflow, &bindings) {
            domains.check(tenant, &url)?;
        }
        Ok(())
    }

    pub async fn get_job(&self, tenant: &TenantId, id: &JobId) -> PortalResult<BrowserAutomationJob> {
        self.load(tenant, id).await
    }

    /// Jobs for `tenant` matching `filter`, oldest first.
    pub async fn list_jobs(
        &self,
        tenant: &TenantId,
        filter: JobFilter,
    ) -> PortalResult<Vec<BrowserAutomationJob>> {
        Ok(self.store.list_jobs(&filter.tenant(tenant)).await?)
    }

    /// Approved and queued jobs waiting to run, oldest first.
    pub async fn get_pending_jobs(
        &self,
        tenant: &TenantId,
        limit: Option<usize>,
    ) -> PortalResult<Vec<BrowserAutomationJob>> {
        let filter = JobFilter::new()
            .tenant(tenant)
            .statuses([BrowserJobStatus::Approved, BrowserJobStatus::Queued])
            .limit(limit.unwrap_or(self.config.scheduler.pending_page_size));
        Ok(self.store.list_jobs(&filter).await?)
    }

    pub async fn get_job_log(&self, tenant: &TenantId, id: &JobId) -> PortalResult<ExecutionLog> {
        self.load(tenant, id).await?;
        Ok(self.store.get_log(id).await?)
    }

    pub async fn get_job_artifacts(
        &self,
        tenant: &TenantId,
        id: &JobId,
    ) -> PortalResult<Vec<JobArtifact>> {
        self.load(tenant, id).await?;
        Ok(self.store.list_artifacts(id).await?)
    }

    /// Cancel a job. Waiting jobs stop at once; a running job stops at its next step boundary.
    pub async fn cancel_job(
        &self,
        tenant: &TenantId,
        id: &JobId,
        reason: Option<String>,
    ) -> PortalResult<BrowserAutomationJob> {
        let reason = reason.unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
        let _admission = self.admission.lock().await;
        let mut job = self.load(tenant, id).await?;

        match job.status {
            BrowserJobStatus::Pending | BrowserJobStatus::Approved | BrowserJobStatus::Queued => {
                if job.status == BrowserJobStatus::Pending {
                    self.approvals.write().await.withdraw(id);
                }
                job.transition_to(BrowserJobStatus::Cancelled)?;
                job.error = Some(JobFailure::new(FailureReason::Cancelled, reason.clone()));
                self.store.update_job(job.clone()).await?;
                info!(job_id = %id, reason = %reason, "Job cancelled");
            }
            BrowserJobStatus::Running => {
                job.cancel_requested = true;
                job.error = Some(JobFailure::new(FailureReason::Cancelled, reason.clone()));
                job.updated_at = Utc::now();
                self.store.update_job(job.clone()).await?;
                if let Some(token) = self.running.lock().await.get(id) {
                    token.cancel();
                }
                info!(job_id = %id, reason = %reason, "Cancellation requested for running job");
            }
            status => {
                return Err(PortalError::InvalidTransition {
                    from: status,
                    to: BrowserJobStatus::Cancelled,
                })
            }
        }
        Ok(job)
    }

    /// Send a failed job back to the queue.
    pub async fn retry_job(&self, tenant: &TenantId, id: &JobId) -> PortalResult<BrowserAutomationJob> {
        let _admission = self.admission.lock().await;
        let mut job = self.load(tenant, id).await?;
        if job.status != BrowserJobStatus::Failed {
            return Err(PortalError::InvalidTransition {
                from: job.status,
                to: BrowserJobStatus::Approved,
            });
        }
        if !job.can_retry() {
            return Err(PortalError::InvalidRequest(format!(
                "job {} has used all {} retries",
                id, job.max_retries
            )));
        }

        job.transition_to(BrowserJobStatus::Approved)?;
        job.retry_count += 1;
        job.error = None;
        job.not_before = None;
        job.cancel_requested = false;
        self.promote_if_free(&mut job).await?;
        self.store.update_job(job.clone()).await?;
        info!(job_id = %id, retry_count = job.retry_count, "Job retried");
        Ok(job)
    }

    /// Run one job now, if every gate lets it through.
    ///
    /// A job held back by its resource key, its retry backoff or a rate
    /// limit stays queued and the result reports it as deferred.
    pub async fn execute_job(&self, tenant: &TenantId, id: &JobId) -> PortalResult<JobExecutionResult> {
        let job = {
            let mut limiter = self.admission.lock().await;
            let mut job = self.load(tenant, id).await?;
            match job.status {
                BrowserJobStatus::Pending => return Err(PortalError::ApprovalRequired(id.clone())),
                BrowserJobStatus::Rejected => return Err(PortalError::ApprovalRejected(id.clone())),
                BrowserJobStatus::Running => {
                    return Ok(JobExecutionResult::deferred(
                        id.clone(),
                        job.status,
                        "job is already running",
                    ))
                }
                BrowserJobStatus::Completed
                | BrowserJobStatus::Failed
                | BrowserJobStatus::Cancelled => {
                    return Err(PortalError::InvalidTransition {
                        from: job.status,
                        to: BrowserJobStatus::Running,
                    })
                }
                BrowserJobStatus::Approved => {
                    if !self.promote_if_free(&mut job).await? {
                        return Ok(JobExecutionResult::deferred(
                            id.clone(),
                            job.status,
                            "another job for this resource is queued or running",
                        ));
                    }
                    self.store.update_job(job.clone()).await?;
                }
                BrowserJobStatus::Queued => {}
            }

            if let Some(not_before) = job.not_before.filter(|t| *t > Utc::now()) {
                return Ok(JobExecutionResult::deferred(
                    id.clone(),
                    job.status,
                    format!("retry backoff until {}", not_before.to_rfc3339()),
                ));
            }

            match self.admit_locked(&mut limiter, job).await? {
                Admit::Started(job) => job,
                Admit::NotStarted(result) => return Ok(result),
            }
        };
        Ok(self.run_admitted(job).await)
    }

    /// Promote approved jobs whose resource is free, then admit up to
    /// `capacity` queued jobs. Admitted jobs are `running` and must be
    /// handed to [`AutomationEngine::run_admitted`].
    pub async fn schedule_tick(&self, capacity: usize) -> PortalResult<Vec<BrowserAutomationJob>> {
        let mut limiter = self.admission.lock().await;
        let filter = JobFilter::new().statuses([
            BrowserJobStatus::Approved,
            BrowserJobStatus::Queued,
            BrowserJobStatus::Running,
        ]);
        let mut jobs = self.store.list_jobs(&filter).await?;

        for id in scheduler::promotable(&jobs) {
            if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
                job.transition_to(BrowserJobStatus::Queued)?;
                self.store.update_job(job.clone()).await?;
                debug!(job_id = %job.id, "Job queued");
            }
        }

        let ready: Vec<BrowserAutomationJob> = scheduler::admission_queue(&jobs, Utc::now())
            .into_iter()
            .cloned()
            .collect();
        let mut started = Vec::new();
        for job in ready {
            if started.len() >= capacity {
                break;
            }
            if let Admit::Started(job) = self.admit_locked(&mut limiter, job).await? {
                started.push(job);
            }
        }
        Ok(started)
    }

    /// Run a job the scheduler has just admitted and record its outcome.
    pub async fn run_admitted(&self, job: BrowserAutomationJob) -> JobExecutionResult {
        let cancel = CancellationToken::new();
        self.running.lock().await.insert(job.id.clone(), cancel.clone());
        // A cancel that landed between admission and registration is only in the store.
        if matches!(self.store.get_job(&job.id).await, Ok(Some(stored)) if stored.cancel_requested) {
            cancel.cancel();
        }

        let attempt = self.attempt(&job, &cancel).await;
        self.running.lock().await.remove(&job.id);
        self.finish(job, attempt).await
    }

    async fn attempt(&self, job: &BrowserAutomationJob, cancel: &CancellationToken) -> Attempt {
        let lookup = self
            .registry
            .read()
            .await
            .get_portal_config(&job.tenant_id, &job.portal_config_id);
        let portal = match lookup {
            Ok(portal) => portal,
            Err(err) => return Attempt::Aborted(JobFailure::from(&err)),
        };

        let request = CredentialRequest {
            tenant_id: job.tenant_id.clone(),
            portal_config_id: portal.id.clone(),
            credential_name: portal.credential_name.clone(),
            job_id: job.id.clone(),
        };
        let credential = match self.vault.get_credential(&request).await {
            Ok(credential) => credential,
            Err(err) => {
                warn!(job_id = %job.id, portal_config_id = %portal.id, error = %err, "Credential unavailable");
                return Attempt::Aborted(JobFailure::from(&PortalError::CredentialMissing(
                    portal.id.clone(),
                )));
            }
        };

        let mut bindings = job_bindings(&portal, &JobContext::from(job));
        if let Err(err) = validate_placeholders(&job.workflow, &bindings) {
            return Attempt::Aborted(JobFailure::from(&err));
        }
        bindings.insert("username".into(), credential.username.clone());
        bindings.insert("password".into(), credential.password().to_string());

        let session_request = SessionRequest {
            job_id: job.id.clone(),
            tenant_id: job.tenant_id.clone(),
        };
        let mut session = match self.driver.open_session(&session_request).await {
            Ok(session) => session,
            Err(err) => {
                let reason = if err.is_transient() {
                    FailureReason::DriverError
                } else {
                    FailureReason::Internal
                };
                warn!(job_id = %job.id, error = %err, "Could not open browser session");
                return Attempt::Aborted(JobFailure::new(
                    reason,
                    format!("could not open browser session: {}", err),
                ));
            }
        };

        info!(
            job_id = %job.id,
            portal_config_id = %job.portal_config_id,
            job_type = %job.job_type,
            attempt = job.retry_count + 1,
            "Job started"
        );
        let ctx = RunContext {
            job_id: &job.id,
            tenant_id: &job.tenant_id,
            bindings: &bindings,
            guard: &self.domains,
            cancel,
        };
        let run = self.interpreter.run(&job.workflow, ctx, session.as_mut()).await;
        if let Err(err) = session.close().await {
            debug!(job_id = %job.id, error = %err, "Browser session close failed");
        }
        Attempt::Ran(run)
    }

    /// Record an attempt's outcome and free its admission slot.
    async fn finish(&self, job: BrowserAutomationJob, attempt: Attempt) -> JobExecutionResult {
        let AttemptParts {
            outcome,
            log,
            extracted,
            artifacts,
            duration_ms,
        } = attempt.into_parts();

        let mut limiter = self.admission.lock().await;
        limiter.release(&job.portal_config_id, &job.id);

        let mut current = match self.store.get_job(&job.id).await {
            Ok(Some(stored)) => stored,
            _ => job,
        };
        let outcome = match outcome {
            Outcome::Completed => Outcome::Completed,
            _ if current.cancel_requested => Outcome::Cancelled,
            other => other,
        };

        let now = Utc::now();
        let mut retry_scheduled = false;
        let next = match outcome {
            Outcome::Completed => {
                current.result = extracted.clone();
                current.error = None;
                BrowserJobStatus::Completed
            }
            Outcome::Cancelled => {
                if current.error.is_none() {
                    current.error = Some(JobFailure::new(
                        FailureReason::Cancelled,
                        DEFAULT_CANCEL_REASON,
                    ));
                }
                BrowserJobStatus::Cancelled
            }
            Outcome::Failed { failure, retryable } if retryable && self.retry.allows(current.retry_count) => {
                retry_scheduled = true;
                current.retry_count += 1;
                current.not_before = Some(now + self.retry.backoff(current.retry_count));
                current.error = Some(failure);
                BrowserJobStatus::Queued
            }
            Outcome::Failed { failure, .. } => {
                current.error = Some(failure);
                BrowserJobStatus::Failed
            }
        };
        if let Err(err) = current.transition_to(next) {
            error!(job_id = %current.id, error = %err, "Could not record job outcome");
        }
        if matches!(current.status, BrowserJobStatus::Completed | BrowserJobStatus::Failed)
            && duration_ms > 0
        {
            current.duration_ms = Some(duration_ms);
        }

        match current.status {
            BrowserJobStatus::Completed | BrowserJobStatus::Failed => {
                self.registry.write().await.record_outcome(
                    &current.portal_config_id,
                    current.status == BrowserJobStatus::Completed,
                    now,
                );
            }
            _ => {}
        }

        if let Err(err) = self.store.append_log(&current.id, log.clone()).await {
            error!(job_id = %current.id, error = %err, "Failed to store execution log");
        }
        if !artifacts.is_empty() {
            if let Err(err) = self.store.add_artifacts(&current.id, artifacts.clone()).await {
                error!(job_id = %current.id, error = %err, "Failed to store artifacts");
            }
        }
        if let Err(err) = self.store.update_job(current.clone()).await {
            error!(job_id = %current.id, error = %err, "Failed to store job");
        }
        drop(limiter);

        match (&current.status, &current.error) {
            (BrowserJobStatus::Completed, _) => info!(
                job_id = %current.id,
                duration_ms,
                extracted = current.result.len(),
                "Job completed"
            ),
            (BrowserJobStatus::Queued, Some(failure)) => info!(
                job_id = %current.id,
                reason = %failure.reason,
                retry_count = current.retry_count,
                not_before = ?current.not_before,
                "Transient failure, retry scheduled"
            ),
            (status, failure) => warn!(
                job_id = %current.id,
                status = %status,
                reason = ?failure.as_ref().map(|f| f.reason),
                message = ?failure.as_ref().map(|f| f.message.as_str()),
                "Job did not complete"
            ),
        }

        JobExecutionResult {
            job_id: current.id.clone(),
            success: current.status == BrowserJobStatus::Completed,
            status: current.status,
            extracted,
            artifacts,
            log,
            duration_ms,
            error: current.error.clone(),
            deferred: None,
            retry_scheduled,
        }
    }

    /// Approval, domain and rate-limit gates for a queued job. Caller holds the admission lock.
    async fn admit_locked(
        &self,
        limiter: &mut PortalRateLimiter,
        mut job: BrowserAutomationJob,
    ) -> PortalResult<Admit> {
        if !self.approvals.read().await.is_job_approved(&job) {
            let err = PortalError::ApprovalRequired(job.id.clone());
            return self.fail_before_start(job, &err).await;
        }
        let domain_check = self.domains.read().await.check(&job.tenant_id, &job.target_url);
        if let Err(err) = domain_check {
            return self.fail_before_start(job, &err).await;
        }

        let lookup = self
            .registry
            .read()
            .await
            .get_portal_config(&job.tenant_id, &job.portal_config_id);
        let portal = match lookup {
            Ok(portal) => portal,
            Err(err) => return self.fail_before_start(job, &err).await,
        };
        if !portal.is_active {
            return Ok(Admit::NotStarted(JobExecutionResult::deferred(
                job.id.clone(),
                job.status,
                PortalError::PortalInactive(portal.id).to_string(),
            )));
        }

        match limiter.try_admit(&job.portal_config_id, &job.id, &portal.rate_limits, Utc::now()) {
            Admission::Admitted => {
                job.transition_to(BrowserJobStatus::Running)?;
                self.store.update_job(job.clone()).await?;
                debug!(job_id = %job.id, portal_config_id = %job.portal_config_id, "Job admitted");
                Ok(Admit::Started(job))
            }
            Admission::Deferred { limit, retry_at } => {
                debug!(
                    job_id = %job.id,
                    portal_config_id = %job.portal_config_id,
                    limit = %limit,
                    retry_at = ?retry_at,
                    "Admission deferred"
                );
                let why = PortalError::RateLimitExceeded {
                    portal_config_id: job.portal_config_id.clone(),
                    limit: limit.to_string(),
                };
                Ok(Admit::NotStarted(JobExecutionResult::deferred(
                    job.id.clone(),
                    job.status,
                    why.to_string(),
                )))
            }
        }
    }

    async fn fail_before_start(
        &self,
        mut job: BrowserAutomationJob,
        err: &PortalError,
    ) -> PortalResult<Admit> {
        job.transition_to(BrowserJobStatus::Failed)?;
        job.error = Some(JobFailure::from(err));
        self.store.update_job(job.clone()).await?;
        self.registry
            .write()
            .await
            .record_outcome(&job.portal_config_id, false, Utc::now());
        warn!(job_id = %job.id, error = %err, "Job failed before start");
        Ok(Admit::NotStarted(failed_result(&job)))
    }

    /// Move an approved job to the queue when its resource key is free. Caller holds the admission lock.
    async fn promote_if_free(&self, job: &mut BrowserAutomationJob) -> PortalResult<bool> {
        if job.resource_key.is_some() {
            let filter = JobFilter::new()
                .portal(&job.portal_config_id)
                .statuses([BrowserJobStatus::Queued, BrowserJobStatus::Running]);
            let holders = self.store.list_jobs(&filter).await?;
            if !scheduler::resource_is_free(job, &holders) {
                return Ok(false);
            }
        }
        job.transition_to(BrowserJobStatus::Queued)?;
        Ok(true)
    }

    async fn load(&self, tenant: &TenantId, id: &JobId) -> PortalResult<BrowserAutomationJob> {
        self.store
            .get_job(id)
            .await?
            .filter(|j| j.tenant_id == *tenant)
            .ok_or_else(|| PortalError::JobNotFound(id.clone()))
    }

    // ── Approvals ────────────────────────────────────────────────────

    pub async fn approve_job(
        &self,
        tenant: &TenantId,
        id: &JobId,
        approver: &str,
        reason: Option<String>,
    ) -> PortalResult<BrowserAutomationJob> {
        let _admission = self.admission.lock().await;
        let mut job = self.load(tenant, id).await?;
        self.approvals.write().await.approve(&mut job, approver, reason)?;
        self.promote_if_free(&mut job).await?;
        self.store.update_job(job.clone()).await?;
        Ok(job)
    }

    pub async fn reject_job(
        &self,
        tenant: &TenantId,
        id: &JobId,
        rejected_by: &str,
        reason: Option<String>,
    ) -> PortalResult<BrowserAutomationJob> {
        let _admission = self.admission.lock().await;
        let mut job = self.load(tenant, id).await?;
        self.approvals.write().await.reject(&mut job, rejected_by, reason)?;
        self.store.update_job(job.clone()).await?;
        Ok(job)
    }

    /// Jobs awaiting a decision, oldest first.
    pub async fn get_pending_approvals(
        &self,
        tenant: &TenantId,
        limit: Option<usize>,
    ) -> Vec<ApprovalRequest> {
        self.approvals
            .read()
            .await
            .pending_approvals(tenant, limit.unwrap_or(DEFAULT_PENDING_LIMIT))
    }

    pub async fn get_pending_approval_count(&self, tenant: &TenantId) -> usize {
        self.approvals.read().await.pending_count(tenant)
    }

    // ── Domain allowlist ─────────────────────────────────────────────

    pub async fn is_domain_allowed(&self, tenant: &TenantId, url: &str) -> bool {
        self.domains.read().await.is_domain_allowed(tenant, url)
    }

    pub async fn add_to_allowlist(
        &self,
        scope: AllowlistScope,
        domain: &str,
        added_by: &str,
    ) -> PortalResult<DomainAllowlistEntry> {
        self.domains.write().await.add_to_allowlist(scope, domain, added_by)
    }

    pub async fn remove_from_allowlist(&self, scope: &AllowlistScope, domain: &str) -> bool {
        self.domains.write().await.remove_from_allowlist(scope, domain)
    }

    pub async fn get_allowlist(&self, tenant: &TenantId) -> Vec<DomainAllowlistEntry> {
        self.domains.read().await.get_allowlist(tenant)
    }

    // ── Portal configs ───────────────────────────────────────────────

    pub async fn available_portal_types(&self) -> Vec<PortalType> {
        self.registry.read().await.available_portal_types()
    }

    pub async fn get_portal_template(&self, portal_type: PortalType) -> PortalConfigTemplate {
        self.registry.read().await.get_portal_template(portal_type)
    }

    pub async fn create_portal_config(
        &self,
        tenant: &TenantId,
        portal_type: PortalType,
        base_url: &str,
        credential_name: &str,
        options: CreatePortalOptions,
    ) -> PortalResult<VendorPortalConfig> {
        self.registry
            .write()
            .await
            .create_portal_config(tenant, portal_type, base_url, credential_name, options)
    }

    pub async fn get_portal_config(
        &self,
        tenant: &TenantId,
        id: &PortalConfigId,
    ) -> PortalResult<VendorPortalConfig> {
        self.registry.read().await.get_portal_config(tenant, id)
    }

    pub async fn list_portal_configs(&self, tenant: &TenantId, active_only: bool) -> Vec<VendorPortalConfig> {
        self.registry.read().await.list_portal_configs(tenant, active_only)
    }

    pub async fn update_portal_config(
        &self,
        tenant: &TenantId,
        id: &PortalConfigId,
        update: PortalConfigUpdate,
    ) -> PortalResult<VendorPortalConfig> {
        self.registry.write().await.update_portal_config(tenant, id, update)
    }

    pub async fn delete_portal_config(&self, tenant: &TenantId, id: &PortalConfigId) -> PortalResult<()> {
        self.registry.write().await.delete_portal_config(tenant, id)
    }

    pub async fn toggle_portal_active(
        &self,
        tenant: &TenantId,
        id: &PortalConfigId,
        is_active: bool,
    ) -> PortalResult<VendorPortalConfig> {
        self.registry.write().await.toggle_portal_active(tenant, id, is_active)
    }

    pub async fn get_portal_stats(&self, tenant: &TenantId, id: &PortalConfigId) -> PortalStats {
        self.registry.read().await.get_portal_stats(tenant, id)
    }

    /// Normalize status text scraped from a portal with that portal's status map.
    pub async fn parse_portal_status(
        &self,
        tenant: &TenantId,
        id: &PortalConfigId,
        text: &str,
    ) -> PortalResult<NormalizedStatus> {
        let portal = self.registry.read().await.get_portal_config(tenant, id)?;
        Ok(portal.status_map.parse(text))
    }

    // ── Recordings ───────────────────────────────────────────────────

    pub async fn start_recording(
        &self,
        tenant: &TenantId,
        portal_config_id: &PortalConfigId,
        name: &str,
        created_by: &str,
    ) -> PortalResult<RecordedWorkflow> {
        self.registry
            .read()
            .await
            .get_portal_config(tenant, portal_config_id)?;
        self.recorder
            .write()
            .await
            .start_recording(tenant, portal_config_id, name, created_by)
    }

    pub async fn add_recorded_step(
        &self,
        tenant: &TenantId,
        id: &RecordingId,
        input: RecordedInput,
    ) -> PortalResult<RecordedStep> {
        self.recorder.write().await.add_recorded_step(tenant, id, input)
    }

    pub async fn stop_recording(
        &self,
        tenant: &TenantId,
        id: &RecordingId,
        start_url: &str,
    ) -> PortalResult<RecordedWorkflow> {
        self.recorder.write().await.stop_recording(tenant, id, start_url)
    }

    pub async fn get_recording(&self, tenant: &TenantId, id: &RecordingId) -> PortalResult<RecordedWorkflow> {
        self.recorder.read().await.get_recording(tenant, id)
    }

    pub async fn list_recordings(
        &self,
        tenant: &TenantId,
        portal_config_id: Option<&PortalConfigId>,
    ) -> Vec<RecordedWorkflow> {
        self.recorder.read().await.list_recordings(tenant, portal_config_id)
    }

    pub async fn update_recording(
        &self,
        tenant: &TenantId,
        id: &RecordingId,
        update: RecordingUpdate,
    ) -> PortalResult<RecordedWorkflow> {
        self.recorder.write().await.update_recording(tenant, id, update)
    }

    pub async fn delete_recording(&self, tenant: &TenantId, id: &RecordingId) -> PortalResult<()> {
        self.recorder.write().await.delete_recording(tenant, id)
    }

    pub async fn validate_recording(
        &self,
        tenant: &TenantId,
        id: &RecordingId,
    ) -> PortalResult<RecordingValidation> {
        self.recorder.write().await.validate_recording(tenant, id)
    }

    pub async fn convert_to_workflow_steps(
        &self,
        tenant: &TenantId,
        id: &RecordingId,
    ) -> PortalResult<Vec<WorkflowStep>> {
        Ok(self.get_recording(tenant, id).await?.to_workflow_steps())
    }

    pub async fn generate_workflow_definition(
        &self,
        tenant: &TenantId,
        id: &RecordingId,
    ) -> PortalResult<WorkflowDefinition> {
        self.recorder.read().await.generate_workflow_definition(tenant, id)
    }

    /// Create a `custom_workflow` job from a validated recording. Always gated.
    pub async fn create_recording_job(
        &self,
        tenant: &TenantId,
        id: &RecordingId,
        triggered_by: &str,
    ) -> PortalResult<BrowserAutomationJob> {
        let recording = self.get_recording(tenant, id).await?;
        if !recording.is_validated {
            return Err(PortalError::InvalidRequest(format!(
                "recording {} must be validated before it can run",
                id
            )));
        }
        let mut request = CreateJobRequest::new(
            recording.portal_config_id.clone(),
            JobType::CustomWorkflow,
            triggered_by,
        )
        .with_workflow(recording.to_workflow_definition());
        if let Some(start_url) = &recording.start_url {
            request = request.with_target_url(start_url.clone());
        }
        self.create_job(tenant, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimulatedBrowser, StaticCredentialVault};
    use portal_types::RateLimitOverrides;

    async fn engine() -> (AutomationEngine, TenantId, VendorPortalConfig) {
        let engine = AutomationEngine::new(
            EngineConfig::default(),
            Arc::new(SimulatedBrowser::new()),
            Arc::new(StaticCredentialVault::new().with_credential("vt", "appraiser", "secret")),
        );
        let tenant = TenantId::new("tenant-a");
        engine
            .add_to_allowlist(AllowlistScope::Global, "www.valuetrac.com", "admin")
            .await
            .unwrap();
        let portal = engine
            .create_portal_config(
                &tenant,
                PortalType::Valuetrac,
                "",
                "vt",
                CreatePortalOptions {
                    custom_rate_limits: RateLimitOverrides {
                        min_delay_between_jobs_ms: Some(0),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (engine, tenant, portal)
    }

    fn accept(portal: &VendorPortalConfig, order: &str) -> CreateJobRequest {
        CreateJobRequest::new(portal.id.clone(), JobType::AcceptOrder, "tester").with_order_id(order)
    }

    #[tokio::test]
    async fn ungated_job_is_queued_at_creation() {
        let (engine, tenant, portal) = engine().await;
        let job = engine.create_job(&tenant, accept(&portal, "1001")).await.unwrap();
        assert_eq!(job.status, BrowserJobStatus::Queued);
        assert_eq!(job.approved_by.as_deref(), Some(portal_types::AUTO_APPROVER));

        let pending = engine.get_pending_jobs(&tenant, None).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn cancel_waiting_job_and_refuse_terminal() {
        let (engine, tenant, portal) = engine().await;
        let job = engine.create_job(&tenant, accept(&portal, "1002")).await.unwrap();

        let cancelled = engine.cancel_job(&tenant, &job.id, None).await.unwrap();
        assert_eq!(cancelled.status, BrowserJobStatus::Cancelled);
        assert_eq!(
            cancelled.error.unwrap().message,
            DEFAULT_CANCEL_REASON.to_string()
        );
        assert!(matches!(
            engine.cancel_job(&tenant, &job.id, None).await,
            Err(PortalError::InvalidTransition { .. })
        ));
        assert!(matches!(
            engine.execute_job(&tenant, &job.id).await,
            Err(PortalError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn retry_only_from_failed() {
        let (engine, tenant, portal) = engine().await;
        let job = engine.create_job(&tenant, accept(&portal, "1003")).await.unwrap();
        assert!(matches!(
            engine.retry_job(&tenant, &job.id).await,
            Err(PortalError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn other_tenant_cannot_see_job() {
        let (engine, tenant, portal) = engine().await;
        let job = engine.create_job(&tenant, accept(&portal, "1004")).await.unwrap();
        let other = TenantId::new("tenant-b");
        assert_eq!(
            engine.get_job(&other, &job.id).await.unwrap_err(),
            PortalError::JobNotFound(job.id.clone())
        );
        assert!(engine.get_job(&tenant, &job.id).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_and_inactive_portals_are_refused() {
        let (engine, tenant, portal) = engine().await;
        let missing = CreateJobRequest::new(PortalConfigId::new("nope"), JobType::AcceptOrder, "tester");
        assert!(matches!(
            engine.create_job(&tenant, missing).await,
            Err(PortalError::PortalNotFound(_))
        ));

        engine.toggle_portal_active(&tenant, &portal.id, false).await.unwrap();
        assert!(matches!(
            engine.create_job(&tenant, accept(&portal, "1005")).await,
            Err(PortalError::PortalInactive(_))
        ));
    }

    #[tokio::test]
    async fn unresolved_placeholder_rejected_at_creation() {
        let (engine, tenant, portal) = engine().await;
        // check_status searches for {{orderNumber}}, which needs an order reference
        let request = CreateJobRequest::new(portal.id.clone(), JobType::CheckStatus, "tester");
        assert!(matches!(
            engine.create_job(&tenant, request).await,
            Err(PortalError::UnresolvedPlaceholder { .. })
        ));
        assert!(engine.list_jobs(&tenant, JobFilter::new()).await.unwrap().is_empty());
    }
}
