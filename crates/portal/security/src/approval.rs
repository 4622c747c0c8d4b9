//! Approval gate: human sign-off before vendor-visible work
//!
//! Two checks compose here. A workflow declares `requires_approval`, and
//! a policy layer forces approval for whole job types regardless of that
//! flag: gate-wide (e.g. `submit_report`) and per portal config.
//!
//! Gated jobs get a ledger record that moves `pending -> approved | rejected`.
//! A gated job is only considered approved once its record says so and the
//! job carries an approver identity and approval time.

use chrono::{DateTime, Utc};
use portal_types::{
    BrowserAutomationJob, BrowserJobStatus, FailureReason, JobFailure, JobId, JobType,
    PortalError, PortalResult, TenantId, VendorPortalConfig, WorkflowDefinition, AUTO_APPROVER,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Reason recorded when a rejection gives none.
pub const DEFAULT_REJECT_REASON: &str = "Rejected by user";

/// Default page size for pending approvals.
pub const DEFAULT_PENDING_LIMIT: usize = 10;

// ── Ledger types ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
    /// The job was cancelled before anyone decided
    Withdrawn,
}

/// A decision taken on a gated job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub decided_by: String,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Ledger entry for one gated job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub job_type: JobType,
    pub target_url: String,
    pub portal_name: String,
    pub description: String,
    pub parameters: BTreeMap<String, String>,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub state: ApprovalState,
    pub decision: Option<ApprovalDecision>,
}

/// A pending approval as shown to approvers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub job_type: JobType,
    pub target_url: String,
    pub portal_name: String,
    pub description: String,
    pub parameters: BTreeMap<String, String>,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
}

impl From<&ApprovalRecord> for ApprovalRequest {
    fn from(record: &ApprovalRecord) -> Self {
        Self {
            job_id: record.job_id.clone(),
            tenant_id: record.tenant_id.clone(),
            job_type: record.job_type,
            target_url: record.target_url.clone(),
            portal_name: record.portal_name.clone(),
            description: record.description.clone(),
            parameters: record.parameters.clone(),
            requested_by: record.requested_by.clone(),
            requested_at: record.requested_at,
        }
    }
}

/// Approval requirement for a job type when no workflow says otherwise.
pub fn default_requirement(job_type: JobType) -> bool {
    match job_type {
        JobType::AcceptOrder
        | JobType::CheckStatus
        | JobType::DownloadDocuments
        | JobType::GetNewOrders => false,
        JobType::SubmitReport | JobType::CustomWorkflow => true,
    }
}

/// Human-readable summary of what a job will do.
pub fn generate_job_description(job: &BrowserAutomationJob) -> String {
    let order = job
        .order_number
        .as_deref()
        .or(job.order_id.as_deref())
        .or(job.parameters.get("orderNumber").map(String::as_str))
        .or(job.parameters.get("orderId").map(String::as_str))
        .unwrap_or("Unknown");
    match job.job_type {
        JobType::AcceptOrder => format!("Accept order {}", order),
        JobType::CheckStatus => format!("Check status of order {}", order),
        JobType::DownloadDocuments => format!("Download documents for order {}", order),
        JobType::SubmitReport => format!("Submit report for order {}", order),
        JobType::GetNewOrders => "Get new orders".to_string(),
        JobType::CustomWorkflow => {
            let name = if job.workflow.name.is_empty() {
                "Unknown"
            } else {
                job.workflow.name.as_str()
            };
            format!("Run custom workflow: {}", name)
        }
    }
}

// ── Gate ─────────────────────────────────────────────────────────────

/// Approval policy plus the ledger of gated jobs
#[derive(Debug)]
pub struct ApprovalGate {
    forced: BTreeSet<JobType>,
    records: HashMap<JobId, ApprovalRecord>,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalGate {
    /// A gate forcing approval for `submit_report` and `custom_workflow`.
    pub fn new() -> Self {
        Self::with_forced_job_types([JobType::SubmitReport, JobType::CustomWorkflow])
    }

    pub fn with_forced_job_types(types: impl IntoIterator<Item = JobType>) -> Self {
        Self {
            forced: types.into_iter().collect(),
            records: HashMap::new(),
        }
    }

    pub fn forced_job_types(&self) -> &BTreeSet<JobType> {
        &self.forced
    }

    /// Whether a job of `job_type` on `portal` needs a human decision.
    ///
    /// `workflow` is a caller-supplied definition (custom workflows). Its
    /// flag can only add a requirement, never lift the portal's own.
    pub fn requires_approval(
        &self,
        job_type: JobType,
        portal: Option<&VendorPortalConfig>,
        workflow: Option<&WorkflowDefinition>,
    ) -> bool {
        let Some(portal) = portal else {
            return true;
        };
        if self.forced.contains(&job_type) || portal.forced_approval.contains(&job_type) {
            return true;
        }
        let declared = [workflow, portal.workflow(job_type)];
        if declared.iter().all(Option::is_none) {
            return default_requirement(job_type);
        }
        declared.iter().flatten().any(|w| w.requires_approval)
    }

    /// Whether `job` may run as far as approval is concerned.
    pub fn is_job_approved(&self, job: &BrowserAutomationJob) -> bool {
        if !job.is_approved() {
            return false;
        }
        if !job.requires_approval {
            return true;
        }
        self.records
            .get(&job.id)
            .is_some_and(|r| r.state == ApprovalState::Approved)
    }

    /// Open a pending ledger record for a gated job.
    pub fn request_approval(&mut self, job: &BrowserAutomationJob, portal_name: &str) {
        let record = ApprovalRecord {
            job_id: job.id.clone(),
            tenant_id: job.tenant_id.clone(),
            job_type: job.job_type,
            target_url: job.target_url.clone(),
            portal_name: portal_name.to_string(),
            description: generate_job_description(job),
            parameters: job.parameters.clone(),
            requested_by: job.triggered_by.clone(),
            requested_at: job.created_at,
            state: ApprovalState::Pending,
            decision: None,
        };
        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            description = %record.description,
            "Approval requested"
        );
        self.records.insert(job.id.clone(), record);
    }

    /// Approve a pending job on behalf of `approver`.
    pub fn approve(
        &mut self,
        job: &mut BrowserAutomationJob,
        approver: &str,
        reason: Option<String>,
    ) -> PortalResult<()> {
        if approver.trim().is_empty() {
            return Err(PortalError::InvalidRequest("approver id is required".into()));
        }
        self.ensure_pending(job, BrowserJobStatus::Approved)?;
        job.transition_to(BrowserJobStatus::Approved)?;
        let now = Utc::now();
        job.approved_by = Some(approver.to_string());
        job.approved_at = Some(now);

        self.decide(job, true, approver, reason, now);
        tracing::info!(job_id = %job.id, approved_by = %approver, "Job approved");
        Ok(())
    }

    /// Reject a pending job; it terminates without ever running.
    pub fn reject(
        &mut self,
        job: &mut BrowserAutomationJob,
        rejected_by: &str,
        reason: Option<String>,
    ) -> PortalResult<()> {
        if rejected_by.trim().is_empty() {
            return Err(PortalError::InvalidRequest("approver id is required".into()));
        }
        self.ensure_pending(job, BrowserJobStatus::Rejected)?;
        let reason = reason.unwrap_or_else(|| DEFAULT_REJECT_REASON.to_string());
        job.transition_to(BrowserJobStatus::Rejected)?;
        job.error = Some(JobFailure::new(FailureReason::ApprovalRejected, reason.clone()));

        self.decide(job, false, rejected_by, Some(reason.clone()), Utc::now());
        tracing::info!(
            job_id = %job.id,
            rejected_by = %rejected_by,
            reason = %reason,
            "Job rejected"
        );
        Ok(())
    }

    /// Approve a job that needs no human decision.
    pub fn auto_approve(&mut self, job: &mut BrowserAutomationJob) -> PortalResult<()> {
        if job.requires_approval {
            return Err(PortalError::ApprovalRequired(job.id.clone()));
        }
        job.transition_to(BrowserJobStatus::Approved)?;
        job.approved_by = Some(AUTO_APPROVER.to_string());
        job.approved_at = Some(Utc::now());
        tracing::debug!(job_id = %job.id, "Job auto-approved");
        Ok(())
    }

    /// Close the record of a job cancelled while awaiting a decision.
    pub fn withdraw(&mut self, job_id: &JobId) {
        if let Some(record) = self.records.get_mut(job_id) {
            if record.state == ApprovalState::Pending {
                record.state = ApprovalState::Withdrawn;
            }
        }
    }

    pub fn record(&self, job_id: &JobId) -> Option<&ApprovalRecord> {
        self.records.get(job_id)
    }

    /// Pending approvals for `tenant`, oldest first.
    pub fn pending_approvals(&self, tenant: &TenantId, limit: usize) -> Vec<ApprovalRequest> {
        let mut pending: Vec<&ApprovalRecord> = self
            .records
            .values()
            .filter(|r| r.tenant_id == *tenant && r.state == ApprovalState::Pending)
            .collect();
        pending.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        pending
            .into_iter()
            .take(limit)
            .map(ApprovalRequest::from)
            .collect()
    }

    pub fn pending_count(&self, tenant: &TenantId) -> usize {
        self.records
            .values()
            .filter(|r| r.tenant_id == *tenant && r.state == ApprovalState::Pending)
            .count()
    }

    fn ensure_pending(
        &self,
        job: &BrowserAutomationJob,
        target: BrowserJobStatus,
    ) -> PortalResult<()> {
        if job.status != BrowserJobStatus::Pending {
            return Err(PortalError::InvalidTransition {
                from: job.status,
                to: target,
            });
        }
        Ok(())
    }

    fn decide(
        &mut self,
        job: &BrowserAutomationJob,
        approved: bool,
        decided_by: &str,
        reason: Option<String>,
        decided_at: DateTime<Utc>,
    ) {
        let record = self
            .records
            .entry(job.id.clone())
            .or_insert_with(|| ApprovalRecord {
                job_id: job.id.clone(),
                tenant_id: job.tenant_id.clone(),
                job_type: job.job_type,
                target_url: job.target_url.clone(),
                portal_name: String::new(),
                description: generate_job_description(job),
                parameters: job.parameters.clone(),
                requested_by: job.triggered_by.clone(),
                requested_at: job.created_at,
                state: ApprovalState::Pending,
                decision: None,
            });
        record.state = if approved {
            ApprovalState::Approved
        } else {
            ApprovalState::Rejected
        };
        record.decision = Some(ApprovalDecision {
            approved,
            decided_by: decided_by.to_string(),
            reason,
            decided_at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::{
        CreateJobRequest, PortalConfigId, PortalSelectors, PortalType, RateLimits, StatusMap,
        WorkflowStep,
    };

    fn portal(workflows: Vec<WorkflowDefinition>) -> VendorPortalConfig {
        let now = Utc::now();
        VendorPortalConfig {
            id: PortalConfigId::new("portal-1"),
            tenant_id: TenantId::new("tenant-a"),
            portal_name: "ValueTrac".into(),
            portal_type: PortalType::Valuetrac,
            base_url: "https://www.valuetrac.com".into(),
            login_url: None,
            order_list_url: None,
            dashboard_url: None,
            order_detail_pattern: None,
            credential_name: "valuetrac".into(),
            is_active: true,
            selectors: PortalSelectors::new(),
            workflows,
            rate_limits: RateLimits::default(),
            forced_approval: BTreeSet::new(),
            status_map: StatusMap::new(),
            last_used_at: None,
            success_count: 0,
            failure_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn job(job_type: JobType, requires_approval: bool) -> BrowserAutomationJob {
        let request = CreateJobRequest::new(PortalConfigId::new("portal-1"), job_type, "tester")
            .with_order_number("VT-42");
        let workflow = WorkflowDefinition::new(job_type.as_str(), 60_000)
            .with_steps(vec![WorkflowStep::screenshot()]);
        BrowserAutomationJob::new(
            TenantId::new("tenant-a"),
            &request,
            "https://www.valuetrac.com".into(),
            workflow,
            requires_approval,
        )
    }

    #[test]
    fn defaults_by_job_type() {
        let gate = ApprovalGate::with_forced_job_types([]);
        let p = portal(vec![]);
        assert!(!gate.requires_approval(JobType::AcceptOrder, Some(&p), None));
        assert!(!gate.requires_approval(JobType::CheckStatus, Some(&p), None));
        assert!(!gate.requires_approval(JobType::DownloadDocuments, Some(&p), None));
        assert!(gate.requires_approval(JobType::SubmitReport, Some(&p), None));
        assert!(gate.requires_approval(JobType::CustomWorkflow, Some(&p), None));
    }

    #[test]
    fn missing_portal_requires_approval() {
        let gate = ApprovalGate::new();
        assert!(gate.requires_approval(JobType::CheckStatus, None, None));
    }

    #[test]
    fn workflow_flag_is_honoured() {
        let gate = ApprovalGate::new();
        let p = portal(vec![WorkflowDefinition::new("accept_order", 1000).with_approval(true)]);
        assert!(gate.requires_approval(JobType::AcceptOrder, Some(&p), None));
    }

    #[test]
    fn caller_workflow_cannot_lift_portal_flag() {
        let gate = ApprovalGate::with_forced_job_types([]);
        let p = portal(vec![WorkflowDefinition::new("accept_order", 1000).with_approval(true)]);
        let unflagged = WorkflowDefinition::new("accept_order", 1000);
        assert!(gate.requires_approval(JobType::AcceptOrder, Some(&p), Some(&unflagged)));

        let plain = portal(vec![WorkflowDefinition::new("check_status", 1000)]);
        let flagged = WorkflowDefinition::new("check_status", 1000).with_approval(true);
        assert!(gate.requires_approval(JobType::CheckStatus, Some(&plain), Some(&flagged)));
        assert!(!gate.requires_approval(JobType::CheckStatus, Some(&plain), None));
    }

    #[test]
    fn forced_types_override_workflow_flag() {
        let gate = ApprovalGate::new();
        let p = portal(vec![WorkflowDefinition::new("submit_report", 1000).with_approval(false)]);
        assert!(gate.requires_approval(JobType::SubmitReport, Some(&p), None));

        let mut p = portal(vec![WorkflowDefinition::new("download_documents", 1000)]);
        assert!(!gate.requires_approval(JobType::DownloadDocuments, Some(&p), None));
        p.forced_approval.insert(JobType::DownloadDocuments);
        assert!(gate.requires_approval(JobType::DownloadDocuments, Some(&p), None));
    }

    #[test]
    fn approve_sets_identity_and_record() {
        let mut gate = ApprovalGate::new();
        let mut job = job(JobType::SubmitReport, true);
        gate.request_approval(&job, "Mercury Network");
        assert!(!gate.is_job_approved(&job));
        assert_eq!(gate.pending_count(&job.tenant_id), 1);

        gate.approve(&mut job, "user-7", None).unwrap();
        assert_eq!(job.status, BrowserJobStatus::Approved);
        assert_eq!(job.approved_by.as_deref(), Some("user-7"));
        assert!(job.approved_at.is_some());
        assert!(gate.is_job_approved(&job));
        assert_eq!(gate.record(&job.id).unwrap().state, ApprovalState::Approved);
        assert_eq!(gate.pending_count(&job.tenant_id), 0);
    }

    #[test]
    fn approval_only_from_pending() {
        let mut gate = ApprovalGate::new();
        let mut job = job(JobType::SubmitReport, true);
        gate.request_approval(&job, "p");
        gate.approve(&mut job, "user-7", None).unwrap();
        assert!(matches!(
            gate.approve(&mut job, "user-8", None),
            Err(PortalError::InvalidTransition { .. })
        ));
        assert!(gate.reject(&mut job, "user-8", None).is_err());
    }

    #[test]
    fn reject_uses_default_reason() {
        let mut gate = ApprovalGate::new();
        let mut job = job(JobType::SubmitReport, true);
        gate.request_approval(&job, "p");
        gate.reject(&mut job, "user-7", None).unwrap();

        assert_eq!(job.status, BrowserJobStatus::Rejected);
        let failure = job.error.as_ref().unwrap();
        assert_eq!(failure.reason, FailureReason::ApprovalRejected);
        assert_eq!(failure.message, DEFAULT_REJECT_REASON);
        assert!(!gate.is_job_approved(&job));
        let decision = gate.record(&job.id).unwrap().decision.clone().unwrap();
        assert!(!decision.approved);
    }

    #[test]
    fn auto_approval_refuses_gated_jobs() {
        let mut gate = ApprovalGate::new();
        let mut gated = job(JobType::SubmitReport, true);
        assert!(matches!(
            gate.auto_approve(&mut gated),
            Err(PortalError::ApprovalRequired(_))
        ));

        let mut free = job(JobType::CheckStatus, false);
        gate.auto_approve(&mut free).unwrap();
        assert_eq!(free.approved_by.as_deref(), Some(AUTO_APPROVER));
        assert!(gate.is_job_approved(&free));
        assert!(gate.record(&free.id).is_none());
    }

    #[test]
    fn gated_job_without_record_is_not_approved() {
        let gate = ApprovalGate::new();
        let mut job = job(JobType::SubmitReport, true);
        job.approved_by = Some("someone".into());
        job.approved_at = Some(Utc::now());
        assert!(!gate.is_job_approved(&job));
    }

    #[test]
    fn pending_approvals_are_oldest_first_and_limited() {
        let mut gate = ApprovalGate::new();
        let mut jobs: Vec<_> = (0..3).map(|_| job(JobType::SubmitReport, true)).collect();
        for (i, j) in jobs.iter_mut().enumerate() {
            j.created_at = Utc::now() - chrono::Duration::minutes(10 - i as i64);
            gate.request_approval(j, "p");
        }
        let mut withdrawn = job(JobType::SubmitReport, true);
        gate.request_approval(&withdrawn, "p");
        gate.withdraw(&withdrawn.id);
        withdrawn.status = BrowserJobStatus::Cancelled;

        let tenant = TenantId::new("tenant-a");
        let pending = gate.pending_approvals(&tenant, 2);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].job_id, jobs[0].id);
        assert_eq!(pending[1].job_id, jobs[1].id);
        assert_eq!(gate.pending_count(&tenant), 3);
        assert!(gate
            .pending_approvals(&TenantId::new("tenant-b"), 10)
            .is_empty());
    }

    #[test]
    fn descriptions() {
        let j = job(JobType::AcceptOrder, false);
        assert_eq!(generate_job_description(&j), "Accept order VT-42");
        let j = job(JobType::SubmitReport, true);
        assert_eq!(generate_job_description(&j), "Submit report for order VT-42");

        let mut j = job(JobType::CheckStatus, false);
        j.order_number = None;
        assert_eq!(generate_job_description(&j), "Check status of order Unknown");

        let mut j = job(JobType::CustomWorkflow, true);
        j.workflow.name = "Pull invoices".into();
        assert_eq!(generate_job_description(&j), "Run custom workflow: Pull invoices");
    }
}
