//! Order acceptance
//!
//! A typed façade over the engine for the most common job: accepting an
//! appraisal order on a vendor portal. It creates `accept_order` jobs,
//! runs them, and reads order details back out of the extracted values.
//! Nothing here touches the browser directly.

use crate::engine::{AutomationEngine, JobSubmission};
use crate::store::JobFilter;
use chrono::{DateTime, Duration, Utc};
use portal_types::{
    BrowserJobStatus, CreateJobRequest, JobExecutionResult, JobFailure, JobId, JobType,
    NormalizedStatus, PortalConfigId, PortalError, PortalResult, TenantId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Window used by `get_acceptance_stats` when none is given
pub const DEFAULT_STATS_DAYS: u32 = 7;

// ── Requests ─────────────────────────────────────────────────────────

/// Order identifiers; at least one is required
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub order_number: Option<String>,
}

impl OrderRef {
    pub fn by_id(order_id: impl Into<String>) -> Self {
        Self {
            order_id: Some(order_id.into()),
            order_number: None,
        }
    }

    pub fn by_number(order_number: impl Into<String>) -> Self {
        Self {
            order_id: None,
            order_number: Some(order_number.into()),
        }
    }

    fn validate(&self) -> PortalResult<()> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        if present(&self.order_id) || present(&self.order_number) {
            Ok(())
        } else {
            Err(PortalError::InvalidRequest(
                "either order id or order number is required".into(),
            ))
        }
    }

    fn label(&self) -> String {
        self.order_number
            .clone()
            .or_else(|| self.order_id.clone())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderAcceptRequest {
    pub portal_config_id: PortalConfigId,
    #[serde(flatten)]
    pub order: OrderRef,
    /// Order detail page; defaults to the portal's base URL
    #[serde(default)]
    pub order_url: Option<String>,
    #[serde(default)]
    pub fee: Option<f64>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub property_address: Option<String>,
    pub triggered_by: String,
}

impl OrderAcceptRequest {
    pub fn new(portal_config_id: PortalConfigId, order: OrderRef, triggered_by: impl Into<String>) -> Self {
        Self {
            portal_config_id,
            order,
            order_url: None,
            fee: None,
            due_date: None,
            property_address: None,
            triggered_by: triggered_by.into(),
        }
    }

    pub fn with_fee(mut self, fee: f64) -> Self {
        self.fee = Some(fee);
        self
    }

    pub fn with_due_date(mut self, due_date: impl Into<String>) -> Self {
        self.due_date = Some(due_date.into());
        self
    }

    pub fn with_property_address(mut self, address: impl Into<String>) -> Self {
        self.property_address = Some(address.into());
        self
    }

    fn to_job_request(&self) -> CreateJobRequest {
        let mut request = CreateJobRequest::new(
            self.portal_config_id.clone(),
            JobType::AcceptOrder,
            self.triggered_by.clone(),
        );
        request.order_id = self.order.order_id.clone();
        request.order_number = self.order.order_number.clone();
        request.target_url = self.order_url.clone();
        let parameters = [
            ("fee", self.fee.map(|f| format!("{:.2}", f))),
            ("dueDate", self.due_date.clone()),
            ("propertyAddress", self.property_address.clone()),
        ];
        for (key, value) in parameters {
            if let Some(value) = value {
                request = request.with_parameter(key, value);
            }
        }
        request
    }
}

// ── Results ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceStatus {
    Accepted,
    Failed,
    PendingApproval,
    AlreadyProcessing,
    /// Held back by a rate limit, a busy resource or a retry backoff
    Deferred,
}

/// What the portal reported about an accepted order
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order_id: Option<String>,
    pub order_number: Option<String>,
    pub fee: Option<f64>,
    pub due_date: Option<String>,
    /// Status text shown by the portal after acceptance
    pub portal_status: Option<String>,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderAcceptResult {
    pub success: bool,
    pub job_id: JobId,
    pub status: AcceptanceStatus,
    pub message: String,
    pub order_details: Option<OrderDetails>,
    pub error: Option<JobFailure>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAcceptance {
    pub job_id: JobId,
    pub requires_approval: bool,
    /// An active job for the same order already existed
    pub already_queued: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedAcceptance {
    pub order: OrderRef,
    pub job_id: Option<JobId>,
    pub status: Option<AcceptanceStatus>,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchAcceptResult {
    pub successful: Vec<OrderAcceptResult>,
    pub failed: Vec<FailedAcceptance>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OrderStatusCheck {
    Resolved {
        job_id: JobId,
        raw: String,
        normalized: NormalizedStatus,
        checked_at: DateTime<Utc>,
    },
    Deferred {
        job_id: JobId,
        reason: String,
    },
    Failed {
        job_id: Option<JobId>,
        error: String,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalAcceptanceCounts {
    pub accepted: u64,
    pub failed: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceStats {
    pub total_accepted: u64,
    pub total_failed: u64,
    /// accepted / (accepted + failed); zero when nothing finished
    pub success_rate: f64,
    pub average_duration_ms: u64,
    pub by_portal: BTreeMap<PortalConfigId, PortalAcceptanceCounts>,
}

/// Parse a fee as shown on a portal, such as `$1,250.00`.
pub fn parse_fee(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
        .collect();
    cleaned.parse::<f64>().ok().filter(|fee| fee.is_finite())
}

// ── Acceptor ─────────────────────────────────────────────────────────

pub struct OrderAcceptor {
    engine: Arc<AutomationEngine>,
}

impl OrderAcceptor {
    pub fn new(engine: Arc<AutomationEngine>) -> Self {
        Self { engine }
    }

    /// Create the acceptance job and run it right away.
    pub async fn accept_order(
        &self,
        tenant: &TenantId,
        request: &OrderAcceptRequest,
    ) -> PortalResult<OrderAcceptResult> {
        let JobSubmission { job, deduplicated } = self.submit(tenant, request).await?;
        if deduplicated {
            return Ok(OrderAcceptResult {
                success: false,
                job_id: job.id.clone(),
                status: AcceptanceStatus::AlreadyProcessing,
                message: format!("Order is already being processed (job {})", job.id),
                order_details: None,
                error: None,
            });
        }
        if job.status == BrowserJobStatus::Pending {
            return Ok(OrderAcceptResult {
                success: false,
                job_id: job.id,
                status: AcceptanceStatus::PendingApproval,
                message: "Order acceptance is awaiting approval".into(),
                order_details: None,
                error: None,
            });
        }

        let result = self.engine.execute_job(tenant, &job.id).await?;
        Ok(summarize(request, result))
    }

    /// Create the acceptance job without running it.
    pub async fn queue_order_acceptance(
        &self,
        tenant: &TenantId,
        request: &OrderAcceptRequest,
    ) -> PortalResult<QueuedAcceptance> {
        let JobSubmission { job, deduplicated } = self.submit(tenant, request).await?;
        Ok(QueuedAcceptance {
            job_id: job.id,
            requires_approval: job.requires_approval,
            already_queued: deduplicated,
        })
    }

    /// Accept each order in turn. Repeated orders collapse onto the first job.
    pub async fn batch_accept_orders(
        &self,
        tenant: &TenantId,
        requests: &[OrderAcceptRequest],
    ) -> BatchAcceptResult {
        let mut batch = BatchAcceptResult::default();
        for request in requests {
            match self.accept_order(tenant, request).await {
                Ok(result) if result.success => batch.successful.push(result),
                Ok(result) => batch.failed.push(FailedAcceptance {
                    order: request.order.clone(),
                    job_id: Some(result.job_id),
                    status: Some(result.status),
                    message: result
                        .error
                        .map(|e| e.message)
                        .unwrap_or(result.message),
                }),
                Err(err) => batch.failed.push(FailedAcceptance {
                    order: request.order.clone(),
                    job_id: None,
                    status: None,
                    message: err.to_string(),
                }),
            }
        }
        tracing::info!(
            tenant_id = %tenant,
            successful = batch.successful.len(),
            failed = batch.failed.len(),
            "Batch order acceptance finished"
        );
        batch
    }

    /// Run the read-only `check_status` workflow and normalize what the portal shows.
    pub async fn check_order_status(
        &self,
        tenant: &TenantId,
        portal_config_id: &PortalConfigId,
        order: &OrderRef,
        triggered_by: &str,
    ) -> PortalResult<OrderStatusCheck> {
        order.validate()?;
        let mut request =
            CreateJobRequest::new(portal_config_id.clone(), JobType::CheckStatus, triggered_by);
        request.order_id = order.order_id.clone();
        request.order_number = order.order_number.clone();

        let job = match self.engine.create_job(tenant, request).await {
            Ok(job) => job,
            Err(err) => {
                return Ok(OrderStatusCheck::Failed {
                    job_id: None,
                    error: err.to_string(),
                })
            }
        };
        if job.status == BrowserJobStatus::Pending {
            return Ok(OrderStatusCheck::Deferred {
                job_id: job.id,
                reason: "awaiting approval".into(),
            });
        }

        let result = self.engine.execute_job(tenant, &job.id).await?;
        if let Some(reason) = result.deferred {
            return Ok(OrderStatusCheck::Deferred {
                job_id: result.job_id,
                reason,
            });
        }
        if !result.success {
            return Ok(OrderStatusCheck::Failed {
                job_id: Some(result.job_id),
                error: result
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "status check failed".into()),
            });
        }

        let raw = result
            .extracted
            .get("status")
            .cloned()
            .unwrap_or_default();
        let normalized = self
            .engine
            .parse_portal_status(tenant, portal_config_id, &raw)
            .await?;
        Ok(OrderStatusCheck::Resolved {
            job_id: result.job_id,
            raw,
            normalized,
            checked_at: Utc::now(),
        })
    }

    /// Outcome counts for `accept_order` jobs created in the last `days` days.
    pub async fn get_acceptance_stats(
        &self,
        tenant: &TenantId,
        days: Option<u32>,
    ) -> PortalResult<AcceptanceStats> {
        let since = Utc::now() - Duration::days(i64::from(days.unwrap_or(DEFAULT_STATS_DAYS)));
        let filter = JobFilter::new()
            .job_type(JobType::AcceptOrder)
            .created_after(since);
        let jobs = self.engine.list_jobs(tenant, filter).await?;

        let mut stats = AcceptanceStats::default();
        let mut total_duration = 0u64;
        let mut timed = 0u64;
        for job in &jobs {
            let counts = stats.by_portal.entry(job.portal_config_id.clone()).or_default();
            match job.status {
                BrowserJobStatus::Completed => {
                    stats.total_accepted += 1;
                    counts.accepted += 1;
                }
                BrowserJobStatus::Failed => {
                    stats.total_failed += 1;
                    counts.failed += 1;
                }
                _ => {}
            }
            if let Some(ms) = job.duration_ms.filter(|ms| *ms > 0) {
                total_duration += ms;
                timed += 1;
            }
        }

        let finished = stats.total_accepted + stats.total_failed;
        if finished > 0 {
            stats.success_rate = stats.total_accepted as f64 / finished as f64;
        }
        if timed > 0 {
            stats.average_duration_ms = (total_duration as f64 / timed as f64).round() as u64;
        }
        Ok(stats)
    }

    async fn submit(&self, tenant: &TenantId, request: &OrderAcceptRequest) -> PortalResult<JobSubmission> {
        request.order.validate()?;
        let submission = self.engine.submit_job(tenant, request.to_job_request()).await?;
        tracing::debug!(
            job_id = %submission.job.id,
            order = %request.order.label(),
            deduplicated = submission.deduplicated,
            "Order acceptance submitted"
        );
        Ok(submission)
    }
}

fn summarize(request: &OrderAcceptRequest, result: JobExecutionResult) -> OrderAcceptResult {
    if let Some(reason) = result.deferred {
        return OrderAcceptResult {
            success: false,
            job_id: result.job_id,
            status: AcceptanceStatus::Deferred,
            message: reason,
            order_details: None,
            error: None,
        };
    }
    if result.retry_scheduled {
        return OrderAcceptResult {
            success: false,
            job_id: result.job_id,
            status: AcceptanceStatus::Deferred,
            message: "Transient failure, order acceptance will be retried".into(),
            order_details: None,
            error: result.error,
        };
    }
    if !result.success {
        return OrderAcceptResult {
            success: false,
            job_id: result.job_id,
            status: AcceptanceStatus::Failed,
            message: "Order acceptance failed".into(),
            order_details: None,
            error: result.error,
        };
    }

    let extracted = &result.extracted;
    let details = OrderDetails {
        order_id: request.order.order_id.clone(),
        order_number: request.order.order_number.clone(),
        fee: extracted
            .get("fee")
            .and_then(|text| parse_fee(text))
            .or(request.fee),
        due_date: extracted
            .get("dueDate")
            .cloned()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| request.due_date.clone()),
        portal_status: extracted.get("newStatus").cloned(),
        accepted_at: Utc::now(),
    };
    OrderAcceptResult {
        success: true,
        job_id: result.job_id,
        status: AcceptanceStatus::Accepted,
        message: "Order accepted successfully".into(),
        order_details: Some(details),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_text_is_parsed() {
        assert_eq!(parse_fee("$1,250.00"), Some(1250.0));
        assert_eq!(parse_fee(" 475 "), Some(475.0));
        assert_eq!(parse_fee("TBD"), None);
        assert_eq!(parse_fee(""), None);
    }

    #[test]
    fn order_reference_required() {
        assert!(OrderRef::default().validate().is_err());
        assert!(OrderRef::by_number("  ").validate().is_err());
        assert!(OrderRef::by_id("A-1").validate().is_ok());
    }

    #[test]
    fn job_request_carries_order_parameters() {
        let request = OrderAcceptRequest::new(
            PortalConfigId::new("portal-1"),
            OrderRef::by_number("VT-9"),
            "tester",
        )
        .with_fee(425.0)
        .with_property_address("12 Elm St");
        let job_request = request.to_job_request();
        assert_eq!(job_request.job_type, JobType::AcceptOrder);
        assert_eq!(job_request.effective_resource_key().as_deref(), Some("VT-9"));
        assert_eq!(job_request.parameters["fee"], "425.00");
        assert_eq!(job_request.parameters["propertyAddress"], "12 Elm St");
        assert!(!job_request.parameters.contains_key("dueDate"));
    }
}
