//! Mercury Network

use crate::template::{PortalConfigTemplate, UrlPatterns};
use portal_types::{
    join_url, AssertCondition, JobType, NormalizedStatus, PortalSelectors, PortalType, RateLimits,
    StatusMap, WorkflowDefinition, WorkflowStep,
};

pub const BASE_URL: &str = "https://www.mercurynetwork.com";

/// Page URLs for a Mercury Network instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MercuryUrls {
    pub login: String,
    pub order_list: String,
    pub dashboard: String,
    pub new_orders: String,
    base: String,
}

impl MercuryUrls {
    pub fn new(base_url: &str) -> Self {
        Self {
            login: join_url(base_url, "/mercury/login.aspx"),
            order_list: join_url(base_url, "/mercury/orders/list.aspx"),
            dashboard: join_url(base_url, "/mercury/dashboard.aspx"),
            new_orders: join_url(base_url, "/mercury/orders/list.aspx?status=new"),
            base: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn order_detail(&self, order_id: &str) -> String {
        join_url(
            &self.base,
            &format!("/mercury/orders/detail.aspx?id={}", order_id),
        )
    }
}

impl Default for MercuryUrls {
    fn default() -> Self {
        Self::new(BASE_URL)
    }
}

fn login_steps(checked: bool) -> Vec<WorkflowStep> {
    let mut steps = vec![
        WorkflowStep::navigate("{{loginUrl}}"),
        WorkflowStep::fill("#username", "{{username}}"),
        WorkflowStep::fill("#password", "{{password}}"),
        WorkflowStep::click("#btnLogin"),
        WorkflowStep::wait(4000),
    ];
    if checked {
        steps.push(WorkflowStep::assert(".mn-dashboard", AssertCondition::Visible));
    }
    steps
}

fn workflow(
    name: &str,
    description: &str,
    timeout_ms: u64,
    checked_login: bool,
    rest: Vec<WorkflowStep>,
) -> WorkflowDefinition {
    let mut steps = login_steps(checked_login);
    steps.extend(rest);
    WorkflowDefinition::new(name, timeout_ms)
        .with_description(description)
        .with_steps(steps)
}

fn workflows() -> Vec<WorkflowDefinition> {
    vec![
        workflow(
            "accept_order",
            "Accept an order on Mercury Network",
            75_000,
            true,
            vec![
                WorkflowStep::navigate("{{orderUrl}}"),
                WorkflowStep::wait(3000),
                WorkflowStep::screenshot(),
                WorkflowStep::extract(".fee-amount", "fee"),
                WorkflowStep::extract(".due-date", "dueDate"),
                WorkflowStep::click(".btn-accept-order").mutating(),
                WorkflowStep::wait(2000),
                WorkflowStep::click("#acceptTerms, .terms-checkbox").optional(),
                WorkflowStep::click("#confirmAccept, .btn-confirm")
                    .optional()
                    .mutating(),
                WorkflowStep::wait(3000),
                WorkflowStep::screenshot(),
                WorkflowStep::extract(".mn-status", "newStatus"),
            ],
        ),
        workflow(
            "check_status",
            "Check order status on Mercury Network",
            45_000,
            false,
            vec![
                WorkflowStep::navigate("{{orderListUrl}}"),
                WorkflowStep::wait(2000),
                WorkflowStep::fill("#searchOrders", "{{orderNumber}}"),
                WorkflowStep::wait(500),
                WorkflowStep::click(".btn-search, #btnSearch").optional(),
                WorkflowStep::wait(2000),
                WorkflowStep::extract(".mn-status", "status"),
                WorkflowStep::extract(".mn-order-id", "orderNumber"),
                WorkflowStep::extract(".due-date", "dueDate"),
                WorkflowStep::screenshot(),
            ],
        ),
        workflow(
            "download_documents",
            "Download order documents from Mercury Network",
            120_000,
            false,
            vec![
                WorkflowStep::navigate("{{orderUrl}}"),
                WorkflowStep::wait(2000),
                WorkflowStep::click(r#".tab-documents, #documentsTab, [data-tab="documents"]"#),
                WorkflowStep::wait(1500),
                WorkflowStep::extract(".document-list", "documentList"),
                WorkflowStep::screenshot(),
                WorkflowStep::click(".btn-download-all, #downloadAll").mutating(),
                WorkflowStep::wait(8000),
                WorkflowStep::screenshot(),
            ],
        ),
        workflow(
            "submit_report",
            "Submit completed report on Mercury Network",
            150_000,
            false,
            vec![
                WorkflowStep::navigate("{{orderUrl}}"),
                WorkflowStep::wait(2000),
                WorkflowStep::click(r#".tab-upload, #uploadTab, [data-tab="upload"]"#),
                WorkflowStep::wait(1500),
                WorkflowStep::screenshot(),
                WorkflowStep::click("#submitOrder, .btn-submit-report").mutating(),
                WorkflowStep::wait(2000),
                WorkflowStep::click("#confirmSubmit, .btn-confirm-submit")
                    .optional()
                    .mutating(),
                WorkflowStep::wait(5000),
                WorkflowStep::screenshot(),
                WorkflowStep::extract(".submission-confirmation", "confirmation"),
            ],
        )
        .with_approval(true),
        workflow(
            "get_new_orders",
            "Get list of new orders from Mercury Network",
            60_000,
            false,
            vec![
                WorkflowStep::navigate("{{orderListUrl}}"),
                WorkflowStep::wait(2000),
                WorkflowStep::select("#statusFilter", "New"),
                WorkflowStep::wait(2000),
                WorkflowStep::extract(".order-list-table", "orderList"),
                WorkflowStep::screenshot(),
            ],
        ),
    ]
}

fn selectors() -> PortalSelectors {
    PortalSelectors::new()
        .with(
            PortalSelectors::USERNAME_FIELD,
            r#"#username, input[name="username"], #txtUsername"#,
        )
        .with(
            PortalSelectors::PASSWORD_FIELD,
            r#"#password, input[name="password"], #txtPassword"#,
        )
        .with(
            PortalSelectors::LOGIN_BUTTON,
            r#"#btnLogin, button.login-btn, input[type="submit"]"#,
        )
        .with(
            PortalSelectors::LOGIN_SUCCESS_INDICATOR,
            ".mn-dashboard, #dashboard, .welcome-panel",
        )
        .with(PortalSelectors::ORDER_TABLE, "#orderGrid, .order-list-table, table.mn-orders")
        .with(PortalSelectors::ORDER_ROW, "tr.order-item, .mn-order-row, [data-order]")
        .with(PortalSelectors::ORDER_ID_CELL, "td.mn-order-id, .order-number-cell")
        .with(PortalSelectors::ORDER_STATUS_CELL, "td.mn-status, .status-cell")
        .with(PortalSelectors::ORDER_ACTIONS_CELL, "td.mn-actions, .actions-cell")
        .with(
            PortalSelectors::ACCEPT_BUTTON,
            r#".btn-accept-order, #acceptOrder, button[data-action="accept"]"#,
        )
        .with(
            PortalSelectors::REJECT_BUTTON,
            r#".btn-decline-order, #declineOrder, button[data-action="decline"]"#,
        )
        .with(PortalSelectors::DOWNLOAD_BUTTON, ".btn-download, #downloadDocs, a.download")
        .with(PortalSelectors::SUBMIT_BUTTON, "#submitOrder, .btn-submit-report")
        .with("feeDisplay", ".fee-amount, #orderFee")
        .with("dueDateDisplay", ".due-date, #dueDate")
        .with("propertyAddress", ".property-info .address, #propertyAddress")
        .with("clientInfo", ".client-info, #clientDetails")
        .with("orderDetails", ".order-details-panel, #orderDetails")
        .with("documentList", ".document-list, #docList")
        .with("notificationBadge", ".notification-badge, .alert-count")
        .with("filterDropdown", "#statusFilter, .filter-status")
        .with("searchInput", "#searchOrders, .order-search input")
        .with("paginationNext", ".pagination .next, #nextPage")
        .with("paginationPrev", ".pagination .prev, #prevPage")
}

pub fn status_map() -> StatusMap {
    let entries = [
        ("new", "new", true, true, true, false),
        ("pending acceptance", "pending_acceptance", true, true, true, false),
        ("accepted", "accepted", true, false, true, true),
        ("in progress", "in_progress", true, false, true, true),
        ("inspection scheduled", "inspection_scheduled", true, false, true, true),
        ("inspection complete", "inspection_complete", true, false, true, true),
        ("submitted", "submitted", false, false, true, false),
        ("delivered", "delivered", false, false, true, false),
        ("revision requested", "revision_requested", true, false, true, true),
        ("on hold", "on_hold", false, false, true, false),
        ("cancelled", "cancelled", false, false, false, false),
        ("declined", "declined", false, false, false, false),
    ];
    entries.into_iter().fold(
        StatusMap::new(),
        |map, (text, status, actionable, acceptance, download, submit)| {
            map.with(
                text,
                NormalizedStatus::new(status, actionable, acceptance, download, submit),
            )
        },
    )
}

pub fn parse_status(text: &str) -> NormalizedStatus {
    status_map().parse(text)
}

pub fn template() -> PortalConfigTemplate {
    PortalConfigTemplate {
        portal_type: PortalType::Mercury,
        name: "Mercury Network".into(),
        default_selectors: selectors(),
        default_workflows: workflows(),
        default_rate_limits: RateLimits {
            max_jobs_per_hour: 25,
            max_jobs_per_day: 120,
            min_delay_between_jobs_ms: 4000,
            max_concurrent_jobs: 1,
        },
        url_patterns: UrlPatterns {
            base: Some(BASE_URL.into()),
            login: Some("/mercury/login.aspx".into()),
            order_list: Some("/mercury/orders/list.aspx".into()),
            order_detail: Some("/mercury/orders/detail.aspx?id={orderId}".into()),
            dashboard: Some("/mercury/dashboard.aspx".into()),
        },
        forced_approval: [JobType::SubmitReport].into_iter().collect(),
        status_map: status_map(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls() {
        let urls = MercuryUrls::default();
        assert_eq!(urls.login, "https://www.mercurynetwork.com/mercury/login.aspx");
        assert_eq!(
            urls.new_orders,
            "https://www.mercurynetwork.com/mercury/orders/list.aspx?status=new"
        );
        assert_eq!(
            urls.order_detail("77"),
            "https://www.mercurynetwork.com/mercury/orders/detail.aspx?id=77"
        );
    }

    #[test]
    fn five_workflows() {
        let template = template();
        for job_type in [
            JobType::AcceptOrder,
            JobType::CheckStatus,
            JobType::DownloadDocuments,
            JobType::SubmitReport,
            JobType::GetNewOrders,
        ] {
            template.workflow(job_type).unwrap().validate().unwrap();
        }
        let accept = template.workflow(JobType::AcceptOrder).unwrap();
        assert_eq!(accept.steps.len(), 18);
        assert_eq!(accept.timeout_ms, 75_000);
        assert!(template.forced_approval.contains(&JobType::SubmitReport));
    }

    #[test]
    fn full_status_table() {
        assert_eq!(status_map().len(), 12);

        let s = parse_status("Revision Requested");
        assert_eq!(s, NormalizedStatus::new("revision_requested", true, false, true, true));

        let s = parse_status("on hold");
        assert!(!s.is_actionable && s.can_download);

        let s = parse_status("cancelled");
        assert!(!s.can_download && !s.can_submit);
    }
}
