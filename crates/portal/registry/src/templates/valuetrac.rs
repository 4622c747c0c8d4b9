//! ValueTrac

use crate::template::{PortalConfigTemplate, UrlPatterns};
use portal_types::{
    join_url, AssertCondition, JobType, NormalizedStatus, PortalSelectors, PortalType, RateLimits,
    StatusMap, WorkflowDefinition, WorkflowStep,
};

pub const BASE_URL: &str = "https://www.valuetrac.com";

/// Page URLs for a ValueTrac instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValuetracUrls {
    pub login: String,
    pub order_list: String,
    pub dashboard: String,
    base: String,
}

impl ValuetracUrls {
    pub fn new(base_url: &str) -> Self {
        Self {
            login: join_url(base_url, "/Account/Login"),
            order_list: join_url(base_url, "/Orders"),
            dashboard: join_url(base_url, "/Dashboard"),
            base: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn order_detail(&self, order_id: &str) -> String {
        join_url(&self.base, &format!("/Orders/Detail/{}", order_id))
    }
}

impl Default for ValuetracUrls {
    fn default() -> Self {
        Self::new(BASE_URL)
    }
}

fn login_steps() -> Vec<WorkflowStep> {
    vec![
        WorkflowStep::navigate("{{loginUrl}}"),
        WorkflowStep::fill("#UserName", "{{username}}"),
        WorkflowStep::fill("#Password", "{{password}}"),
        WorkflowStep::click("#btnLogin"),
        WorkflowStep::wait(3000),
        WorkflowStep::assert(".dashboard-container", AssertCondition::Visible),
    ]
}

fn workflows() -> Vec<WorkflowDefinition> {
    let accept = [
        WorkflowStep::navigate("{{orderUrl}}"),
        WorkflowStep::wait(2000),
        WorkflowStep::screenshot(),
        WorkflowStep::click(".btn-accept").mutating(),
        WorkflowStep::wait(1000),
        WorkflowStep::click(".btn-confirm-yes").optional().mutating(),
        WorkflowStep::wait(2000),
        WorkflowStep::screenshot(),
        WorkflowStep::extract(".order-status", "newStatus"),
    ];
    let check = [
        WorkflowStep::navigate("{{orderListUrl}}"),
        WorkflowStep::fill("#searchOrder", "{{orderNumber}}"),
        WorkflowStep::click("#btnSearch"),
        WorkflowStep::wait(2000),
        WorkflowStep::extract(".vt-status", "status"),
        WorkflowStep::extract(".vt-order-number", "orderNumber"),
        WorkflowStep::screenshot(),
    ];
    let download = [
        WorkflowStep::navigate("{{orderUrl}}"),
        WorkflowStep::wait(2000),
        WorkflowStep::click(".tab-documents, #documentsTab"),
        WorkflowStep::wait(1000),
        WorkflowStep::click(".btn-download-all, #btnDownloadAll").mutating(),
        WorkflowStep::wait(5000),
        WorkflowStep::screenshot(),
    ];
    let submit = [
        WorkflowStep::navigate("{{orderUrl}}"),
        WorkflowStep::wait(2000),
        WorkflowStep::click(".tab-upload, #uploadTab"),
        WorkflowStep::wait(1000),
        WorkflowStep::screenshot(),
        WorkflowStep::click("#btnSubmit").mutating(),
        WorkflowStep::wait(2000),
        WorkflowStep::click(".btn-confirm-yes").optional().mutating(),
        WorkflowStep::wait(3000),
        WorkflowStep::screenshot(),
    ];

    let with_login = |rest: &[WorkflowStep]| {
        let mut steps = login_steps();
        steps.extend_from_slice(rest);
        steps
    };

    vec![
        WorkflowDefinition::new("accept_order", 60_000)
            .with_description("Accept an order on ValueTrac")
            .with_steps(with_login(&accept)),
        WorkflowDefinition::new("check_status", 45_000)
            .with_description("Check order status on ValueTrac")
            .with_steps(with_login(&check)),
        WorkflowDefinition::new("download_documents", 90_000)
            .with_description("Download order documents from ValueTrac")
            .with_steps(with_login(&download)),
        WorkflowDefinition::new("submit_report", 120_000)
            .with_description("Submit completed report to ValueTrac")
            .with_steps(with_login(&submit))
            .with_approval(true),
    ]
}

fn selectors() -> PortalSelectors {
    PortalSelectors::new()
        .with(PortalSelectors::USERNAME_FIELD, r#"#UserName, input[name="UserName"]"#)
        .with(PortalSelectors::PASSWORD_FIELD, r#"#Password, input[name="Password"]"#)
        .with(PortalSelectors::LOGIN_BUTTON, r#"#btnLogin, button[type="submit"]"#)
        .with(
            PortalSelectors::LOGIN_SUCCESS_INDICATOR,
            ".dashboard-container, #main-dashboard, .vt-header",
        )
        .with(PortalSelectors::ORDER_TABLE, "#OrderGrid, .order-grid, table.orders")
        .with(PortalSelectors::ORDER_ROW, "tr[data-orderid], .order-row")
        .with(PortalSelectors::ORDER_ID_CELL, "td.order-id, .vt-order-number")
        .with(PortalSelectors::ORDER_STATUS_CELL, "td.order-status, .vt-status")
        .with(PortalSelectors::ORDER_ACTIONS_CELL, "td.actions, .vt-actions")
        .with(
            PortalSelectors::ACCEPT_BUTTON,
            r#".btn-accept, #btnAccept, button[data-action="accept"]"#,
        )
        .with(
            PortalSelectors::REJECT_BUTTON,
            r#".btn-decline, #btnDecline, button[data-action="decline"]"#,
        )
        .with(PortalSelectors::DOWNLOAD_BUTTON, ".btn-download, #btnDownload, a.download-link")
        .with(PortalSelectors::SUBMIT_BUTTON, "#btnSubmit, .btn-submit")
        .with("feeField", r#"#AppraisalFee, input[name="fee"]"#)
        .with("dueDateField", r#"#DueDate, input[name="dueDate"]"#)
        .with("notesField", r#"#Notes, textarea[name="notes"]"#)
        .with("propertyAddress", ".property-address, #PropertyAddress")
        .with("clientName", ".client-name, #ClientName")
        .with("orderType", ".order-type, #OrderType")
        .with("confirmModal", ".modal-confirm, #confirmModal")
        .with("confirmYes", ".btn-confirm-yes, #btnYes")
        .with("confirmNo", ".btn-confirm-no, #btnNo")
}

/// ValueTrac status text. Documents are available while an order is
/// actionable; reports can be submitted once it is assigned or accepted.
pub fn status_map() -> StatusMap {
    StatusMap::new()
        .with("new", NormalizedStatus::new("new", true, true, true, false))
        .with("pending", NormalizedStatus::new("pending", true, true, true, false))
        .with("assigned", NormalizedStatus::new("assigned", true, false, true, true))
        .with("accepted", NormalizedStatus::new("accepted", true, false, true, true))
        .with("in progress", NormalizedStatus::new("in_progress", true, false, true, true))
        .with("completed", NormalizedStatus::new("completed", false, false, false, false))
        .with("submitted", NormalizedStatus::new("submitted", false, false, false, false))
        .with("delivered", NormalizedStatus::new("delivered", false, false, false, false))
        .with("cancelled", NormalizedStatus::new("cancelled", false, false, false, false))
        .with("declined", NormalizedStatus::new("declined", false, false, false, false))
}

pub fn parse_status(text: &str) -> NormalizedStatus {
    status_map().parse(text)
}

pub fn template() -> PortalConfigTemplate {
    PortalConfigTemplate {
        portal_type: PortalType::Valuetrac,
        name: "ValueTrac".into(),
        default_selectors: selectors(),
        default_workflows: workflows(),
        default_rate_limits: RateLimits {
            max_jobs_per_hour: 30,
            max_jobs_per_day: 150,
            min_delay_between_jobs_ms: 3000,
            max_concurrent_jobs: 1,
        },
        url_patterns: UrlPatterns {
            base: Some(BASE_URL.into()),
            login: Some("/Account/Login".into()),
            order_list: Some("/Orders".into()),
            order_detail: Some("/Orders/Detail/{orderId}".into()),
            dashboard: Some("/Dashboard".into()),
        },
        forced_approval: [JobType::SubmitReport].into_iter().collect(),
        status_map: status_map(),
    }
}
