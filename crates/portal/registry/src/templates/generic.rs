//! Generic portal
//!
//! For vendors with no dedicated integration. Workflows reference selectors
//! by name (`{{acceptButton}}`), so the tenant's selector map decides what
//! each step targets. The base URL always comes from the tenant.

use crate::template::{PortalConfigTemplate, UrlPatterns};
use portal_types::{
    AssertCondition, JobType, NormalizedStatus, PortalSelectors, PortalType, RateLimits,
    StatusMap, WorkflowDefinition, WorkflowStep,
};

fn login_steps() -> Vec<WorkflowStep> {
    vec![
        WorkflowStep::navigate("{{loginUrl}}"),
        WorkflowStep::fill("{{usernameField}}", "{{username}}"),
        WorkflowStep::fill("{{passwordField}}", "{{password}}"),
        WorkflowStep::click("{{loginButton}}"),
        WorkflowStep::wait(3000),
    ]
}

fn workflows() -> Vec<WorkflowDefinition> {
    let mut accept = login_steps();
    accept.extend([
        WorkflowStep::assert("{{loginSuccessIndicator}}", AssertCondition::Visible),
        WorkflowStep::navigate("{{orderUrl}}"),
        WorkflowStep::wait(2000),
        WorkflowStep::click("{{acceptButton}}").mutating(),
        WorkflowStep::wait(2000),
        WorkflowStep::screenshot(),
    ]);

    let mut check = login_steps();
    check.extend([
        WorkflowStep::navigate("{{orderListUrl}}"),
        WorkflowStep::wait(2000),
        WorkflowStep::extract("{{orderStatusCell}}", "status"),
        WorkflowStep::screenshot(),
    ]);

    let mut download = login_steps();
    download.extend([
        WorkflowStep::navigate("{{orderUrl}}"),
        WorkflowStep::wait(2000),
        WorkflowStep::click("{{downloadButton}}").mutating(),
        WorkflowStep::wait(5000),
        WorkflowStep::screenshot(),
    ]);

    vec![
        WorkflowDefinition::new("accept_order", 60_000)
            .with_description("Accept an order on the portal")
            .with_steps(accept),
        WorkflowDefinition::new("check_status", 45_000)
            .with_description("Check order status on the portal")
            .with_steps(check),
        WorkflowDefinition::new("download_documents", 90_000)
            .with_description("Download order documents")
            .with_steps(download),
    ]
}

fn selectors() -> PortalSelectors {
    PortalSelectors::new()
        .with(
            PortalSelectors::USERNAME_FIELD,
            r#"input[name="username"], input[type="email"], #username, #email"#,
        )
        .with(
            PortalSelectors::PASSWORD_FIELD,
            r#"input[name="password"], input[type="password"], #password"#,
        )
        .with(
            PortalSelectors::LOGIN_BUTTON,
            r#"button[type="submit"], input[type="submit"], #login-btn, .login-button"#,
        )
        .with(
            PortalSelectors::LOGIN_SUCCESS_INDICATOR,
            ".dashboard, .home, .welcome, #main-content",
        )
        .with(PortalSelectors::ORDER_TABLE, "table.orders, #orders-table, .order-list")
        .with(PortalSelectors::ORDER_ROW, "tr.order-row, .order-item, [data-order-id]")
        .with(
            PortalSelectors::ORDER_ID_CELL,
            r#"td.order-id, .order-number, [data-field="id"]"#,
        )
        .with(
            PortalSelectors::ORDER_STATUS_CELL,
            r#"td.status, .order-status, [data-field="status"]"#,
        )
        .with(
            PortalSelectors::ACCEPT_BUTTON,
            r#"button.accept, .accept-order, #accept-btn, [data-action="accept"]"#,
        )
        .with(
            PortalSelectors::REJECT_BUTTON,
            r#"button.reject, .reject-order, #reject-btn, [data-action="reject"]"#,
        )
        .with(
            PortalSelectors::DOWNLOAD_BUTTON,
            r#"button.download, .download-btn, a[download], [data-action="download"]"#,
        )
        .with(
            PortalSelectors::SUBMIT_BUTTON,
            r#"button.submit, input[type="submit"], #submit-btn"#,
        )
}

/// Default status vocabulary for portals without a dedicated parser.
/// Tenants replace it per portal config when their vendor words things differently.
pub fn status_map() -> StatusMap {
    StatusMap::new()
        .with("new", NormalizedStatus::new("new", true, true, true, false))
        .with("pending", NormalizedStatus::new("pending", true, true, true, false))
        .with("assigned", NormalizedStatus::new("assigned", true, false, true, true))
        .with("accepted", NormalizedStatus::new("accepted", true, false, true, true))
        .with("in progress", NormalizedStatus::new("in_progress", true, false, true, true))
        .with("completed", NormalizedStatus::new("completed", false, false, true, false))
        .with("submitted", NormalizedStatus::new("submitted", false, false, true, false))
        .with("delivered", NormalizedStatus::new("delivered", false, false, true, false))
        .with("cancelled", NormalizedStatus::new("cancelled", false, false, false, false))
        .with("declined", NormalizedStatus::new("declined", false, false, false, false))
}

pub fn template() -> PortalConfigTemplate {
    PortalConfigTemplate {
        portal_type: PortalType::Generic,
        name: "Generic Portal".into(),
        default_selectors: selectors(),
        default_workflows: workflows(),
        default_rate_limits: RateLimits::default(),
        url_patterns: UrlPatterns {
            base: None,
            login: Some("/login".into()),
            order_list: Some("/orders".into()),
            order_detail: Some("/orders/{orderId}".into()),
            dashboard: None,
        },
        forced_approval: [JobType::SubmitReport].into_iter().collect(),
        status_map: status_map(),
    }
}
