//! Placeholder bindings and creation-time resolution checks
//!
//! A job's bindings come from its portal config (URLs and selector names),
//! its order reference and its parameters. `username` and `password` are
//! bound at run time from the credential vault, and values captured by
//! `extract` steps become bindable for the steps after them.

use portal_types::{
    render_placeholders, BrowserAutomationJob, PortalError, PortalResult, StepAction,
    VendorPortalConfig, WorkflowDefinition, WorkflowStep,
};
use std::collections::{BTreeMap, BTreeSet};

/// Tokens bound from the credential vault when the job runs.
pub const RUNTIME_TOKENS: [&str; 2] = ["username", "password"];

/// Order and target values a job contributes to its bindings.
pub struct JobContext<'a> {
    pub target_url: &'a str,
    pub order_id: Option<&'a str>,
    pub order_number: Option<&'a str>,
    pub parameters: &'a BTreeMap<String, String>,
}

impl<'a> From<&'a BrowserAutomationJob> for JobContext<'a> {
    fn from(job: &'a BrowserAutomationJob) -> Self {
        Self {
            target_url: &job.target_url,
            order_id: job.order_id.as_deref(),
            order_number: job.order_number.as_deref(),
            parameters: &job.parameters,
        }
    }
}

/// Static bindings for a job: portal values, then order values, then parameters.
pub fn job_bindings(portal: &VendorPortalConfig, job: &JobContext<'_>) -> BTreeMap<String, String> {
    let mut bindings = portal.bindings();
    bindings.insert("targetUrl".into(), job.target_url.to_string());
    if let Some(order_id) = job.order_id {
        bindings.insert("orderId".into(), order_id.to_string());
    }
    if let Some(order_number) = job.order_number {
        bindings.insert("orderNumber".into(), order_number.to_string());
    }
    if let Some(order_url) = job.order_id.or(job.order_number).and_then(|id| portal.order_url(id)) {
        bindings.insert("orderUrl".into(), order_url);
    }
    for (key, value) in job.parameters {
        if !RUNTIME_TOKENS.contains(&key.as_str()) {
            bindings.insert(key.clone(), value.clone());
        }
    }
    bindings
}

/// Check that every token in `workflow` will resolve when the job runs.
///
/// Tokens resolve from `bindings`, the runtime credential tokens, or a name
/// captured by an earlier `extract` step.
pub fn validate_placeholders(
    workflow: &WorkflowDefinition,
    bindings: &BTreeMap<String, String>,
) -> PortalResult<()> {
    let mut captured: BTreeSet<&str> = BTreeSet::new();
    for (index, step) in workflow.steps.iter().enumerate() {
        for token in step.placeholders() {
            let resolvable = !token.is_empty()
                && (bindings.contains_key(token)
                || RUNTIME_TOKENS.contains(&token)
                    || captured.contains(token));
            if !resolvable {
                return Err(PortalError::UnresolvedPlaceholder {
                    token: token.to_string(),
                    step_index: index,
                });
            }
        }
        if step.action == StepAction::Extract {
            if let Some(name) = &step.extract_as {
                captured.insert(name.as_str());
            }
        }
    }
    Ok(())
}

/// Navigation targets that are fully known before the job runs.
pub fn static_navigation_targets(
    workflow: &WorkflowDefinition,
    bindings: &BTreeMap<String, String>,
) -> Vec<(usize, String)> {
    workflow
        .steps
        .iter()
        .enumerate()
        .filter(|(_, step)| step.action == StepAction::Navigate)
        .filter_map(|(index, step)| {
            let url = step.value.as_deref()?;
            render_placeholders(url, |t| bindings.get(t).map(String::as_str))
                .ok()
                .map(|url| (index, url))
        })
        .collect()
}

/// A step with every placeholder substituted.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedStep {
    pub selector: Option<String>,
    pub value: Option<String>,
}

/// Substitute a step's tokens, preferring static bindings over captured values.
pub fn resolve_step(
    step: &WorkflowStep,
    index: usize,
    bindings: &BTreeMap<String, String>,
    captured: &BTreeMap<String, String>,
) -> PortalResult<ResolvedStep> {
    let lookup = |token: &str| {
        bindings
            .get(token)
            .or_else(|| captured.get(token))
            .map(String::as_str)
    };
    let render = |text: &Option<String>| -> PortalResult<Option<String>> {
        text.as_deref()
            .map(|t| {
                render_placeholders(t, lookup).map_err(|token| PortalError::UnresolvedPlaceholder {
                    token,
                    step_index: index,
                })
            })
            .transpose()
    };
    Ok(ResolvedStep {
        selector: render(&step.selector)?,
        value: render(&step.value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::{
        AssertCondition, PortalConfigId, PortalSelectors, PortalType, RateLimits, StatusMap,
        TenantId,
    };
    use proptest::prelude::*;

    fn portal() -> VendorPortalConfig {
        let now = chrono::Utc::now();
        VendorPortalConfig {
            id: PortalConfigId::new("portal-1"),
            tenant_id: TenantId::new("tenant-a"),
            portal_name: "ValueTrac".into(),
            portal_type: PortalType::Valuetrac,
            base_url: "https://www.valuetrac.com".into(),
            login_url: Some("https://www.valuetrac.com/Account/Login".into()),
            order_list_url: Some("https://www.valuetrac.com/Orders".into()),
            dashboard_url: None,
            order_detail_pattern: Some("/Orders/Detail/{orderId}".into()),
            credential_name: "vt".into(),
            is_active: true,
            selectors: PortalSelectors::new().with("acceptButton", ".btn-accept"),
            workflows: vec![],
            rate_limits: RateLimits::default(),
            forced_approval: Default::default(),
            status_map: StatusMap::new(),
            last_used_at: None,
            success_count: 0,
            failure_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn context<'a>(parameters: &'a BTreeMap<String, String>) -> JobContext<'a> {
        JobContext {
            target_url: "https://www.valuetrac.com",
            order_id: Some("4411"),
            order_number: None,
            parameters,
        }
    }

    #[test]
    fn bindings_cover_portal_order_and_parameters() {
        let mut parameters = BTreeMap::new();
        parameters.insert("fee".to_string(), "450".to_string());
        parameters.insert("password".to_string(), "smuggled".to_string());
        let bindings = job_bindings(&portal(), &context(&parameters));

        assert_eq!(bindings["orderUrl"], "https://www.valuetrac.com/Orders/Detail/4411");
        assert_eq!(bindings["loginUrl"], "https://www.valuetrac.com/Account/Login");
        assert_eq!(bindings["acceptButton"], ".btn-accept");
        assert_eq!(bindings["fee"], "450");
        assert!(!bindings.contains_key("password"));
    }

    #[test]
    fn validation_reports_first_unresolved_token() {
        let parameters = BTreeMap::new();
        let bindings = job_bindings(&portal(), &context(&parameters));
        let workflow = WorkflowDefinition::new("check_status", 10_000).with_steps(vec![
            WorkflowStep::navigate("{{loginUrl}}"),
            WorkflowStep::fill("#UserName", "{{username}}"),
            WorkflowStep::extract(".vt-order", "orderRef"),
            WorkflowStep::fill("#search", "{{orderRef}}"),
            WorkflowStep::fill("#search", "{{orderNumber}}"),
        ]);

        assert_eq!(
            validate_placeholders(&workflow, &bindings),
            Err(PortalError::UnresolvedPlaceholder {
                token: "orderNumber".into(),
                step_index: 4,
            })
        );
    }

    #[test]
    fn captured_names_only_count_after_their_extract() {
        let workflow = WorkflowDefinition::new("custom", 10_000).with_steps(vec![
            WorkflowStep::assert("{{later}}", AssertCondition::Visible),
            WorkflowStep::extract(".x", "later"),
        ]);
        let err = validate_placeholders(&workflow, &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            PortalError::UnresolvedPlaceholder {
                token: "later".into(),
                step_index: 0,
            }
        );
    }

    #[test]
    fn empty_token_is_never_resolvable() {
        let mut bindings = BTreeMap::new();
        bindings.insert(String::new(), "https://www.valuetrac.com".to_string());
        let workflow = WorkflowDefinition::new("check_status", 10_000)
            .with_steps(vec![WorkflowStep::navigate("{{ }}/Orders")]);
        assert_eq!(
            validate_placeholders(&workflow, &bindings),
            Err(PortalError::UnresolvedPlaceholder {
                token: String::new(),
                step_index: 0,
            })
        );
    }

    #[test]
    fn static_targets_skip_runtime_values() {
        let parameters = BTreeMap::new();
        let bindings = job_bindings(&portal(), &context(&parameters));
        let workflow = WorkflowDefinition::new("w", 10_000).with_steps(vec![
            WorkflowStep::navigate("{{loginUrl}}"),
            WorkflowStep::extract(".link", "next"),
            WorkflowStep::navigate("{{next}}"),
        ]);
        assert_eq!(
            static_navigation_targets(&workflow, &bindings),
            vec![(0, "https://www.valuetrac.com/Account/Login".to_string())]
        );
    }

    proptest! {
        #[test]
        fn resolved_steps_never_keep_known_tokens(
            value in "[a-zA-Z0-9 ._-]{0,24}",
            prefix in "[a-z#.]{0,8}",
        ) {
            let mut bindings = BTreeMap::new();
            bindings.insert("token".to_string(), value.clone());
            let step = WorkflowStep::fill(format!("{}{{{{token}}}}", prefix), "{{token}}");

            let resolved = resolve_step(&step, 0, &bindings, &BTreeMap::new()).unwrap();
            prop_assert_eq!(resolved.selector.unwrap(), format!("{}{}", prefix, value));
            prop_assert_eq!(resolved.value.unwrap(), value);
        }
    }
}
