//! Portal config templates and the tenant overlay that turns them into configs

use chrono::Utc;
use portal_types::{
    join_url, JobType, PortalConfigId, PortalError, PortalResult, PortalSelectors, PortalType,
    RateLimitOverrides, RateLimits, StatusMap, TenantId, VendorPortalConfig, WorkflowDefinition,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Path patterns relative to a portal's base URL
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPatterns {
    /// Vendor's public base URL; `None` when the tenant must supply one
    pub base: Option<String>,
    pub login: Option<String>,
    pub order_list: Option<String>,
    /// Contains an `{orderId}` slot
    pub order_detail: Option<String>,
    pub dashboard: Option<String>,
}

/// Per-vendor defaults a tenant config is derived from
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortalConfigTemplate {
    pub portal_type: PortalType,
    pub name: String,
    pub default_selectors: PortalSelectors,
    pub default_workflows: Vec<WorkflowDefinition>,
    pub default_rate_limits: RateLimits,
    pub url_patterns: UrlPatterns,
    /// Job types this vendor always gates behind approval
    pub forced_approval: BTreeSet<JobType>,
    pub status_map: StatusMap,
}

impl PortalConfigTemplate {
    pub fn workflow(&self, job_type: JobType) -> Option<&WorkflowDefinition> {
        self.default_workflows
            .iter()
            .find(|w| w.name == job_type.as_str())
    }
}

/// Tenant-specific values laid over a template
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TenantOverrides {
    /// Required when the template has no base URL of its own
    #[serde(default)]
    pub base_url: Option<String>,
    pub credential_name: String,
    #[serde(default)]
    pub portal_name: Option<String>,
    #[serde(default)]
    pub selectors: PortalSelectors,
    #[serde(default)]
    pub rate_limits: RateLimitOverrides,
    #[serde(default)]
    pub status_map: Option<StatusMap>,
}

impl TenantOverrides {
    pub fn new(credential_name: impl Into<String>) -> Self {
        Self {
            credential_name: credential_name.into(),
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_portal_name(mut self, name: impl Into<String>) -> Self {
        self.portal_name = Some(name.into());
        self
    }

    pub fn with_selectors(mut self, selectors: PortalSelectors) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn with_rate_limits(mut self, rate_limits: RateLimitOverrides) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    pub fn with_status_map(mut self, status_map: StatusMap) -> Self {
        self.status_map = Some(status_map);
        self
    }
}

/// Build a tenant config from `template`. The template itself is left untouched.
pub fn build_portal_config(
    template: &PortalConfigTemplate,
    tenant_id: TenantId,
    overrides: &TenantOverrides,
) -> PortalResult<VendorPortalConfig> {
    let base_url = overrides
        .base_url
        .as_deref()
        .or(template.url_patterns.base.as_deref())
        .map(|b| b.trim().trim_end_matches('/').to_string())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| {
            PortalError::InvalidRequest(format!(
                "a base URL is required for {} portals",
                template.portal_type
            ))
        })?;
    if overrides.credential_name.trim().is_empty() {
        return Err(PortalError::InvalidRequest(
            "a credential name is required".into(),
        ));
    }

    let patterns = &template.url_patterns;
    let url = |path: &Option<String>| path.as_deref().map(|p| join_url(&base_url, p));
    let now = Utc::now();

    Ok(VendorPortalConfig {
        id: PortalConfigId::generate(),
        tenant_id,
        portal_name: overrides
            .portal_name
            .clone()
            .unwrap_or_else(|| template.name.clone()),
        portal_type: template.portal_type,
        login_url: url(&patterns.login),
        order_list_url: url(&patterns.order_list),
        dashboard_url: url(&patterns.dashboard),
        order_detail_pattern: patterns.order_detail.clone(),
        base_url,
        credential_name: overrides.credential_name.clone(),
        is_active: true,
        selectors: template.default_selectors.merged(&overrides.selectors),
        workflows: template.default_workflows.clone(),
        rate_limits: template.default_rate_limits.merged(&overrides.rate_limits),
        forced_approval: template.forced_approval.clone(),
        status_map: overrides
            .status_map
            .clone()
            .unwrap_or_else(|| template.status_map.clone()),
        last_used_at: None,
        success_count: 0,
        failure_count: 0,
        created_at: now,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates;

    #[test]
    fn overlay_does_not_touch_template() {
        let template = templates::valuetrac::template();
        let before = template.default_selectors.clone();

        let overrides = TenantOverrides::new("vt-login")
            .with_selectors(PortalSelectors::new().with(PortalSelectors::ACCEPT_BUTTON, "#accept"))
            .with_rate_limits(RateLimitOverrides {
                max_jobs_per_hour: Some(5),
                ..Default::default()
            });
        let config = build_portal_config(&template, TenantId::new("t"), &overrides).unwrap();

        assert_eq!(config.selectors.get(PortalSelectors::ACCEPT_BUTTON), Some("#accept"));
        assert_eq!(config.rate_limits.max_jobs_per_hour, 5);
        assert_eq!(config.rate_limits.max_jobs_per_day, 150);
        assert_eq!(template.default_selectors, before);
        assert_eq!(template.default_rate_limits.max_jobs_per_hour, 30);
    }

    #[test]
    fn urls_are_built_from_tenant_base() {
        let template = templates::valuetrac::template();
        let overrides = TenantOverrides::new("vt").with_base_url("https://amc.valuetrac.com/");
        let config = build_portal_config(&template, TenantId::new("t"), &overrides).unwrap();

        assert_eq!(config.base_url, "https://amc.valuetrac.com");
        assert_eq!(
            config.login_url.as_deref(),
            Some("https://amc.valuetrac.com/Account/Login")
        );
        assert_eq!(
            config.order_url("123").as_deref(),
            Some("https://amc.valuetrac.com/Orders/Detail/123")
        );
    }

    #[test]
    fn generic_template_requires_base_url() {
        let template = templates::generic::template();
        let err = build_portal_config(&template, TenantId::new("t"), &TenantOverrides::new("c"))
            .unwrap_err();
        assert!(matches!(err, PortalError::InvalidRequest(_)));

        let config = build_portal_config(
            &template,
            TenantId::new("t"),
            &TenantOverrides::new("c").with_base_url("https://orders.amc.test"),
        )
        .unwrap();
        assert_eq!(config.portal_name, "Generic Portal");
        assert_eq!(config.order_list_url.as_deref(), Some("https://orders.amc.test/orders"));
    }

    #[test]
    fn credential_name_is_required() {
        let template = templates::mercury::template();
        assert!(build_portal_config(&template, TenantId::new("t"), &TenantOverrides::new(" ")).is_err());
    }
}
