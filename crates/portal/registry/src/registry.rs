//! Tenant portal config registry
//!
//! Configs are tenant-owned: every lookup is keyed by tenant as well as id,
//! and a config belonging to another tenant reads as not found.

use crate::template::{build_portal_config, PortalConfigTemplate, TenantOverrides};
use crate::templates;
use chrono::{DateTime, Utc};
use portal_types::{
    JobType, PortalConfigId, PortalError, PortalResult, PortalSelectors, PortalStats, PortalType,
    RateLimitOverrides, StatusMap, TenantId, VendorPortalConfig, WorkflowDefinition,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Optional values for `create_portal_config`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreatePortalOptions {
    #[serde(default)]
    pub custom_selectors: PortalSelectors,
    #[serde(default)]
    pub custom_rate_limits: RateLimitOverrides,
    #[serde(default)]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub status_map: Option<StatusMap>,
}

/// Partial update of a portal config. Selectors and rate limits merge onto
/// the current values; workflows replace by name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PortalConfigUpdate {
    pub portal_name: Option<String>,
    pub base_url: Option<String>,
    pub login_url: Option<String>,
    pub order_list_url: Option<String>,
    pub credential_name: Option<String>,
    pub is_active: Option<bool>,
    pub selectors: Option<PortalSelectors>,
    pub workflows: Option<Vec<WorkflowDefinition>>,
    pub rate_limits: Option<RateLimitOverrides>,
    pub forced_approval: Option<BTreeSet<JobType>>,
    pub status_map: Option<StatusMap>,
}

/// In-memory store of tenant portal configs
#[derive(Debug, Default)]
pub struct PortalRegistry {
    configs: HashMap<PortalConfigId, VendorPortalConfig>,
}

impl PortalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_portal_template(&self, portal_type: PortalType) -> PortalConfigTemplate {
        templates::template_for(portal_type)
    }

    pub fn available_portal_types(&self) -> Vec<PortalType> {
        templates::available_portal_types()
    }

    /// Create a config for `tenant` from the `portal_type` template.
    ///
    /// An empty `base_url` keeps the vendor's public URL.
    pub fn create_portal_config(
        &mut self,
        tenant: &TenantId,
        portal_type: PortalType,
        base_url: &str,
        credential_name: &str,
        options: CreatePortalOptions,
    ) -> PortalResult<VendorPortalConfig> {
        let template = templates::template_for(portal_type);
        let mut overrides = TenantOverrides::new(credential_name)
            .with_selectors(options.custom_selectors)
            .with_rate_limits(options.custom_rate_limits);
        if !base_url.trim().is_empty() {
            overrides = overrides.with_base_url(base_url);
        }
        if let Some(name) = options.custom_name {
            overrides = overrides.with_portal_name(name);
        }
        if let Some(status_map) = options.status_map {
            overrides = overrides.with_status_map(status_map);
        }

        let config = build_portal_config(&template, tenant.clone(), &overrides)?;
        tracing::info!(
            portal_config_id = %config.id,
            tenant_id = %tenant,
            portal_type = %portal_type,
            "Portal config created"
        );
        self.configs.insert(config.id.clone(), config.clone());
        Ok(config)
    }

    pub fn get_portal_config(
        &self,
        tenant: &TenantId,
        id: &PortalConfigId,
    ) -> PortalResult<VendorPortalConfig> {
        self.find(tenant, id).cloned()
    }

    /// Configs owned by `tenant`, sorted by name.
    pub fn list_portal_configs(
        &self,
        tenant: &TenantId,
        active_only: bool,
    ) -> Vec<VendorPortalConfig> {
        let mut configs: Vec<VendorPortalConfig> = self
            .configs
            .values()
            .filter(|c| c.tenant_id == *tenant && (!active_only || c.is_active))
            .cloned()
            .collect();
        configs.sort_by(|a, b| a.portal_name.cmp(&b.portal_name).then_with(|| a.id.cmp(&b.id)));
        configs
    }

    pub fn update_portal_config(
        &mut self,
        tenant: &TenantId,
        id: &PortalConfigId,
        update: PortalConfigUpdate,
    ) -> PortalResult<VendorPortalConfig> {
        if let Some(workflows) = &update.workflows {
            for workflow in workflows {
                workflow.validate()?;
            }
        }

        let config = self.find_mut(tenant, id)?;
        if let Some(name) = update.portal_name {
            config.portal_name = name;
        }
        if let Some(base_url) = update.base_url {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(login_url) = update.login_url {
            config.login_url = Some(login_url);
        }
        if let Some(order_list_url) = update.order_list_url {
            config.order_list_url = Some(order_list_url);
        }
        if let Some(credential_name) = update.credential_name {
            config.credential_name = credential_name;
        }
        if let Some(is_active) = update.is_active {
            config.is_active = is_active;
        }
        if let Some(selectors) = update.selectors {
            config.selectors = config.selectors.merged(&selectors);
        }
        if let Some(rate_limits) = update.rate_limits {
            config.rate_limits = config.rate_limits.merged(&rate_limits);
        }
        if let Some(forced) = update.forced_approval {
            config.forced_approval = forced;
        }
        if let Some(status_map) = update.status_map {
            config.status_map = status_map;
        }
        if let Some(workflows) = update.workflows {
            for mut workflow in workflows {
                match config.workflows.iter_mut().find(|w| w.name == workflow.name) {
                    Some(current) => {
                        if *current != workflow {
                            workflow.version = current.version + 1;
                            *current = workflow;
                        }
                    }
                    None => config.workflows.push(workflow),
                }
            }
        }
        config.updated_at = Utc::now();

        tracing::info!(portal_config_id = %id, "Portal config updated");
        Ok(config.clone())
    }

    pub fn delete_portal_config(&mut self, tenant: &TenantId, id: &PortalConfigId) -> PortalResult<()> {
        self.find(tenant, id)?;
        self.configs.remove(id);
        tracing::info!(portal_config_id = %id, "Portal config deleted");
        Ok(())
    }

    pub fn toggle_portal_active(
        &mut self,
        tenant: &TenantId,
        id: &PortalConfigId,
        is_active: bool,
    ) -> PortalResult<VendorPortalConfig> {
        self.update_portal_config(
            tenant,
            id,
            PortalConfigUpdate {
                is_active: Some(is_active),
                ..Default::default()
            },
        )
    }

    /// Count a finished job against its portal.
    pub fn record_outcome(&mut self, id: &PortalConfigId, success: bool, at: DateTime<Utc>) {
        if let Some(config) = self.configs.get_mut(id) {
            if success {
                config.success_count += 1;
            } else {
                config.failure_count += 1;
            }
            config.last_used_at = Some(at);
        }
    }

    /// Outcome counters for a config; all zero when it does not exist.
    pub fn get_portal_stats(&self, tenant: &TenantId, id: &PortalConfigId) -> PortalStats {
        self.find(tenant, id)
            .map(PortalStats::from)
            .unwrap_or_else(|_| PortalStats::empty())
    }

    fn find(&self, tenant: &TenantId, id: &PortalConfigId) -> PortalResult<&VendorPortalConfig> {
        self.configs
            .get(id)
            .filter(|c| c.tenant_id == *tenant)
            .ok_or_else(|| PortalError::PortalNotFound(id.clone()))
    }

    fn find_mut(
        &mut self,
        tenant: &TenantId,
        id: &PortalConfigId,
    ) -> PortalResult<&mut VendorPortalConfig> {
        self.configs
            .get_mut(id)
            .filter(|c| c.tenant_id == *tenant)
            .ok_or_else(|| PortalError::PortalNotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::WorkflowStep;

    fn tenant() -> TenantId {
        TenantId::new("tenant-a")
    }

    fn registry_with_valuetrac() -> (PortalRegistry, PortalConfigId) {
        let mut registry = PortalRegistry::new();
        let config = registry
            .create_portal_config(
                &tenant(),
                PortalType::Valuetrac,
                "",
                "valuetrac-login",
                CreatePortalOptions::default(),
            )
            .unwrap();
        (registry, config.id)
    }

    #[test]
    fn create_uses_template_defaults() {
        let (registry, id) = registry_with_valuetrac();
        let config = registry.get_portal_config(&tenant(), &id).unwrap();
        assert_eq!(config.portal_name, "ValueTrac");
        assert_eq!(config.base_url, "https://www.valuetrac.com");
        assert_eq!(config.rate_limits.max_jobs_per_hour, 30);
        assert!(config.is_active);
        assert_eq!(config.workflows.len(), 4);
    }

    #[test]
    fn other_tenants_cannot_see_config() {
        let (mut registry, id) = registry_with_valuetrac();
        let other = TenantId::new("tenant-b");
        assert!(matches!(
            registry.get_portal_config(&other, &id),
            Err(PortalError::PortalNotFound(_))
        ));
        assert!(registry.delete_portal_config(&other, &id).is_err());
        assert!(registry.list_portal_configs(&other, false).is_empty());
    }

    #[test]
    fn list_sorts_by_name_and_filters_inactive() {
        let (mut registry, vt) = registry_with_valuetrac();
        registry
            .create_portal_config(
                &tenant(),
                PortalType::Mercury,
                "",
                "mn",
                CreatePortalOptions {
                    custom_name: Some("AMC Mercury".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let names: Vec<String> = registry
            .list_portal_configs(&tenant(), false)
            .into_iter()
            .map(|c| c.portal_name)
            .collect();
        assert_eq!(names, vec!["AMC Mercury", "ValueTrac"]);

        registry.toggle_portal_active(&tenant(), &vt, false).unwrap();
        assert_eq!(registry.list_portal_configs(&tenant(), true).len(), 1);
    }

    #[test]
    fn update_merges_selectors_and_limits() {
        let (mut registry, id) = registry_with_valuetrac();
        let updated = registry
            .update_portal_config(
                &tenant(),
                &id,
                PortalConfigUpdate {
                    selectors: Some(PortalSelectors::new().with(PortalSelectors::ACCEPT_BUTTON, "#go")),
                    rate_limits: Some(RateLimitOverrides {
                        min_delay_between_jobs_ms: Some(10_000),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.selectors.get(PortalSelectors::ACCEPT_BUTTON), Some("#go"));
        assert!(updated.selectors.get(PortalSelectors::USERNAME_FIELD).is_some());
        assert_eq!(updated.rate_limits.min_delay_between_jobs_ms, 10_000);
        assert_eq!(updated.rate_limits.max_jobs_per_hour, 30);
    }

    #[test]
    fn replacing_a_workflow_bumps_its_version() {
        let (mut registry, id) = registry_with_valuetrac();
        let replacement = WorkflowDefinition::new("check_status", 30_000)
            .with_steps(vec![WorkflowStep::navigate("{{orderListUrl}}")]);
        let updated = registry
            .update_portal_config(
                &tenant(),
                &id,
                PortalConfigUpdate {
                    workflows: Some(vec![replacement]),
                    ..Default::default()
                },
            )
            .unwrap();
        let check = updated.workflow(JobType::CheckStatus).unwrap();
        assert_eq!(check.version, 2);
        assert_eq!(check.timeout_ms, 30_000);
        assert_eq!(updated.workflow(JobType::AcceptOrder).unwrap().version, 1);
    }

    #[test]
    fn invalid_workflow_update_is_rejected() {
        let (mut registry, id) = registry_with_valuetrac();
        let err = registry
            .update_portal_config(
                &tenant(),
                &id,
                PortalConfigUpdate {
                    workflows: Some(vec![WorkflowDefinition::new("check_status", 1000)]),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, PortalError::InvalidWorkflow(_)));
    }

    #[test]
    fn stats_follow_outcomes() {
        let (mut registry, id) = registry_with_valuetrac();
        assert_eq!(registry.get_portal_stats(&tenant(), &id).total_jobs, 0);

        let now = Utc::now();
        registry.record_outcome(&id, true, now);
        registry.record_outcome(&id, true, now);
        registry.record_outcome(&id, false, now);

        let stats = registry.get_portal_stats(&tenant(), &id);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.total_jobs, 3);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.last_used_at, Some(now));

        let missing = registry.get_portal_stats(&tenant(), &PortalConfigId::new("nope"));
        assert_eq!(missing, PortalStats::empty());
    }

    #[test]
    fn available_types() {
        let registry = PortalRegistry::new();
        assert_eq!(registry.available_portal_types().len(), 3);
        assert_eq!(
            registry.get_portal_template(PortalType::Mercury).name,
            "Mercury Network"
        );
    }
}
