//! Engine construction and startup seeding

use crate::config::DaemonConfig;
use anyhow::Context;
use portal_engine::{AutomationEngine, BrowserDriver, StaticCredentialVault};
use portal_registry::CreatePortalOptions;
use portal_security::AllowlistScope;
use portal_types::TenantId;
use std::sync::Arc;

/// Build an engine over `driver`, then seed the global allowlist and the
/// configured portals. Credentials come from the config's static entries.
pub async fn build_engine(
    config: &DaemonConfig,
    driver: Arc<dyn BrowserDriver>,
) -> anyhow::Result<Arc<AutomationEngine>> {
    let vault = config
        .credentials
        .iter()
        .fold(StaticCredentialVault::new(), |vault, c| {
            vault.with_credential(&c.name, &c.username, &c.password)
        });
    let engine = Arc::new(AutomationEngine::new(
        config.engine.clone(),
        driver,
        Arc::new(vault),
    ));

    for domain in &config.allowlist.domains {
        engine
            .add_to_allowlist(AllowlistScope::Global, domain, &config.allowlist.added_by)
            .await
            .with_context(|| format!("invalid allowlist domain '{}'", domain))?;
    }

    for seed in &config.portals {
        let tenant = TenantId::new(&seed.tenant);
        let options = CreatePortalOptions {
            custom_rate_limits: seed.rate_limits,
            custom_name: seed.name.clone(),
            ..Default::default()
        };
        let portal = engine
            .create_portal_config(
                &tenant,
                seed.portal_type,
                &seed.base_url,
                &seed.credential_name,
                options,
            )
            .await
            .with_context(|| {
                format!("failed to create {} portal for tenant {}", seed.portal_type, tenant)
            })?;
        if !config.credentials.iter().any(|c| c.name == seed.credential_name) {
            tracing::warn!(
                portal_config_id = %portal.id,
                credential_name = %seed.credential_name,
                "No credential configured for portal; its jobs will fail with CredentialMissing"
            );
        }
    }

    tracing::info!(
        allowlisted = config.allowlist.domains.len(),
        portals = config.portals.len(),
        credentials = config.credentials.len(),
        "Engine seeded"
    );
    Ok(engine)
}
