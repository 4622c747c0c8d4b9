//! Shared harness for the engine integration tests.

#![allow(dead_code)]

use portal_engine::{
    AutomationEngine, EngineConfig, SimulatedBrowser, StaticCredentialVault,
};
use portal_registry::CreatePortalOptions;
use portal_security::AllowlistScope;
use portal_types::{
    CreateJobRequest, JobType, PortalType, RateLimitOverrides, StepAction, TenantId,
    VendorPortalConfig,
};
use std::sync::Arc;

pub const VALUETRAC_CREDENTIAL: &str = "valuetrac-login";
pub const MERCURY_CREDENTIAL: &str = "mercury-login";
pub const USERNAME: &str = "appraiser@example.com";
pub const PASSWORD: &str = "correct-horse-battery";

pub struct Harness {
    pub engine: Arc<AutomationEngine>,
    pub browser: SimulatedBrowser,
    pub tenant: TenantId,
}

pub fn vault() -> StaticCredentialVault {
    StaticCredentialVault::new()
        .with_credential(VALUETRAC_CREDENTIAL, USERNAME, PASSWORD)
        .with_credential(MERCURY_CREDENTIAL, USERNAME, PASSWORD)
}

/// Engine over `browser` with both vendor domains allowlisted globally.
pub async fn harness_with(
    browser: SimulatedBrowser,
    config: EngineConfig,
    vault: StaticCredentialVault,
) -> Harness {
    let engine = Arc::new(AutomationEngine::new(
        config,
        Arc::new(browser.clone()),
        Arc::new(vault),
    ));
    for domain in ["www.valuetrac.com", "www.mercurynetwork.com"] {
        engine
            .add_to_allowlist(AllowlistScope::Global, domain, "ops@example.com")
            .await
            .unwrap();
    }
    Harness {
        engine,
        browser,
        tenant: TenantId::new("tenant-appraisal-co"),
    }
}

pub async fn harness(browser: SimulatedBrowser) -> Harness {
    harness_with(browser, EngineConfig::default(), vault()).await
}

/// No spacing between starts, so one test can run several jobs back to back.
pub fn unspaced() -> RateLimitOverrides {
    RateLimitOverrides {
        min_delay_between_jobs_ms: Some(0),
        ..Default::default()
    }
}

pub async fn portal(
    h: &Harness,
    portal_type: PortalType,
    limits: RateLimitOverrides,
) -> VendorPortalConfig {
    let credential = match portal_type {
        PortalType::Mercury => MERCURY_CREDENTIAL,
        _ => VALUETRAC_CREDENTIAL,
    };
    h.engine
        .create_portal_config(
            &h.tenant,
            portal_type,
            "",
            credential,
            CreatePortalOptions {
                custom_rate_limits: limits,
                ..Default::default()
            },
        )
        .await
        .unwrap()
}

pub async fn valuetrac(h: &Harness) -> VendorPortalConfig {
    portal(h, PortalType::Valuetrac, unspaced()).await
}

pub async fn mercury(h: &Harness) -> VendorPortalConfig {
    portal(h, PortalType::Mercury, unspaced()).await
}

pub fn accept(portal: &VendorPortalConfig, order_id: &str) -> CreateJobRequest {
    CreateJobRequest::new(portal.id.clone(), JobType::AcceptOrder, "coordinator@example.com")
        .with_order_id(order_id)
}

/// (action, selector or URL) for each log entry.
pub fn log_targets(log: &portal_types::ExecutionLog) -> Vec<(StepAction, String)> {
    log.entries()
        .iter()
        .map(|r| {
            let target = r.url.clone().or_else(|| r.selector.clone()).unwrap_or_default();
            (r.action, target)
        })
        .collect()
}
