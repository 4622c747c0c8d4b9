//! Vendor portal configuration data

use crate::{JobType, PortalConfigId, TenantId, WorkflowDefinition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ── Portal type ──────────────────────────────────────────────────────

/// Vendor portal family a config was derived from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortalType {
    Valuetrac,
    Mercury,
    /// Portal with no dedicated integration; selectors come from the tenant
    Generic,
}

impl PortalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valuetrac => "valuetrac",
            Self::Mercury => "mercury",
            Self::Generic => "generic",
        }
    }
}

impl std::fmt::Display for PortalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PortalType {
    type Err = crate::PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "valuetrac" => Ok(Self::Valuetrac),
            "mercury" | "mercury_network" => Ok(Self::Mercury),
            "generic" | "custom" => Ok(Self::Generic),
            other => Err(crate::PortalError::UnknownPortalType(other.to_string())),
        }
    }
}

// ── Rate limits ──────────────────────────────────────────────────────

/// Per-portal throughput ceilings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub max_jobs_per_hour: u32,
    pub max_jobs_per_day: u32,
    pub min_delay_between_jobs_ms: u64,
    pub max_concurrent_jobs: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            max_jobs_per_hour: 20,
            max_jobs_per_day: 100,
            min_delay_between_jobs_ms: 5000,
            max_concurrent_jobs: 1,
        }
    }
}

impl RateLimits {
    /// Overlay the fields set in `overrides`.
    pub fn merged(&self, overrides: &RateLimitOverrides) -> Self {
        Self {
            max_jobs_per_hour: overrides.max_jobs_per_hour.unwrap_or(self.max_jobs_per_hour),
            max_jobs_per_day: overrides.max_jobs_per_day.unwrap_or(self.max_jobs_per_day),
            min_delay_between_jobs_ms: overrides
                .min_delay_between_jobs_ms
                .unwrap_or(self.min_delay_between_jobs_ms),
            max_concurrent_jobs: overrides
                .max_concurrent_jobs
                .unwrap_or(self.max_concurrent_jobs),
        }
    }
}

/// Partial rate-limit update
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitOverrides {
    #[serde(default)]
    pub max_jobs_per_hour: Option<u32>,
    #[serde(default)]
    pub max_jobs_per_day: Option<u32>,
    #[serde(default)]
    pub min_delay_between_jobs_ms: Option<u64>,
    #[serde(default)]
    pub max_concurrent_jobs: Option<u32>,
}

// ── Selectors ────────────────────────────────────────────────────────

/// Named CSS selectors for a portal.
///
/// Keys are the names workflows reference as `{{key}}` tokens.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortalSelectors(BTreeMap<String, String>);

impl PortalSelectors {
    pub const USERNAME_FIELD: &'static str = "usernameField";
    pub const PASSWORD_FIELD: &'static str = "passwordField";
    pub const LOGIN_BUTTON: &'static str = "loginButton";
    pub const LOGIN_SUCCESS_INDICATOR: &'static str = "loginSuccessIndicator";
    pub const ORDER_TABLE: &'static str = "orderTable";
    pub const ORDER_ROW: &'static str = "orderRow";
    pub const ORDER_ID_CELL: &'static str = "orderIdCell";
    pub const ORDER_STATUS_CELL: &'static str = "orderStatusCell";
    pub const ORDER_ACTIONS_CELL: &'static str = "orderActionsCell";
    pub const ACCEPT_BUTTON: &'static str = "acceptButton";
    pub const REJECT_BUTTON: &'static str = "rejectButton";
    pub const DOWNLOAD_BUTTON: &'static str = "downloadButton";
    pub const SUBMIT_BUTTON: &'static str = "submitButton";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, selector: impl Into<String>) -> Self {
        self.0.insert(name.into(), selector.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, selector: impl Into<String>) {
        self.0.insert(name.into(), selector.into());
    }

    /// A copy with `overrides` laid over these selectors.
    pub fn merged(&self, overrides: &PortalSelectors) -> Self {
        let mut merged = self.0.clone();
        merged.extend(overrides.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(merged)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Status normalization ─────────────────────────────────────────────

/// Portal status text mapped to a normalized status and actionability flags
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedStatus {
    pub status: String,
    pub is_actionable: bool,
    pub needs_acceptance: bool,
    pub can_download: bool,
    pub can_submit: bool,
}

impl NormalizedStatus {
    pub fn new(
        status: impl Into<String>,
        is_actionable: bool,
        needs_acceptance: bool,
        can_download: bool,
        can_submit: bool,
    ) -> Self {
        Self {
            status: status.into(),
            is_actionable,
            needs_acceptance,
            can_download,
            can_submit,
        }
    }

    /// Status text with no known mapping: every flag off.
    pub fn unknown(status: impl Into<String>) -> Self {
        Self::new(status, false, false, false, false)
    }
}

/// Lookup table from lowercase portal status text to [`NormalizedStatus`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusMap(BTreeMap<String, NormalizedStatus>);

impl StatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; `text` is matched case-insensitively.
    pub fn with(mut self, text: &str, status: NormalizedStatus) -> Self {
        self.0.insert(text.trim().to_lowercase(), status);
        self
    }

    pub fn parse(&self, text: &str) -> NormalizedStatus {
        let normalized = text.trim().to_lowercase();
        self.0
            .get(&normalized)
            .cloned()
            .unwrap_or_else(|| NormalizedStatus::unknown(normalized))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── URL helpers ──────────────────────────────────────────────────────

/// Join a base URL and a path: trailing `/` trimmed from the base, leading `/` ensured.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

// ── Vendor portal config ─────────────────────────────────────────────

/// A tenant's concrete configuration for one vendor portal
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VendorPortalConfig {
    pub id: PortalConfigId,
    pub tenant_id: TenantId,
    pub portal_name: String,
    pub portal_type: PortalType,
    pub base_url: String,
    pub login_url: Option<String>,
    pub order_list_url: Option<String>,
    pub dashboard_url: Option<String>,
    /// Path pattern with an `{orderId}` slot
    pub order_detail_pattern: Option<String>,
    /// Name of the credential the vault resolves for this portal
    pub credential_name: String,
    pub is_active: bool,
    pub selectors: PortalSelectors,
    pub workflows: Vec<WorkflowDefinition>,
    pub rate_limits: RateLimits,
    /// Job types that always require approval on this portal
    pub forced_approval: BTreeSet<JobType>,
    pub status_map: StatusMap,
    pub last_used_at: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub failure_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VendorPortalConfig {
    /// The workflow implementing `job_type`, if this portal defines one.
    pub fn workflow(&self, job_type: JobType) -> Option<&WorkflowDefinition> {
        self.workflows.iter().find(|w| w.name == job_type.as_str())
    }

    /// Detail page URL for an order.
    pub fn order_url(&self, order_id: &str) -> Option<String> {
        self.order_detail_pattern
            .as_ref()
            .map(|pattern| join_url(&self.base_url, &pattern.replace("{orderId}", order_id)))
    }

    /// Placeholder bindings this portal contributes: URLs and selector names.
    pub fn bindings(&self) -> BTreeMap<String, String> {
        let mut bindings: BTreeMap<String, String> = self
            .selectors
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        bindings.insert("baseUrl".into(), self.base_url.clone());
        let urls = [
            ("loginUrl", &self.login_url),
            ("orderListUrl", &self.order_list_url),
            ("dashboardUrl", &self.dashboard_url),
        ];
        for (name, url) in urls {
            if let Some(url) = url {
                bindings.insert(name.to_string(), url.clone());
            }
        }
        bindings
    }

    pub fn total_jobs(&self) -> u64 {
        self.success_count + self.failure_count
    }
}

/// Aggregate outcome counters for a portal config
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortalStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub total_jobs: u64,
}

impl PortalStats {
    pub fn empty() -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            success_rate: 0.0,
            last_used_at: None,
            total_jobs: 0,
        }
    }
}

impl From<&VendorPortalConfig> for PortalStats {
    fn from(config: &VendorPortalConfig) -> Self {
        let total = config.total_jobs();
        Self {
            success_count: config.success_count,
            failure_count: config.failure_count,
            success_rate: if total > 0 {
                config.success_count as f64 / total as f64
            } else {
                0.0
            },
            last_used_at: config.last_used_at,
            total_jobs: total,
        }
    }
}
