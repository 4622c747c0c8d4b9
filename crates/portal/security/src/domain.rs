//! Domain validator: the explicit allowlist of hosts automation may reach
//!
//! There is no implicit allow. A URL passes only when it uses HTTPS and its
//! host matches an entry in the tenant's allowlist or the global allowlist.

use chrono::{DateTime, Utc};
use portal_types::{DomainDenial, PortalError, PortalResult, TenantId};
use serde::{Deserialize, Serialize};
use url::Url;

/// Where an allowlist entry applies
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowlistScope {
    Global,
    Tenant(TenantId),
}

impl AllowlistScope {
    fn applies_to(&self, tenant: &TenantId) -> bool {
        match self {
            Self::Global => true,
            Self::Tenant(t) => t == tenant,
        }
    }
}

/// One allowlisted domain
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainAllowlistEntry {
    pub scope: AllowlistScope,
    /// Normalized host, or `*.suffix` for any strict subdomain of `suffix`
    pub domain: String,
    pub added_by: String,
    pub added_at: DateTime<Utc>,
}

impl DomainAllowlistEntry {
    pub fn matches(&self, host: &str) -> bool {
        match self.domain.strip_prefix("*.") {
            Some(suffix) => host
                .strip_suffix(suffix)
                .is_some_and(|prefix| prefix.ends_with('.') && prefix.len() > 1),
            None => host == self.domain,
        }
    }
}

/// Normalize an administrator-supplied domain: lowercase, no scheme, port, path or trailing dot.
pub fn normalize_domain(raw: &str) -> PortalResult<String> {
    let mut domain = raw.trim().to_lowercase();
    if let Some(idx) = domain.find("://") {
        domain = domain[idx + 3..].to_string();
    }
    if let Some(idx) = domain.find(['/', '?', '#']) {
        domain.truncate(idx);
    }
    if let Some(idx) = domain.rfind(':') {
        domain.truncate(idx);
    }
    let domain = domain.trim_end_matches('.').to_string();

    let host = domain.strip_prefix("*.").unwrap_or(&domain);
    let well_formed = !host.is_empty()
        && !host.contains('*')
        && host
            .split('.')
            .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    if !well_formed {
        return Err(PortalError::InvalidRequest(format!(
            "invalid allowlist domain: {}",
            raw
        )));
    }
    Ok(domain)
}

/// Tenant-scoped plus global domain allowlist
#[derive(Debug, Default)]
pub struct DomainValidator {
    entries: Vec<DomainAllowlistEntry>,
}

impl DomainValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `url` for `tenant`, returning the specific denial on failure.
    pub fn check(&self, tenant: &TenantId, url: &str) -> PortalResult<()> {
        let deny = |reason: DomainDenial| {
            Err(PortalError::DomainNotAllowed {
                url: url.to_string(),
                reason,
            })
        };

        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(_) => return deny(DomainDenial::InvalidUrl),
        };
        if parsed.scheme() != "https" {
            return deny(DomainDenial::InsecureScheme);
        }
        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host.trim_end_matches('.').to_lowercase(),
            _ => return deny(DomainDenial::MissingHost),
        };

        let allowed = self
            .entries
            .iter()
            .any(|e| e.scope.applies_to(tenant) && e.matches(&host));
        if allowed {
            Ok(())
        } else {
            deny(DomainDenial::NotAllowlisted)
        }
    }

    pub fn is_domain_allowed(&self, tenant: &TenantId, url: &str) -> bool {
        self.check(tenant, url).is_ok()
    }

    /// Add an entry. Adding an existing (scope, domain) pair returns the existing entry.
    pub fn add_to_allowlist(
        &mut self,
        scope: AllowlistScope,
        domain: &str,
        added_by: impl Into<String>,
    ) -> PortalResult<DomainAllowlistEntry> {
        let domain = normalize_domain(domain)?;
        if let Some(existing) = self
            .entries
            .iter()
            .find(|e| e.scope == scope && e.domain == domain)
        {
            return Ok(existing.clone());
        }

        let entry = DomainAllowlistEntry {
            scope,
            domain,
            added_by: added_by.into(),
            added_at: Utc::now(),
        };
        tracing::info!(
            domain = %entry.domain,
            scope = ?entry.scope,
            added_by = %entry.added_by,
            "Domain added to allowlist"
        );
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Remove an entry; returns whether one existed.
    pub fn remove_from_allowlist(&mut self, scope: &AllowlistScope, domain: &str) -> bool {
        let Ok(domain) = normalize_domain(domain) else {
            return false;
        };
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.scope == *scope && e.domain == domain));
        let removed = self.entries.len() != before;
        if removed {
            tracing::info!(domain = %domain, scope = ?scope, "Domain removed from allowlist");
        }
        removed
    }

    /// Entries effective for `tenant`: its own first, then global ones.
    pub fn get_allowlist(&self, tenant: &TenantId) -> Vec<DomainAllowlistEntry> {
        let own = self
            .entries
            .iter()
            .filter(|e| e.scope == AllowlistScope::Tenant(tenant.clone()));
        let global = self
            .entries
            .iter()
            .filter(|e| e.scope == AllowlistScope::Global);
        own.chain(global).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id)
    }

    fn denial(validator: &DomainValidator, url: &str) -> DomainDenial {
        match validator.check(&tenant("a"), url) {
            Err(PortalError::DomainNotAllowed { reason, .. }) => reason,
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn empty_allowlist_denies_everything() {
        let validator = DomainValidator::new();
        assert!(!validator.is_domain_allowed(&tenant("a"), "https://www.valuetrac.com/Account/Login"));
        assert_eq!(
            denial(&validator, "https://www.valuetrac.com"),
            DomainDenial::NotAllowlisted
        );
    }

    #[test]
    fn global_entries_apply_to_all_tenants() {
        let mut validator = DomainValidator::new();
        validator
            .add_to_allowlist(AllowlistScope::Global, "www.valuetrac.com", "admin")
            .unwrap();
        assert!(validator.is_domain_allowed(&tenant("a"), "https://www.valuetrac.com/Orders"));
        assert!(validator.is_domain_allowed(&tenant("b"), "https://WWW.ValueTrac.com/Orders"));
        assert!(!validator.is_domain_allowed(&tenant("a"), "https://valuetrac.com/"));
    }

    #[test]
    fn tenant_entries_are_isolated() {
        let mut validator = DomainValidator::new();
        validator
            .add_to_allowlist(AllowlistScope::Tenant(tenant("a")), "portal.amc.test", "admin")
            .unwrap();
        assert!(validator.is_domain_allowed(&tenant("a"), "https://portal.amc.test/login"));
        assert!(!validator.is_domain_allowed(&tenant("b"), "https://portal.amc.test/login"));
    }

    #[test]
    fn insecure_and_malformed_urls_are_denied() {
        let mut validator = DomainValidator::new();
        validator
            .add_to_allowlist(AllowlistScope::Global, "www.valuetrac.com", "admin")
            .unwrap();
        assert_eq!(
            denial(&validator, "http://www.valuetrac.com/Account/Login"),
            DomainDenial::InsecureScheme
        );
        assert_eq!(denial(&validator, "not a url"), DomainDenial::InvalidUrl);
        assert_eq!(
            denial(&validator, "file:///etc/passwd"),
            DomainDenial::InsecureScheme
        );
    }

    #[test]
    fn wildcard_matches_strict_subdomains_only() {
        let mut validator = DomainValidator::new();
        validator
            .add_to_allowlist(AllowlistScope::Global, "*.mercurynetwork.com", "admin")
            .unwrap();
        assert!(validator.is_domain_allowed(&tenant("a"), "https://www.mercurynetwork.com/mercury/login.aspx"));
        assert!(validator.is_domain_allowed(&tenant("a"), "https://a.b.mercurynetwork.com/"));
        assert!(!validator.is_domain_allowed(&tenant("a"), "https://mercurynetwork.com/"));
        assert!(!validator.is_domain_allowed(&tenant("a"), "https://evilmercurynetwork.com/"));
    }

    #[test]
    fn lookalike_hosts_do_not_match() {
        let mut validator = DomainValidator::new();
        validator
            .add_to_allowlist(AllowlistScope::Global, "www.valuetrac.com", "admin")
            .unwrap();
        assert!(!validator.is_domain_allowed(&tenant("a"), "https://www.valuetrac.com.evil.test/"));
        assert!(!validator.is_domain_allowed(&tenant("a"), "https://www.valuetrac.com@evil.test/"));
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_domain("HTTPS://Www.ValueTrac.com:443/x").unwrap(), "www.valuetrac.com");
        assert_eq!(normalize_domain("example.com.").unwrap(), "example.com");
        assert_eq!(normalize_domain("*.example.com").unwrap(), "*.example.com");
        assert!(normalize_domain("").is_err());
        assert!(normalize_domain("a..b").is_err());
        assert!(normalize_domain("*.*.com").is_err());
    }

    #[test]
    fn add_is_idempotent_and_remove_reports() {
        let mut validator = DomainValidator::new();
        validator.add_to_allowlist(AllowlistScope::Global, "a.test", "x").unwrap();
        validator.add_to_allowlist(AllowlistScope::Global, "A.test", "y").unwrap();
        assert_eq!(validator.get_allowlist(&tenant("t")).len(), 1);

        assert!(validator.remove_from_allowlist(&AllowlistScope::Global, "a.test"));
        assert!(!validator.remove_from_allowlist(&AllowlistScope::Global, "a.test"));
        assert!(!validator.is_domain_allowed(&tenant("t"), "https://a.test/"));
    }

    #[test]
    fn allowlist_lists_tenant_entries_before_global() {
        let mut validator = DomainValidator::new();
        validator.add_to_allowlist(AllowlistScope::Global, "global.test", "x").unwrap();
        validator
            .add_to_allowlist(AllowlistScope::Tenant(tenant("a")), "own.test", "x")
            .unwrap();
        validator
            .add_to_allowlist(AllowlistScope::Tenant(tenant("b")), "other.test", "x")
            .unwrap();

        let domains: Vec<String> = validator
            .get_allowlist(&tenant("a"))
            .into_iter()
            .map(|e| e.domain)
            .collect();
        assert_eq!(domains, vec!["own.test", "global.test"]);
    }
}
