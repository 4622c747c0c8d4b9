//! Configuration for portald

use portal_engine::EngineConfig;
use portal_types::{PortalType, RateLimitOverrides};
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Engine configuration (scheduler, retries, interpreter timeouts)
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Domains allowlisted for every tenant at startup
    #[serde(default)]
    pub allowlist: AllowlistSeed,

    /// Portal configs created at startup
    #[serde(default)]
    pub portals: Vec<PortalSeed>,

    /// Credentials served to the simulated driver
    #[serde(default)]
    pub credentials: Vec<CredentialSeed>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllowlistSeed {
    #[serde(default)]
    pub domains: Vec<String>,

    /// Recorded as `added_by` on seeded entries
    #[serde(default = "default_seeded_by")]
    pub added_by: String,
}

/// One portal config to create for a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalSeed {
    pub tenant: String,
    pub portal_type: PortalType,

    /// Empty uses the template's base URL
    #[serde(default)]
    pub base_url: String,

    pub credential_name: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub rate_limits: RateLimitOverrides,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialSeed {
    pub name: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for CredentialSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSeed")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_seeded_by() -> String {
    "portald".to_string()
}

impl DaemonConfig {
    /// Load configuration from defaults, then the optional file, then `PORTAL_*` variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PORTAL")
                .separator("_")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Two demo portals for one tenant, with their domains allowlisted.
    pub fn development() -> Self {
        let tenant = "tenant-dev".to_string();
        Self {
            allowlist: AllowlistSeed {
                domains: vec![
                    "www.valuetrac.com".to_string(),
                    "www.mercurynetwork.com".to_string(),
                ],
                added_by: default_seeded_by(),
            },
            portals: vec![
                PortalSeed {
                    tenant: tenant.clone(),
                    portal_type: PortalType::Valuetrac,
                    base_url: String::new(),
                    credential_name: "valuetrac-dev".to_string(),
                    name: None,
                    rate_limits: RateLimitOverrides::default(),
                },
                PortalSeed {
                    tenant,
                    portal_type: PortalType::Mercury,
                    base_url: String::new(),
                    credential_name: "mercury-dev".to_string(),
                    name: None,
                    rate_limits: RateLimitOverrides::default(),
                },
            ],
            credentials: vec![
                CredentialSeed {
                    name: "valuetrac-dev".to_string(),
                    username: "dev@example.com".to_string(),
                    password: "dev-password".to_string(),
                },
                CredentialSeed {
                    name: "mercury-dev".to_string(),
                    username: "dev@example.com".to_string(),
                    password: "dev-password".to_string(),
                },
            ],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(config.portals.is_empty());
        assert_eq!(config.allowlist.added_by, "portald");
        assert_eq!(config.engine.retry.max_retries, 3);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.engine.scheduler.worker_pool_size, EngineConfig::default().scheduler.worker_pool_size);
        assert!(config.credentials.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("portald-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[logging]
level = "debug"
json = true

[allowlist]
domains = ["www.valuetrac.com"]

[[portals]]
tenant = "tenant-a"
portal_type = "valuetrac"
credential_name = "vt"

[portals.rate_limits]
max_jobs_per_hour = 5

[[credentials]]
name = "vt"
username = "appraiser"
password = "hunter2"
"#
        )
        .unwrap();

        let config = DaemonConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.allowlist.domains, vec!["www.valuetrac.com".to_string()]);
        assert_eq!(config.portals.len(), 1);
        assert_eq!(config.portals[0].portal_type, PortalType::Valuetrac);
        assert_eq!(config.portals[0].rate_limits.max_jobs_per_hour, Some(5));
        assert_eq!(config.credentials[0].username, "appraiser");
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let seed = CredentialSeed {
            name: "vt".into(),
            username: "appraiser".into(),
            password: "hunter2".into(),
        };
        let printed = format!("{:?}", seed);
        assert!(printed.contains("appraiser"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_development_config_allowlists_its_portals() {
        let config = DaemonConfig::development();
        assert_eq!(config.portals.len(), 2);
        assert_eq!(config.credentials.len(), 2);
        assert!(config
            .allowlist
            .domains
            .iter()
            .any(|d| d == "www.mercurynetwork.com"));
    }
}
