//! Credential vault seam
//!
//! Portal credentials are fetched per job immediately before a session is
//! opened. They are bound into `{{username}}`/`{{password}}` placeholders and
//! never written to logs, the execution log or job records.

use async_trait::async_trait;
use portal_types::{JobId, PortalConfigId, TenantId};

/// Username and password for one portal
#[derive(Clone)]
pub struct PortalCredential {
    pub username: String,
    password: String,
}

impl PortalCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for PortalCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything a vault may use to decide which secret to release
#[derive(Clone, Debug)]
pub struct CredentialRequest {
    pub tenant_id: TenantId,
    pub portal_config_id: PortalConfigId,
    pub credential_name: String,
    pub job_id: JobId,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VaultError {
    #[error("no credential named {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    Denied(String),

    #[error("vault unavailable: {0}")]
    Unavailable(String),
}

/// Source of portal credentials
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn get_credential(&self, request: &CredentialRequest)
        -> Result<PortalCredential, VaultError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_password() {
        let credential = PortalCredential::new("appraiser", "hunter2");
        let printed = format!("{:?}", credential);
        assert!(printed.contains("appraiser"));
        assert!(!printed.contains("hunter2"));
        assert_eq!(credential.password(), "hunter2");
    }
}
