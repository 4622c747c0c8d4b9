//! Vendor portal configuration registry
//!
//! Vendor knowledge lives here as data, never in the interpreter:
//! - **Templates**: per-vendor selectors, workflows, rate limits, URL patterns
//!   and status vocabularies (ValueTrac, Mercury Network, generic)
//! - **Builder**: overlays tenant values onto a template
//! - **Registry**: tenant-scoped CRUD and outcome statistics

#![deny(unsafe_code)]

pub mod registry;
pub mod template;
pub mod templates;

pub use registry::{CreatePortalOptions, PortalConfigUpdate, PortalRegistry};
pub use template::{build_portal_config, PortalConfigTemplate, TenantOverrides, UrlPatterns};
pub use templates::{available_portal_types, template_for};
