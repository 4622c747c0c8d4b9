//! Built-in portal templates

pub mod generic;
pub mod mercury;
pub mod valuetrac;

use crate::template::PortalConfigTemplate;
use portal_types::PortalType;

/// The template for a portal type.
pub fn template_for(portal_type: PortalType) -> PortalConfigTemplate {
    match portal_type {
        PortalType::Valuetrac => valuetrac::template(),
        PortalType::Mercury => mercury::template(),
        PortalType::Generic => generic::template(),
    }
}

/// Portal types with a built-in template.
pub fn available_portal_types() -> Vec<PortalType> {
    vec![PortalType::Generic, PortalType::Valuetrac, PortalType::Mercury]
}
