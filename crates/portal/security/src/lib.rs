//! Security gates for vendor portal automation
//!
//! Two independent checks stand between a job request and the browser:
//! - **Domain validator**: explicit HTTPS allowlist, tenant-scoped plus global
//! - **Approval gate**: human sign-off for risky job types, with a decision ledger
//!
//! Both are plain synchronous policy components; the engine owns the locks.

#![deny(unsafe_code)]

pub mod approval;
pub mod domain;

pub use approval::{
    default_requirement, generate_job_description, ApprovalDecision, ApprovalGate,
    ApprovalRecord, ApprovalRequest, ApprovalState, DEFAULT_PENDING_LIMIT, DEFAULT_REJECT_REASON,
};
pub use domain::{normalize_domain, AllowlistScope, DomainAllowlistEntry, DomainValidator};
