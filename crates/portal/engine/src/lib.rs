//! Vendor portal automation engine
//!
//! Runs data-defined browser workflows against vendor portals on behalf of
//! tenants:
//! - **Interpreter**: executes a workflow's steps in order with hard timeouts
//! - **Scheduler**: resource-key uniqueness, per-portal rate limits, retries
//! - **Worker pool**: bounded number of concurrent browser sessions
//! - **Engine**: the job API, with the domain and approval gates in front
//! - **Order acceptor** and **workflow recorder**: typed façades on top
//!
//! The browser and the credential vault are reached only through the
//! [`BrowserDriver`] and [`CredentialVault`] traits.

#![deny(unsafe_code)]

pub mod config;
pub mod credentials;
pub mod driver;
pub mod engine;
pub mod interpreter;
pub mod order_acceptor;
pub mod placeholder;
pub mod rate_limiter;
pub mod recorder;
pub mod scheduler;
pub mod simulated;
pub mod store;
pub mod worker;

pub use config::{EngineConfig, InterpreterConfig, RetryConfig, SchedulerConfig};
pub use credentials::{CredentialRequest, CredentialVault, PortalCredential, VaultError};
pub use driver::{BrowserDriver, BrowserSession, DriverError, DriverResult, SessionRequest, WaitTarget};
pub use engine::{AutomationEngine, JobSubmission, DEFAULT_CANCEL_REASON};
pub use interpreter::{NavigationGuard, RunContext, RunStatus, WorkflowInterpreter, WorkflowRun};
pub use order_acceptor::{
    parse_fee, AcceptanceStats, AcceptanceStatus, BatchAcceptResult, FailedAcceptance,
    OrderAcceptRequest, OrderAcceptResult, OrderAcceptor, OrderDetails, OrderRef,
    OrderStatusCheck, PortalAcceptanceCounts, QueuedAcceptance,
};
pub use rate_limiter::{Admission, LimitKind, PortalRateLimiter};
pub use recorder::{
    RecordedAction, RecordedInput, RecordedStep, RecordedWorkflow, RecordingUpdate,
    RecordingValidation, WorkflowRecorder,
};
pub use scheduler::RetryPolicy;
pub use simulated::{DriverCall, SimulatedBrowser, StaticCredentialVault};
pub use store::{InMemoryJobStore, JobFilter, JobStore, StorageError, StorageResult};
pub use worker::WorkerPool;
