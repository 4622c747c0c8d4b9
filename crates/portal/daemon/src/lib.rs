//! Portal daemon library
//!
//! Pieces of the `portald` binary that are worth testing on their own:
//! - Configuration loading
//! - Building a seeded engine from configuration

pub mod bootstrap;
pub mod config;

pub use bootstrap::build_engine;
pub use config::DaemonConfig;
