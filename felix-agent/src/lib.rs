//! Felix agent library.
//!
//! Shared code behind the `calico-iptables-plugin`, `calico-dummydp-plugin`
//! and `calico-cleanup` binaries. Exposed as a library for integration tests.

pub mod app;
pub mod cli;
pub mod enforcer;
pub mod error;
pub mod jitter;
pub mod logging;
pub mod metrics_server;
pub mod output;
pub mod pid;
pub mod signal;

pub use enforcer::{Enforcer, EnforcerSettings, EnforcerStats, SyncReport};
pub use error::AgentError;
pub use jitter::JitteredTicker;
