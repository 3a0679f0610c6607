//! Reference analysis daemon, run with `lintd daemon --port <N>`.
//!
//! Serves the [`AnalysisDaemon`](crate::rpc::daemon_service::AnalysisDaemon)
//! contract on top of a small line-pattern rule engine, so the facade can be
//! exercised against a real child process.

pub mod engine;
pub mod log_hub;
pub mod server;

pub use engine::{Engine, RuleBundle, RuleDefinition};
pub use log_hub::LogHub;
pub use server::{bind_daemon, run_daemon, DaemonServer, RunningDaemon, PAGE_SIZE};

/// Log target for daemon-side operations.
pub(crate) const DAEMON_TARGET: &str = "lintd::server";
