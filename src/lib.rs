//! Supervisor and RPC client facade for a locally spawned analysis daemon.
//!
//! The host application talks to a single [`AnalysisFacade`]. On first use the
//! facade launches the daemon process, waits for it to accept connections,
//! performs the control-plane `start` call and subscribes to the daemon's log
//! stream. Business calls (`start_analysis`, `get_html_rule_description`) then
//! go straight to the shared tarpc client.
//!
//! ## Architecture
//!
//! - **Supervisor (`supervisor`)**: port allocation, child process launch,
//!   stdout/stderr draining and teardown.
//! - **Facade (`facade`)**: lazy bootstrap, business operations, log relay and
//!   the atomic stop sequence.
//! - **Contract (`rpc`)**: tarpc service definitions and wire types.
//! - **Reference daemon (`daemon`)**: a small rule-bundle engine serving the
//!   contract, run by `lintd daemon --port <N>`.
//! - **Host (`host`)**: log sink and artifact locator seams.

pub mod config;
pub mod daemon;
pub mod error;
pub mod facade;
pub mod host;
pub mod rpc;
pub mod supervisor;

pub use config::FacadeConfig;
pub use error::{FacadeError, StreamKind, SupervisorError};
pub use facade::{AnalysisFacade, IssueStream};
pub use host::{BundleHost, Host, LogSink, TracingSink};

#[cfg(test)]
pub(crate) mod test_support;
