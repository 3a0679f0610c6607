//! Service definitions for client ↔ daemon RPC.

use crate::rpc::{
    AnalysisId, AnalysisRequest, DaemonResult, Issue, LogEvent, RuleDetails,
    StandaloneConfiguration,
};

/// Service exposed by the analysis daemon on `--port <N>`.
#[tarpc::service]
pub trait AnalysisDaemon {
    /// Initialize the engine session with the given plugins.
    /// Must complete before any other call.
    async fn start(config: StandaloneConfiguration) -> DaemonResult<()>;

    /// Port of the listener that accepts log subscriptions.
    async fn log_port() -> DaemonResult<u16>;

    /// Run an analysis. Issues are fetched afterwards with `next_issues`.
    async fn analyze(request: AnalysisRequest) -> DaemonResult<AnalysisId>;

    /// Next page of issues for an analysis, `None` once all were delivered.
    async fn next_issues(id: AnalysisId) -> DaemonResult<Option<Vec<Issue>>>;

    /// Discard an analysis the client stopped reading.
    async fn cancel_analysis(id: AnalysisId);

    /// Look up a rule by key.
    async fn rule_details(rule_key: String) -> DaemonResult<RuleDetails>;
}

/// Callback service for log push (daemon → subscriber).
/// Subscribers implement this service; the daemon calls into it.
#[tarpc::service]
pub trait LogListener {
    /// Called for every daemon-side log line.
    async fn log(event: LogEvent);

    /// Ping to check if the subscriber is still alive. The first ping
    /// follows the backlog replay.
    async fn ping() -> bool;
}
