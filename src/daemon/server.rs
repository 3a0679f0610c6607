//! tarpc server for the reference analysis daemon.
//!
//! Two loopback listeners are bound: the RPC port given on the command line,
//! serving [`AnalysisDaemon`], and an ephemeral log port where clients connect
//! to receive [`LogListener`](crate::rpc::daemon_service::LogListener) pushes.

use crate::rpc::daemon_service::{AnalysisDaemon, LogListenerClient};
use crate::rpc::{
    AnalysisId, AnalysisRequest, DaemonError, DaemonResult, Issue, LogEvent, RuleDetails,
    StandaloneConfiguration,
};
use anyhow::Context;
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tarpc::server::{self, Channel};
use tarpc::tokio_serde::formats::Bincode;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::Engine;
use super::log_hub::LogHub;
use super::DAEMON_TARGET;

/// Issues returned per `next_issues` call.
pub const PAGE_SIZE: usize = 32;

/// Interval between liveness pings to log listeners.
const LISTENER_PRUNE_INTERVAL: Duration = Duration::from_secs(30);

/// Engine and pending analyses shared by all connections.
#[derive(Default)]
pub struct DaemonState {
    engine: Option<Arc<Engine>>,
    analyses: HashMap<AnalysisId, VecDeque<Issue>>,
    next_id: AnalysisId,
}

impl DaemonState {
    fn engine(&self) -> DaemonResult<Arc<Engine>> {
        self.engine.clone().ok_or(DaemonError::NotStarted)
    }
}

/// Analyses created over one client connection.
#[derive(Default)]
struct ConnectionAnalyses {
    ids: HashSet<AnalysisId>,
    closed: bool,
}

/// Server implementation for `AnalysisDaemon`.
///
/// Each connection serves its own clone from [`DaemonServer::for_connection`];
/// the analyses it created are dropped when the connection closes.
#[derive(Clone)]
pub struct DaemonServer {
    state: Arc<Mutex<DaemonState>>,
    logs: Arc<Mutex<LogHub>>,
    log_port: u16,
    connection: Arc<Mutex<ConnectionAnalyses>>,
}

impl DaemonServer {
    pub fn new(state: Arc<Mutex<DaemonState>>, logs: Arc<Mutex<LogHub>>, log_port: u16) -> Self {
        Self {
            state,
            logs,
            log_port,
            connection: Arc::default(),
        }
    }

    /// A server sharing this one's state, tracking a fresh connection.
    pub fn for_connection(&self) -> Self {
        Self {
            connection: Arc::default(),
            ..self.clone()
        }
    }

    /// Drops the analyses this connection left undrained. Analyses finishing
    /// afterwards are discarded.
    pub async fn release_connection(&self) {
        let mut connection = self.connection.lock().await;
        connection.closed = true;
        if connection.ids.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        let mut dropped = 0;
        for id in connection.ids.drain() {
            if state.analyses.remove(&id).is_some() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(target: DAEMON_TARGET, dropped, "dropped analyses of closed connection");
        }
    }

    async fn log(&self, event: LogEvent) {
        self.logs.lock().await.publish(event).await;
    }
}

impl AnalysisDaemon for DaemonServer {
    async fn start(
        self,
        _: tarpc::context::Context,
        config: StandaloneConfiguration,
    ) -> DaemonResult<()> {
        let engine = match Engine::load(&config.plugin_urls) {
            Ok(engine) => engine,
            Err(e) => {
                warn!(target: DAEMON_TARGET, error = %e, "rejected plugin configuration");
                return Err(e);
            }
        };
        let message = format!(
            "Loaded {} rules from {} plugins",
            engine.rule_count(),
            config.plugin_urls.len()
        );

        {
            let mut state = self.state.lock().await;
            state.engine = Some(Arc::new(engine));
            state.analyses.clear();
        }

        info!(target: DAEMON_TARGET, "{}", message);
        self.log(LogEvent::info(message)).await;
        Ok(())
    }

    async fn log_port(self, _: tarpc::context::Context) -> DaemonResult<u16> {
        self.state.lock().await.engine()?;
        Ok(self.log_port)
    }

    async fn analyze(
        self,
        _: tarpc::context::Context,
        request: AnalysisRequest,
    ) -> DaemonResult<AnalysisId> {
        let engine = self.state.lock().await.engine()?;
        let files = request.files.len();
        // Reading inputs may block for as long as the files take to arrive.
        let issues = tokio::task::spawn_blocking(move || engine.analyze(&request))
            .await
            .map_err(|e| DaemonError::Internal {
                message: format!("analysis task failed: {}", e),
            })??;
        let count = issues.len();

        let id = {
            let mut connection = self.connection.lock().await;
            let mut state = self.state.lock().await;
            let id = state.next_id;
            state.next_id += 1;
            if connection.closed {
                debug!(target: DAEMON_TARGET, id, "client left before analysis finished");
            } else {
                state.analyses.insert(id, issues.into());
                connection.ids.insert(id);
            }
            id
        };

        debug!(target: DAEMON_TARGET, id, files, issues = count, "analysis finished");
        self.log(LogEvent::debug(format!(
            "Analysis {} reported {} issues in {} files",
            id, count, files
        )))
        .await;
        Ok(id)
    }

    async fn next_issues(
        self,
        _: tarpc::context::Context,
        id: AnalysisId,
    ) -> DaemonResult<Option<Vec<Issue>>> {
        let mut state = self.state.lock().await;
        let pending = state
            .analyses
            .get_mut(&id)
            .ok_or(DaemonError::UnknownAnalysis { id })?;

        if pending.is_empty() {
            state.analyses.remove(&id);
            return Ok(None);
        }
        let take = pending.len().min(PAGE_SIZE);
        Ok(Some(pending.drain(..take).collect()))
    }

    async fn cancel_analysis(self, _: tarpc::context::Context, id: AnalysisId) {
        if self.state.lock().await.analyses.remove(&id).is_some() {
            debug!(target: DAEMON_TARGET, id, "analysis cancelled");
        }
    }

    async fn rule_details(
        self,
        _: tarpc::context::Context,
        rule_key: String,
    ) -> DaemonResult<RuleDetails> {
        let engine = self.state.lock().await.engine()?;
        engine
            .rule(&rule_key)
            .ok_or(DaemonError::RuleNotFound { rule_key })
    }
}

/// A daemon whose listeners are bound and serving.
pub struct RunningDaemon {
    port: u16,
    log_port: u16,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningDaemon {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn log_port(&self) -> u16 {
        self.log_port
    }

    /// Stops accepting connections and waits for the background tasks.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Binds the RPC listener on `127.0.0.1:port` (0 picks a free port) and the
/// log listener on an ephemeral port, then serves both in background tasks.
///
/// The startup line is published before any client can subscribe; the log
/// hub's backlog replays it to the first listener.
pub async fn bind_daemon(port: u16) -> anyhow::Result<RunningDaemon> {
    use tarpc::client;
    use tarpc::serde_transport::tcp;

    let mut log_listener = tcp::listen(("127.0.0.1", 0), Bincode::default)
        .await
        .context("Failed to bind log listener")?;
    let log_port = log_listener.local_addr().port();

    let mut rpc_listener = tcp::listen(("127.0.0.1", port), Bincode::default)
        .await
        .with_context(|| format!("Failed to bind RPC listener on port {}", port))?;
    let port = rpc_listener.local_addr().port();

    let state = Arc::new(Mutex::new(DaemonState::default()));
    let logs = Arc::new(Mutex::new(LogHub::new()));
    let (shutdown_tx, _) = broadcast::channel(1);

    let listening = format!("Analysis daemon listening on 127.0.0.1:{}", port);
    info!(target: DAEMON_TARGET, log_port, "{}", listening);
    logs.lock().await.publish(LogEvent::info(listening)).await;

    let server = DaemonServer::new(state, logs.clone(), log_port);
    let mut rpc_shutdown = shutdown_tx.subscribe();
    let rpc_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(result) = rpc_listener.next() => {
                    match result {
                        Ok(transport) => {
                            let server = server.for_connection();
                            let channel = server::BaseChannel::with_defaults(transport);
                            tokio::spawn(async move {
                                channel.execute(server.clone().serve()).for_each(|response| async {
                                    tokio::spawn(response);
                                }).await;
                                server.release_connection().await;
                            });
                        }
                        Err(e) => {
                            warn!(target: DAEMON_TARGET, error = %e, "RPC accept error");
                        }
                    }
                }
                _ = rpc_shutdown.recv() => {
                    break;
                }
            }
        }
    });

    let hub = logs.clone();
    let mut log_shutdown = shutdown_tx.subscribe();
    let log_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(result) = log_listener.next() => {
                    match result {
                        Ok(transport) => {
                            let listener = LogListenerClient::new(
                                client::Config::default(),
                                transport,
                            ).spawn();
                            match hub.lock().await.add(listener).await {
                                Some(id) => debug!(target: DAEMON_TARGET, listener = id, "log listener connected"),
                                None => debug!(target: DAEMON_TARGET, "log listener dropped during replay"),
                            }
                        }
                        Err(e) => {
                            warn!(target: DAEMON_TARGET, error = %e, "log listener accept error");
                        }
                    }
                }
                _ = log_shutdown.recv() => {
                    break;
                }
            }
        }
    });

    let prune_task = tokio::spawn(prune_log_listeners(logs, shutdown_tx.subscribe()));

    Ok(RunningDaemon {
        port,
        log_port,
        shutdown_tx,
        tasks: vec![rpc_task, log_task, prune_task],
    })
}

/// Runs the daemon until SIGTERM or Ctrl-C.
pub async fn run_daemon(port: u16) -> anyhow::Result<()> {
    let daemon = bind_daemon(port).await?;
    shutdown_signal().await;
    info!(target: DAEMON_TARGET, port = daemon.port(), "analysis daemon shutting down");
    daemon.shutdown().await;
    Ok(())
}

/// Periodically pings log listeners and drops the dead ones.
async fn prune_log_listeners(logs: Arc<Mutex<LogHub>>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(LISTENER_PRUNE_INTERVAL);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let mut hub = logs.lock().await;
                if hub.count() > 0 {
                    hub.prune().await;
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = terminate.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
                return;
            }
            Err(e) => warn!(target: DAEMON_TARGET, error = %e, "cannot listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(target: DAEMON_TARGET, error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
#[path = "tests/server_tests.rs"]
mod tests;
