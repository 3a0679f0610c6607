//! Client facade over the analysis daemon.
//!
//! [`AnalysisFacade`] owns the daemon session as one resource group:
//!
//! ```text
//! UNINITIALIZED -> STARTING -> READY -> (STOPPING) -> UNINITIALIZED
//! ```
//!
//! The session is started lazily by the first business call and torn down by
//! [`AnalysisFacade::stop`]. A failed start returns to UNINITIALIZED with
//! everything released, so a later call retries.
//!
//! Create one facade per host session and share it (for example behind an
//! `Arc`). Dropping a facade without stopping it kills the daemon process but
//! skips the orderly teardown.

pub mod bootstrap;
pub mod issues;
pub mod log_subscription;

pub use issues::IssueStream;
pub use log_subscription::LogSubscription;

use crate::config::FacadeConfig;
use crate::error::{FacadeError, SupervisorError};
use crate::host::{Host, LogSink};
use crate::rpc::daemon_service::AnalysisDaemonClient;
use crate::rpc::AnalysisRequest;
use crate::supervisor::{allocate_port, PortAllocator};
use bootstrap::{bootstrap, Session};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Log target for facade operations.
pub(crate) const FACADE_TARGET: &str = "lintd::facade";

/// RPC context whose deadline lies `timeout` from now.
///
/// `tarpc::context::current()` carries a 10s deadline, too short for
/// analyses of large inputs.
pub(crate) fn request_context(timeout: Duration) -> tarpc::context::Context {
    let mut ctx = tarpc::context::current();
    ctx.deadline = Instant::now() + timeout;
    ctx
}

/// Entry point for analysis requests; hides the daemon process and connection.
pub struct AnalysisFacade {
    config: FacadeConfig,
    host: Arc<dyn Host>,
    sink: Arc<dyn LogSink>,
    /// Published business handle, read without taking the lifecycle lock
    client: RwLock<Option<AnalysisDaemonClient>>,
    /// Serializes bootstrap and stop
    lifecycle: Mutex<Option<Session>>,
    /// Number of finished bootstrap attempts
    attempts: AtomicU64,
    allocate: PortAllocator,
}

impl AnalysisFacade {
    pub fn new(config: FacadeConfig, host: Arc<dyn Host>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            config,
            host,
            sink,
            client: RwLock::new(None),
            lifecycle: Mutex::new(None),
            attempts: AtomicU64::new(0),
            allocate: allocate_port,
        }
    }

    /// Replaces the function that picks the daemon's port.
    pub fn with_port_allocator(mut self, allocate: PortAllocator) -> Self {
        self.allocate = allocate;
        self
    }

    pub fn config(&self) -> &FacadeConfig {
        &self.config
    }

    /// True while a started daemon session is published.
    pub fn is_running(&self) -> bool {
        self.published().is_some()
    }

    /// Returns the business handle, starting the daemon session if needed.
    ///
    /// Returns `None` when startup failed; the cause goes to the log sink.
    /// Callers waiting behind an in-progress startup get that attempt's
    /// outcome instead of launching a second daemon.
    pub async fn client(&self) -> Option<AnalysisDaemonClient> {
        if let Some(client) = self.published() {
            return Some(client);
        }

        let observed = self.attempts.load(Ordering::Acquire);
        let mut session = self.lifecycle.lock().await;
        if session.is_some() || self.attempts.load(Ordering::Acquire) != observed {
            return self.published();
        }

        self.sink.info("Starting standalone analysis daemon");
        let outcome = bootstrap(&self.config, self.host.as_ref(), &self.sink, self.allocate).await;
        self.attempts.fetch_add(1, Ordering::AcqRel);

        match outcome {
            Ok(started) => {
                let client = started.channel.client().clone();
                self.publish(Some(client.clone()));
                *session = Some(started);
                debug!(target: FACADE_TARGET, "analysis daemon session ready");
                Some(client)
            }
            Err(e) => {
                self.sink.error("Unable to start analysis daemon", Some(&e));
                None
            }
        }
    }

    /// Starts an analysis and returns its issues as a lazy stream.
    pub async fn start_analysis(
        &self,
        request: AnalysisRequest,
    ) -> Result<IssueStream, FacadeError> {
        let client = self.client().await.ok_or(FacadeError::Unavailable)?;
        let timeout = self.config.request_timeout();
        let id = client.analyze(request_context(timeout), request).await??;
        Ok(IssueStream::new(client, id, timeout))
    }

    /// Returns the HTML description of a rule.
    ///
    /// An unknown key surfaces the daemon's `RuleNotFound` unchanged.
    pub async fn get_html_rule_description(&self, rule_key: &str) -> Result<String, FacadeError> {
        let client = self.client().await.ok_or(FacadeError::Unavailable)?;
        let details = client
            .rule_details(
                request_context(self.config.request_timeout()),
                rule_key.to_string(),
            )
            .await??;
        Ok(details.html_description)
    }

    /// Tears the daemon session down. A no-op when nothing was started.
    ///
    /// Order: cancel the log subscription, close the RPC channel (bounded
    /// wait), unpublish the handle, then stop the process. A supervisor error
    /// is returned after its teardown has run.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let mut session = self.lifecycle.lock().await;
        let Some(Session {
            supervisor,
            channel,
            logs,
        }) = session.take()
        else {
            return Ok(());
        };

        self.sink.info("Stopping standalone analysis daemon");
        logs.cancel();
        channel.shutdown(self.config.shutdown_timeout()).await;
        self.publish(None);
        supervisor.stop().await
    }

    fn published(&self) -> Option<AnalysisDaemonClient> {
        self.client
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    fn publish(&self, client: Option<AnalysisDaemonClient>) {
        *self
            .client
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = client;
    }
}

#[cfg(test)]
#[path = "tests/facade_tests.rs"]
mod tests;
