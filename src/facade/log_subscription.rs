//! Standing subscription to the daemon's log events.
//!
//! The client connects to the daemon's log port and serves the
//! [`LogListener`] callback service on that connection; the daemon pushes a
//! `log` call for every line. Each push is handled on its own task, so the
//! client never applies backpressure.
//!
//! The daemon pings a new listener once its backlog has been replayed;
//! [`LogSubscription::open`] returns only after that first ping, so every
//! line logged before the subscription was opened has reached the sink.

use crate::host::LogSink;
use crate::rpc::daemon_service::LogListener;
use crate::rpc::LogEvent;
use anyhow::{Context, Result};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tarpc::server::{self, Channel};
use tarpc::tokio_serde::formats::Bincode;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use super::FACADE_TARGET;

/// Handler that implements `LogListener` and forwards events to the sink.
#[derive(Clone)]
struct LogRelay {
    sink: Arc<dyn LogSink>,
    synced: Arc<Notify>,
}

impl LogListener for LogRelay {
    async fn log(self, _: tarpc::context::Context, event: LogEvent) {
        if event.is_debug {
            self.sink.debug(&event.message);
        } else {
            self.sink.info(&event.message);
        }
    }

    async fn ping(self, _: tarpc::context::Context) -> bool {
        self.synced.notify_one();
        true
    }
}

/// An open log subscription. Cancelled explicitly, never restarted.
pub struct LogSubscription {
    server_task: JoinHandle<()>,
}

impl LogSubscription {
    /// Connects to the daemon's log listener and starts relaying events.
    ///
    /// Waits up to `sync_timeout` for the daemon to finish replaying its
    /// backlog.
    pub async fn open(
        addr: SocketAddr,
        sink: Arc<dyn LogSink>,
        sync_timeout: Duration,
    ) -> Result<Self> {
        use tarpc::serde_transport::tcp;

        let transport = tcp::connect(addr, Bincode::default)
            .await
            .with_context(|| format!("Failed to connect to daemon log listener at {}", addr))?;

        let synced = Arc::new(Notify::new());
        let relay = LogRelay {
            sink,
            synced: synced.clone(),
        };

        let server_task = tokio::spawn(async move {
            debug!(target: FACADE_TARGET, %addr, "log subscription opened");
            let channel = server::BaseChannel::with_defaults(transport);
            channel
                .execute(relay.serve())
                .for_each(|response| async {
                    tokio::spawn(response);
                })
                .await;
            debug!(target: FACADE_TARGET, %addr, "log subscription ended");
        });

        let subscription = Self { server_task };
        if tokio::time::timeout(sync_timeout, synced.notified())
            .await
            .is_err()
        {
            subscription.cancel();
            anyhow::bail!(
                "Daemon log listener at {} did not acknowledge the subscription within {:?}",
                addr,
                sync_timeout
            );
        }
        Ok(subscription)
    }

    /// False once the daemon closed the connection.
    pub fn is_active(&self) -> bool {
        !self.server_task.is_finished()
    }

    /// Stops relaying and drops the connection.
    pub fn cancel(self) {
        self.server_task.abort();
    }
}
