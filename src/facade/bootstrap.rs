//! Daemon session bootstrap.
//!
//! Bootstrap launches the daemon, waits for its RPC port, performs the `start`
//! call and opens the log subscription. Everything acquired along the way is
//! tracked in [`Acquired`] and released again if a later step fails, so a
//! failed attempt leaves no process or connection behind.

use crate::config::{FacadeConfig, ReadinessConfig};
use crate::host::{Host, LogSink};
use crate::rpc::daemon_service::AnalysisDaemonClient;
use crate::rpc::StandaloneConfiguration;
use crate::supervisor::{DaemonCommand, DaemonSupervisor, PortAllocator};
use anyhow::{anyhow, bail, Context, Result};
use rand::Rng;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tarpc::client::{self, NewClient};
use tarpc::tokio_serde::formats::Bincode;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use super::log_subscription::LogSubscription;
use super::{request_context, FACADE_TARGET};

/// Plaintext tarpc connection to the daemon's RPC port.
pub(crate) struct Channel {
    addr: SocketAddr,
    client: AnalysisDaemonClient,
    dispatch: JoinHandle<()>,
}

impl Channel {
    async fn connect(addr: SocketAddr) -> io::Result<Self> {
        use tarpc::serde_transport::tcp;

        let transport = tcp::connect(addr, Bincode::default).await?;
        let NewClient { client, dispatch } =
            AnalysisDaemonClient::new(client::Config::default(), transport);
        let dispatch = tokio::spawn(async move {
            if let Err(e) = dispatch.await {
                debug!(target: FACADE_TARGET, %addr, error = %e, "RPC dispatch ended with error");
            }
        });
        Ok(Self {
            addr,
            client,
            dispatch,
        })
    }

    pub(crate) fn client(&self) -> &AnalysisDaemonClient {
        &self.client
    }

    /// Aborts in-flight requests and waits up to `timeout` for the dispatch
    /// task to finish. A timeout only gets logged.
    pub(crate) async fn shutdown(self, timeout: Duration) {
        let Self {
            addr,
            client,
            dispatch,
        } = self;
        dispatch.abort();
        drop(client);
        match tokio::time::timeout(timeout, dispatch).await {
            Ok(_) => debug!(target: FACADE_TARGET, %addr, "RPC channel closed"),
            Err(_) => debug!(
                target: FACADE_TARGET,
                %addr,
                ?timeout,
                "RPC channel did not close in time"
            ),
        }
    }
}

/// A fully started daemon session.
pub(crate) struct Session {
    pub(crate) supervisor: DaemonSupervisor,
    pub(crate) channel: Channel,
    pub(crate) logs: LogSubscription,
}

/// Resources acquired so far by an in-progress bootstrap.
#[derive(Default)]
struct Acquired {
    supervisor: Option<DaemonSupervisor>,
    channel: Option<Channel>,
    logs: Option<LogSubscription>,
}

impl Acquired {
    fn into_session(self) -> Option<Session> {
        Some(Session {
            supervisor: self.supervisor?,
            channel: self.channel?,
            logs: self.logs?,
        })
    }

    /// Releases in stop order: subscription, channel, process.
    async fn release(self, timeout: Duration, sink: &dyn LogSink) {
        if let Some(logs) = self.logs {
            logs.cancel();
        }
        if let Some(channel) = self.channel {
            channel.shutdown(timeout).await;
        }
        if let Some(supervisor) = self.supervisor {
            if let Err(e) = supervisor.stop().await {
                sink.error(
                    "Failed to release analysis daemon after startup failure",
                    Some(&anyhow::Error::new(e)),
                );
            }
        }
    }
}

/// Starts a daemon session, releasing partial state on failure.
pub(crate) async fn bootstrap(
    config: &FacadeConfig,
    host: &dyn Host,
    sink: &Arc<dyn LogSink>,
    allocate: PortAllocator,
) -> Result<Session> {
    let mut acquired = Acquired::default();
    match establish(&mut acquired, config, host, sink, allocate).await {
        Ok(()) => acquired
            .into_session()
            .ok_or_else(|| anyhow!("Daemon session incomplete after startup")),
        Err(e) => {
            acquired
                .release(config.shutdown_timeout(), sink.as_ref())
                .await;
            Err(e)
        }
    }
}

async fn establish(
    acquired: &mut Acquired,
    config: &FacadeConfig,
    host: &dyn Host,
    sink: &Arc<dyn LogSink>,
    allocate: PortAllocator,
) -> Result<()> {
    let port = allocate().context("Failed to allocate a port for the analysis daemon")?;
    let command = daemon_command(config, host, port)?;

    let supervisor =
        acquired
            .supervisor
            .insert(DaemonSupervisor::launch(&command, port, sink.clone())?);

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let channel = connect_when_ready(supervisor, addr, &config.readiness).await?;
    let channel = acquired.channel.insert(channel);

    let plugin_urls = discover_plugins(config, host)?;
    debug!(target: FACADE_TARGET, plugins = plugin_urls.len(), "starting daemon session");

    let start = StandaloneConfiguration {
        plugin_urls,
        work_dir: config.work_dir.as_ref().map(|d| d.display().to_string()),
    };
    channel
        .client()
        .start(request_context(config.request_timeout()), start)
        .await
        .context("Start call to analysis daemon failed")?
        .context("Analysis daemon rejected start")?;

    let log_port = channel
        .client()
        .log_port(request_context(config.request_timeout()))
        .await
        .context("Log port call to analysis daemon failed")??;
    let logs = LogSubscription::open(
        SocketAddr::from((Ipv4Addr::LOCALHOST, log_port)),
        sink.clone(),
        config.readiness.timeout(),
    )
    .await?;
    acquired.logs = Some(logs);

    Ok(())
}

/// Builds `[runtime] artifact <args…> --port <port>`.
pub(crate) fn daemon_command(
    config: &FacadeConfig,
    host: &dyn Host,
    port: u16,
) -> Result<DaemonCommand> {
    let artifact = match &config.daemon.executable {
        Some(path) => path.clone(),
        None => host
            .find_entries(&config.daemon.path, &config.daemon.pattern)?
            .into_iter()
            .next()
            .with_context(|| {
                format!(
                    "No daemon artifact matching '{}' in '{}'",
                    config.daemon.pattern, config.daemon.path
                )
            })?,
    };

    let command = match host.runtime_executable()? {
        Some(runtime) => DaemonCommand::new(runtime).arg(artifact),
        None => DaemonCommand::new(artifact),
    };

    Ok(command
        .args(config.daemon.args.iter())
        .arg("--port")
        .arg(port.to_string()))
}

/// Plugin bundle locations as `file://` URLs.
pub(crate) fn discover_plugins(config: &FacadeConfig, host: &dyn Host) -> Result<Vec<String>> {
    host.find_entries(&config.plugins.path, &config.plugins.pattern)?
        .into_iter()
        .map(|path| {
            Url::from_file_path(&path)
                .map(|url| url.to_string())
                .map_err(|()| anyhow!("Plugin path is not absolute: {}", path.display()))
        })
        .collect()
}

/// Connects to the daemon, retrying with exponential backoff and jitter.
///
/// Fails fast when the daemon exits before it starts listening.
async fn connect_when_ready(
    supervisor: &mut DaemonSupervisor,
    addr: SocketAddr,
    readiness: &ReadinessConfig,
) -> Result<Channel> {
    let deadline = Instant::now() + readiness.timeout();
    let mut delay = readiness.base_delay();

    for attempt in 1u32.. {
        let err = match Channel::connect(addr).await {
            Ok(channel) => {
                debug!(target: FACADE_TARGET, %addr, attempt, "connected to analysis daemon");
                return Ok(channel);
            }
            Err(e) => e,
        };

        if supervisor.has_exited() {
            bail!("Analysis daemon exited before listening on {}", addr);
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(target: FACADE_TARGET, %addr, attempt, "analysis daemon never became ready");
            return Err(err).with_context(|| {
                format!(
                    "Analysis daemon did not accept connections on {} within {:?}",
                    addr,
                    readiness.timeout()
                )
            });
        }

        let jitter_bound = (delay.as_millis() as u64 / 4).max(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..jitter_bound));
        tokio::time::sleep((delay + jitter).min(deadline - now)).await;
        delay = (delay * 2).min(readiness.max_delay());
    }

    bail!("Gave up connecting to analysis daemon on {}", addr)
}

#[cfg(test)]
#[path = "tests/bootstrap_tests.rs"]
mod tests;
