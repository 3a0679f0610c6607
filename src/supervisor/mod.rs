//! Supervision of the analysis daemon child process.
//!
//! The supervisor owns the child, its stdin handle and two [`StreamDrainer`]s
//! relaying stdout and stderr to the host's log sink. It does not wait for the
//! daemon to become ready; the facade polls the RPC port for that.
//!
//! Teardown order matters: termination is requested first, then the drainers
//! are joined and the remaining pipes dropped, and only then are drainer
//! failures inspected, so a failure close to process exit is never missed.

pub mod drainer;
pub mod port;

pub use drainer::StreamDrainer;
pub use port::{allocate_port, PortAllocator};

use crate::error::{StreamKind, SupervisorError};
use crate::host::LogSink;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};

/// Log target for supervisor operations.
pub(crate) const SUPERVISOR_TARGET: &str = "lintd::supervisor";

/// How long a terminated daemon gets to exit before it is killed outright.
pub const TERMINATION_GRACE: Duration = Duration::from_secs(3);

/// Program and arguments used to launch the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl DaemonCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// A running daemon process and its output drainers.
pub struct DaemonSupervisor {
    child: Child,
    port: u16,
    stdin: Option<ChildStdin>,
    stdout: StreamDrainer,
    stderr: StreamDrainer,
}

impl DaemonSupervisor {
    /// Spawns the daemon and starts draining its output. Returns immediately.
    ///
    /// `port` is the port the command tells the daemon to listen on; the
    /// supervisor only records it.
    pub fn launch(
        command: &DaemonCommand,
        port: u16,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, SupervisorError> {
        debug!(
            target: SUPERVISOR_TARGET,
            program = %command.program.display(),
            args = ?command.args,
            port,
            "launching analysis daemon"
        );

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Launch {
                program: command.program.display().to_string(),
                source,
            })?;

        // `kill_on_drop` reaps the child if a pipe is missing below.
        let stdout = child
            .stdout
            .take()
            .ok_or(SupervisorError::MissingPipe(StreamKind::Stdout))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SupervisorError::MissingPipe(StreamKind::Stderr))?;
        let stdin = child.stdin.take();

        debug!(
            target: SUPERVISOR_TARGET,
            pid = child.id(),
            port,
            "analysis daemon spawned"
        );

        Ok(Self {
            child,
            port,
            stdin,
            stdout: StreamDrainer::spawn(StreamKind::Stdout, stdout, sink.clone()),
            stderr: StreamDrainer::spawn(StreamKind::Stderr, stderr, sink),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// OS process id, `None` once the child has been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the daemon already terminated on its own.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Terminates the daemon and tears down its streams.
    ///
    /// Every phase runs even when an earlier one failed. A termination failure
    /// is reported in preference to drainer failures.
    pub async fn stop(mut self) -> Result<(), SupervisorError> {
        let terminated = self.terminate();
        self.teardown(terminated).await
    }

    fn terminate(&mut self) -> io::Result<()> {
        if let Some(status) = self.child.try_wait()? {
            debug!(target: SUPERVISOR_TARGET, ?status, "analysis daemon already exited");
            return Ok(());
        }

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            debug!(target: SUPERVISOR_TARGET, pid, "sending SIGTERM to analysis daemon");
            return kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from);
        }

        self.child.start_kill()
    }

    /// Joins the drainers, closes the pipes and surfaces the first failure.
    pub(crate) async fn teardown(
        &mut self,
        terminated: io::Result<()>,
    ) -> Result<(), SupervisorError> {
        if let Err(e) = &terminated {
            warn!(target: SUPERVISOR_TARGET, error = %e, "failed to terminate analysis daemon");
        }

        self.reap().await;
        self.stdout.join().await;
        self.stderr.join().await;
        drop(self.stdin.take());

        terminated.map_err(SupervisorError::Stop)?;

        for drainer in [&mut self.stdout, &mut self.stderr] {
            if let Some(source) = drainer.take_failure() {
                return Err(SupervisorError::Stream {
                    stream: drainer.kind(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Waits for the child to exit, killing it after the grace period.
    async fn reap(&mut self) {
        match tokio::time::timeout(TERMINATION_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(target: SUPERVISOR_TARGET, ?status, "analysis daemon exited");
            }
            Ok(Err(e)) => {
                warn!(target: SUPERVISOR_TARGET, error = %e, "failed to wait for analysis daemon");
            }
            Err(_) => {
                warn!(
                    target: SUPERVISOR_TARGET,
                    grace = ?TERMINATION_GRACE,
                    "analysis daemon did not exit in time, killing"
                );
                if let Err(e) = self.child.kill().await {
                    warn!(target: SUPERVISOR_TARGET, error = %e, "failed to kill analysis daemon");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/drainer_tests.rs"]
mod drainer_tests;

#[cfg(all(test, unix))]
#[path = "tests/supervisor_tests.rs"]
mod supervisor_tests;
