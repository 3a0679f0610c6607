//! Error types for the supervisor and the client facade.

use crate::rpc::DaemonError;
use std::io;
use thiserror::Error;

/// Which daemon output stream a drainer reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// Errors raised by the daemon supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The child process could not be created.
    #[error("failed to launch daemon `{program}`")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The child was created without one of its piped streams.
    #[error("daemon process has no {0} pipe")]
    MissingPipe(StreamKind),

    /// Requesting termination failed. Stream teardown still ran.
    #[error("failed to stop daemon")]
    Stop(#[source] io::Error),

    /// A drainer recorded a failure while reading or forwarding its stream.
    #[error("error inside daemon {stream} stream")]
    Stream {
        stream: StreamKind,
        #[source]
        source: io::Error,
    },
}

/// Errors returned by the facade's business operations.
#[derive(Debug, Error)]
pub enum FacadeError {
    /// The daemon could not be started; details were sent to the log sink.
    #[error("analysis daemon is unavailable")]
    Unavailable,

    #[error("RPC to analysis daemon failed")]
    Rpc(#[from] tarpc::client::RpcError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),
}
