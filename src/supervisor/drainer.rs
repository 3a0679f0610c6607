//! Background relay of one daemon output stream into the log sink.

use crate::error::StreamKind;
use crate::host::LogSink;
use std::any::Any;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::debug;

use super::SUPERVISOR_TARGET;

/// Drains one stream of the daemon process for the lifetime of that stream.
///
/// The drain task never raises: the first read or forwarding failure is
/// recorded, the loop stops, and the supervisor inspects the failure after
/// [`join`](Self::join).
pub struct StreamDrainer {
    kind: StreamKind,
    task: Option<JoinHandle<Option<io::Error>>>,
    failure: Option<io::Error>,
}

impl StreamDrainer {
    /// Starts draining `reader` on a new task.
    pub fn spawn<R>(kind: StreamKind, reader: R, sink: Arc<dyn LogSink>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let task = tokio::spawn(drain(kind, reader, sink));
        Self {
            kind,
            task: Some(task),
            failure: None,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// True once the drain loop has ended, whether or not it was joined.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the drain loop to end. Joining twice returns immediately.
    pub async fn join(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        match task.await {
            Ok(failure) => self.failure = failure,
            Err(e) => {
                self.failure = Some(io::Error::other(format!(
                    "{} drainer task failed: {}",
                    self.kind, e
                )))
            }
        }
    }

    /// The failure recorded by a joined drainer.
    pub fn failure(&self) -> Option<&io::Error> {
        self.failure.as_ref()
    }

    pub fn take_failure(&mut self) -> Option<io::Error> {
        self.failure.take()
    }
}

async fn drain<R>(kind: StreamKind, reader: R, sink: Arc<dyn LogSink>) -> Option<io::Error>
where
    R: AsyncRead + Unpin,
{
    // The reader is owned by `lines` and released when this function returns.
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Err(e) = forward(kind, &line, sink.as_ref()) {
                    debug!(target: SUPERVISOR_TARGET, stream = %kind, error = %e, "log sink rejected daemon output");
                    return Some(e);
                }
            }
            Ok(None) => {
                debug!(target: SUPERVISOR_TARGET, stream = %kind, "daemon stream closed");
                return None;
            }
            Err(e) => {
                debug!(target: SUPERVISOR_TARGET, stream = %kind, error = %e, "failed to read daemon stream");
                return Some(e);
            }
        }
    }
}

fn forward(kind: StreamKind, line: &str, sink: &dyn LogSink) -> io::Result<()> {
    catch_unwind(AssertUnwindSafe(|| match kind {
        StreamKind::Stdout => sink.info(&format!("From stdout: {}", line)),
        StreamKind::Stderr => sink.error(&format!("From stderr: {}", line), None),
    }))
    .map_err(|payload| {
        io::Error::other(format!("log sink panicked: {}", panic_message(payload.as_ref())))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
