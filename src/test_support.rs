//! Shared helpers for unit tests.

use crate::host::LogSink;
use std::sync::Mutex;
use std::time::Duration;

/// A log line captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Logged {
    Info(String),
    Debug(String),
    Error(String),
}

impl Logged {
    pub fn message(&self) -> &str {
        match self {
            Logged::Info(m) | Logged::Debug(m) | Logged::Error(m) => m,
        }
    }
}

/// Sink that keeps everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<Logged>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<Logged> {
        self.lines.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.message().contains(needle))
    }

    /// Polls until a line containing `needle` arrives or the timeout passes.
    pub async fn wait_for(&self, needle: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.contains(needle) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.contains(needle)
    }
}

impl LogSink for RecordingSink {
    fn info(&self, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push(Logged::Info(message.to_string()));
    }

    fn debug(&self, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push(Logged::Debug(message.to_string()));
    }

    fn error(&self, message: &str, cause: Option<&anyhow::Error>) {
        let message = match cause {
            Some(cause) => format!("{}: {:#}", message, cause),
            None => message.to_string(),
        };
        self.lines.lock().unwrap().push(Logged::Error(message));
    }
}

/// Sink that panics on every call.
pub struct PanickingSink;

impl LogSink for PanickingSink {
    fn info(&self, _message: &str) {
        panic!("sink is broken");
    }

    fn debug(&self, _message: &str) {
        panic!("sink is broken");
    }

    fn error(&self, _message: &str, _cause: Option<&anyhow::Error>) {
        panic!("sink is broken");
    }
}

/// Host returning fixed entries and counting runtime lookups (one per launch attempt).
#[derive(Default)]
pub struct StaticHost {
    pub daemon: Vec<std::path::PathBuf>,
    pub plugins: Vec<std::path::PathBuf>,
    pub runtime: Option<std::path::PathBuf>,
    pub launches: std::sync::atomic::AtomicUsize,
}

impl StaticHost {
    pub fn launches(&self) -> usize {
        self.launches.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl crate::host::Host for StaticHost {
    fn find_entries(&self, path: &str, _pattern: &str) -> anyhow::Result<Vec<std::path::PathBuf>> {
        Ok(match path {
            "/daemon" => self.daemon.clone(),
            "/plugins" => self.plugins.clone(),
            _ => Vec::new(),
        })
    }

    fn runtime_executable(&self) -> anyhow::Result<Option<std::path::PathBuf>> {
        self.launches
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.runtime.clone())
    }
}
