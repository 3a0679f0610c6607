//! Seams to the embedding application: its log sink and its artifact lookup.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Log target used by [`TracingSink`].
pub const SINK_TARGET: &str = "lintd::daemon_output";

/// Receives daemon output and facade diagnostics.
///
/// Implementations must not panic. A panic raised while a stream drainer
/// forwards a line is caught and recorded as that drainer's failure.
pub trait LogSink: Send + Sync {
    fn info(&self, message: &str);
    fn debug(&self, message: &str);
    fn error(&self, message: &str, cause: Option<&anyhow::Error>);
}

/// Default sink forwarding everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn info(&self, message: &str) {
        tracing::info!(target: SINK_TARGET, "{}", message);
    }

    fn debug(&self, message: &str) {
        tracing::debug!(target: SINK_TARGET, "{}", message);
    }

    fn error(&self, message: &str, cause: Option<&anyhow::Error>) {
        match cause {
            Some(cause) => tracing::error!(target: SINK_TARGET, "{}: {:#}", message, cause),
            None => tracing::error!(target: SINK_TARGET, "{}", message),
        }
    }
}

/// Locates the daemon artifact, plugin bundles and the runtime used to start them.
pub trait Host: Send + Sync {
    /// Returns the files under the logical `path` whose name matches `pattern`.
    ///
    /// `pattern` is a wildcard where `*` matches any run of characters and `?`
    /// matches one. An absent directory yields no entries rather than an error.
    fn find_entries(&self, path: &str, pattern: &str) -> Result<Vec<PathBuf>>;

    /// Executable that runs the daemon artifact, or `None` when the artifact
    /// is itself executable.
    fn runtime_executable(&self) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

/// Host backed by a bundle directory laid out as `daemon/` and `plugins/`.
#[derive(Debug, Clone)]
pub struct BundleHost {
    root: PathBuf,
    runtime: Option<PathBuf>,
}

impl BundleHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            runtime: None,
        }
    }

    pub fn with_runtime(mut self, runtime: impl Into<PathBuf>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Host for BundleHost {
    fn find_entries(&self, path: &str, pattern: &str) -> Result<Vec<PathBuf>> {
        let dir = self.root.join(path.trim_start_matches('/'));
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let matcher = wildcard_regex(pattern)?;
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?
        {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if entry.file_type()?.is_file() && matcher.is_match(name) {
                let path = entry.path();
                entries.push(
                    path.canonicalize()
                        .with_context(|| format!("Failed to resolve {}", path.display()))?,
                );
            }
        }
        entries.sort();
        Ok(entries)
    }

    fn runtime_executable(&self) -> Result<Option<PathBuf>> {
        Ok(self.runtime.clone())
    }
}

/// Translates a `*`/`?` wildcard into an anchored regex.
pub fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push('$');
    Regex::new(&expr).with_context(|| format!("Invalid entry pattern: {}", pattern))
}

#[cfg(test)]
#[path = "tests/host_tests.rs"]
mod tests;
