//! RPC contract between the client facade and the analysis daemon.
//!
//! This module defines the tarpc services and the wire types for:
//! - Client → Daemon: session start, analysis, rule lookup
//! - Daemon → Client: log events pushed over the log subscription

pub mod daemon_service;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of an analysis whose issues are still being drained by the client.
pub type AnalysisId = u64;

/// Control-plane configuration sent with the `start` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandaloneConfiguration {
    /// `file://` URLs of the rule bundles the daemon should load
    pub plugin_urls: Vec<String>,
    /// Optional working directory for daemon-side scratch files
    pub work_dir: Option<String>,
}

/// A single file submitted for analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    /// Path of the file, absolute or relative to the request's `base_dir`
    pub path: String,
    /// Whether the file is test code
    pub is_test: bool,
    /// Declared charset. Only UTF-8 is decoded strictly; anything else is read lossily.
    pub charset: Option<String>,
}

impl InputFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_test: false,
            charset: None,
        }
    }
}

/// Request for the streaming `analyze` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub base_dir: String,
    pub work_dir: Option<String>,
    pub files: Vec<InputFile>,
    pub properties: BTreeMap<String, String>,
}

/// Issue severity, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Blocker,
    Critical,
    #[default]
    Major,
    Minor,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Blocker => write!(f, "BLOCKER"),
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::Major => write!(f, "MAJOR"),
            Severity::Minor => write!(f, "MINOR"),
            Severity::Info => write!(f, "INFO"),
        }
    }
}

/// An issue reported by the daemon.
///
/// Lines are 1-based, offsets are 0-based byte offsets within the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub rule_key: String,
    pub rule_name: String,
    pub severity: Severity,
    pub message: String,
    pub file_path: String,
    pub start_line: u32,
    pub start_line_offset: u32,
    pub end_line: u32,
    pub end_line_offset: u32,
}

/// Rule metadata returned by `rule_details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDetails {
    pub key: String,
    pub name: String,
    pub severity: Severity,
    pub language: String,
    pub html_description: String,
}

/// A daemon-side log line pushed over the log subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub message: String,
    pub is_debug: bool,
}

impl LogEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_debug: false,
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_debug: true,
        }
    }
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors returned by daemon RPC methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DaemonError {
    /// A business call arrived before `start`
    NotStarted,
    /// No loaded rule bundle defines the key
    RuleNotFound { rule_key: String },
    /// The analysis was never created, already drained, or cancelled
    UnknownAnalysis { id: AnalysisId },
    /// A plugin location could not be loaded
    InvalidPlugin { url: String, message: String },
    /// An input file could not be read
    Io { path: String, message: String },
    /// The daemon failed while serving the call
    Internal { message: String },
}

impl std::fmt::Display for DaemonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonError::NotStarted => write!(f, "Analysis engine is not started"),
            DaemonError::RuleNotFound { rule_key } => write!(f, "Rule not found: {}", rule_key),
            DaemonError::UnknownAnalysis { id } => write!(f, "Unknown analysis: {}", id),
            DaemonError::InvalidPlugin { url, message } => {
                write!(f, "Invalid plugin {}: {}", url, message)
            }
            DaemonError::Io { path, message } => write!(f, "Failed to read {}: {}", path, message),
            DaemonError::Internal { message } => write!(f, "Internal daemon error: {}", message),
        }
    }
}

impl std::error::Error for DaemonError {}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
#[path = "tests/rpc_tests.rs"]
mod tests;
