use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "LINTD_CONFIG";

/// The name of the per-user lintd directory.
const LINTD_DIR: &str = ".lintd";

/// Configuration for the client facade.
///
/// Every field has a default, so an empty YAML document is a valid config.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FacadeConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Working directory handed to the daemon in the `start` call.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Upper bound on waiting for the RPC channel to close during stop.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Deadline for each RPC to the daemon, analyses included. Default: 1h
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Where to find the daemon artifact and how to invoke it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonConfig {
    /// Logical directory searched through the host's artifact locator
    #[serde(default = "default_daemon_path")]
    pub path: String,
    /// File name wildcard for the daemon artifact
    #[serde(default = "default_daemon_pattern")]
    pub pattern: String,
    /// Explicit artifact, bypassing the locator
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Arguments placed before `--port <N>`
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            path: default_daemon_path(),
            pattern: default_daemon_pattern(),
            executable: None,
            args: Vec::new(),
        }
    }
}

/// Where to find the rule bundles passed to the daemon's `start` call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginsConfig {
    #[serde(default = "default_plugins_path")]
    pub path: String,
    #[serde(default = "default_plugins_pattern")]
    pub pattern: String,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            path: default_plugins_path(),
            pattern: default_plugins_pattern(),
        }
    }
}

/// Connection retry policy used while the daemon starts listening.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadinessConfig {
    /// Give up connecting after this long. Default: 10s
    #[serde(default = "default_readiness_timeout_ms")]
    pub timeout_ms: u64,
    /// First retry delay, doubled after each failed attempt. Default: 50ms
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the retry delay. Default: 1s
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_readiness_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms))
    }
}

fn default_daemon_path() -> String {
    "/daemon".to_string()
}

fn default_daemon_pattern() -> String {
    "*".to_string()
}

fn default_plugins_path() -> String {
    "/plugins".to_string()
}

fn default_plugins_pattern() -> String {
    "*.json".to_string()
}

fn default_readiness_timeout_ms() -> u64 {
    10_000
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    1_000
}

fn default_shutdown_timeout_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    60 * 60 * 1_000
}

impl FacadeConfig {
    /// Loads a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: FacadeConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Loads the configuration from `$LINTD_CONFIG`, then `~/.lintd/config.yaml`,
    /// falling back to defaults when neither exists.
    pub fn load_default() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::load(Path::new(&path));
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            plugins: PluginsConfig::default(),
            readiness: ReadinessConfig::default(),
            work_dir: None,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Returns `~/.lintd/config.yaml`, or `None` when the home directory is unknown.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(LINTD_DIR).join("config.yaml"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
