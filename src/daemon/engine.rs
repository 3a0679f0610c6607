//! Line-pattern rule engine backing the reference daemon.
//!
//! Rules come from JSON rule bundles:
//!
//! ```json
//! {
//!   "language": "text",
//!   "rules": [
//!     {
//!       "key": "text:todo",
//!       "name": "TODO comment",
//!       "severity": "INFO",
//!       "pattern": "TODO",
//!       "message": "Complete the task",
//!       "html_description": "<p>Tracks pending work.</p>"
//!     }
//!   ]
//! }
//! ```
//!
//! Every line of every input file is matched against every rule; each
//! non-empty match becomes one issue.

use crate::rpc::{AnalysisRequest, DaemonError, DaemonResult, Issue, RuleDetails, Severity};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use url::Url;

/// Language reported for bundles that do not name one.
const DEFAULT_LANGUAGE: &str = "text";

#[derive(Debug, Clone, Deserialize)]
pub struct RuleBundle {
    #[serde(default)]
    pub language: Option<String>,
    pub rules: Vec<RuleDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleDefinition {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub severity: Severity,
    pub pattern: String,
    /// Issue message; the rule name when absent.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub html_description: String,
}

struct CompiledRule {
    details: RuleDetails,
    message: String,
    regex: Regex,
}

/// Loaded rules, in bundle order.
#[derive(Default)]
pub struct Engine {
    rules: Vec<CompiledRule>,
}

impl Engine {
    /// Loads every bundle behind `plugin_urls` (`file://` URLs).
    pub fn load(plugin_urls: &[String]) -> DaemonResult<Self> {
        let mut engine = Engine::default();
        for url in plugin_urls {
            let bundle = read_bundle(url)?;
            engine
                .add_bundle(bundle)
                .map_err(|message| DaemonError::InvalidPlugin {
                    url: url.clone(),
                    message,
                })?;
        }
        Ok(engine)
    }

    /// Compiles and appends the rules of one bundle. Fails on a bad pattern
    /// or a key that is already loaded.
    pub fn add_bundle(&mut self, bundle: RuleBundle) -> Result<(), String> {
        let language = bundle
            .language
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
        let mut known: HashSet<String> = self.rules.iter().map(|r| r.details.key.clone()).collect();

        for rule in bundle.rules {
            if !known.insert(rule.key.clone()) {
                return Err(format!("duplicate rule key {}", rule.key));
            }
            let regex = Regex::new(&rule.pattern)
                .map_err(|e| format!("rule {} has an invalid pattern: {}", rule.key, e))?;
            self.rules.push(CompiledRule {
                message: rule.message.unwrap_or_else(|| rule.name.clone()),
                details: RuleDetails {
                    key: rule.key,
                    name: rule.name,
                    severity: rule.severity,
                    language: language.clone(),
                    html_description: rule.html_description,
                },
                regex,
            });
        }
        Ok(())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rule(&self, key: &str) -> Option<RuleDetails> {
        self.rules
            .iter()
            .find(|r| r.details.key == key)
            .map(|r| r.details.clone())
    }

    /// Runs every rule over the request's files.
    ///
    /// Issues are ordered by file, then line, then rule, then position.
    pub fn analyze(&self, request: &AnalysisRequest) -> DaemonResult<Vec<Issue>> {
        let mut issues = Vec::new();
        for file in &request.files {
            let location = resolve(&request.base_dir, &file.path);
            let content = read_source(&location, file.charset.as_deref())?;
            self.scan(&file.path, &content, &mut issues);
        }
        Ok(issues)
    }

    fn scan(&self, file_path: &str, content: &str, issues: &mut Vec<Issue>) {
        for (index, line) in content.lines().enumerate() {
            let line_number = u32::try_from(index + 1).unwrap_or(u32::MAX);
            for rule in &self.rules {
                for found in rule.regex.find_iter(line) {
                    if found.is_empty() {
                        continue;
                    }
                    issues.push(Issue {
                        rule_key: rule.details.key.clone(),
                        rule_name: rule.details.name.clone(),
                        severity: rule.details.severity,
                        message: rule.message.clone(),
                        file_path: file_path.to_string(),
                        start_line: line_number,
                        start_line_offset: offset(found.start()),
                        end_line: line_number,
                        end_line_offset: offset(found.end()),
                    });
                }
            }
        }
    }
}

fn offset(position: usize) -> u32 {
    u32::try_from(position).unwrap_or(u32::MAX)
}

fn resolve(base_dir: &str, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() || base_dir.is_empty() {
        path.to_path_buf()
    } else {
        Path::new(base_dir).join(path)
    }
}

/// Reads a source file. UTF-8 (the default) is decoded strictly, any other
/// declared charset lossily.
fn read_source(location: &Path, charset: Option<&str>) -> DaemonResult<String> {
    let io_error = |message: String| DaemonError::Io {
        path: location.display().to_string(),
        message,
    };

    let bytes = std::fs::read(location).map_err(|e| io_error(e.to_string()))?;
    let strict = charset.is_none_or(|c| c.eq_ignore_ascii_case("utf-8") || c.eq_ignore_ascii_case("utf8"));
    if strict {
        String::from_utf8(bytes).map_err(|e| io_error(e.to_string()))
    } else {
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn read_bundle(url: &str) -> DaemonResult<RuleBundle> {
    let invalid = |message: String| DaemonError::InvalidPlugin {
        url: url.to_string(),
        message,
    };

    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    let path = parsed
        .to_file_path()
        .map_err(|()| invalid("not a file URL".to_string()))?;
    let content = std::fs::read_to_string(&path).map_err(|e| invalid(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
