use super::*;

#[test]
fn test_daemon_error_display_not_started() {
    let err = DaemonError::NotStarted;
    assert_eq!(format!("{}", err), "Analysis engine is not started");
}

#[test]
fn test_daemon_error_display_rule_not_found() {
    let err = DaemonError::RuleNotFound {
        rule_key: "txt:todo".to_string(),
    };
    assert_eq!(format!("{}", err), "Rule not found: txt:todo");
}

#[test]
fn test_daemon_error_display_invalid_plugin() {
    let err = DaemonError::InvalidPlugin {
        url: "file:///tmp/rules.json".to_string(),
        message: "expected value".to_string(),
    };
    assert_eq!(
        format!("{}", err),
        "Invalid plugin file:///tmp/rules.json: expected value"
    );
}

#[test]
fn test_daemon_error_display_internal() {
    let err = DaemonError::Internal {
        message: "analysis task panicked".to_string(),
    };
    assert_eq!(
        format!("{}", err),
        "Internal daemon error: analysis task panicked"
    );
}

#[test]
fn test_severity_uses_screaming_case_in_json() {
    let json = serde_json::to_string(&Severity::Critical).unwrap();
    assert_eq!(json, "\"CRITICAL\"");

    let parsed: Severity = serde_json::from_str("\"MINOR\"").unwrap();
    assert_eq!(parsed, Severity::Minor);
    assert_eq!(parsed.to_string(), "MINOR");
}

#[test]
fn test_log_event_constructors() {
    assert!(!LogEvent::info("started").is_debug);
    assert!(LogEvent::debug("details").is_debug);
}

#[test]
fn test_input_file_defaults() {
    let file = InputFile::new("src/main.txt");
    assert_eq!(file.path, "src/main.txt");
    assert!(!file.is_test);
    assert!(file.charset.is_none());
}
