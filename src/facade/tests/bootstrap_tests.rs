use super::*;
use crate::config::FacadeConfig;
use crate::supervisor::allocate_port;
use crate::test_support::{RecordingSink, StaticHost};
use std::ffi::OsString;
use std::path::PathBuf;

fn host_with_daemon(path: &str) -> StaticHost {
    StaticHost {
        daemon: vec![PathBuf::from(path)],
        ..StaticHost::default()
    }
}

fn shell_config(script: &str) -> FacadeConfig {
    let mut config = FacadeConfig::default();
    config.daemon.executable = Some(PathBuf::from("sh"));
    config.daemon.args = vec!["-c".into(), script.into(), "sh".into()];
    config.readiness.timeout_ms = 300;
    config.readiness.base_delay_ms = 10;
    config.readiness.max_delay_ms = 50;
    config
}

fn args(command: &DaemonCommand) -> Vec<OsString> {
    command.args.clone()
}

#[test]
fn daemon_command_runs_artifact_directly_without_runtime() {
    let host = host_with_daemon("/opt/lintd/daemon.bin");
    let mut config = FacadeConfig::default();
    config.daemon.args = vec!["daemon".into()];

    let command = daemon_command(&config, &host, 4711).unwrap();

    assert_eq!(command.program, PathBuf::from("/opt/lintd/daemon.bin"));
    assert_eq!(args(&command), vec!["daemon", "--port", "4711"]);
}

#[test]
fn daemon_command_prefixes_runtime_when_host_has_one() {
    let host = StaticHost {
        runtime: Some(PathBuf::from("/usr/bin/runtime")),
        ..host_with_daemon("/opt/lintd/daemon.bin")
    };

    let command = daemon_command(&FacadeConfig::default(), &host, 9000).unwrap();

    assert_eq!(command.program, PathBuf::from("/usr/bin/runtime"));
    assert_eq!(
        args(&command),
        vec!["/opt/lintd/daemon.bin", "--port", "9000"]
    );
    assert_eq!(host.launches(), 1);
}

#[test]
fn daemon_command_prefers_configured_executable() {
    let host = host_with_daemon("/opt/lintd/daemon.bin");
    let mut config = FacadeConfig::default();
    config.daemon.executable = Some(PathBuf::from("/custom/daemon"));

    let command = daemon_command(&config, &host, 1).unwrap();

    assert_eq!(command.program, PathBuf::from("/custom/daemon"));
}

#[test]
fn daemon_command_without_artifact_names_the_lookup() {
    let host = StaticHost::default();

    let err = daemon_command(&FacadeConfig::default(), &host, 1).unwrap_err();

    let message = err.to_string();
    assert!(message.contains("No daemon artifact"), "{message}");
    assert!(message.contains("/daemon"), "{message}");
}

#[test]
fn discover_plugins_yields_file_urls_in_host_order() {
    let host = StaticHost {
        plugins: vec![
            PathBuf::from("/bundle/plugins/a.json"),
            PathBuf::from("/bundle/plugins/b c.json"),
        ],
        ..StaticHost::default()
    };

    let urls = discover_plugins(&FacadeConfig::default(), &host).unwrap();

    assert_eq!(
        urls,
        vec![
            "file:///bundle/plugins/a.json".to_string(),
            "file:///bundle/plugins/b%20c.json".to_string(),
        ]
    );
}

#[test]
fn discover_plugins_rejects_relative_paths() {
    let host = StaticHost {
        plugins: vec![PathBuf::from("plugins/a.json")],
        ..StaticHost::default()
    };

    let err = discover_plugins(&FacadeConfig::default(), &host).unwrap_err();

    assert!(err.to_string().contains("not absolute"));
}

#[test]
fn discover_plugins_with_no_bundles_is_empty() {
    let urls = discover_plugins(&FacadeConfig::default(), &StaticHost::default()).unwrap();
    assert!(urls.is_empty());
}

#[tokio::test]
async fn bootstrap_fails_when_daemon_cannot_be_launched() {
    let sink = Arc::new(RecordingSink::default());
    let dyn_sink: Arc<dyn LogSink> = sink.clone();
    let mut config = FacadeConfig::default();
    config.daemon.executable = Some(PathBuf::from("/nonexistent/lintd-daemon"));

    let result = bootstrap(&config, &StaticHost::default(), &dyn_sink, allocate_port).await;

    let err = result.err().expect("launch should fail");
    assert!(format!("{err:#}").contains("/nonexistent/lintd-daemon"));
}

#[cfg(unix)]
#[tokio::test]
async fn bootstrap_fails_fast_when_daemon_exits_early() {
    let sink = Arc::new(RecordingSink::default());
    let dyn_sink: Arc<dyn LogSink> = sink.clone();
    let mut config = shell_config("echo starting; exit 3");
    config.readiness.timeout_ms = 5_000;

    let started = std::time::Instant::now();
    let result = bootstrap(&config, &StaticHost::default(), &dyn_sink, allocate_port).await;

    let err = result.err().expect("daemon exited");
    assert!(err.to_string().contains("exited before listening"), "{err:#}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(sink.contains("From stdout: starting"));
}

#[cfg(unix)]
#[tokio::test]
async fn bootstrap_times_out_and_releases_a_silent_daemon() {
    let sink = Arc::new(RecordingSink::default());
    let dyn_sink: Arc<dyn LogSink> = sink.clone();
    let config = shell_config("exec sleep 30");

    let started = std::time::Instant::now();
    let result = bootstrap(&config, &StaticHost::default(), &dyn_sink, allocate_port).await;

    let err = result.err().expect("daemon never listens");
    assert!(
        err.to_string().contains("did not accept connections"),
        "{err:#}"
    );
    // The sleeping child is terminated rather than waited for.
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!sink.contains("Failed to release"));
}

#[tokio::test]
async fn bootstrap_stops_before_launch_when_no_port_is_free() {
    let sink = Arc::new(RecordingSink::default());
    let dyn_sink: Arc<dyn LogSink> = sink.clone();
    let host = StaticHost::default();

    let result = bootstrap(&FacadeConfig::default(), &host, &dyn_sink, || {
        Err(std::io::Error::other("no ports left"))
    })
    .await;

    let err = result.err().expect("allocation fails");
    assert!(format!("{err:#}").contains("no ports left"), "{err:#}");
    assert_eq!(host.launches(), 0);
}
