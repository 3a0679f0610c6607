use super::*;
use crate::facade::LogSubscription;
use crate::rpc::daemon_service::AnalysisDaemonClient;
use crate::rpc::InputFile;
use crate::test_support::{Logged, RecordingSink};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use tarpc::client::{self, NewClient};
use tarpc::context;
use tempfile::TempDir;
use url::Url;

const RULES: &str = r#"{
    "rules": [
        {"key": "text:todo", "name": "TODO comment", "pattern": "TODO",
         "html_description": "<p>Pending work.</p>"}
    ]
}"#;

async fn connect(port: u16) -> AnalysisDaemonClient {
    use tarpc::serde_transport::tcp;

    let transport = tcp::connect((Ipv4Addr::LOCALHOST, port), Bincode::default)
        .await
        .unwrap();
    let NewClient { client, dispatch } =
        AnalysisDaemonClient::new(client::Config::default(), transport);
    tokio::spawn(dispatch);
    client
}

fn plugin(dir: &TempDir) -> StandaloneConfiguration {
    let path = dir.path().join("rules.json");
    fs::write(&path, RULES).unwrap();
    StandaloneConfiguration {
        plugin_urls: vec![Url::from_file_path(&path).unwrap().to_string()],
        work_dir: None,
    }
}

fn request_with_todos(dir: &TempDir, count: usize) -> AnalysisRequest {
    let content: String = (0..count).map(|n| format!("TODO {}\n", n)).collect();
    fs::write(dir.path().join("todos.txt"), content).unwrap();
    AnalysisRequest {
        base_dir: dir.path().display().to_string(),
        files: vec![InputFile::new("todos.txt")],
        ..AnalysisRequest::default()
    }
}

#[tokio::test]
async fn calls_before_start_report_not_started() {
    let daemon = bind_daemon(0).await.unwrap();
    let client = connect(daemon.port()).await;

    let analysis = client
        .analyze(context::current(), AnalysisRequest::default())
        .await
        .unwrap();
    let rule = client
        .rule_details(context::current(), "text:todo".into())
        .await
        .unwrap();
    let log_port = client.log_port(context::current()).await.unwrap();

    assert_eq!(analysis, Err(DaemonError::NotStarted));
    assert_eq!(rule, Err(DaemonError::NotStarted));
    assert_eq!(log_port, Err(DaemonError::NotStarted));
    daemon.shutdown().await;
}

#[tokio::test]
async fn start_rejects_invalid_plugins() {
    let daemon = bind_daemon(0).await.unwrap();
    let client = connect(daemon.port()).await;
    let config = StandaloneConfiguration {
        plugin_urls: vec!["file:///nonexistent/lintd/rules.json".into()],
        work_dir: None,
    };

    let result = client.start(context::current(), config).await.unwrap();

    assert!(matches!(result, Err(DaemonError::InvalidPlugin { .. })));
    daemon.shutdown().await;
}

#[tokio::test]
async fn issues_are_paged_in_order_then_exhausted() {
    let dir = TempDir::new().unwrap();
    let daemon = bind_daemon(0).await.unwrap();
    let client = connect(daemon.port()).await;
    client
        .start(context::current(), plugin(&dir))
        .await
        .unwrap()
        .unwrap();

    let id = client
        .analyze(context::current(), request_with_todos(&dir, PAGE_SIZE + 5))
        .await
        .unwrap()
        .unwrap();

    let first = client
        .next_issues(context::current(), id)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let second = client
        .next_issues(context::current(), id)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let end = client.next_issues(context::current(), id).await.unwrap();
    let after = client.next_issues(context::current(), id).await.unwrap();

    assert_eq!(first.len(), PAGE_SIZE);
    assert_eq!(second.len(), 5);
    let lines: Vec<u32> = first.iter().chain(&second).map(|i| i.start_line).collect();
    assert_eq!(lines, (1..=(PAGE_SIZE as u32 + 5)).collect::<Vec<_>>());
    assert_eq!(end, Ok(None));
    assert_eq!(after, Err(DaemonError::UnknownAnalysis { id }));
    daemon.shutdown().await;
}

#[tokio::test]
async fn cancel_discards_pending_issues() {
    let dir = TempDir::new().unwrap();
    let daemon = bind_daemon(0).await.unwrap();
    let client = connect(daemon.port()).await;
    client
        .start(context::current(), plugin(&dir))
        .await
        .unwrap()
        .unwrap();
    let id = client
        .analyze(context::current(), request_with_todos(&dir, 3))
        .await
        .unwrap()
        .unwrap();

    client.cancel_analysis(context::current(), id).await.unwrap();

    let result = client.next_issues(context::current(), id).await.unwrap();
    assert_eq!(result, Err(DaemonError::UnknownAnalysis { id }));
    daemon.shutdown().await;
}

#[tokio::test]
async fn rule_details_finds_loaded_rules_only() {
    let dir = TempDir::new().unwrap();
    let daemon = bind_daemon(0).await.unwrap();
    let client = connect(daemon.port()).await;
    client
        .start(context::current(), plugin(&dir))
        .await
        .unwrap()
        .unwrap();

    let found = client
        .rule_details(context::current(), "text:todo".into())
        .await
        .unwrap()
        .unwrap();
    let missing = client
        .rule_details(context::current(), "text:nope".into())
        .await
        .unwrap();

    assert_eq!(found.html_description, "<p>Pending work.</p>");
    assert_eq!(
        missing,
        Err(DaemonError::RuleNotFound {
            rule_key: "text:nope".into()
        })
    );
    daemon.shutdown().await;
}

#[tokio::test]
async fn log_subscription_receives_backlog_and_live_events() {
    let dir = TempDir::new().unwrap();
    let daemon = bind_daemon(0).await.unwrap();
    let client = connect(daemon.port()).await;
    client
        .start(context::current(), plugin(&dir))
        .await
        .unwrap()
        .unwrap();
    let log_port = client.log_port(context::current()).await.unwrap().unwrap();
    assert_eq!(log_port, daemon.log_port());

    let sink = Arc::new(RecordingSink::default());
    let logs = LogSubscription::open(
        SocketAddr::from((Ipv4Addr::LOCALHOST, log_port)),
        sink.clone(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    assert!(logs.is_active());

    // The backlog is replayed before `open` returns.
    let listening = format!("Analysis daemon listening on 127.0.0.1:{}", daemon.port());
    assert!(sink.contains(&listening));
    assert!(sink.contains("Loaded 1 rules from 1 plugins"));

    client
        .analyze(context::current(), request_with_todos(&dir, 2))
        .await
        .unwrap()
        .unwrap();
    assert!(sink.wait_for("reported 2 issues", Duration::from_secs(5)).await);
    assert!(sink
        .lines()
        .iter()
        .any(|l| matches!(l, Logged::Debug(m) if m.contains("reported 2 issues"))));
    assert!(sink.lines().contains(&Logged::Info(listening)));

    logs.cancel();
    daemon.shutdown().await;
}

#[tokio::test]
async fn closing_a_connection_drops_its_undrained_analyses() {
    let dir = TempDir::new().unwrap();
    let daemon = bind_daemon(0).await.unwrap();
    let first = connect(daemon.port()).await;
    first
        .start(context::current(), plugin(&dir))
        .await
        .unwrap()
        .unwrap();
    let id = first
        .analyze(context::current(), request_with_todos(&dir, 3))
        .await
        .unwrap()
        .unwrap();
    drop(first);
    tokio::time::sleep(Duration::from_millis(500)).await;

    // A single read: polling would drain the analysis on its own.
    let second = connect(daemon.port()).await;
    let page = second.next_issues(context::current(), id).await.unwrap();

    assert_eq!(page, Err(DaemonError::UnknownAnalysis { id }));
    daemon.shutdown().await;
}

#[tokio::test]
async fn analyses_of_open_connections_are_kept() {
    let dir = TempDir::new().unwrap();
    let daemon = bind_daemon(0).await.unwrap();
    let owner = connect(daemon.port()).await;
    owner
        .start(context::current(), plugin(&dir))
        .await
        .unwrap()
        .unwrap();
    let id = owner
        .analyze(context::current(), request_with_todos(&dir, 2))
        .await
        .unwrap()
        .unwrap();

    // Another client coming and going leaves the owner's analysis alone.
    let other = connect(daemon.port()).await;
    other.log_port(context::current()).await.unwrap().unwrap();
    drop(other);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let page = owner
        .next_issues(context::current(), id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(page.map(|issues| issues.len()), Some(2));
    daemon.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn slow_input_does_not_block_other_calls() {
    let dir = TempDir::new().unwrap();
    let fifo = dir.path().join("slow.txt");
    nix::unistd::mkfifo(&fifo, nix::sys::stat::Mode::S_IRWXU).unwrap();

    let daemon = bind_daemon(0).await.unwrap();
    let client = connect(daemon.port()).await;
    client
        .start(context::current(), plugin(&dir))
        .await
        .unwrap()
        .unwrap();

    let request = AnalysisRequest {
        base_dir: dir.path().display().to_string(),
        files: vec![InputFile::new("slow.txt")],
        ..AnalysisRequest::default()
    };
    let analysis = tokio::spawn({
        let client = client.clone();
        async move { client.analyze(context::current(), request).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The analysis is parked reading the FIFO; lookups still get answered.
    let rule = tokio::time::timeout(
        Duration::from_secs(2),
        client.rule_details(context::current(), "text:todo".into()),
    )
    .await
    .expect("rule lookup blocked behind the analysis")
    .unwrap();
    assert!(rule.is_ok());
    assert!(!analysis.is_finished());

    std::thread::spawn(move || fs::write(&fifo, "TODO\n"))
        .join()
        .unwrap()
        .unwrap();
    let id = analysis.await.unwrap().unwrap().unwrap();
    let page = client.next_issues(context::current(), id).await.unwrap().unwrap();
    assert_eq!(page.map(|issues| issues.len()), Some(1));
    daemon.shutdown().await;
}
