use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use lintd::rpc::{AnalysisRequest, InputFile};
use lintd::{AnalysisFacade, BundleHost, FacadeConfig, TracingSink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variable holding the `tracing` filter directives.
const LOG_ENV_VAR: &str = "LINTD_LOG";

#[derive(Parser)]
#[command(name = "lintd")]
#[command(about = "Runs analyses through a supervised local analysis daemon")]
#[command(version)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the analysis daemon (spawned by the facade, not by hand)
    Daemon {
        /// Loopback port for the RPC listener
        #[arg(long)]
        port: u16,
    },
    /// Analyze files and print the issues found
    Analyze {
        #[command(flatten)]
        session: SessionArgs,

        /// Directory relative file paths are resolved against (defaults to current directory)
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Print one JSON object per issue
        #[arg(long)]
        json: bool,

        /// Files to analyze
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the HTML description of a rule
    Rule {
        #[command(flatten)]
        session: SessionArgs,

        /// Rule key, e.g. `text:todo`
        key: String,
    },
}

#[derive(Args)]
struct SessionArgs {
    /// Configuration file (defaults to $LINTD_CONFIG, then ~/.lintd/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bundle directory holding `daemon/` and `plugins/` (defaults to current directory)
    #[arg(long)]
    bundle: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(matches!(cli.command, Command::Daemon { .. }));

    match cli.command {
        Command::Daemon { port } => lintd::daemon::run_daemon(port).await,
        Command::Analyze {
            session,
            base_dir,
            json,
            files,
        } => analyze(&session, base_dir, json, files).await,
        Command::Rule { session, key } => rule(&session, &key).await,
    }
}

/// Daemon mode logs to stdout without colors so the supervising facade can
/// relay the lines; client commands log to stderr.
fn init_logging(daemon_mode: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if daemon_mode { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let _ = if daemon_mode {
        builder
            .with_ansi(false)
            .with_writer(std::io::stdout)
            .try_init()
    } else {
        builder.with_writer(std::io::stderr).try_init()
    };
}

fn open_facade(session: &SessionArgs) -> Result<AnalysisFacade> {
    let mut config = match &session.config {
        Some(path) => FacadeConfig::load(path)?,
        None => FacadeConfig::load_default()?,
    };

    // Without a bundle the daemon is this very binary.
    if config.daemon.executable.is_none() && session.bundle.is_none() {
        config.daemon.executable = Some(self_executable()?);
        config.daemon.args = vec!["daemon".to_string()];
    }

    let root = match &session.bundle {
        Some(bundle) => bundle.clone(),
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    debug!(bundle = %root.display(), "opening analysis facade");

    Ok(AnalysisFacade::new(
        config,
        Arc::new(BundleHost::new(root)),
        Arc::new(TracingSink),
    ))
}

fn self_executable() -> Result<PathBuf> {
    std::env::current_exe()
        .or_else(|_| which::which("lintd"))
        .context("Cannot locate the lintd executable")
}

async fn analyze(
    session: &SessionArgs,
    base_dir: Option<PathBuf>,
    json: bool,
    files: Vec<PathBuf>,
) -> Result<()> {
    let facade = open_facade(session)?;
    let base_dir = match base_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let request = AnalysisRequest {
        base_dir: base_dir.display().to_string(),
        files: files
            .iter()
            .map(|f| InputFile::new(f.display().to_string()))
            .collect(),
        ..AnalysisRequest::default()
    };

    let printed = print_issues(&facade, request, json).await;
    let stopped = facade.stop().await;
    let count = printed?;
    stopped.context("Failed to stop analysis daemon")?;

    info!(issues = count, "analysis complete");
    Ok(())
}

async fn print_issues(facade: &AnalysisFacade, request: AnalysisRequest, json: bool) -> Result<usize> {
    let mut issues = facade
        .start_analysis(request)
        .await
        .context("Failed to start analysis")?;

    let mut count = 0;
    while let Some(issue) = issues.next().await {
        let issue = issue.context("Analysis failed")?;
        if json {
            println!("{}", serde_json::to_string(&issue)?);
        } else {
            println!(
                "{}:{}:{}: {} [{}] {}",
                issue.file_path,
                issue.start_line,
                issue.start_line_offset.saturating_add(1),
                issue.severity,
                issue.rule_key,
                issue.message
            );
        }
        count += 1;
    }
    Ok(count)
}

async fn rule(session: &SessionArgs, key: &str) -> Result<()> {
    let facade = open_facade(session)?;

    let description = facade.get_html_rule_description(key).await;
    let stopped = facade.stop().await;
    let description =
        description.with_context(|| format!("Failed to look up rule {}", key))?;
    stopped.context("Failed to stop analysis daemon")?;

    println!("{}", description);
    Ok(())
}
