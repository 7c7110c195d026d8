//! autodeploy - requirement-driven deployment pipeline CLI
//!
//! ## Commands
//!
//! - `run`: analyse a requirement document, push a change branch, build it
//!   on Jenkins and notify the configured channels
//! - `show`: print an archived run result after verifying its digest

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use autodeploy_ci::JenkinsClient;
use autodeploy_connectors::{build_notifier, DifyAnalyzer, McpMonitor};
use autodeploy_core::{
    obs::RunSpan, read_run_archive, CancelToken, DeployConfig, DeployError, DeploymentRequest,
    EnvCredentials, Orchestrator, PipelineConfig, PipelineResult, METRICS,
};
use autodeploy_vcs::{GitCodeChanger, LlmCodeGenerator};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

/// Archive directory used by `show` when neither flag nor config names one.
const DEFAULT_ARCHIVE_DIR: &str = ".autodeploy/runs";

#[derive(Parser)]
#[command(name = "autodeploy")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Requirement-driven deployment pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short, long, global = true, env = "AUTODEPLOY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one deployment request through the pipeline
    Run {
        /// Project name, used for branch naming and notifications
        #[arg(long)]
        project: String,

        /// Repository to change (HTTPS or local path)
        #[arg(long)]
        repo: String,

        /// Jenkins job to build; the CI stage is skipped when omitted
        #[arg(long)]
        job: Option<String>,

        /// Requirement document (default: read from stdin)
        #[arg(long)]
        doc: Option<PathBuf>,

        /// Do not publish progress to the monitoring service
        #[arg(long)]
        no_monitor: bool,

        /// Archive the result under this directory
        #[arg(long)]
        archive_dir: Option<PathBuf>,

        /// Keep the pushed branch when the build fails
        #[arg(long)]
        no_rollback: bool,
    },

    /// Print an archived run result
    Show {
        /// Run ID to show
        #[arg(long)]
        run: String,

        /// Root directory containing run archives (default: .autodeploy/runs)
        #[arg(long)]
        archive_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    autodeploy_core::init_tracing(cli.json, level);

    let outcome = match cli.command {
        Commands::Run {
            project,
            repo,
            job,
            doc,
            no_monitor,
            archive_dir,
            no_rollback,
        } => {
            let options = RunOptions {
                project,
                repo,
                job,
                doc,
                monitoring: !no_monitor,
                archive_dir,
                rollback: !no_rollback,
            };
            cmd_run(cli.config.as_deref(), options).await
        }
        Commands::Show { run, archive_dir } => {
            cmd_show(cli.config.as_deref(), &run, archive_dir.as_deref())
        }
    };
    METRICS.flush();

    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(error_status(&err))
        }
    }
}

/// Arguments of `run` after flag parsing.
struct RunOptions {
    project: String,
    repo: String,
    job: Option<String>,
    doc: Option<PathBuf>,
    monitoring: bool,
    archive_dir: Option<PathBuf>,
    rollback: bool,
}

/// 2 for input or configuration the pipeline cannot start with, 1 otherwise.
fn error_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<DeployError>() {
        Some(
            DeployError::InvalidRequest(_)
            | DeployError::Config(_)
            | DeployError::MissingCredential(_),
        ) => 2,
        _ => 1,
    }
}

fn result_status(result: &PipelineResult) -> u8 {
    if result.succeeded() {
        0
    } else {
        1
    }
}

fn read_document(doc: Option<&Path>) -> Result<String> {
    let document = match doc {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read requirement document: {path:?}"))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read requirement document from stdin")?;
            buf
        }
    };
    if document.trim().is_empty() {
        return Err(
            DeployError::InvalidRequest("requirement document is empty".to_string()).into(),
        );
    }
    Ok(document)
}

/// Wire the concrete adapters named by `config` into an orchestrator.
fn build_orchestrator(
    config: &DeployConfig,
    pipeline: PipelineConfig,
    options: &RunOptions,
    credentials: &EnvCredentials,
) -> Result<Orchestrator> {
    let analyzer = DifyAnalyzer::new(&config.dify, credentials)?;
    let generator = LlmCodeGenerator::new(&config.llm, credentials)?;
    let changer = GitCodeChanger::new(&config.git, &config.llm, Arc::new(generator), credentials);
    let notifier = build_notifier(&config.notify.channels, credentials)?;
    if notifier.is_empty() {
        warn!("no notification channels configured");
    }

    let mut orchestrator =
        Orchestrator::new(pipeline, Arc::new(analyzer), Arc::new(changer), notifier)?;
    if options.job.is_some() {
        let jenkins = JenkinsClient::new(&config.jenkins, credentials)?;
        orchestrator = orchestrator.with_ci(Arc::new(jenkins));
    }
    if options.monitoring {
        let monitor = McpMonitor::new(&config.mcp, credentials)?;
        orchestrator = orchestrator.with_monitor(Arc::new(monitor));
    }
    Ok(orchestrator)
}

fn request_from(options: &RunOptions, document: String) -> DeploymentRequest {
    let mut request = DeploymentRequest::new(&options.project, &options.repo, document);
    if let Some(job) = &options.job {
        request = request.with_ci_job(job);
    }
    if !options.monitoring {
        request = request.without_monitoring();
    }
    request
}

async fn cmd_run(config_path: Option<&Path>, options: RunOptions) -> Result<ExitCode> {
    let config = DeployConfig::load(config_path)?;
    let mut pipeline = config.pipeline_config();
    if let Some(dir) = &options.archive_dir {
        pipeline.archive_dir = Some(dir.clone());
    }
    if !options.rollback {
        pipeline = pipeline.with_auto_rollback(false);
    }

    let document = read_document(options.doc.as_deref())?;
    let request = request_from(&options, document);
    request.validate()?;

    let credentials = EnvCredentials::from_env();
    let orchestrator = build_orchestrator(&config, pipeline, &options, &credentials)?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let result = orchestrator.run_with_cancel(&request, &cancel).await?;
    let rendered =
        serde_json::to_string_pretty(&result).context("Failed to serialise run result")?;
    println!("{rendered}");
    Ok(ExitCode::from(result_status(&result)))
}

fn archive_root(config_path: Option<&Path>, archive_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = archive_dir {
        return Ok(dir.to_path_buf());
    }
    let config = DeployConfig::load(config_path)?;
    Ok(config
        .pipeline
        .archive_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARCHIVE_DIR)))
}

fn cmd_show(
    config_path: Option<&Path>,
    run_id: &str,
    archive_dir: Option<&Path>,
) -> Result<ExitCode> {
    let root = archive_root(config_path, archive_dir)?;
    let _span = RunSpan::enter(run_id);
    let result = read_run_archive(run_id, &root)
        .with_context(|| format!("Failed to load archived run {run_id} from {root:?}"))?;
    info!(event = "run.shown", terminal = %result.terminal);

    let rendered =
        serde_json::to_string_pretty(&result).context("Failed to serialise run result")?;
    println!("{rendered}");
    Ok(ExitCode::SUCCESS)
}
