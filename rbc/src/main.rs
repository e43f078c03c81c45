//! Remote Build Coordinator - build client CLI.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rbc::{
    BuildJob, BuildStep, BuildStrategy, CommandExecutor, CoordinatorApi, RemoteBuildClient,
    StepError, StrategySelector, determine_strategy,
};
use rbc_common::{
    BuildRequest, ClientConfig, ErrorCode, PluginList, PluginSpec, TargetArch, ValidationError,
};
use serde_json::{Map, Value, json};
use std::fmt::Display;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "rbc")]
#[command(author, version, about = "Remote build coordinator client - build locally, remotely or via CI")]
struct Cli {
    /// Path to the client configuration file
    #[arg(short, long, global = true, env = "RBC_CONFIG")]
    config: Option<PathBuf>,

    /// Coordinator base URL
    #[arg(long, global = true)]
    coordinator_url: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a release for a target architecture
    Build(BuildArgs),
    /// Show which strategy a build would use
    Plan {
        /// Target architecture (defaults to the host)
        #[arg(short, long)]
        target: Option<String>,
        /// Strategy override (local_only, remote_only, ci)
        #[arg(short, long)]
        strategy: Option<String>,
    },
    /// Check that the coordinator is reachable
    Health,
    /// List architectures the coordinator can build
    Architectures,
    /// Show the coordinator's queue
    Queue,
}

#[derive(Args)]
struct BuildArgs {
    /// Release version to build
    #[arg(long)]
    release: String,

    /// Target architecture (defaults to the host)
    #[arg(short, long)]
    target: Option<String>,

    /// Strategy override (local_only, remote_only, ci)
    #[arg(short, long)]
    strategy: Option<String>,

    /// Source tree for local and CI builds
    #[arg(long, default_value = ".")]
    source: PathBuf,

    /// Plugin to bundle, as `name` or `name@version` (repeatable)
    #[arg(short, long = "plugin")]
    plugins: Vec<String>,

    /// Build configuration as a JSON object
    #[arg(long, value_name = "JSON")]
    build_config: Option<String>,

    /// Checksum of the source archive
    #[arg(long)]
    source_checksum: Option<String>,

    #[arg(long, default_value_t = 0)]
    priority: i32,

    /// Directory for downloaded artifacts
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Do not retry a failed local build remotely
    #[arg(long)]
    no_fallback: bool,
}

fn init_logging(cli: &Cli, config: &ClientConfig) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Attach the catalog code and remediation hints to an error.
fn report(code: ErrorCode, err: impl Display) -> anyhow::Error {
    let mut message = format!("[{}] {}", code.code_string(), err);
    for hint in code.remediation() {
        message.push_str("\n  hint: ");
        message.push_str(hint);
    }
    anyhow::anyhow!(message)
}

/// Report a pre-flight failure as the `validate` step of a build.
fn invalid_build(err: ValidationError) -> anyhow::Error {
    let err = StepError::new(BuildStep::Validate, err);
    report(err.code(), &err)
}

fn print_value(cli: &Cli, value: &Value, human: impl FnOnce() -> String) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", human());
    }
    Ok(())
}

fn host_arch() -> Result<TargetArch> {
    TargetArch::host().with_context(|| {
        format!(
            "unsupported host platform {}-{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        )
    })
}

fn parse_target(raw: Option<&str>) -> Result<Option<TargetArch>, ValidationError> {
    raw.map(str::parse::<TargetArch>).transpose()
}

fn build_request(args: &BuildArgs, target: TargetArch) -> Result<BuildRequest, ValidationError> {
    let plugins = PluginList::List(args.plugins.iter().cloned().map(PluginSpec::Text).collect());
    let config: Map<String, Value> = match &args.build_config {
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            ValidationError::new("config", format!("--build-config must be a JSON object: {e}"))
        })?,
        None => Map::new(),
    };

    let mut builder = BuildRequest::builder(args.release.clone(), target)
        .plugins(plugins)
        .config(config)
        .priority(args.priority);
    if let Some(checksum) = &args.source_checksum {
        builder = builder.source_checksum(checksum.clone());
    }
    builder.build()
}

async fn run_build(cli: &Cli, args: &BuildArgs, mut config: ClientConfig) -> Result<()> {
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }

    let host = host_arch()?;
    let target = parse_target(args.target.as_deref()).map_err(invalid_build)?;
    let strategy =
        determine_strategy(args.strategy.as_deref(), target, host).map_err(invalid_build)?;
    let request = build_request(args, target.unwrap_or(host)).map_err(invalid_build)?;
    info!(
        strategy = %strategy,
        target = %request.target_arch(),
        content_hash = request.content_hash(),
        "Starting build"
    );

    let remote = RemoteBuildClient::from_config(&config).map_err(|e| report(e.code(), &e))?;
    let mut selector = StrategySelector::new(remote)
        .allow_fallback(config.fallback_enabled && !args.no_fallback);
    if let Some(local) = config.local_command.as_deref().and_then(CommandExecutor::from_command_line) {
        selector = selector.with_local(local);
    }
    if let Some(ci) = config.ci_command.as_deref().and_then(CommandExecutor::from_command_line) {
        selector = selector.with_ci(ci);
    }

    let job = BuildJob {
        request,
        source: args.source.clone(),
    };
    let outcome = selector
        .execute(strategy, &job)
        .await
        .map_err(|e| report(e.code(), &e))?;

    print_value(cli, &serde_json::to_value(&outcome)?, || {
        let mut lines = vec![format!("Built with {} strategy", outcome.strategy)];
        if let (Some(from), Some(reason)) = (&outcome.fallback_from, &outcome.fallback_reason) {
            lines.push(format!("  (fallback from {from}: {reason})"));
        }
        if let Some(build_id) = &outcome.build_id {
            lines.push(format!("  build id: {build_id}"));
        }
        lines.extend(outcome.artifacts.iter().map(|p| format!("  {}", p.display())));
        lines.join("\n")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ClientConfig::load(cli.config.as_deref()).map_err(|e| report(e.code(), &e))?;
    if let Some(url) = &cli.coordinator_url {
        config.coordinator_url = Some(url.clone());
    }
    init_logging(&cli, &config);
    debug!(coordinator = ?config.coordinator_url, "Client configuration loaded");

    match &cli.command {
        Command::Build(args) => run_build(&cli, args, config).await,
        Command::Plan { target, strategy } => {
            let host = host_arch()?;
            let target = parse_target(target.as_deref()).map_err(|e| report(e.code(), &e))?;
            let chosen: BuildStrategy = determine_strategy(strategy.as_deref(), target, host)
                .map_err(|e| report(e.code(), &e))?;
            let target = target.unwrap_or(host);
            let value = json!({ "strategy": chosen, "target": target, "host": host });
            print_value(&cli, &value, || format!("{chosen} ({target} on {host})"))
        }
        Command::Health => {
            let client = RemoteBuildClient::from_config(&config).map_err(|e| report(e.code(), &e))?;
            client.api().health().await.map_err(|e| report(e.code(), &e))?;
            print_value(&cli, &json!({ "status": "reachable" }), || {
                "Coordinator is reachable".to_string()
            })
        }
        Command::Architectures => {
            let client = RemoteBuildClient::from_config(&config).map_err(|e| report(e.code(), &e))?;
            let architectures = client
                .api()
                .architectures()
                .await
                .map_err(|e| report(e.code(), &e))?;
            print_value(&cli, &json!({ "architectures": architectures }), || {
                architectures.join("\n")
            })
        }
        Command::Queue => {
            let client = RemoteBuildClient::from_config(&config).map_err(|e| report(e.code(), &e))?;
            let queue = client
                .api()
                .queue_status()
                .await
                .map_err(|e| report(e.code(), &e))?;
            let pretty = serde_json::to_string_pretty(&queue)?;
            print_value(&cli, &queue, || pretty)
        }
    }
}
