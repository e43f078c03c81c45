//! Remote Build Coordinator - Daemon
//!
//! The daemon keeps the registry of build nodes, expires silent nodes,
//! selects nodes for incoming jobs and forwards them, and serves the HTTP API
//! agents and operators talk to.

#![forbid(unsafe_code)]

mod completion;
mod dispatch;
mod events;
mod health;
mod http_api;
mod registry;
mod selection;

use anyhow::{Context, Result};
use clap::Parser;
use rbc_common::CoordinatorConfig;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use completion::CompletionConsumer;
use dispatch::{HttpNodeTransport, JobDispatcher};
use events::EventBus;
use health::{HealthConfig, HealthMonitor};
use http_api::HttpState;
use registry::NodeRegistry;

/// Capacity of the completion notice channel.
const COMPLETION_BUFFER: usize = 1024;

#[derive(Parser)]
#[command(name = "rbcd")]
#[command(author, version, about = "Remote build coordinator daemon - node registry and job dispatch")]
struct Cli {
    /// Path to the daemon configuration file
    #[arg(short, long, env = "RBC_DAEMON_CONFIG")]
    config: Option<PathBuf>,

    /// Address the HTTP API listens on
    #[arg(short, long)]
    listen: Option<String>,

    /// Seconds without a heartbeat before a node is marked offline
    #[arg(long)]
    heartbeat_timeout: Option<u64>,

    /// Seconds between health sweeps
    #[arg(long)]
    health_interval: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, config: &mut CoordinatorConfig) {
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(secs) = self.heartbeat_timeout {
            config.heartbeat_timeout_secs = secs;
        }
        if let Some(secs) = self.health_interval {
            config.health_check_interval_secs = secs;
        }
    }
}

fn init_logging(cli: &Cli, config: &CoordinatorConfig) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };

    tracing_subscriber::registry()
        .with(cli.json_logs.then(|| fmt::layer().json()))
        .with((!cli.json_logs).then(fmt::layer))
        .with(filter)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = CoordinatorConfig::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("[{}] {}", e.code().code_string(), e))?;
    cli.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("[{}] {}", e.code().code_string(), e))?;

    init_logging(&cli, &config);
    info!("Starting RBC coordinator daemon...");

    let events = EventBus::default();
    let (registry, registry_task) = NodeRegistry::spawn();

    let transport = HttpNodeTransport::new(config.forward_timeout())
        .context("Failed to create node transport")?;
    let dispatcher = JobDispatcher::new(registry.clone(), transport, events.clone());

    let health_monitor = HealthMonitor::new(registry.clone(), HealthConfig::from(&config), events.clone());
    let health_handle = health_monitor.start();

    // Agents' result delivery attaches to this sender.
    let (consumer, _completions) = CompletionConsumer::new(dispatcher.clone(), COMPLETION_BUFFER);
    let completion_handle = consumer.spawn();

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    let state = HttpState {
        registry,
        dispatcher,
        events,
        version: env!("CARGO_PKG_VERSION"),
        started_at: Instant::now(),
        pid: std::process::id(),
    };
    http_api::serve(listener, state, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    health_handle.abort();
    completion_handle.abort();
    registry_task.abort();
    info!("Coordinator stopped");
    Ok(())
}
