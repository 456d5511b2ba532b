//! devops-syncd - keeps DevOps endpoints in sync and streams their logs.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use devops_model::EndpointId;
use devops_sync::{DevOpsService, Endpoint, LogSink, RegistryFile, SyncConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "devops-syncd")]
#[command(about = "DevOps endpoint synchronization daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the configured endpoints and keep them in sync
    Run {
        /// Path to the endpoint registry file
        #[arg(short, long, env = "DEVOPS_SYNC_CONFIG")]
        config: PathBuf,

        /// Refresh period in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Emit logs as JSON
        #[arg(long)]
        json_logs: bool,
    },

    /// Probe every configured endpoint once
    Probe {
        /// Path to the endpoint registry file
        #[arg(short, long, env = "DEVOPS_SYNC_CONFIG")]
        config: PathBuf,
    },

    /// Stream the log of an endpoint or one of its orchestrator hosts
    Logs {
        /// Path to the endpoint registry file
        #[arg(short, long, env = "DEVOPS_SYNC_CONFIG")]
        config: PathBuf,

        /// Endpoint id
        #[arg(long)]
        endpoint: String,

        /// Orchestrator host id
        #[arg(long)]
        host: Option<String>,
    },
}

/// Writes streamed log text to stdout.
struct StdoutSink;

impl LogSink for StdoutSink {
    fn append(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn clear(&self) {}
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("devops_sync=info,devops_syncd=info"))?;
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            interval_ms,
            json_logs,
        } => {
            init_tracing(json_logs)?;
            run(config, interval_ms).await?;
        }

        Commands::Probe { config } => {
            init_tracing(false)?;
            probe(config).await?;
        }

        Commands::Logs {
            config,
            endpoint,
            host,
        } => {
            init_tracing(false)?;
            stream_logs(config, &endpoint, host.as_deref()).await?;
        }
    }

    Ok(())
}

async fn run(config_path: PathBuf, interval_ms: Option<u64>) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting devops-syncd");

    let mut config = SyncConfig::default();
    if let Some(ms) = interval_ms {
        config = config.with_refresh_interval(Duration::from_millis(ms));
    }
    let service = DevOpsService::new(config)?;

    let registry = RegistryFile::from_file(&config_path)?;
    for endpoint in registry.into_endpoints() {
        let id = endpoint.id().clone();
        let name = endpoint.connection().name().to_string();
        if let Err(e) = service.register(endpoint).await {
            warn!(endpoint = %id, %name, error = %e, "registration failed, skipping");
        }
    }
    info!(endpoints = service.registry().len(), "registration complete");

    let mut changes = service.subscribe();
    service.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }

            change = changes.recv() => {
                match change {
                    Ok(change) => {
                        info!(
                            group = %change.group,
                            changed = ?change.changed,
                            transitions = change.transitions.len(),
                            "model changed"
                        );
                        for endpoint in service.registry().list() {
                            if change.touches(endpoint.id()) {
                                let state = endpoint.state();
                                debug!(
                                    endpoint = %endpoint.id(),
                                    %state,
                                    active = state.is_active(),
                                    "endpoint updated"
                                );
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "change signals dropped"),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    service.stop();
    Ok(())
}

async fn probe(config_path: PathBuf) -> anyhow::Result<()> {
    let service = DevOpsService::new(SyncConfig::default())?;
    let registry = RegistryFile::from_file(&config_path)?;

    for endpoint in registry.into_endpoints() {
        let connection = endpoint.connection();
        let disabled = matches!(&endpoint, Endpoint::Remote(remote) if !remote.is_enabled());
        if disabled {
            println!("{} {} disabled", connection.id(), connection.name());
            continue;
        }
        match service.probe(&endpoint).await {
            Ok(session) => println!(
                "{} {} active ({})",
                connection.id(),
                connection.name(),
                session.principal.email
            ),
            Err(e) => println!("{} {} inactive ({e})", connection.id(), connection.name()),
        }
    }
    Ok(())
}

async fn stream_logs(
    config_path: PathBuf,
    endpoint_id: &str,
    host_id: Option<&str>,
) -> anyhow::Result<()> {
    let id = EndpointId::parse(endpoint_id)?;
    let service = DevOpsService::new(SyncConfig::default())?;
    let endpoint = RegistryFile::from_file(&config_path)?
        .into_endpoints()
        .into_iter()
        .find(|endpoint| endpoint.id() == &id)
        .ok_or_else(|| anyhow::anyhow!("endpoint {id} is not in {}", config_path.display()))?;
    service.registry().insert(endpoint)?;

    let key = service.open_logs(&id, host_id, Arc::new(StdoutSink)).await?;
    info!(channel = %key, "streaming logs, press Ctrl-C to stop");

    let mut check = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = check.tick() => {
                if !service.log_channels().is_open(&key) {
                    error!(channel = %key, "log stream ended");
                    break;
                }
            }
        }
    }

    service.close_logs(&key);
    Ok(())
}
