//! a3s-audit - audit log service for A3S jobs
//!
//! Serves the HTTP ingestion and query API and the WebSocket live channel
//! over the configured event store.

use a3s_audit::{AuditConfig, AuditService, JsonlEventStore, MemoryEventStore, StoreBackend};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "a3s-audit")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Sequenced, persisted, live-broadcast audit log")]
struct Cli {
    /// Configuration file path (.json)
    #[arg(short, long, env = "A3S_AUDIT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the audit server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AuditConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AuditConfig::default(),
    };

    init_logging(cli.verbose, config.logging.json);

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate().context("Invalid configuration")?;

            let service = Arc::new(build_service(&config).await?);
            a3s_audit::server::serve(&config, service)
                .await
                .context("Audit server failed")?;
        }
        Commands::Config { default } => {
            let shown = if default {
                AuditConfig::default()
            } else {
                config
            };
            println!("{}", shown.to_json_pretty()?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("a3s_audit={},tower_http={}", log_level, log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn build_service(config: &AuditConfig) -> Result<AuditService> {
    let service = match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory event store; audit history is lost on restart");
            AuditService::with_store(MemoryEventStore::new())
        }
        StoreBackend::Jsonl => {
            let store = JsonlEventStore::open(&config.store.dir)
                .await
                .with_context(|| {
                    format!("Failed to open event store at {}", config.store.dir.display())
                })?;
            tracing::info!(dir = %config.store.dir.display(), "Using jsonl event store");
            AuditService::with_store(store)
        }
    };
    Ok(service)
}
