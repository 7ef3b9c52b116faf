//! courier CLI
//!
//! Drives an upload queue stored under `--data-dir`.
//!
//! # Commands
//! - `enqueue` - queue a file for upload
//! - `status` - pending count and counters as JSON
//! - `list` - pending artifacts in delivery order
//! - `retry-all` - reset every retry count
//! - `run` - deliver queued artifacts into an outbox directory

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_core::impls::{DirectoryTransport, JsonFileStore, ManualConnectivity, PollingConnectivity, Probe, TcpProbe};
use courier_core::ports::ConnectivityMonitor;
use courier_core::{Attributes, QueueConfig, QueuedArtifact, SyncLoop, TickOutcome, Trigger, UploadQueue};

const SLOT: &str = "upload-queue";

#[derive(Parser)]
#[command(name = "courier")]
#[command(version, about = "Offline-durable upload queue", long_about = None)]
struct Cli {
    /// Directory holding the persisted queue
    #[arg(global = true, long, default_value = ".courier")]
    data_dir: PathBuf,

    /// JSON config file
    #[arg(global = true, long)]
    config: Option<PathBuf>,

    /// Override max_retries
    #[arg(global = true, long)]
    max_retries: Option<u32>,

    /// Override sync_interval_ms
    #[arg(global = true, long)]
    sync_interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a file for upload
    Enqueue {
        file: PathBuf,

        /// Owner attribute, repeatable
        #[arg(long = "attr", value_name = "KEY=VALUE", value_parser = parse_attr)]
        attrs: Vec<(String, String)>,
    },

    /// Print queue status as JSON
    Status,

    /// List pending artifacts in delivery order
    List,

    /// Reset every retry count
    RetryAll,

    /// Deliver queued artifacts into an outbox directory
    Run {
        #[arg(long)]
        outbox: PathBuf,

        /// Treat the network as online only while HOST:PORT accepts TCP connections
        #[arg(long, value_name = "HOST:PORT")]
        probe: Option<String>,

        #[arg(long, default_value = "2000")]
        probe_interval_ms: u64,

        /// Drain once and exit instead of running until Ctrl-C
        #[arg(long)]
        once: bool,
    },
}

fn parse_attr(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

/// One row of `list`.
#[derive(Serialize)]
struct PendingRow<'a> {
    id: String,
    bytes: usize,
    retry_count: u32,
    enqueued_at: String,
    attributes: &'a Attributes,
}

impl<'a> From<&'a QueuedArtifact> for PendingRow<'a> {
    fn from(a: &'a QueuedArtifact) -> Self {
        Self {
            id: a.id.to_string(),
            bytes: a.payload.len(),
            retry_count: a.retry_count,
            enqueued_at: a.enqueued_at.to_rfc3339(),
            attributes: &a.attributes,
        }
    }
}

fn load_config(cli: &Cli) -> Result<QueueConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => QueueConfig::from_json_file(path)?,
        None => QueueConfig::default(),
    };
    if let Some(max_retries) = cli.max_retries {
        config = config.with_max_retries(max_retries);
    }
    if let Some(ms) = cli.sync_interval_ms {
        config = config.with_sync_interval(Duration::from_millis(ms));
    }
    config.validate()?;
    Ok(config)
}

async fn resolve(probe: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let addr = tokio::net::lookup_host(probe)
        .await?
        .next()
        .ok_or_else(|| format!("probe address `{probe}` did not resolve"))?;
    Ok(addr)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    let store = JsonFileStore::open(&cli.data_dir, SLOT)?;
    let queue = Arc::new(
        UploadQueue::builder(Arc::new(store))
            .retry_policy(config.retry_policy())
            .open()?,
    );

    match cli.command {
        Commands::Enqueue { file, attrs } => {
            let payload = std::fs::read(&file)?;
            let attributes: Attributes = attrs.into_iter().collect();
            let id = queue.enqueue(payload, attributes).await?;
            println!("{id}");
        }
        Commands::Status => {
            let status = queue.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::List => {
            for artifact in queue.snapshot().await.iter() {
                println!("{}", serde_json::to_string(&PendingRow::from(artifact))?);
            }
        }
        Commands::RetryAll => {
            let reset = queue.reset_retries().await?;
            println!("reset {reset} artifact(s)");
        }
        Commands::Run {
            outbox,
            probe,
            probe_interval_ms,
            once,
        } => {
            let transport = Arc::new(DirectoryTransport::new(outbox));
            let probe = match probe {
                Some(target) => Some(Arc::new(TcpProbe::new(resolve(&target).await?, Duration::from_secs(2)))),
                None => None,
            };

            if once {
                let online = match &probe {
                    Some(probe) => probe.check().await,
                    None => true,
                };
                let connectivity = Arc::new(ManualConnectivity::new(online));
                let sync = SyncLoop::new(Arc::clone(&queue), transport, connectivity, &config);

                let mut outcome = sync.on_trigger(Trigger::Manual).await;
                while matches!(outcome, TickOutcome::Delivered(_)) {
                    outcome = sync.on_trigger(Trigger::Drain).await;
                }
                info!(last = ?outcome, "single pass finished");
                println!("{}", serde_json::to_string_pretty(&sync.status().await)?);
                return Ok(());
            }

            let connectivity: Arc<dyn ConnectivityMonitor> = match probe {
                Some(probe) => Arc::new(PollingConnectivity::spawn(
                    probe,
                    Duration::from_millis(probe_interval_ms),
                    false,
                )),
                None => Arc::new(ManualConnectivity::new(true)),
            };

            let handle = SyncLoop::new(Arc::clone(&queue), transport, connectivity, &config).spawn();
            tokio::signal::ctrl_c().await?;
            info!("shutting down");

            handle.shutdown_and_join().await;
            println!("{}", serde_json::to_string_pretty(&queue.status().await)?);
        }
    }

    Ok(())
}
