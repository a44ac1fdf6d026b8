//! tagrelay: replays an NDJSON event stream through mapped destinations.
//!
//! Each destination mapping is registered with a transport that logs the
//! resulting call instead of sending it anywhere.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use tagrelay_core::config::AppConfig;
use tagrelay_core::event_bus::LogSink;
use tagrelay_core::types::Event;
use tagrelay_delivery::{
    DeliveryDispatcher, DeliveryHandle, DestinationCall, DestinationRegistry, DestinationTransport,
    MappedDestination, TaskOutcome,
};
use tagrelay_mapping::config::DestinationMapping;

#[derive(Parser, Debug)]
#[command(name = "tagrelay")]
#[command(about = "Replay analytics events through destination mappings")]
#[command(version)]
struct Cli {
    /// Config file (TOML/JSON/YAML); environment variables still apply
    #[arg(long, env = "TAGRELAY_CONFIG")]
    config: Option<String>,

    /// JSON array of destination mappings
    #[arg(long)]
    destinations: PathBuf,

    /// NDJSON event file; reads stdin when omitted
    #[arg(long)]
    events: Option<PathBuf>,
}

struct LogTransport;

#[async_trait]
impl DestinationTransport for LogTransport {
    async fn send(&self, call: DestinationCall) -> anyhow::Result<()> {
        info!(
            destination = %call.destination,
            event_key = %call.event_key,
            event_type = %call.event_type,
            payload = %call.payload,
            "destination call"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tagrelay=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let config = AppConfig::load_from(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    info!(
        max_attempts = config.delivery.max_attempts,
        initial_backoff_ms = config.delivery.initial_backoff_ms,
        ignore_unmapped_properties = config.mapping.ignore_unmapped_properties,
        "Configuration loaded"
    );

    let registry = load_destinations(&cli.destinations, &config).await?;
    let dispatcher = DeliveryDispatcher::builder(registry)
        .config(config.delivery.clone())
        .sink(Arc::new(LogSink))
        .build();

    let handles = match &cli.events {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            replay(&dispatcher, BufReader::new(file)).await?
        }
        None => replay(&dispatcher, BufReader::new(tokio::io::stdin())).await?,
    };

    let outcomes: Vec<TaskOutcome> = futures::future::join_all(
        handles.into_iter().map(|handle| handle.outcomes()),
    )
    .await
    .into_iter()
    .flatten()
    .collect();

    let failed = outcomes.iter().filter(|o| !o.is_delivered()).count();
    info!(
        tasks = outcomes.len(),
        delivered = outcomes.len() - failed,
        failed,
        "Replay finished"
    );

    if failed > 0 {
        error!(failed, "Some deliveries failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn load_destinations(
    path: &Path,
    config: &AppConfig,
) -> anyhow::Result<DestinationRegistry> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let mappings: Vec<DestinationMapping> =
        serde_json::from_str(&raw).context("parsing destination mappings")?;

    let transport: Arc<dyn DestinationTransport> = Arc::new(LogTransport);
    let registry = DestinationRegistry::new();
    for mut mapping in mappings {
        mapping.ignore_unmapped_properties |= config.mapping.ignore_unmapped_properties;
        let name = mapping.name.clone();
        let destination = MappedDestination::new(mapping, Arc::clone(&transport))
            .with_context(|| format!("destination '{}'", name))?;
        registry.register(Arc::new(destination));
    }

    if registry.is_empty() {
        warn!("No destinations configured, events will be dropped");
    }
    Ok(registry)
}

async fn replay<R>(
    dispatcher: &DeliveryDispatcher,
    reader: R,
) -> anyhow::Result<Vec<DeliveryHandle>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut handles = Vec::new();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let event = match Event::from_json(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping invalid event");
                continue;
            }
        };
        handles.push(dispatcher.deliver(event));
    }

    info!(events = handles.len(), "Events queued");
    Ok(handles)
}
