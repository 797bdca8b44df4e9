//! cometrelay daemon
//!
//! Relays live consensus events (votes, round announcements, round-step
//! transitions) from validator nodes into durable storage. One connector per
//! monitored network feeds the sequencer; one relay per (network, kind)
//! partition drains the durable log into the archive.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cometrelay_analyzer::{MissingVoteAnalyzer, ValidatorIndexer};
use cometrelay_pipeline::Orchestrator;
use cometrelay_store::{ArchiveStore, EventLog};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::{parse_endpoint, RelayConfig};

/// Consensus event relay for validator voting analysis
#[derive(Parser, Debug)]
#[command(name = "cometrelay")]
#[command(about = "Relays consensus events from validator nodes into durable storage", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline: subscriptions, sequencer, relays, archive
    Run {
        /// Monitored network as `name=ws-url` (repeatable)
        #[arg(long = "endpoint", value_parser = parse_endpoint, required = true)]
        endpoints: Vec<(String, String)>,

        /// Data directory for the event log and archive
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Periodically index each network's validator set into the archive
    IndexValidators {
        /// Monitored network as `name=ws-url` (repeatable)
        #[arg(long = "endpoint", value_parser = parse_endpoint, required = true)]
        endpoints: Vec<(String, String)>,

        /// Data directory for the archive
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,

        /// Seconds between indexing passes
        #[arg(long, default_value = "60")]
        poll_interval_secs: u64,
    },

    /// Periodically report validators with no recorded vote
    AnalyzeMissingVotes {
        /// Network name to analyze (repeatable)
        #[arg(long = "network", required = true)]
        networks: Vec<String>,

        /// Data directory for the archive
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,

        /// Seconds between analysis passes
        #[arg(long, default_value = "60")]
        poll_interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match args.command {
        Command::Run {
            endpoints,
            data_dir,
        } => {
            let config = RelayConfig {
                endpoints: endpoints.into_iter().collect(),
                data_dir,
                ..Default::default()
            };
            run_pipeline(config).await
        }
        Command::IndexValidators {
            endpoints,
            data_dir,
            poll_interval_secs,
        } => {
            let config = RelayConfig {
                endpoints: endpoints.into_iter().collect(),
                data_dir,
                poll_interval_secs,
            };
            run_validator_indexer(config).await
        }
        Command::AnalyzeMissingVotes {
            networks,
            data_dir,
            poll_interval_secs,
        } => {
            let config = RelayConfig {
                endpoints: HashMap::new(),
                data_dir,
                poll_interval_secs,
            };
            run_missing_vote_analyzer(config, networks).await
        }
    }
}

async fn run_pipeline(config: RelayConfig) -> Result<()> {
    tracing::info!("starting cometrelay pipeline");
    for (network, url) in &config.endpoints {
        tracing::info!("  {network}: {url}");
    }

    std::fs::create_dir_all(&config.data_dir)?;
    let log = Arc::new(EventLog::open(config.log_path()).context("failed to open event log")?);
    let archive =
        Arc::new(ArchiveStore::open(config.archive_path()).context("failed to open archive")?);

    let mut orchestrator = Orchestrator::connect(log.clone(), config.endpoints).await?;
    orchestrator.start_all().await?;
    orchestrator.spawn_relays(archive);

    tracing::info!("pipeline running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    orchestrator.shutdown().await;
    log.flush().context("failed to flush event log")?;
    Ok(())
}

async fn run_validator_indexer(config: RelayConfig) -> Result<()> {
    tracing::info!("starting validator indexer");

    std::fs::create_dir_all(&config.data_dir)?;
    let log = Arc::new(EventLog::open(config.log_path()).context("failed to open event log")?);
    let archive =
        Arc::new(ArchiveStore::open(config.archive_path()).context("failed to open archive")?);

    let orchestrator = Orchestrator::connect(log, config.endpoints).await?;
    let token = orchestrator.cancellation_token();
    let indexer = ValidatorIndexer::new(orchestrator.connectors(), archive, token.clone());

    let poll_interval = Duration::from_secs(config.poll_interval_secs);
    let job = tokio::spawn(indexer.run(poll_interval));

    tokio::signal::ctrl_c().await?;
    token.cancel();
    job.await?;
    Ok(())
}

async fn run_missing_vote_analyzer(config: RelayConfig, networks: Vec<String>) -> Result<()> {
    tracing::info!("starting missing-vote analyzer for {networks:?}");

    let archive =
        Arc::new(ArchiveStore::open(config.archive_path()).context("failed to open archive")?);
    let token = tokio_util::sync::CancellationToken::new();
    let analyzer = MissingVoteAnalyzer::new(networks, archive, token.clone());

    let poll_interval = Duration::from_secs(config.poll_interval_secs);
    let job = tokio::spawn(analyzer.run(poll_interval));

    tokio::signal::ctrl_c().await?;
    token.cancel();
    job.await?;
    Ok(())
}
