//! automat CLI - asset auto-materialization scheduler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use automat_core::{AssetPartition, DataVersion, MaterializationRequest, Time};
use automat_execution::{
    Definitions, DispatchError, MemoryDispatcher, RequestDispatcher, SchedulingHarness, SensorEngine,
};
use automat_freshness::FreshnessRunner;
use automat_storage::{JsonIndex, UpdateIndex};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "automat")]
#[command(about = "Asset auto-materialization and freshness scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a definitions document
    Validate {
        /// Definitions JSON
        #[arg(short, long)]
        definitions: PathBuf,
    },
    /// Run one tick of every binding and print the requests
    Tick {
        /// Definitions JSON
        #[arg(short, long)]
        definitions: PathBuf,
        /// Index directory
        #[arg(short, long, default_value = ".automat")]
        state: PathBuf,
        /// Only tick this binding
        #[arg(long)]
        binding: Option<String>,
    },
    /// Evaluate all freshness checks once
    Check {
        /// Definitions JSON
        #[arg(short, long)]
        definitions: PathBuf,
        /// Index directory
        #[arg(short, long, default_value = ".automat")]
        state: PathBuf,
    },
    /// Record a materialization or observation
    Record {
        /// Asset key
        asset: String,
        /// Partition key
        #[arg(long)]
        partition: Option<String>,
        /// Record an observation instead of a materialization
        #[arg(long)]
        observe: bool,
        /// Data version
        #[arg(long)]
        data_version: Option<String>,
        /// Event time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<Time>,
        /// Index directory
        #[arg(short, long, default_value = ".automat")]
        state: PathBuf,
    },
    /// Show the last tick of every binding
    Status {
        /// Definitions JSON
        #[arg(short, long)]
        definitions: PathBuf,
        /// Index directory
        #[arg(short, long, default_value = ".automat")]
        state: PathBuf,
    },
    /// Run the scheduler until interrupted
    Run {
        /// Definitions JSON
        #[arg(short, long)]
        definitions: PathBuf,
        /// Index directory
        #[arg(short, long, default_value = ".automat")]
        state: PathBuf,
    },
}

/// Prints each request as one JSON line on stdout.
struct JsonLinesDispatcher;

#[async_trait]
impl RequestDispatcher for JsonLinesDispatcher {
    async fn dispatch(&self, request: &MaterializationRequest) -> Result<(), DispatchError> {
        let line = serde_json::to_string(request).map_err(|e| DispatchError::Rejected(e.to_string()))?;
        println!("{}", line);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { definitions } => {
            let defs = load(&definitions).await?;
            println!("Definitions OK");
            println!("  Assets: {}", defs.graph().len());
            println!("  Automated: {}", defs.policies().len());
            println!("  Checks: {}", defs.checks().len());
            for binding in defs.bindings().iter() {
                println!(
                    "  Sensor {} ({} asset(s), every {}s)",
                    binding.name,
                    binding.assets.len(),
                    binding.minimum_interval_seconds
                );
            }
        }
        Commands::Tick {
            definitions,
            state,
            binding,
        } => {
            let defs = load(&definitions).await?;
            let index = open_index(&state).await?;
            let dispatcher = Arc::new(MemoryDispatcher::new());
            let engine = SensorEngine::new(defs.clone(), index, dispatcher.clone());

            let names: Vec<String> = match binding {
                Some(name) => vec![name],
                None => defs.bindings().iter().map(|b| b.name.clone()).collect(),
            };
            let now = chrono::Utc::now();
            for name in names {
                let result = engine.run_tick(&name, now).await?;
                info!(
                    "{}: {} evaluated, {} requested",
                    name,
                    result.record.evaluations.len(),
                    result.requests.len()
                );
            }

            for request in dispatcher.drain().await {
                println!("{}", serde_json::to_string(&request)?);
            }
        }
        Commands::Check { definitions, state } => {
            let defs = load(&definitions).await?;
            let index = open_index(&state).await?;
            let runner = FreshnessRunner::new(index, Arc::clone(defs.graph()), Arc::clone(defs.checks()));

            let summary = runner.run_once(chrono::Utc::now()).await?;
            for result in &summary.results {
                println!(
                    "  {} | {} | {} - {}",
                    result.check, result.asset_partition, result.status, result.description
                );
            }
            println!("Freshness: {:?}", summary.decision);
        }
        Commands::Record {
            asset,
            partition,
            observe,
            data_version,
            at,
            state,
        } => {
            let index = open_index(&state).await?;
            let asset_partition = match partition {
                Some(p) => AssetPartition::new(asset, p),
                None => AssetPartition::unpartitioned(asset),
            };
            let at = at.unwrap_or_else(chrono::Utc::now);
            let data_version = data_version.map(DataVersion::new);

            if observe {
                index.record_observation(&asset_partition, at, data_version).await?;
                println!("Recorded observation of {} at {}", asset_partition, at);
            } else {
                index.record_materialization(&asset_partition, at, data_version).await?;
                println!("Recorded materialization of {} at {}", asset_partition, at);
            }
        }
        Commands::Status { definitions, state } => {
            let defs = load(&definitions).await?;
            let index = open_index(&state).await?;

            println!("automat Status");
            for binding in defs.bindings().iter() {
                match index.last_tick(&binding.name).await? {
                    Some(tick) => println!(
                        "  {} | last tick {} | {} requested | {} failed",
                        binding.name,
                        tick.started_at,
                        tick.dispatched.len(),
                        tick.failed.len()
                    ),
                    None => println!("  {} | never ticked", binding.name),
                }
            }
        }
        Commands::Run { definitions, state } => {
            let defs = load(&definitions).await?;
            let index = open_index(&state).await?;
            let engine = SensorEngine::new(defs, index, Arc::new(JsonLinesDispatcher));

            let mut harness = SchedulingHarness::new(engine);
            harness.start();
            info!("Scheduler running, press Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            for (name, state) in harness.statuses().await {
                info!("Sensor {}: {}", name, state);
            }
            harness.shutdown().await;
        }
    }

    Ok(())
}

async fn load(path: &Path) -> Result<Definitions> {
    Definitions::load(path)
        .await
        .with_context(|| format!("loading definitions from {}", path.display()))
}

async fn open_index(path: &Path) -> Result<Arc<dyn UpdateIndex>> {
    let index = JsonIndex::open(path)
        .await
        .with_context(|| format!("opening index at {}", path.display()))?;
    Ok(Arc::new(index))
}
