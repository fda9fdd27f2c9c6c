//! Command-line entry point for the cortex model run worker

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cortex_worker_core::consumer::{ReconnectBackoff, RunConsumer};
use cortex_worker_core::engine::CommandEngine;
use cortex_worker_core::executor::JobExecutor;
use cortex_worker_core::registry::ModelRegistry;
use cortex_worker_core::store::{DataStore, LocalDataStore};
use cortex_worker_core::{init, version, WorkerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "cortex-worker")]
#[command(about = "Queue-driven worker for cortical model run execution")]
#[command(version = version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the run queue and process model runs until shut down
    Serve,

    /// Write the effective configuration to the default location
    InitConfig,

    /// Show worker information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init()?;

    let config_path = match cli.config {
        Some(path) => path,
        None => WorkerConfig::default_path()?,
    };
    let config = WorkerConfig::load(&config_path)?;

    match cli.command {
        Commands::Serve => {
            info!("Cortex Worker v{} starting", version());

            let store: Arc<dyn DataStore> =
                Arc::new(LocalDataStore::open(&config.store.data_directory)?);

            let registry = match &config.engine.models_file {
                Some(path) => ModelRegistry::from_json_file(path)
                    .with_context(|| format!("loading model registry from {:?}", path))?,
                None => {
                    warn!("no model registry file configured, all runs will be rejected");
                    ModelRegistry::new()
                }
            };
            info!(model_count = registry.len(), "model registry loaded");

            let engine = Arc::new(CommandEngine::new(
                &config.engine.command,
                config.engine.args.clone(),
            ));
            let executor = Arc::new(JobExecutor::new(store, Arc::new(registry), engine));

            // Reconnect loop: transient broker or store failures back off
            // and retry instead of killing the worker
            let mut backoff = ReconnectBackoff::new();
            loop {
                match RunConsumer::connect(&config.queue, Arc::clone(&executor)).await {
                    Ok(consumer) => {
                        backoff.reset();
                        match consumer.run().await {
                            Ok(()) => break,
                            Err(e) => error!(error = %e, "consumer stopped on failure"),
                        }
                    }
                    Err(e) => error!(error = %e, "queue connection failed"),
                }
                let delay = backoff.next_delay();
                warn!(delay_secs = delay.as_secs(), "reconnecting to run queue");
                tokio::time::sleep(delay).await;
            }
        }

        Commands::InitConfig => {
            config.save(&config_path)?;
            println!("Configuration written to {}", config_path.display());
        }

        Commands::Info => {
            println!("Cortex Worker v{}", version());
            println!("Queue URL:      {}", config.queue.url);
            println!("Queue name:     {}", config.queue.queue);
            println!("Data directory: {}", config.store.data_directory.display());
            println!("Engine command: {}", config.engine.command.display());
        }
    }

    Ok(())
}
