//! PDR Ingest - discover and ingest Product Delivery Records

use anyhow::{Context, Result};
use clap::Parser;
use pdr_common::logging::{init_logging, LogConfig, LogLevel};
use pdr_common::types::Manifest;
use pdr_ingest::admission::{AdmissionController, SfnExecutionTarget, SqsMessageSource};
use pdr_ingest::collections::{CollectionStore, ObjectCollectionStore};
use pdr_ingest::config::IngestConfig;
use pdr_ingest::dispatch::{GranuleDispatcher, ManifestForwarder, SqsDispatcher, SqsManifestForwarder};
use pdr_ingest::storage::{ObjectStore, S3Storage, StorageConfig};
use pdr_ingest::transport::Transport;
use pdr_ingest::{PdrTask, TaskDeps};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pdr-ingest")]
#[command(author, version, about = "PDR discovery and ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Provider protocol (ftp, http, https, sftp); defaults to PDR_PROVIDER_PROTOCOL
    #[arg(short, long, global = true)]
    protocol: Option<String>,

    /// Queue the output instead of returning it
    #[arg(short, long, global = true)]
    queue: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// List the provider and report PDRs not yet processed
    Discover,

    /// Download, parse and record one PDR
    Parse {
        /// PDR file name
        name: String,

        /// Directory on the provider containing the PDR
        #[arg(long, default_value = "/")]
        path: String,
    },

    /// Start queued executions of a state machine, bounding how many run at once
    Admit {
        /// Queue holding pending execution inputs
        #[arg(long, env = "PDR_ADMISSION_SOURCE_URL")]
        source: String,

        /// State machine whose running executions are throttled
        #[arg(long, env = "PDR_STATE_MACHINE_ARN")]
        state_machine_arn: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("pdr-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    init_logging(&log_config)?;

    let config = IngestConfig::from_env().context("Failed to load ingest configuration")?;

    match cli.command {
        Command::Discover => {
            let task = select("discover", cli.protocol.as_deref(), cli.queue, &config)?;
            run_task(task, &config, None).await?;
        },
        Command::Parse { name, path } => {
            let task = select("parse", cli.protocol.as_deref(), cli.queue, &config)?;
            let pdr = Manifest::new(name, path);
            run_task(task, &config, Some(&pdr)).await?;
        },
        Command::Admit {
            source,
            state_machine_arn,
        } => {
            info!(
                max = config.max_concurrent_executions,
                state_machine = %state_machine_arn,
                "Starting admission loop"
            );

            let controller = AdmissionController::new(
                SfnExecutionTarget::from_config(&config.queues, state_machine_arn),
                SqsMessageSource::from_config(&config.queues, source),
                config.max_concurrent_executions,
            );

            controller
                .run(async {
                    tokio::signal::ctrl_c().await.ok();
                })
                .await;
        },
    }

    Ok(())
}

fn select(operation: &str, protocol: Option<&str>, queue: bool, config: &IngestConfig) -> Result<PdrTask> {
    let protocol = protocol.unwrap_or_else(|| config.provider.protocol.as_str());
    Ok(PdrTask::select(operation, protocol, queue)?)
}

async fn run_task(task: PdrTask, config: &IngestConfig, pdr: Option<&Manifest>) -> Result<()> {
    info!(task = ?task, "Running task");

    let transport: Arc<dyn Transport> = Arc::new(task.transport(config)?);
    let store: Arc<dyn ObjectStore> = Arc::new(S3Storage::new(StorageConfig::from_env()?));
    let collections: Arc<dyn CollectionStore> =
        Arc::new(ObjectCollectionStore::new(Arc::clone(&store), config.stack.clone()));

    let mut dispatcher: Option<Arc<dyn GranuleDispatcher>> = None;
    let mut forwarder: Option<Arc<dyn ManifestForwarder>> = None;
    match task {
        PdrTask::ParseAndQueue(_) => {
            dispatcher = Some(Arc::new(SqsDispatcher::from_config(&config.queues)?));
        },
        PdrTask::DiscoverAndQueue(_) => {
            forwarder = Some(Arc::new(SqsManifestForwarder::from_config(
                &config.queues,
                &config.stack,
            )?));
        },
        PdrTask::Discover(_) | PdrTask::Parse(_) => {},
    }

    let deps = TaskDeps {
        transport,
        store,
        collections,
        dispatcher,
        forwarder,
    };

    let output = task.run(config, deps, pdr).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    info!("Task complete");
    Ok(())
}
