//! Pictor - asset resolution and caching pipeline CLI

mod sources;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pictor_common::logging::{init_logging, LogConfig, LogLevel};
use pictor_pipeline::{MemoryStore, MetadataStore, Pipeline, PipelineConfig, S3Config, S3Store};
use sources::{DirectorySink, JsonFileSource};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pictor")]
#[command(author, version, about = "Asset resolution and caching pipeline for static-site ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ingestion pipeline
    Run {
        /// Pipeline configuration file
        #[arg(short, long, default_value = "pictor.toml")]
        config: PathBuf,

        /// Directory containing one <query>.json rows file per configured query
        #[arg(short, long, default_value = "rows")]
        rows: PathBuf,

        /// Output directory for resolved content nodes
        #[arg(short, long, default_value = "content")]
        output: PathBuf,

        /// Use an in-memory metadata store instead of S3
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    init_logging(&LogConfig::with_level(log_level))?;

    match cli.command {
        Command::Run {
            config,
            rows,
            output,
            offline,
        } => {
            let contents = std::fs::read_to_string(&config)
                .with_context(|| format!("Failed to read config file {}", config.display()))?;
            let pipeline_config: PipelineConfig = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", config.display()))?;

            let source = JsonFileSource::new(rows);
            let mut sink = DirectorySink::new(output)?;

            let mut pipeline = Pipeline::new(pipeline_config.clone())?;
            if pipeline_config.remote_cache.enabled && !pipeline_config.ignore_images {
                let store: Arc<dyn MetadataStore> = if offline {
                    Arc::new(MemoryStore::new())
                } else {
                    Arc::new(S3Store::new(S3Config::from_env()?))
                };
                pipeline = pipeline.with_store(store);
            }

            let report = pipeline.run(&source, &mut sink).await?;
            info!(
                records = report.records,
                assets = report.assets,
                cached = report.already_cached,
                downloaded = report.downloads.downloaded,
                failed = report.downloads.failed,
                "pipeline finished"
            );
        }
    }

    Ok(())
}
