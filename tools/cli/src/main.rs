//! backsync CLI - copy or compare files between two storage backends.
//!
//! The source and target backends are read from a YAML config file;
//! `backup` copies what the target lacks, `differences` lists it.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use backsync_storage::{create_storage, StorageRegistry};
use backsync_sync::SyncEngine;

use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};

#[derive(Parser)]
#[command(name = "backsync")]
#[command(about = "backsync - Back up files between disks and object stores")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the YAML config file.
    #[arg(
        short,
        long,
        env = "BACKSYNC_CONFIG",
        default_value = DEFAULT_CONFIG_PATH,
        global = true
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy every source file the target does not hold.
    Backup,

    /// Write the paths of source files missing from the target to a file.
    Differences {
        /// Output file, one path per line.
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Backup => cmd_backup(&config).await,
        Commands::Differences { output } => cmd_differences(&config, &output).await,
    }
}

/// Map `-v` repetitions to a log level; warnings and errors always show.
fn level_for(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the flags.
fn init_logging(verbose: u8) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::default()
            .add_directive(LevelFilter::from_level(level_for(verbose)).into()),
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Build and register both backends, then wire them into an engine.
async fn build_engine(config: &AppConfig) -> Result<SyncEngine> {
    let registry = Arc::new(StorageRegistry::new());

    let source = create_storage(&config.source, &registry)
        .await
        .with_context(|| format!("Failed to create source storage '{}'", config.source.name()))?;
    let target = create_storage(&config.target, &registry)
        .await
        .with_context(|| format!("Failed to create target storage '{}'", config.target.name()))?;
    info!(
        "source '{}' ({}), target '{}' ({})",
        source.name(),
        config.source.kind(),
        target.name(),
        config.target.kind()
    );

    SyncEngine::new(registry, source, target, config.sync_config()).context("Failed to start run")
}

async fn cmd_backup(config: &AppConfig) -> Result<()> {
    let engine = build_engine(config).await?;
    let report = engine.backup().await.context("Backup failed")?;

    println!("backup completed in {}", report.elapsed_clock());
    if report.failed > 0 {
        println!(
            "{} files transferred, {} failed (see log)",
            report.transferred, report.failed
        );
    }
    Ok(())
}

async fn cmd_differences(config: &AppConfig, output: &Path) -> Result<()> {
    let engine = build_engine(config).await?;
    let mut sink = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("Failed to open output file {}", output.display()))?;

    let report = engine
        .diff(&mut sink)
        .await
        .context("Comparison failed")?;

    println!("differences completed in {}", report.elapsed_clock());
    println!("{} missing files written to {}", report.missing, output.display());
    Ok(())
}
