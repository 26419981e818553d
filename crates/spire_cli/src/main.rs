//! SPIRE CLI
//!
//! Runs goals of the SPIRE rule engine against a target manifest.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod manifest;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use spire_core::ExitCode;
use spire_engine::{Coordinator, EngineConfig};
use spire_goal::{Goal, GoalDriver, StdConsole, Test, testing};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::manifest::Manifest;

/// Filter used when neither `--log-level` nor `RUST_LOG` is set
const DEFAULT_LOG_FILTER: &str = "spire=info";

#[derive(Parser)]
#[command(name = "spire")]
#[command(about = "SPIRE - declarative build-rule engine", long_about = None)]
struct Cli {
    /// Worker threads for rule execution (default: one per core)
    #[arg(short, long, global = true, value_parser = clap::value_parser!(u16).range(1..))]
    jobs: Option<u16>,
    /// Log filter, e.g. `info` or `spire_engine=debug`
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests for targets in a manifest
    Test {
        /// Path to the target manifest
        #[arg(short, long)]
        manifest: PathBuf,
        /// Addresses to test (default: every target)
        addresses: Vec<String>,
    },
    /// List the goals and rules available for a manifest
    Rules {
        /// Path to the target manifest
        #[arg(short, long)]
        manifest: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref(), cli.log_format)?;

    let code = match cli.command {
        Commands::Test {
            manifest,
            addresses,
        } => run_tests(&manifest, &addresses, cli.jobs)?,
        Commands::Rules { manifest } => {
            list_rules(&manifest)?;
            ExitCode::SUCCESS
        }
    };

    std::process::exit(code.code());
}

fn init_tracing(level: Option<&str>, format: LogFormat) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).wrap_err("invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
    Ok(())
}

fn run_tests(path: &Path, addresses: &[String], jobs: Option<u16>) -> Result<ExitCode> {
    let manifest = Manifest::load(path)?;
    let roots = manifest.roots(addresses)?;
    let catalog = manifest.catalog()?;
    debug!(rules = catalog.len(), roots = roots.len(), "manifest loaded");

    let coordinator = Coordinator::new(Arc::new(catalog), EngineConfig::default());
    let driver = GoalDriver::new(coordinator.clone()).goal(testing::fast_test())?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(jobs) = jobs {
        builder.worker_threads(usize::from(jobs));
    }
    let runtime = builder
        .enable_all()
        .build()
        .wrap_err("failed to start worker pool")?;

    let code = runtime.block_on(driver.run(Test::NAME, roots, Arc::new(StdConsole::new())))?;

    let metrics = serde_json::to_string(&coordinator.metrics().snapshot())?;
    info!(
        run = %coordinator.run_id().short(),
        metrics = %metrics,
        exit_code = code.code(),
        "test goal finished"
    );
    Ok(code)
}

fn list_rules(path: &Path) -> Result<()> {
    let manifest = Manifest::load(path)?;
    let catalog = manifest.catalog()?;

    println!("Goals:");
    println!("  {:<20}{}", Test::NAME, testing::fast_test().description());
    println!();
    println!("Rules:");
    for rule in catalog.rules() {
        println!("  {rule}");
    }
    Ok(())
}
