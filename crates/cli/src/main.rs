//! mapcheck CLI - Main Entry Point
//!
//! Runs verification presets against a web map application and
//! inspects the presets and visual baselines available to a run.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{baselines, presets, run};
use mapcheck_common::{RunConfig, DEFAULT_CONFIG_FILE};

/// mapcheck - end-to-end verification for web map applications
#[derive(Parser)]
#[command(name = "mapcheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a preset
    Run(run::RunArgs),

    /// List available presets
    Presets(presets::PresetsArgs),

    /// List stored visual baselines
    Baselines(baselines::BaselinesArgs),

    /// Show version information
    Version,
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Run(args) => run::execute(args, &cli.config, cli.format).await,
        Commands::Presets(args) => presets::execute(args, cli.format).map(|_| 0),
        Commands::Baselines(args) => {
            let config = RunConfig::load(&cli.config)?;
            baselines::execute(args, config.baseline_dir, cli.format).map(|_| 0)
        }
        Commands::Version => {
            println!("mapcheck v{}", mapcheck_common::VERSION);
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match dispatch(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}
