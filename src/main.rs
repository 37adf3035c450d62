//! Binary entry point for seenstore.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use seenstore::cli::{ConfigCommand, MeshCommand, RunCommand};
use seenstore::config::StoreConfig;
use seenstore::observability::{self, InitOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Seenstore - seen-content store and rate limiter for crawler fleets.
#[derive(Parser)]
#[command(name = "seenstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "SEENSTORE_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Serve Prometheus metrics over HTTP while running.
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run a store script against one standalone store.
    Run {
        /// Script file (stdin when omitted).
        script: Option<PathBuf>,
    },

    /// Run a store script across replicated in-process peers.
    Mesh {
        /// Number of peers.
        #[arg(short, long, default_value = "2")]
        peers: usize,

        /// Script file (stdin when omitted).
        script: Option<PathBuf>,
    },

    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init_from_config(
        &config.observability,
        InitOptions {
            verbose: cli.verbose,
            metrics_expose: cli.metrics,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

async fn run_command(command: Commands, config: &StoreConfig) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    match command {
        Commands::Run { script } => {
            let source = read_script(script.as_deref())?;
            RunCommand::new().execute(config, &source, &mut stdout)?;
        },
        Commands::Mesh { peers, script } => {
            let source = read_script(script.as_deref())?;
            MeshCommand::new(peers)
                .execute(config, &source, &mut stdout)
                .await?;
        },
        Commands::Config => {
            ConfigCommand::new().execute(config, &mut stdout)?;
        },
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> seenstore::Result<StoreConfig> {
    match path {
        Some(path) => StoreConfig::load_from_file(path),
        None => StoreConfig::load_default(),
    }
}

fn read_script(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read script {}", path.display())),
        None => {
            let mut source = String::new();
            std::io::stdin()
                .read_to_string(&mut source)
                .context("failed to read script from stdin")?;
            Ok(source)
        },
    }
}
