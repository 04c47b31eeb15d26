//! dypxFlow - batch PACS workflows on ChRIS
//!
//! Main entry point for the dypx CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

mod commands;
mod jobs;

use commands::{launch, run, status, wait};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// dypxFlow - batch PACS query, retrieve and anonymization workflows on ChRIS
#[derive(Parser)]
#[command(name = "dypx")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (skips discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// CUBE API root, e.g. http://localhost:8000/api/v1/
    #[arg(long, global = true, env = "CUBEurl")]
    pub url: Option<String>,

    /// CUBE user token
    #[arg(long, global = true, env = "CHRIS_USER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the anonymization pipeline for every spreadsheet row
    Run(run::RunArgs),

    /// Launch one pipeline and wait for its verdict
    Launch(launch::LaunchArgs),

    /// Launch one pipeline and block until a node ends
    Wait(wait::WaitArgs),

    /// Check that the CUBE backend answers
    Status(status::StatusArgs),
}

impl Commands {
    /// Directory the JSON log file goes to.
    fn log_dir(&self) -> PathBuf {
        match self {
            Commands::Run(args) => args.outputdir.join("logs"),
            _ => dypx_config::xdg_config_dir()
                .map(|d| d.join("logs"))
                .unwrap_or_else(|| PathBuf::from("logs")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable) + daily JSON file
    let filter = if cli.verbose {
        "dypx=debug,dypx_pipeline=debug,dypx_client=debug,dypx_config=debug,info"
    } else {
        "dypx=info,dypx_pipeline=info,dypx_client=info,warn"
    };

    let file_appender = tracing_appender::rolling::daily(cli.command.log_dir(), "dypx.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "dypx=trace,dypx_pipeline=trace,dypx_client=debug,dypx_config=debug,info",
                )),
        )
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    let mut backend = config.backend();
    if let Some(url) = cli.url {
        backend.url = url;
    }
    if let Some(token) = cli.token {
        backend.token = token;
    }
    config.backend = Some(backend);
    config.validate().context("Invalid configuration")?;

    let ctx = commands::Context {
        config,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Run(args) => run::run(args, &ctx).await,
        Commands::Launch(args) => launch::run(args, &ctx).await,
        Commands::Wait(args) => wait::run(args, &ctx).await,
        Commands::Status(args) => status::run(args, &ctx).await,
    }
}

/// Load an explicit config file, or discover and merge the layers.
fn load_config(path: Option<&Path>) -> Result<dypx_config::DypxConfig> {
    if let Some(path) = path {
        return dypx_config::load_config_file(path)
            .with_context(|| format!("Failed to load {}", path.display()));
    }

    let loaded = dypx_config::load_config(None)?;
    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }
    for path in loaded.loaded_from() {
        tracing::debug!(path = %path.display(), "Loaded config layer");
    }
    Ok(loaded.config)
}
