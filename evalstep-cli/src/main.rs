//! evalstep CLI
//!
//! Runs a Lua expression or script as a CI step: inputs and environment are
//! exposed to the script, its result is published as step outputs.

mod commands;
mod config;
mod context;
mod platform;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "evalstep")]
#[command(about = "Evaluate Lua scripts as CI steps", long_about = None)]
struct Cli {
    /// Directory script files and `fs` paths resolve against
    #[arg(long, env = "GITHUB_WORKSPACE", default_value = ".")]
    working_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    // stdout carries workflow commands, so diagnostics go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evalstep=info,evalstep_lua=info,evalstep_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config {
        working_dir: cli.working_dir,
    };

    handle_command(cli.command, &config).await
}
