//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod run;
mod stubs;

pub use run::RunArgs;
pub use stubs::StubsArgs;

use anyhow::Result;
use clap::Subcommand;
use std::process::ExitCode;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate the step script and publish its outputs
    Run(RunArgs),
    /// Generate Lua development files (.luarc.json and stubs)
    Stubs(StubsArgs),
}

/// Routes the command to its handler
pub async fn handle_command(command: Commands, config: &Config) -> Result<ExitCode> {
    match command {
        Commands::Run(args) => run::handle_run_command(args, config).await,
        Commands::Stubs(args) => {
            stubs::handle_stubs_command(args, config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
