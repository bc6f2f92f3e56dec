//! Stubs command handler
//!
//! Generates editor support for step scripts: a `.luarc.json` for the Lua
//! language server and one annotation file per context module.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use evalstep_lua::{ContextModule, ModuleRegistry, runtime_stubs};
use serde_json::json;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::context::stub_context;

/// Globals installed by the runtime itself rather than by a module
const RUNTIME_GLOBALS: [&str; 5] = [
    "promise",
    "set_timeout",
    "set_interval",
    "clear_timeout",
    "clear_interval",
];

const STUBS_DIR: &str = ".evalstep/stubs";

#[derive(Args)]
pub struct StubsArgs {
    /// Output directory for generated files
    #[arg(short, long, default_value = ".")]
    output: String,

    /// Generate only .luarc.json
    #[arg(long, conflicts_with = "stubs_only")]
    config_only: bool,

    /// Generate only stub files
    #[arg(long)]
    stubs_only: bool,
}

pub fn handle_stubs_command(args: StubsArgs, config: &Config) -> Result<()> {
    let output_path = Path::new(&args.output);
    let registry = stub_context(&config.working_dir);

    if !args.stubs_only {
        generate_luarc_json(output_path, &registry)?;
    }

    if !args.config_only {
        generate_stub_files(output_path, &registry)?;
    }

    println!("{}", "✓ Lua development files generated!".green().bold());
    println!();
    println!("{}", "Next steps:".bold());
    println!("  1. Install Lua Language Server in your editor");
    println!("  2. Open your step script to see autocomplete and type hints");
    println!(
        "  3. Use {} to try it locally",
        "evalstep run --input expression=...".cyan()
    );

    Ok(())
}

fn luarc_content(registry: &ModuleRegistry) -> Result<String> {
    let globals: Vec<&str> = registry
        .modules()
        .iter()
        .map(|module| module.id())
        .chain(RUNTIME_GLOBALS)
        .collect();

    let luarc = json!({
        "$schema": "https://raw.githubusercontent.com/sumneko/vscode-lua/master/setting/schema.json",
        "runtime": {
            "version": "Lua 5.4"
        },
        "diagnostics": {
            "globals": globals
        },
        "workspace": {
            "library": [STUBS_DIR],
            "checkThirdParty": false
        },
        "completion": {
            "callSnippet": "Both"
        }
    });

    let mut content = serde_json::to_string_pretty(&luarc)?;
    content.push('\n');
    Ok(content)
}

/// Generate .luarc.json for Lua LSP configuration
fn generate_luarc_json(output_path: &Path, registry: &ModuleRegistry) -> Result<()> {
    let luarc_path = output_path.join(".luarc.json");

    fs::write(&luarc_path, luarc_content(registry)?)
        .with_context(|| format!("Failed to write .luarc.json to {:?}", luarc_path))?;

    println!("  {} .luarc.json", "Created".green());

    Ok(())
}

/// Generate stub files for the context modules
///
/// Stubs come from the module implementations, so they can't drift from
/// what scripts actually see.
fn generate_stub_files(output_path: &Path, registry: &ModuleRegistry) -> Result<()> {
    let stubs_dir = output_path.join(STUBS_DIR);
    fs::create_dir_all(&stubs_dir)
        .with_context(|| format!("Failed to create stubs directory at {:?}", stubs_dir))?;

    let files = registry
        .modules()
        .iter()
        .map(|module| (module.id(), module.stubs()))
        .chain(std::iter::once(("runtime", runtime_stubs())));

    for (name, stub_content) in files {
        let stub_path = stubs_dir.join(format!("{}.lua", name));

        fs::write(&stub_path, stub_content)
            .with_context(|| format!("Failed to write stub file {:?}", stub_path))?;

        println!("  {} {}.lua", "Created".green(), name);
    }

    println!(
        "  {} in {}",
        "Stubs ready".green(),
        stubs_dir.display().to_string().cyan()
    );

    Ok(())
}
