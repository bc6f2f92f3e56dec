//! Run command handler
//!
//! Reads the step configuration, evaluates the script and publishes its
//! outputs. Any failure is reported once through the platform and turns
//! into a non-zero exit status.

use anyhow::{Context, Result};
use clap::Args;
use evalstep_core::{ActionOutputs, CiPlatform, EnvSnapshot, ScriptSource, StepConfig};
use evalstep_lua::{Evaluator, EvaluatorOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::context::build_context;
use crate::platform::GitHubPlatform;

#[derive(Args)]
pub struct RunArgs {
    /// Input value overriding its INPUT_<NAME> variable (repeatable)
    #[arg(short, long = "input", value_name = "NAME=VALUE", value_parser = parse_key_val)]
    inputs: Vec<(String, String)>,

    /// File receiving step outputs
    #[arg(long, env = "GITHUB_OUTPUT")]
    output_file: Option<PathBuf>,

    /// Memory limit for the Lua state, in megabytes
    #[arg(long, env = "EVALSTEP_MEMORY_LIMIT_MB")]
    memory_limit_mb: Option<usize>,
}

/// Parses a `name=value` pair; the value may itself contain `=`
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid NAME=VALUE: no `=` found in `{}`", s))?;
    if name.is_empty() {
        return Err(format!("invalid NAME=VALUE: empty name in `{}`", s));
    }
    Ok((name.to_string(), value.to_string()))
}

pub async fn handle_run_command(args: RunArgs, config: &Config) -> Result<ExitCode> {
    let env = EnvSnapshot::capture();
    let platform = Arc::new(GitHubPlatform::new(
        env.clone(),
        args.inputs.into_iter().collect(),
        args.output_file,
    ));
    let memory_limit = args.memory_limit_mb.map(|mb| mb * 1024 * 1024);

    Ok(execute(platform, &env, &config.working_dir, memory_limit).await)
}

/// Runs the step and reports a failure through `platform`
async fn execute<P>(
    platform: Arc<P>,
    env: &EnvSnapshot,
    working_dir: &Path,
    memory_limit: Option<usize>,
) -> ExitCode
where
    P: CiPlatform + 'static,
{
    match run_step(platform.clone(), env, working_dir, memory_limit).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = format!("{:#}", e);
            error!("Step failed: {}", message);
            platform.mark_failed(&message);
            ExitCode::FAILURE
        }
    }
}

async fn run_step<P>(
    platform: Arc<P>,
    env: &EnvSnapshot,
    working_dir: &Path,
    memory_limit: Option<usize>,
) -> Result<()>
where
    P: CiPlatform + 'static,
{
    let step = StepConfig::from_platform(&*platform).context("Invalid step configuration")?;

    let (code, source_label) = match &step.script {
        ScriptSource::Expression(code) => (code.clone(), "expression".to_string()),
        ScriptSource::File(path) => {
            let full_path = working_dir.join(path);
            let code = std::fs::read_to_string(&full_path)
                .with_context(|| format!("Failed to read script file {:?}", full_path))?;
            (code, path.display().to_string())
        }
    };

    let context = build_context(platform.clone(), env, &step, working_dir);
    let evaluator = Evaluator::with_options(
        context,
        EvaluatorOptions {
            source_label,
            memory_limit,
        },
    );

    let mut outputs = ActionOutputs::new(platform);
    evaluator
        .evaluate(&code, &mut outputs, step.extract_outputs, step.timeout)
        .await
        .into_result()?;

    info!("Step finished");
    Ok(())
}
