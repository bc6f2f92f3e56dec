//! Assembly of the evaluation context
//!
//! Builds the module registry a step script sees: `inputs` and `env` backed
//! by JSON-coercing storage, `log` and `context` bound to the platform, and
//! the helper libraries.

use evalstep_core::{
    CiPlatform, EnvSnapshot, InputOptions, KeyValueJsonStorage, LogLevel, LogSink, MatchKeyRule,
    PlatformLogSink, ProxyObject, RawLookup, StepConfig,
};
use evalstep_lua::{LogModule, ModuleRegistry, ProxyModule, ValueModule, with_helpers};
use std::path::Path;
use std::sync::Arc;

pub const INPUT_ENTITY: &str = "input";
pub const ENV_ENTITY: &str = "env variable";

/// Context for a real step run
pub fn build_context<P>(
    platform: Arc<P>,
    env: &EnvSnapshot,
    step: &StepConfig,
    working_dir: &Path,
) -> ModuleRegistry
where
    P: CiPlatform + 'static,
{
    let logger: Arc<dyn LogSink> = Arc::new(PlatformLogSink::new(platform.clone()));

    let input_lookup: RawLookup = {
        let platform = platform.clone();
        Arc::new(move |name: &str| platform.read_input(name, InputOptions::default()).ok())
    };

    let inputs = KeyValueJsonStorage::new(input_lookup, step.json_inputs.clone(), false, INPUT_ENTITY)
        .with_logger(logger.clone());
    let env_vars = KeyValueJsonStorage::new(env.lookup(), step.json_envs.clone(), true, ENV_ENTITY)
        .with_logger(logger.clone());

    let registry = ModuleRegistry::new()
        .with(ProxyModule::inputs(ProxyObject::new(Arc::new(inputs), INPUT_ENTITY)))
        .with(ProxyModule::env(ProxyObject::new(Arc::new(env_vars), ENV_ENTITY)))
        .with(LogModule::new(logger))
        .with(ValueModule::run_context(env.with_prefix("GITHUB_")));

    with_helpers(registry, working_dir)
}

/// Sink for contexts that are only inspected, never evaluated
struct NoOpLogSink;

impl LogSink for NoOpLogSink {
    fn write(&self, _level: LogLevel, _message: &str) {}
}

/// Context with empty sources, used for stub generation
pub fn stub_context(working_dir: &Path) -> ModuleRegistry {
    let empty: RawLookup = Arc::new(|_: &str| None);
    let storage = |entity: &str| {
        Arc::new(KeyValueJsonStorage::new(
            empty.clone(),
            MatchKeyRule::match_none(),
            true,
            entity,
        ))
    };

    let registry = ModuleRegistry::new()
        .with(ProxyModule::inputs(ProxyObject::new(
            storage(INPUT_ENTITY),
            INPUT_ENTITY,
        )))
        .with(ProxyModule::env(ProxyObject::new(storage(ENV_ENTITY), ENV_ENTITY)))
        .with(LogModule::new(Arc::new(NoOpLogSink)))
        .with(ValueModule::run_context(std::iter::empty()));

    with_helpers(registry, working_dir)
}
