//! evalstep Lua runtime
//!
//! Runs step scripts inside a restricted Lua sandbox:
//! - Sandbox with a CPU-time budget
//! - Context module trait and registry, plus the built-in modules
//! - Tracked timers and promises for asynchronous scripts
//! - The evaluation engine publishing results as step outputs
//! - Stub generation for editor support

pub mod engine;
pub mod module;
pub mod modules;
pub mod promise;
pub mod sandbox;
pub mod timers;
pub mod value;

pub use engine::{EvalError, EvaluationOutcome, Evaluator, EvaluatorOptions};
pub use module::{ContextModule, ModuleRegistry};
pub use modules::{
    DotenvModule, FsModule, JsonModule, LogModule, PathModule, ProxyModule, SemverModule,
    ValueModule, YamlModule, with_helpers,
};
pub use promise::Promise;
pub use sandbox::{
    ExecutionTimeout, RunOptions, Sandbox, SandboxOptions, create_sandbox, is_execution_timeout,
    runtime_stubs,
};
pub use timers::{TimerId, TrackedTimers, register_timer_functions};
