//! evalstep core
//!
//! Language-independent pieces of the script evaluation step:
//! - Key matching rules and the lazy JSON-coercing key/value storage
//! - The property proxy handed to scripts as `inputs` / `env`
//! - Output publishing and the CI platform seam
//! - Step configuration parsing

pub mod config;
pub mod error;
pub mod log;
pub mod match_rule;
pub mod outputs;
pub mod platform;
pub mod proxy;
pub mod storage;

pub use config::{ScriptSource, StepConfig};
pub use error::{ConfigError, OutputError, PlatformError, ProxyError, StorageError};
pub use log::{LogLevel, LogSink};
pub use match_rule::MatchKeyRule;
pub use outputs::{ActionOutputs, OutputSink, format_output};
pub use platform::{CiPlatform, EnvSnapshot, InputOptions, PlatformLogSink};
pub use proxy::ProxyObject;
pub use storage::{KeyValueJsonStorage, RawLookup, ValueLookup};
