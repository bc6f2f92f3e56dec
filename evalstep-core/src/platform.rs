//! CI platform and host environment seams
//!
//! The evaluation step never talks to the CI system or the process
//! environment directly. [`CiPlatform`] is the SDK surface it needs, and
//! [`EnvSnapshot`] is an immutable copy of the environment taken once at
//! start-up.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ConfigError, PlatformError};
use crate::log::{LogLevel, LogSink};
use crate::storage::RawLookup;

/// Options for [`CiPlatform::read_input`]
#[derive(Debug, Clone, Copy)]
pub struct InputOptions {
    /// Fail with [`ConfigError::MissingInput`] when the input is empty
    pub required: bool,
    /// Trim leading and trailing whitespace
    pub trim_whitespace: bool,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            required: false,
            trim_whitespace: true,
        }
    }
}

impl InputOptions {
    pub fn required() -> Self {
        Self {
            required: true,
            ..Self::default()
        }
    }

    /// Returns the value exactly as the platform supplied it
    pub fn raw() -> Self {
        Self {
            required: false,
            trim_whitespace: false,
        }
    }
}

/// The CI platform SDK surface used by the step
pub trait CiPlatform: Send + Sync {
    /// Reads a named step input; a missing input reads as an empty string
    fn read_input(&self, name: &str, options: InputOptions) -> Result<String, ConfigError>;

    /// Publishes a named output
    fn write_output(&self, name: &str, value: &str) -> Result<(), PlatformError>;

    /// Writes a log line
    fn log(&self, level: LogLevel, message: &str);

    /// Registers a secret so the platform redacts it from logs
    fn mask(&self, secret: &str);

    /// Marks the step as failed with a diagnostic message
    fn mark_failed(&self, message: &str);
}

/// Adapter letting any [`CiPlatform`] act as a [`LogSink`]
pub struct PlatformLogSink<P: CiPlatform + ?Sized> {
    platform: Arc<P>,
}

impl<P: CiPlatform + ?Sized> PlatformLogSink<P> {
    pub fn new(platform: Arc<P>) -> Self {
        Self { platform }
    }
}

impl<P: CiPlatform + ?Sized> LogSink for PlatformLogSink<P> {
    fn write(&self, level: LogLevel, message: &str) {
        self.platform.log(level, message);
    }

    fn mask(&self, secret: &str) {
        self.platform.mask(secret);
    }
}

/// Immutable copy of the process environment
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: Arc<HashMap<String, String>>,
}

impl EnvSnapshot {
    /// Captures the current process environment
    ///
    /// Variables whose name or value isn't valid unicode are skipped.
    pub fn capture() -> Self {
        Self::from_vars(std::env::vars_os().filter_map(|(key, value)| {
            Some((key.into_string().ok()?, value.into_string().ok()?))
        }))
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: Arc::new(
                vars.into_iter()
                    .map(|(key, value)| (key.into(), value.into()))
                    .collect(),
            ),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Variables whose name starts with `prefix`
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.vars
            .iter()
            .filter(move |(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// A raw lookup function over this snapshot
    pub fn lookup(&self) -> RawLookup {
        let vars = self.vars.clone();
        Arc::new(move |name: &str| vars.get(name).cloned())
    }
}
