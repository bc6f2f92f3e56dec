//! Log types

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Destination for log lines produced while an evaluation runs
///
/// Implementations must be Send + Sync because Lua callbacks and timer tasks
/// hold on to the sink.
pub trait LogSink: Send + Sync {
    /// Write a log message
    fn write(&self, level: LogLevel, message: &str);

    /// Register a secret to be redacted from later log lines
    fn mask(&self, _secret: &str) {}
}
