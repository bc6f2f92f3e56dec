//! Step configuration
//!
//! Reads and validates the step's own inputs through a [`CiPlatform`]. Every
//! failure here is a [`ConfigError`] and happens before any evaluation.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::match_rule::MatchKeyRule;
use crate::platform::{CiPlatform, InputOptions};

pub const INPUT_EXPRESSION: &str = "expression";
pub const INPUT_SCRIPT_FILE: &str = "scriptFile";
pub const INPUT_EXTRACT_OUTPUTS: &str = "extractOutputs";
pub const INPUT_JSON_INPUTS: &str = "jsonInputs";
pub const INPUT_JSON_ENVS: &str = "jsonEnvs";
pub const INPUT_TIMEOUT_MS: &str = "timeoutMs";

/// Where the script comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    /// Inline code from the `expression` input
    Expression(String),
    /// Path from the `scriptFile` input
    File(PathBuf),
}

/// Validated step configuration
#[derive(Debug, Clone, PartialEq)]
pub struct StepConfig {
    pub script: ScriptSource,
    pub extract_outputs: bool,
    /// Inputs holding JSON (names match case-insensitively)
    pub json_inputs: MatchKeyRule,
    /// Environment variables holding JSON (names match case-sensitively)
    pub json_envs: MatchKeyRule,
    /// Evaluation deadline; `None` means no deadline
    pub timeout: Option<Duration>,
}

impl StepConfig {
    /// Reads the configuration from the platform's step inputs
    pub fn from_platform(platform: &dyn CiPlatform) -> Result<Self, ConfigError> {
        let expression = platform.read_input(INPUT_EXPRESSION, InputOptions::raw())?;
        let script_file = platform.read_input(INPUT_SCRIPT_FILE, InputOptions::default())?;
        let script = script_source(&expression, &script_file)?;

        let extract_outputs = parse_boolean(
            INPUT_EXTRACT_OUTPUTS,
            &platform.read_input(INPUT_EXTRACT_OUTPUTS, InputOptions::default())?,
        )?;

        let json_inputs = MatchKeyRule::parse(
            &platform.read_input(INPUT_JSON_INPUTS, InputOptions::default())?,
            false,
        );
        let json_envs = MatchKeyRule::parse(
            &platform.read_input(INPUT_JSON_ENVS, InputOptions::default())?,
            true,
        );

        let timeout = parse_timeout(
            INPUT_TIMEOUT_MS,
            &platform.read_input(INPUT_TIMEOUT_MS, InputOptions::default())?,
        )?;

        Ok(Self {
            script,
            extract_outputs,
            json_inputs,
            json_envs,
            timeout,
        })
    }
}

fn script_source(expression: &str, script_file: &str) -> Result<ScriptSource, ConfigError> {
    match (expression.is_empty(), script_file.is_empty()) {
        (false, true) => {
            let trimmed = expression.trim();
            if trimmed.is_empty() {
                return Err(ConfigError::EmptyExpression);
            }
            Ok(ScriptSource::Expression(trimmed.to_string()))
        }
        (true, false) => Ok(ScriptSource::File(PathBuf::from(script_file))),
        _ => Err(ConfigError::ScriptSource),
    }
}

/// Parses a boolean input
///
/// Only `true | True | TRUE | false | False | FALSE` are accepted.
pub fn parse_boolean(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "True" | "TRUE" => Ok(true),
        "false" | "False" | "FALSE" => Ok(false),
        _ => Err(ConfigError::InvalidBoolean {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Parses a millisecond timeout input; empty means no timeout
pub fn parse_timeout(name: &str, value: &str) -> Result<Option<Duration>, ConfigError> {
    if value.is_empty() {
        return Ok(None);
    }

    match value.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Some(Duration::from_millis(ms))),
        _ => Err(ConfigError::InvalidInteger {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}
