//! Error types shared by the evaluation step

use thiserror::Error;

/// Malformed or missing step configuration
///
/// Raised before any evaluation is attempted, so no output has been
/// published yet when one of these surfaces.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required input was not supplied
    #[error("Input required and not supplied: {0}")]
    MissingInput(String),

    /// A boolean input holds something other than the accepted literals
    #[error(
        "Input \"{name}\" does not meet YAML 1.2 \"Core Schema\" specification: {value}. \
         Support boolean input list: `true | True | TRUE | false | False | FALSE`"
    )]
    InvalidBoolean { name: String, value: String },

    /// A numeric input is not a positive integer
    #[error("Invalid \"{name}\" input value: {value}. Expected a positive integer")]
    InvalidInteger { name: String, value: String },

    /// Neither or both of the script sources were set
    #[error("Exactly one of \"expression\" and \"scriptFile\" inputs must be set")]
    ScriptSource,

    /// The expression input was set but is blank
    #[error("Empty expression")]
    EmptyExpression,
}

/// Failure while decoding a raw value as JSON
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Can't parse \"{key}\" {entity} as JSON. {message}")]
    Parse {
        key: String,
        entity: String,
        message: String,
    },
}

/// Failure reading a property through a [`crate::proxy::ProxyObject`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// The property key was not a string
    #[error("{entity} name should be a string")]
    NonStringKey { entity: String },

    /// The underlying lookup failed
    #[error("Error reading \"{name}\" {entity}. {cause}")]
    Lookup {
        name: String,
        entity: String,
        cause: String,
    },

    /// The object is read-only
    #[error("Can't assign \"{name}\": {entity} values are read-only")]
    ReadOnly { name: String, entity: String },
}

/// Errors reported by the CI platform collaborator
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Failed to write output \"{name}\": {source}")]
    Output {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The output name or value can't be expressed in the platform's protocol
    #[error("Invalid output \"{name}\": {reason}")]
    InvalidOutput { name: String, reason: String },
}

/// Failure while publishing evaluation outputs
#[derive(Debug, Error)]
pub enum OutputError {
    /// A single value could not be rendered as an output string
    #[error("Can't format \"{name}\" output. {cause}")]
    Format { name: String, cause: String },

    /// The platform rejected the write
    #[error(transparent)]
    Platform(#[from] PlatformError),
}
