//! Configuration module
//!
//! Settings shared by every CLI command.

use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory relative script paths and `fs` lookups resolve against
    pub working_dir: PathBuf,
}
