//! Context modules available to evaluated scripts
//!
//! - `inputs` / `env`: read-only views of step inputs and environment
//! - `log`: step logging and secret masking
//! - `context`: CI run metadata
//! - `json`, `yaml`, `dotenv`, `semver`, `fs`, `path`: helper libraries

pub mod dotenv;
pub mod fs;
pub mod json;
pub mod log;
pub mod proxy;
pub mod semver;
pub mod value;
pub mod yaml;

use std::path::PathBuf;

use crate::module::ModuleRegistry;

pub use self::dotenv::DotenvModule;
pub use self::fs::{FsModule, PathModule};
pub use self::json::JsonModule;
pub use self::log::LogModule;
pub use self::proxy::ProxyModule;
pub use self::semver::SemverModule;
pub use self::value::ValueModule;
pub use self::yaml::YamlModule;

/// Adds the helper libraries to `registry`
///
/// `fs` and `dotenv` resolve relative paths against `base_dir`.
pub fn with_helpers(registry: ModuleRegistry, base_dir: impl Into<PathBuf>) -> ModuleRegistry {
    let base_dir = base_dir.into();
    registry
        .with(JsonModule)
        .with(YamlModule)
        .with(DotenvModule::new(base_dir.clone()))
        .with(SemverModule)
        .with(FsModule::new(base_dir))
        .with(PathModule)
}
