//! `semver`: semantic version comparison

use mlua::prelude::*;
use ::semver::{Version, VersionReq};
use std::cmp::Ordering;

use crate::module::ContextModule;

pub struct SemverModule;

/// Parses a version, accepting a leading `v` or `=`
fn parse_version(text: &str) -> Result<Version, ::semver::Error> {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('='))
        .unwrap_or(trimmed);
    Version::parse(trimmed)
}

fn version_arg(text: &str) -> LuaResult<Version> {
    parse_version(text)
        .map_err(|e| LuaError::RuntimeError(format!("Invalid version \"{}\": {}", text, e)))
}

impl ContextModule for SemverModule {
    fn id(&self) -> &'static str {
        "semver"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let semver_table = lua.create_table()?;

        semver_table.set(
            "compare",
            lua.create_function(|_, (a, b): (String, String)| {
                let ordering = version_arg(&a)?.cmp(&version_arg(&b)?);
                Ok(match ordering {
                    Ordering::Less => -1,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                })
            })?,
        )?;

        semver_table.set(
            "satisfies",
            lua.create_function(|_, (version, range): (String, String)| {
                let req = VersionReq::parse(&range).map_err(|e| {
                    LuaError::RuntimeError(format!("Invalid range \"{}\": {}", range, e))
                })?;
                Ok(parse_version(&version).is_ok_and(|v| req.matches(&v)))
            })?,
        )?;

        semver_table.set(
            "valid",
            lua.create_function(|_, version: String| {
                Ok(parse_version(&version).ok().map(|v| v.to_string()))
            })?,
        )?;

        lua.globals().set(self.id(), semver_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Semantic versions
---@class semver
semver = {}

---Compare two versions
---@param a string
---@param b string
---@return integer -1, 0 or 1
function semver.compare(a, b) end

---Whether `version` falls within `range` (e.g. ">=1.2, <2")
---@param version string
---@param range string
---@return boolean
function semver.satisfies(version, range) end

---Normalized version string, or nil when `version` isn't valid
---@param version string
---@return string|nil
function semver.valid(version) end
"#
        .to_string()
    }
}
