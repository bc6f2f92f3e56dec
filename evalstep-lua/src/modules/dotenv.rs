//! `dotenv`: read `.env` files without touching the process environment
//!
//! Relative paths resolve against the module's base directory.

use mlua::prelude::*;
use std::path::PathBuf;

use crate::module::ContextModule;

pub struct DotenvModule {
    base_dir: PathBuf,
}

impl DotenvModule {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl ContextModule for DotenvModule {
    fn id(&self) -> &'static str {
        "dotenv"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let dotenv_table = lua.create_table()?;

        let base_dir = self.base_dir.clone();
        dotenv_table.set(
            "load",
            lua.create_function(move |lua, path: String| {
                let invalid = |e: ::dotenv::Error| {
                    LuaError::RuntimeError(format!("Invalid dotenv file \"{}\": {}", path, e))
                };

                let vars = lua.create_table()?;
                for item in ::dotenv::from_path_iter(base_dir.join(&path)).map_err(invalid)? {
                    let (key, value) = item.map_err(invalid)?;
                    vars.set(key, value)?;
                }
                Ok(vars)
            })?,
        )?;

        lua.globals().set(self.id(), dotenv_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---.env files
---@class dotenv
dotenv = {}

---Read `KEY=value` lines of a file into a table. Comments and blank lines
---are skipped; the process environment is left unchanged.
---@param path string relative to the working directory
---@return table<string, string>
function dotenv.load(path) end
"#
        .to_string()
    }
}
