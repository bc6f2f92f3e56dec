//! `fs` and `path`: read-only file access and path manipulation
//!
//! Relative paths resolve against the module's base directory, which is the
//! step's working directory in production.

use mlua::prelude::*;
use std::path::{Path, PathBuf};

use crate::module::ContextModule;

pub struct FsModule {
    base_dir: PathBuf,
}

impl FsModule {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl ContextModule for FsModule {
    fn id(&self) -> &'static str {
        "fs"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let fs_table = lua.create_table()?;

        {
            let base_dir = self.base_dir.clone();
            fs_table.set(
                "read",
                lua.create_function(move |_, path: String| {
                    std::fs::read_to_string(base_dir.join(&path)).map_err(|e| {
                        LuaError::RuntimeError(format!("Failed to read \"{}\": {}", path, e))
                    })
                })?,
            )?;
        }

        {
            let base_dir = self.base_dir.clone();
            fs_table.set(
                "exists",
                lua.create_function(move |_, path: String| Ok(base_dir.join(path).exists()))?,
            )?;
        }

        {
            let base_dir = self.base_dir.clone();
            fs_table.set(
                "list",
                lua.create_function(move |_, path: Option<String>| {
                    let dir = base_dir.join(path.as_deref().unwrap_or("."));
                    let entries = std::fs::read_dir(&dir).map_err(|e| {
                        LuaError::RuntimeError(format!(
                            "Failed to list \"{}\": {}",
                            dir.display(),
                            e
                        ))
                    })?;

                    let mut names = Vec::new();
                    for entry in entries {
                        let entry = entry.map_err(LuaError::external)?;
                        names.push(entry.file_name().to_string_lossy().to_string());
                    }
                    names.sort();
                    Ok(names)
                })?,
            )?;
        }

        lua.globals().set(self.id(), fs_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Read-only file system access
---@class fs
fs = {}

---Read a whole file as text
---@param path string
---@return string
function fs.read(path) end

---Whether a file or directory exists
---@param path string
---@return boolean
function fs.exists(path) end

---Sorted entry names of a directory (defaults to the working directory)
---@param path? string
---@return string[]
function fs.list(path) end
"#
        .to_string()
    }
}

pub struct PathModule;

impl ContextModule for PathModule {
    fn id(&self) -> &'static str {
        "path"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let path_table = lua.create_table()?;

        path_table.set(
            "join",
            lua.create_function(|_, parts: LuaVariadic<String>| {
                let joined: PathBuf = parts.iter().collect();
                Ok(joined.to_string_lossy().to_string())
            })?,
        )?;

        path_table.set(
            "basename",
            lua.create_function(|_, path: String| {
                Ok(Path::new(&path)
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string()))
            })?,
        )?;

        path_table.set(
            "dirname",
            lua.create_function(|_, path: String| {
                let parent = Path::new(&path)
                    .parent()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default();
                Ok(if parent.is_empty() {
                    ".".to_string()
                } else {
                    parent
                })
            })?,
        )?;

        path_table.set(
            "extension",
            lua.create_function(|_, path: String| {
                Ok(Path::new(&path)
                    .extension()
                    .map(|ext| ext.to_string_lossy().to_string()))
            })?,
        )?;

        lua.globals().set(self.id(), path_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Path manipulation
---@class path
path = {}

---Join path segments
---@param ... string
---@return string
function path.join(...) end

---Last component of a path
---@param p string
---@return string|nil
function path.basename(p) end

---Parent directory of a path ("." when there is none)
---@param p string
---@return string
function path.dirname(p) end

---File extension without the dot
---@param p string
---@return string|nil
function path.extension(p) end
"#
        .to_string()
    }
}
