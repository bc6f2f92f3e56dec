//! Static values bound under a global name (e.g. the run `context`)

use mlua::prelude::*;
use serde_json::{Map, Value as JsonValue};

use crate::module::ContextModule;
use crate::value::json_to_lua;

/// Installs a JSON value as a global; every evaluation gets its own copy
pub struct ValueModule {
    id: &'static str,
    value: JsonValue,
    description: &'static str,
}

impl ValueModule {
    pub fn new(id: &'static str, value: JsonValue, description: &'static str) -> Self {
        Self {
            id,
            value,
            description,
        }
    }

    /// The `context` global: CI run metadata from `GITHUB_*` variables
    ///
    /// `GITHUB_RUN_ID` becomes `context.run_id`; the prefix is dropped and
    /// the rest lower-cased.
    pub fn run_context<'a>(vars: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut context = Map::new();
        for (key, value) in vars {
            if let Some(name) = key.strip_prefix("GITHUB_") {
                context.insert(
                    name.to_lowercase(),
                    JsonValue::String(value.to_string()),
                );
            }
        }
        Self::new(
            "context",
            JsonValue::Object(context),
            "CI run metadata (`GITHUB_SHA` is `context.sha`)",
        )
    }
}

impl ContextModule for ValueModule {
    fn id(&self) -> &'static str {
        self.id
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        lua.globals()
            .set(self.id, json_to_lua(lua, Some(&self.value))?)
    }

    fn stubs(&self) -> String {
        format!(
            "---@meta\n\n---{}\n---@type any\n{} = {{}}\n",
            self.description, self.id
        )
    }
}
