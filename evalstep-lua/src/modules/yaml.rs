//! `yaml`: parse and emit YAML documents

use mlua::prelude::*;
use serde_json::Value as JsonValue;

use crate::module::ContextModule;
use crate::value::lua_to_json;

pub struct YamlModule;

impl ContextModule for YamlModule {
    fn id(&self) -> &'static str {
        "yaml"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let yaml_table = lua.create_table()?;

        yaml_table.set(
            "parse",
            lua.create_function(|lua, text: String| {
                let value: JsonValue = serde_yaml::from_str(&text)
                    .map_err(|e| LuaError::RuntimeError(format!("Invalid YAML: {}", e)))?;
                lua.to_value(&value)
            })?,
        )?;

        yaml_table.set(
            "stringify",
            lua.create_function(|lua, value: LuaValue| {
                let value = lua_to_json(lua, value)?;
                serde_yaml::to_string(&value).map_err(LuaError::external)
            })?,
        )?;

        lua.globals().set(self.id(), yaml_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---YAML documents
---@class yaml
yaml = {}

---Parse a YAML document
---@param text string
---@return any
function yaml.parse(text) end

---Render a value as a YAML document
---@param value any
---@return string
function yaml.stringify(value) end
"#
        .to_string()
    }
}
