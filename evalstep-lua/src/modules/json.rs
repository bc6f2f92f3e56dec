//! `json`: encode and decode JSON text

use mlua::prelude::*;
use serde_json::Value as JsonValue;

use crate::module::ContextModule;
use crate::value::lua_to_json;

pub struct JsonModule;

impl ContextModule for JsonModule {
    fn id(&self) -> &'static str {
        "json"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let json_table = lua.create_table()?;

        json_table.set(
            "encode",
            lua.create_function(|lua, (value, pretty): (LuaValue, Option<bool>)| {
                let value = lua_to_json(lua, value)?;
                let text = if pretty.unwrap_or(false) {
                    serde_json::to_string_pretty(&value)
                } else {
                    serde_json::to_string(&value)
                };
                text.map_err(LuaError::external)
            })?,
        )?;

        json_table.set(
            "decode",
            lua.create_function(|lua, text: String| {
                let value: JsonValue = serde_json::from_str(&text)
                    .map_err(|e| LuaError::RuntimeError(format!("Invalid JSON: {}", e)))?;
                lua.to_value(&value)
            })?,
        )?;

        json_table.set("null", lua.null())?;

        lua.globals().set(self.id(), json_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---JSON encoding
---@class json
---@field null lightuserdata Placeholder for JSON null inside tables
json = {}

---Encode a value as JSON text
---@param value any
---@param pretty? boolean Indent the output
---@return string
function json.encode(value, pretty) end

---Decode JSON text
---@param text string
---@return any
function json.decode(text) end
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lua() -> Lua {
        let lua = Lua::new();
        JsonModule.register(&lua).unwrap();
        lua
    }

    #[test]
    fn test_encode() {
        let lua = lua();
        let text: String = lua
            .load(r#"return json.encode({a = 1, b = {true, "x"}})"#)
            .eval()
            .unwrap();
        let value: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(value, serde_json::json!({"a": 1, "b": [true, "x"]}));
    }

    #[test]
    fn test_decode() {
        let lua = lua();
        let value: i64 = lua
            .load(r#"return json.decode('{"list": [10, 20]}').list[2]"#)
            .eval()
            .unwrap();
        assert_eq!(value, 20);

        let is_null: bool = lua
            .load(r#"return json.decode('[null]')[1] == json.null"#)
            .eval()
            .unwrap();
        assert!(is_null);
    }

    #[test]
    fn test_decode_error() {
        let lua = lua();
        let err = lua.load(r#"json.decode("{")"#).exec().unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
    }
}
