//! Conversions between JSON values and Lua values

use mlua::prelude::*;
use serde_json::Value as JsonValue;

/// Converts a looked-up value for a script
///
/// An absent value and a top-level JSON `null` both become `nil`. Nested
/// nulls keep the `json.null` sentinel so arrays don't grow holes.
pub fn json_to_lua(lua: &Lua, value: Option<&JsonValue>) -> LuaResult<LuaValue> {
    match value {
        None | Some(JsonValue::Null) => Ok(LuaValue::Nil),
        Some(value) => lua.to_value(value),
    }
}

/// Converts a script value to JSON
///
/// Fails for values with no JSON form (functions, threads, foreign userdata).
/// Empty tables become `{}`.
pub fn lua_to_json(lua: &Lua, value: LuaValue) -> LuaResult<JsonValue> {
    lua.from_value(value)
}

/// Name under which a table key is published
pub fn key_to_name(key: &LuaValue) -> Option<String> {
    match key {
        LuaValue::String(s) => Some(s.to_string_lossy().to_string()),
        LuaValue::Integer(i) => Some(i.to_string()),
        LuaValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
