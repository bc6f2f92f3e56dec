//! `inputs` and `env`: read-only property objects backed by a [`ProxyObject`]

use evalstep_core::ProxyObject;
use mlua::prelude::*;

use crate::module::ContextModule;
use crate::value::json_to_lua;

/// Exposes a [`ProxyObject`] as a global whose fields are looked up on access
pub struct ProxyModule {
    id: &'static str,
    proxy: ProxyObject,
}

impl ProxyModule {
    pub fn new(id: &'static str, proxy: ProxyObject) -> Self {
        Self { id, proxy }
    }

    /// The `inputs` global
    pub fn inputs(proxy: ProxyObject) -> Self {
        Self::new("inputs", proxy)
    }

    /// The `env` global
    pub fn env(proxy: ProxyObject) -> Self {
        Self::new("env", proxy)
    }
}

struct LuaProxy(ProxyObject);

impl LuaUserData for LuaProxy {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(LuaMetaMethod::Index, |lua, this, key: LuaValue| {
            let LuaValue::String(name) = key else {
                return Err(LuaError::external(this.0.non_string_key()));
            };
            let name = name.to_str()?.to_string();
            let value = this.0.get(&name).map_err(LuaError::external)?;
            json_to_lua(lua, value.as_ref())
        });

        methods.add_meta_method(
            LuaMetaMethod::NewIndex,
            |_, this, (key, _value): (LuaValue, LuaValue)| -> LuaResult<()> {
                let name = match &key {
                    LuaValue::String(s) => s.to_string_lossy().to_string(),
                    other => other.type_name().to_string(),
                };
                Err(LuaError::external(this.0.read_only(&name)))
            },
        );

        methods.add_meta_method(LuaMetaMethod::ToString, |_, this, ()| {
            Ok(format!("{}s", this.0.entity()))
        });
    }
}

impl ContextModule for ProxyModule {
    fn id(&self) -> &'static str {
        self.id
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        lua.globals().set(self.id, LuaProxy(self.proxy.clone()))
    }

    fn stubs(&self) -> String {
        let entity = self.proxy.entity();
        format!(
            r#"---@meta

---Read-only {entity} values. Fields are looked up when read; names listed
---as JSON are decoded, every other value is a string. Missing names are nil.
---@type table<string, any>
{id} = {{}}
"#,
            id = self.id,
        )
    }
}
