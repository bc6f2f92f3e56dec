//! `log`: script logging through a [`LogSink`]

use evalstep_core::{LogLevel, LogSink};
use mlua::prelude::*;
use std::sync::Arc;

use crate::module::ContextModule;

pub struct LogModule {
    sink: Arc<dyn LogSink>,
}

impl LogModule {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

impl ContextModule for LogModule {
    fn id(&self) -> &'static str {
        "log"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let log_table = lua.create_table()?;

        for (name, level) in [
            ("debug", LogLevel::Debug),
            ("info", LogLevel::Info),
            ("warning", LogLevel::Warning),
            ("error", LogLevel::Error),
        ] {
            let sink = self.sink.clone();
            log_table.set(
                name,
                lua.create_function(move |_, msg: String| {
                    sink.write(level, &msg);
                    Ok(())
                })?,
            )?;
        }

        // Redaction for values the script derives from secrets
        {
            let sink = self.sink.clone();
            log_table.set(
                "mask",
                lua.create_function(move |_, secret: String| {
                    if !secret.is_empty() {
                        sink.mask(&secret);
                    }
                    Ok(())
                })?,
            )?;
        }

        lua.globals().set(self.id(), log_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Step log
---@class log
log = {}

---Log a debug message (visible when step debug logging is on)
---@param msg string The message to log
function log.debug(msg) end

---Log an info message
---@param msg string The message to log
function log.info(msg) end

---Log a warning message
---@param msg string The message to log
function log.warning(msg) end

---Log an error message
---@param msg string The message to log
function log.error(msg) end

---Redact `secret` from all later log output
---@param secret string
function log.mask(secret) end
"#
        .to_string()
    }
}
