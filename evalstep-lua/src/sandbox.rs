//! Lua sandbox: the isolation boundary for evaluated scripts
//!
//! A [`Sandbox`] wraps a Lua state with a restricted standard library. No
//! I/O, no OS access and no way to load external modules; the caller decides
//! what else the script can see by registering context modules.
//!
//! [`Sandbox::run_isolated`] runs a script under a CPU-time budget. Lua is
//! single threaded, so the budget is enforced from inside the VM: an
//! instruction-count hook checks the wall clock and raises
//! [`ExecutionTimeout`] once the budget is spent, which interrupts tight loops
//! that never yield. `pcall`, `xpcall` and the coroutine functions are
//! wrapped so a script can't catch that error and keep running.

use mlua::{HookTriggers, Lua, LuaOptions, StdLib, VmState};
use mlua::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::promise::register_promise;

/// Instructions executed between two deadline checks
const HOOK_INSTRUCTION_INTERVAL: u32 = 1_000;

/// Raised inside the VM when a script exceeds its CPU-time budget
#[derive(Debug, Clone, Copy, Error)]
#[error("Script execution timed out after {}ms", .budget.as_millis())]
pub struct ExecutionTimeout {
    pub budget: Duration,
}

/// Whether `err` (or anything it wraps) is an [`ExecutionTimeout`]
pub fn is_execution_timeout(err: &LuaError) -> bool {
    match err {
        LuaError::ExternalError(e) => e.downcast_ref::<ExecutionTimeout>().is_some(),
        LuaError::CallbackError { cause, .. } => is_execution_timeout(cause),
        LuaError::WithContext { cause, .. } => is_execution_timeout(cause),
        _ => false,
    }
}

/// Re-raises budget errors from every function that can catch errors.
/// The chunk receives the timeout predicate as its only argument.
const GUARD_PROTECTED_CALLS: &str = r#"
local is_timeout = ...
local raw_pcall, raw_xpcall, error = pcall, xpcall, error
local create, resume = coroutine.create, coroutine.resume

local function check(ok, ...)
    if not ok and is_timeout((...)) then
        error((...), 0)
    end
    return ok, ...
end

local function unwrap(ok, ...)
    if not ok then
        error((...), 0)
    end
    return ...
end

pcall = function(f, ...)
    return check(raw_pcall(f, ...))
end

xpcall = function(f, handler, ...)
    local function guarded(e)
        if is_timeout(e) then
            return e
        end
        return handler(e)
    end
    return check(raw_xpcall(f, guarded, ...))
end

coroutine.resume = function(co, ...)
    return check(resume(co, ...))
end

coroutine.wrap = function(f)
    local co = create(f)
    return function(...)
        return unwrap(check(resume(co, ...)))
    end
end
"#;

fn guard_protected_calls(lua: &Lua) -> LuaResult<()> {
    let is_timeout = lua.create_function(|_, value: LuaValue| {
        Ok(matches!(&value, LuaValue::Error(e) if is_execution_timeout(e)))
    })?;

    lua.load(GUARD_PROTECTED_CALLS)
        .set_name("=sandbox")
        .call::<()>(is_timeout)
}

/// Options for building a [`Sandbox`]
#[derive(Debug, Clone, Default)]
pub struct SandboxOptions {
    /// Upper bound for the Lua heap, in bytes
    pub memory_limit: Option<usize>,
}

/// Options for a single [`Sandbox::run_isolated`] call
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// CPU-time budget; `None` lets the script run unbounded
    pub timeout: Option<Duration>,
    /// Chunk name shown in error messages and tracebacks
    pub source_label: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            source_label: "script".to_string(),
        }
    }
}

/// Create a restricted Lua state
///
/// Only the TABLE, STRING, UTF8, MATH and COROUTINE libraries are loaded.
/// `require`, `dofile` and `loadfile` are removed. Protected calls never
/// swallow an [`ExecutionTimeout`]. The `promise` constructor is always
/// available.
pub fn create_sandbox() -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::UTF8 | StdLib::MATH | StdLib::COROUTINE,
        LuaOptions::default(),
    )?;

    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;

    guard_protected_calls(&lua)?;
    register_promise(&lua)?;

    Ok(lua)
}

/// A restricted Lua state able to run one script
pub struct Sandbox {
    lua: Lua,
    budget_spent: Arc<AtomicBool>,
}

impl Sandbox {
    pub fn new(options: &SandboxOptions) -> LuaResult<Self> {
        let lua = create_sandbox()?;
        if let Some(limit) = options.memory_limit {
            lua.set_memory_limit(limit)?;
        }
        Ok(Self {
            lua,
            budget_spent: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Whether the CPU-time budget ran out at any point, even if the script
    /// went on to return normally
    pub fn budget_spent(&self) -> bool {
        self.budget_spent.load(Ordering::Relaxed)
    }

    /// Runs `code` and returns its first result
    ///
    /// `code` is first compiled as an expression (`return <code>`); when that
    /// doesn't parse it is compiled as a block of statements. With a timeout
    /// set, the budget hook stays armed after this returns so callbacks the
    /// script scheduled are interrupted too; call [`Sandbox::disarm`] when the
    /// evaluation is over.
    pub fn run_isolated(&self, code: &str, options: &RunOptions) -> LuaResult<LuaValue> {
        if let Some(budget) = options.timeout {
            self.arm(budget)?;
        }

        let function = self.compile(code, &options.source_label)?;
        function.call::<LuaValue>(())
    }

    /// Removes the CPU-time budget hook
    pub fn disarm(&self) {
        self.lua.remove_hook();
    }

    fn arm(&self, budget: Duration) -> LuaResult<()> {
        let deadline = Instant::now() + budget;
        let budget_spent = self.budget_spent.clone();
        self.lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_INTERVAL),
            move |_lua, _debug| {
                if Instant::now() >= deadline {
                    budget_spent.store(true, Ordering::Relaxed);
                    Err(LuaError::external(ExecutionTimeout { budget }))
                } else {
                    Ok(VmState::Continue)
                }
            },
        )
    }

    fn compile(&self, code: &str, source_label: &str) -> LuaResult<LuaFunction> {
        let name = format!("={}", source_label);

        match self
            .lua
            .load(format!("return {}", code))
            .set_name(name.clone())
            .into_function()
        {
            Ok(function) => Ok(function),
            Err(_) => self.lua.load(code).set_name(name).into_function(),
        }
    }
}

/// LuaLS annotations for the globals every sandbox provides
pub fn runtime_stubs() -> String {
    r#"---@meta

---A value that settles later. Return one from a script to make the
---evaluation wait for it.
---@class Promise

---Create a promise. The executor runs immediately and receives the
---`resolve` and `reject` functions; the first one called settles the promise.
---@param executor fun(resolve: fun(value: any), reject: fun(reason: any))
---@return Promise
---
---@usage
---return promise(function(resolve)
---  set_timeout(function() resolve(42) end, 100)
---end)
function promise(executor) end

---Call `callback` once after `ms` milliseconds. Extra arguments are passed
---to the callback.
---@param callback function
---@param ms? number
---@return integer id
function set_timeout(callback, ms, ...) end

---Call `callback` every `ms` milliseconds until cleared.
---@param callback function
---@param ms? number
---@return integer id
function set_interval(callback, ms, ...) end

---Cancel a timer created by `set_timeout`.
---@param id integer
function clear_timeout(id) end

---Cancel a timer created by `set_interval`.
---@param id integer
function clear_interval(id) end
"#
    .to_string()
}
