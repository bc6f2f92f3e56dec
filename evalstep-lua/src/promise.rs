//! Deferred results for evaluated scripts
//!
//! `promise(function(resolve, reject) ... end)` creates a [`Promise`]. The
//! executor runs immediately; whichever of `resolve` / `reject` is called
//! first settles the promise and later calls are ignored. A script that
//! returns a promise makes the engine wait for it.
//!
//! Resolved values are parked in the Lua registry until the engine collects
//! them, so they stay valid after the executor's stack frame is gone.

use mlua::RegistryKey;
use mlua::prelude::*;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

use crate::sandbox::is_execution_timeout;

/// How a promise settled: the registry slot of the value, or the rejection
/// reason
pub type Settlement = Result<RegistryKey, String>;

type SharedSender = Arc<Mutex<Option<oneshot::Sender<Settlement>>>>;

pub struct Promise {
    settlement: Mutex<Option<oneshot::Receiver<Settlement>>>,
}

impl Promise {
    fn new(receiver: oneshot::Receiver<Settlement>) -> Self {
        Self {
            settlement: Mutex::new(Some(receiver)),
        }
    }

    /// Takes the settlement channel; `None` once it has been taken
    ///
    /// The channel reports an error when every `resolve` / `reject` handle
    /// was dropped without being called.
    pub fn take_settlement(&self) -> Option<oneshot::Receiver<Settlement>> {
        self.settlement
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl LuaUserData for Promise {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(LuaMetaMethod::ToString, |_, _, ()| Ok("promise"));
    }
}

fn take_sender(sender: &SharedSender) -> Option<oneshot::Sender<Settlement>> {
    sender.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Renders a rejection reason as an error message
pub fn describe_reason(reason: &LuaValue) -> String {
    match reason {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::String(s) => s.to_string_lossy().to_string(),
        LuaValue::Error(e) => e.to_string(),
        other => other.type_name().to_string(),
    }
}

/// Installs the global `promise` constructor
pub fn register_promise(lua: &Lua) -> LuaResult<()> {
    let constructor = lua.create_function(|lua, executor: LuaFunction| {
        let (tx, rx) = oneshot::channel::<Settlement>();
        let sender: SharedSender = Arc::new(Mutex::new(Some(tx)));

        let resolve = {
            let sender = sender.clone();
            lua.create_function(move |lua, value: LuaValue| {
                if let Some(tx) = take_sender(&sender) {
                    let key = lua.create_registry_value(value)?;
                    let _ = tx.send(Ok(key));
                }
                Ok(())
            })?
        };

        let reject = {
            let sender = sender.clone();
            lua.create_function(move |_, reason: LuaValue| {
                if let Some(tx) = take_sender(&sender) {
                    let _ = tx.send(Err(describe_reason(&reason)));
                }
                Ok(())
            })?
        };

        if let Err(e) = executor.call::<()>((resolve, reject)) {
            if is_execution_timeout(&e) {
                return Err(e);
            }
            if let Some(tx) = take_sender(&sender) {
                let _ = tx.send(Err(e.to_string()));
            }
        }

        Ok(Promise::new(rx))
    })?;

    lua.globals().set("promise", constructor)
}
