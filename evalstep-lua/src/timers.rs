//! Timers scheduled by evaluated scripts
//!
//! [`TrackedTimers`] schedules callbacks on the tokio runtime and remembers
//! every pending timer so the engine can cancel all of them once an
//! evaluation finishes. A timer that fires or is cleared stops being tracked.

use mlua::prelude::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Shortest interval period; a zero period would spin
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Identifier of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

struct TrackedTimer {
    id: TimerId,
    handle: AbortHandle,
}

#[derive(Default)]
struct TimerRegistry {
    next_id: u64,
    timeouts: Vec<TrackedTimer>,
    intervals: Vec<TrackedTimer>,
}

impl TimerRegistry {
    fn next_id(&mut self) -> TimerId {
        self.next_id += 1;
        TimerId(self.next_id)
    }
}

/// Timer scheduler that can cancel everything it has handed out
///
/// Clones share the same set of timers. Scheduling requires a running tokio
/// runtime.
#[derive(Clone, Default)]
pub struct TrackedTimers {
    registry: Arc<Mutex<TimerRegistry>>,
}

impl TrackedTimers {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, TimerRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `callback` once after `delay`
    pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        // Holding the lock across spawn keeps a fast timer from trying to
        // untrack itself before it is tracked.
        let mut registry = self.registry();
        let id = registry.next_id();
        let timers = self.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            timers.registry().timeouts.retain(|t| t.id != id);
            callback();
        });

        registry.timeouts.push(TrackedTimer {
            id,
            handle: task.abort_handle(),
        });
        id
    }

    /// Runs `callback` every `period` until cleared
    pub fn set_interval<F>(&self, period: Duration, mut callback: F) -> TimerId
    where
        F: FnMut() + Send + 'static,
    {
        let period = period.max(MIN_INTERVAL);
        let mut registry = self.registry();
        let id = registry.next_id();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                callback();
            }
        });

        registry.intervals.push(TrackedTimer {
            id,
            handle: task.abort_handle(),
        });
        id
    }

    /// Cancels one timer; returns whether it was still pending
    pub fn clear(&self, id: TimerId) -> bool {
        let mut guard = self.registry();
        let registry = &mut *guard;
        for timers in [&mut registry.timeouts, &mut registry.intervals] {
            if let Some(position) = timers.iter().position(|t| t.id == id) {
                timers.swap_remove(position).handle.abort();
                return true;
            }
        }
        false
    }

    /// Cancels every pending timer and returns how many there were
    ///
    /// Safe to call repeatedly.
    pub fn clear_all(&self) -> usize {
        let mut guard = self.registry();
        let registry = &mut *guard;
        let mut cleared = 0;
        for timer in registry
            .timeouts
            .drain(..)
            .chain(registry.intervals.drain(..))
        {
            timer.handle.abort();
            cleared += 1;
        }
        cleared
    }

    /// Number of timers still pending
    pub fn tracked(&self) -> usize {
        let registry = self.registry();
        registry.timeouts.len() + registry.intervals.len()
    }
}

fn delay_from_ms(ms: Option<f64>) -> Duration {
    match ms {
        Some(ms) if ms.is_finite() && ms > 0.0 => Duration::from_secs_f64(ms / 1000.0),
        _ => Duration::ZERO,
    }
}

/// Installs `set_timeout`, `set_interval`, `clear_timeout` and
/// `clear_interval` into `lua`, all backed by `timers`
///
/// Errors raised by a callback are logged; they don't fail the evaluation.
pub fn register_timer_functions(lua: &Lua, timers: &TrackedTimers) -> LuaResult<()> {
    let globals = lua.globals();

    {
        let timers = timers.clone();
        globals.set(
            "set_timeout",
            lua.create_function(
                move |_, (callback, ms, args): (LuaFunction, Option<f64>, LuaMultiValue)| {
                    let id = timers.set_timeout(delay_from_ms(ms), move || {
                        if let Err(e) = callback.call::<()>(args) {
                            warn!("Timeout callback failed: {}", e);
                        }
                    });
                    debug!(timer = id.0, "Scheduled timeout");
                    Ok(id.0)
                },
            )?,
        )?;
    }

    {
        let timers = timers.clone();
        globals.set(
            "set_interval",
            lua.create_function(
                move |_, (callback, ms, args): (LuaFunction, Option<f64>, LuaMultiValue)| {
                    let id = timers.set_interval(delay_from_ms(ms), move || {
                        if let Err(e) = callback.call::<()>(args.clone()) {
                            warn!("Interval callback failed: {}", e);
                        }
                    });
                    debug!(timer = id.0, "Scheduled interval");
                    Ok(id.0)
                },
            )?,
        )?;
    }

    for name in ["clear_timeout", "clear_interval"] {
        let timers = timers.clone();
        globals.set(
            name,
            lua.create_function(move |_, id: Option<u64>| {
                if let Some(id) = id {
                    timers.clear(TimerId(id));
                }
                Ok(())
            })?,
        )?;
    }

    Ok(())
}
