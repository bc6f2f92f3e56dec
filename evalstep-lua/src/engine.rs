//! Evaluation engine
//!
//! Runs one script per [`Evaluator::evaluate`] call:
//! - builds a fresh sandbox and installs the context modules and timers
//! - runs the script under the CPU budget, then waits for a returned
//!   promise while a watchdog enforces the same deadline
//! - cancels every timer the script left behind
//! - publishes `timedOut`, then either `result` or one output per key
//!
//! Only the first failure is reported; the caller decides how to surface it.

use evalstep_core::outputs::RESULT_OUTPUT;
use evalstep_core::{OutputError, OutputSink};
use mlua::prelude::*;
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::module::ModuleRegistry;
use crate::promise::{Promise, Settlement};
use crate::sandbox::{RunOptions, Sandbox, SandboxOptions, is_execution_timeout};
use crate::timers::{TrackedTimers, register_timer_functions};
use crate::value::{key_to_name, lua_to_json};

/// How often a pending promise is checked for having nothing left that
/// could settle it
const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Evaluation timed out after {}ms", .timeout.as_millis())]
    TimedOut { timeout: Duration },

    /// The script raised an error or its promise was rejected
    #[error("{message}")]
    Script { message: String },

    /// Outputs were requested but the script didn't return a table
    #[error("\"extractOutputs\" is true but the result is not a table (got {type_name})")]
    Shape { type_name: String },

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] LuaError),
}

#[derive(Debug)]
pub enum EvaluationOutcome {
    /// `result` was published
    Success(JsonValue),
    /// One output per key was published
    OutputsExtracted(Map<String, JsonValue>),
    /// The deadline passed before the script finished
    TimedOut { timeout: Duration },
    Failure(EvalError),
}

impl EvaluationOutcome {
    /// Collapses the outcome into success or the error to report
    pub fn into_result(self) -> Result<(), EvalError> {
        match self {
            Self::Success(_) | Self::OutputsExtracted(_) => Ok(()),
            Self::TimedOut { timeout } => Err(EvalError::TimedOut { timeout }),
            Self::Failure(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvaluatorOptions {
    /// Chunk name used in script error messages
    pub source_label: String,
    /// Upper bound for the Lua heap, in bytes
    pub memory_limit: Option<usize>,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self {
            source_label: "expression".to_string(),
            memory_limit: None,
        }
    }
}

/// Deadline for the asynchronous part of an evaluation
struct Watchdog {
    deadline: Option<(Instant, Duration)>,
}

impl Watchdog {
    fn arm(timeout: Option<Duration>) -> Self {
        Self {
            deadline: timeout.map(|timeout| (Instant::now() + timeout, timeout)),
        }
    }

    /// Completes once the deadline has passed; never without a timeout
    async fn expired(&self) -> EvalError {
        match self.deadline {
            Some((deadline, timeout)) => {
                tokio::time::sleep_until(deadline).await;
                EvalError::TimedOut { timeout }
            }
            None => std::future::pending().await,
        }
    }
}

fn as_promise(value: &LuaValue) -> Option<LuaAnyUserData> {
    match value {
        LuaValue::UserData(ud) if ud.is::<Promise>() => Some(ud.clone()),
        _ => None,
    }
}

fn classify(err: LuaError, timeout: Option<Duration>, budget_spent: bool) -> EvalError {
    match timeout {
        Some(timeout) if budget_spent || is_execution_timeout(&err) => {
            EvalError::TimedOut { timeout }
        }
        _ => EvalError::Script {
            message: err.to_string(),
        },
    }
}

pub struct Evaluator {
    context: ModuleRegistry,
    options: EvaluatorOptions,
}

impl Evaluator {
    /// # Arguments
    /// * `context` - modules installed into every evaluation's sandbox
    pub fn new(context: ModuleRegistry) -> Self {
        Self::with_options(context, EvaluatorOptions::default())
    }

    pub fn with_options(context: ModuleRegistry, options: EvaluatorOptions) -> Self {
        Self { context, options }
    }

    pub fn context(&self) -> &ModuleRegistry {
        &self.context
    }

    /// Evaluates `code` and publishes the outcome to `outputs`
    ///
    /// `timedOut` is published for every outcome except a failure to
    /// publish it. With `extract_outputs` the script must return a table and
    /// each entry becomes an output; otherwise the value is the `result`
    /// output. Nothing else is published when the evaluation fails.
    pub async fn evaluate(
        &self,
        code: &str,
        outputs: &mut dyn OutputSink,
        extract_outputs: bool,
        timeout: Option<Duration>,
    ) -> EvaluationOutcome {
        info!(
            "Evaluating {} (timeout: {}, extract outputs: {})",
            self.options.source_label,
            timeout.map_or("none".to_string(), |t| format!("{}ms", t.as_millis())),
            extract_outputs
        );

        let timers = TrackedTimers::new();
        let sandbox = match self.create_sandbox(&timers) {
            Ok(sandbox) => sandbox,
            Err(e) => {
                error!("Failed to create evaluation sandbox: {}", e);
                if let Err(publish_error) = outputs.set_timed_out(false) {
                    warn!("Failed to publish timedOut: {}", publish_error);
                }
                return EvaluationOutcome::Failure(EvalError::Sandbox(e));
            }
        };

        let watchdog = Watchdog::arm(timeout);
        let completion = self
            .run_to_completion(&sandbox, &timers, code, timeout, &watchdog)
            .await;

        let cleared = timers.clear_all();
        sandbox.disarm();
        if cleared > 0 {
            debug!(cleared, "Cancelled pending timers");
        }

        let timed_out = matches!(completion, Err(EvalError::TimedOut { .. }));
        if let Err(e) = outputs.set_timed_out(timed_out) {
            error!("Failed to publish timedOut: {}", e);
            return EvaluationOutcome::Failure(e.into());
        }

        let outcome = match completion {
            Ok(value) => self
                .publish(sandbox.lua(), value, outputs, extract_outputs)
                .unwrap_or_else(EvaluationOutcome::Failure),
            Err(EvalError::TimedOut { timeout }) => EvaluationOutcome::TimedOut { timeout },
            Err(e) => EvaluationOutcome::Failure(e),
        };

        match &outcome {
            EvaluationOutcome::Success(_) => info!("Evaluation succeeded"),
            EvaluationOutcome::OutputsExtracted(map) => {
                info!("Evaluation succeeded, {} outputs extracted", map.len())
            }
            EvaluationOutcome::TimedOut { timeout } => {
                warn!("Evaluation timed out after {}ms", timeout.as_millis())
            }
            EvaluationOutcome::Failure(e) => error!("Evaluation failed: {}", e),
        }

        outcome
    }

    fn create_sandbox(&self, timers: &TrackedTimers) -> LuaResult<Sandbox> {
        let sandbox = Sandbox::new(&SandboxOptions {
            memory_limit: self.options.memory_limit,
        })?;
        self.context.register_all(sandbox.lua())?;
        register_timer_functions(sandbox.lua(), timers)?;
        Ok(sandbox)
    }

    async fn run_to_completion(
        &self,
        sandbox: &Sandbox,
        timers: &TrackedTimers,
        code: &str,
        timeout: Option<Duration>,
        watchdog: &Watchdog,
    ) -> Result<LuaValue, EvalError> {
        let run_options = RunOptions {
            timeout,
            source_label: self.options.source_label.clone(),
        };

        // The budget counts as spent even when the script caught the error
        let check_budget = || match timeout {
            Some(timeout) if sandbox.budget_spent() => Err(EvalError::TimedOut { timeout }),
            _ => Ok(()),
        };

        let mut value = sandbox
            .run_isolated(code, &run_options)
            .map_err(|e| classify(e, timeout, sandbox.budget_spent()))?;
        check_budget()?;

        // A promise may resolve to another promise
        while let Some(promise) = as_promise(&value) {
            let receiver = promise
                .borrow::<Promise>()?
                .take_settlement()
                .ok_or_else(|| EvalError::Script {
                    message: "Promise was already awaited".to_string(),
                })?;

            debug!("Waiting for the returned promise to settle");
            value = match self.await_settlement(sandbox, timers, receiver, watchdog).await? {
                Ok(key) => {
                    let resolved = sandbox.lua().registry_value::<LuaValue>(&key)?;
                    sandbox.lua().remove_registry_value(key)?;
                    resolved
                }
                Err(reason) => {
                    check_budget()?;
                    return Err(EvalError::Script { message: reason });
                }
            };
            check_budget()?;
        }

        Ok(value)
    }

    async fn await_settlement(
        &self,
        sandbox: &Sandbox,
        timers: &TrackedTimers,
        mut receiver: oneshot::Receiver<Settlement>,
        watchdog: &Watchdog,
    ) -> Result<Settlement, EvalError> {
        let never_settles = || EvalError::Script {
            message: "Promise can never settle: no timers are pending".to_string(),
        };
        let mut idle_check = tokio::time::interval(IDLE_CHECK_INTERVAL);

        loop {
            tokio::select! {
                biased;
                settlement = &mut receiver => {
                    return settlement.map_err(|_| never_settles());
                }
                e = watchdog.expired() => return Err(e),
                _ = idle_check.tick() => {
                    // Only timer callbacks run after the script returns; with
                    // none left, collect unreachable resolve handles and look
                    // one last time.
                    if timers.tracked() == 0 {
                        sandbox.lua().gc_collect()?;
                        return match receiver.try_recv() {
                            Ok(settlement) => Ok(settlement),
                            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => {
                                Err(never_settles())
                            }
                        };
                    }
                }
            }
        }
    }

    fn publish(
        &self,
        lua: &Lua,
        value: LuaValue,
        outputs: &mut dyn OutputSink,
        extract_outputs: bool,
    ) -> Result<EvaluationOutcome, EvalError> {
        if !extract_outputs {
            let result = lua_to_json(lua, value).map_err(|e| OutputError::Format {
                name: RESULT_OUTPUT.to_string(),
                cause: e.to_string(),
            })?;
            outputs.set_result(&result)?;
            return Ok(EvaluationOutcome::Success(result));
        }

        let table = match value {
            LuaValue::Table(table) => table,
            other => {
                return Err(EvalError::Shape {
                    type_name: other.type_name().to_string(),
                });
            }
        };

        // Every entry is converted before anything is written
        let mut extracted = Map::new();
        for pair in table.pairs::<LuaValue, LuaValue>() {
            let (key, item) = pair?;
            let name = key_to_name(&key).ok_or_else(|| OutputError::Format {
                name: key.type_name().to_string(),
                cause: "Output names must be strings or numbers".to_string(),
            })?;
            let json = lua_to_json(lua, item).map_err(|e| OutputError::Format {
                name: name.clone(),
                cause: e.to_string(),
            })?;
            extracted.insert(name, json);
        }

        outputs.set_outputs(&extracted)?;
        Ok(EvaluationOutcome::OutputsExtracted(extracted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{LogModule, ProxyModule, ValueModule};
    use evalstep_core::{
        KeyValueJsonStorage, LogLevel, LogSink, MatchKeyRule, ProxyObject, RawLookup,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingOutputs {
        result: Option<JsonValue>,
        timed_out: Vec<bool>,
        outputs: Option<Map<String, JsonValue>>,
    }

    impl OutputSink for RecordingOutputs {
        fn set_result(&mut self, value: &JsonValue) -> Result<(), OutputError> {
            self.result = Some(value.clone());
            Ok(())
        }

        fn set_timed_out(&mut self, timed_out: bool) -> Result<(), OutputError> {
            self.timed_out.push(timed_out);
            Ok(())
        }

        fn set_outputs(&mut self, outputs: &Map<String, JsonValue>) -> Result<(), OutputError> {
            self.outputs = Some(outputs.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingSink {
        messages: Mutex<Vec<String>>,
    }

    impl LogSink for CountingSink {
        fn write(&self, _level: LogLevel, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    fn inputs(values: &[(&str, &str)]) -> ProxyModule {
        let values: HashMap<String, String> = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let raw: RawLookup = Arc::new(move |name: &str| values.get(name).cloned());
        let storage = KeyValueJsonStorage::new(raw, MatchKeyRule::match_none(), false, "input");
        ProxyModule::inputs(ProxyObject::new(Arc::new(storage), "input"))
    }

    fn evaluator() -> Evaluator {
        Evaluator::new(ModuleRegistry::new().with(inputs(&[("i1", "5"), ("i2", "2")])))
    }

    async fn evaluate(
        evaluator: &Evaluator,
        code: &str,
        extract_outputs: bool,
        timeout_ms: Option<u64>,
    ) -> (EvaluationOutcome, RecordingOutputs) {
        let mut outputs = RecordingOutputs::default();
        let outcome = evaluator
            .evaluate(
                code,
                &mut outputs,
                extract_outputs,
                timeout_ms.map(Duration::from_millis),
            )
            .await;
        (outcome, outputs)
    }

    #[tokio::test]
    async fn test_expression_result() {
        let (outcome, outputs) = evaluate(
            &evaluator(),
            "3 * (tonumber(inputs.i1) + tonumber(inputs.i2))",
            false,
            None,
        )
        .await;

        assert!(matches!(outcome, EvaluationOutcome::Success(ref v) if *v == json!(21)));
        assert_eq!(outputs.result, Some(json!(21)));
        assert_eq!(outputs.timed_out, vec![false]);
        assert!(outputs.outputs.is_none());
    }

    #[tokio::test]
    async fn test_statement_block_result() {
        let (outcome, outputs) = evaluate(
            &evaluator(),
            "local total = 0\nfor i = 1, 3 do total = total + i end\nreturn total",
            false,
            None,
        )
        .await;

        assert!(matches!(outcome, EvaluationOutcome::Success(_)));
        assert_eq!(outputs.result, Some(json!(6)));
    }

    #[tokio::test]
    async fn test_extract_outputs() {
        let (outcome, outputs) = evaluate(
            &evaluator(),
            "{o1 = inputs.i1, o2 = tonumber(inputs.i2)}",
            true,
            None,
        )
        .await;

        assert!(matches!(outcome, EvaluationOutcome::OutputsExtracted(_)));
        assert_eq!(
            outputs.outputs,
            Some(json!({"o1": "5", "o2": 2}).as_object().unwrap().clone())
        );
        assert_eq!(outputs.result, None);
        assert_eq!(outputs.timed_out, vec![false]);
    }

    #[tokio::test]
    async fn test_extract_outputs_formats_nested_values() {
        let evaluator = Evaluator::new(
            ModuleRegistry::new().with(inputs(&[("x", "aa"), ("y", "bba")])),
        );
        let (_, outputs) = evaluate(
            &evaluator,
            "{o1 = #inputs.x, o2 = {nested = inputs.y}}",
            true,
            None,
        )
        .await;

        let extracted = outputs.outputs.unwrap();
        assert_eq!(extracted["o1"], json!(2));
        assert_eq!(extracted["o2"], json!({"nested": "bba"}));
        assert_eq!(outputs.timed_out, vec![false]);
    }

    #[tokio::test]
    async fn test_extract_outputs_numeric_and_nested_keys() {
        let (_, outputs) = evaluate(
            &evaluator(),
            r#"{[333] = {a = 2}, prop1 = "x"}"#,
            true,
            None,
        )
        .await;

        assert_eq!(
            outputs.outputs,
            Some(
                json!({"333": {"a": 2}, "prop1": "x"})
                    .as_object()
                    .unwrap()
                    .clone()
            )
        );
    }

    #[tokio::test]
    async fn test_extract_outputs_requires_table() {
        let (outcome, outputs) = evaluate(&evaluator(), "123", true, None).await;

        assert!(matches!(
            outcome,
            EvaluationOutcome::Failure(EvalError::Shape { .. })
        ));
        assert_eq!(outputs.timed_out, vec![false]);
        assert_eq!(outputs.result, None);
        assert!(outputs.outputs.is_none());
    }

    #[tokio::test]
    async fn test_unconvertible_output_names_the_key() {
        let (outcome, outputs) =
            evaluate(&evaluator(), "{ok = 1, f = function() end}", true, None).await;

        let EvaluationOutcome::Failure(EvalError::Output(OutputError::Format { name, .. })) =
            outcome
        else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(name, "f");
        assert!(outputs.outputs.is_none());
    }

    #[tokio::test]
    async fn test_async_timeout_flags_timed_out() {
        let started = std::time::Instant::now();
        let (outcome, outputs) = evaluate(
            &evaluator(),
            "promise(function(resolve) set_timeout(function() resolve(1) end, 1000) end)",
            false,
            Some(50),
        )
        .await;

        assert!(matches!(outcome, EvaluationOutcome::TimedOut { .. }));
        assert_eq!(outputs.timed_out, vec![true]);
        assert_eq!(outputs.result, None);
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_fast_script_beats_timeout() {
        let started = std::time::Instant::now();
        let (outcome, outputs) = evaluate(&evaluator(), "2", false, Some(1000)).await;

        assert!(matches!(outcome, EvaluationOutcome::Success(_)));
        assert_eq!(outputs.result, Some(json!(2)));
        assert_eq!(outputs.timed_out, vec![false]);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_sync_loop_timeout() {
        let (outcome, outputs) = evaluate(&evaluator(), "while true do end", false, Some(100)).await;

        assert!(matches!(outcome, EvaluationOutcome::TimedOut { .. }));
        assert_eq!(outputs.timed_out, vec![true]);
        let err = outcome.into_result().unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_promise_resolved_by_timer() {
        let (outcome, outputs) = evaluate(
            &evaluator(),
            r#"promise(function(resolve) set_timeout(function() resolve("done") end, 10) end)"#,
            false,
            Some(1000),
        )
        .await;

        assert!(matches!(outcome, EvaluationOutcome::Success(_)));
        assert_eq!(outputs.result, Some(json!("done")));
    }

    #[tokio::test]
    async fn test_promise_resolved_with_promise() {
        let (_, outputs) = evaluate(
            &evaluator(),
            "promise(function(resolve) resolve(promise(function(inner) inner(7) end)) end)",
            false,
            None,
        )
        .await;

        assert_eq!(outputs.result, Some(json!(7)));
    }

    #[tokio::test]
    async fn test_rejected_promise() {
        let (outcome, outputs) = evaluate(
            &evaluator(),
            r#"promise(function(_, reject) reject("xxyy") end)"#,
            false,
            None,
        )
        .await;

        let EvaluationOutcome::Failure(EvalError::Script { message }) = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(message, "xxyy");
        assert_eq!(outputs.timed_out, vec![false]);
        assert_eq!(outputs.result, None);
    }

    #[tokio::test]
    async fn test_script_error() {
        let (outcome, outputs) = evaluate(&evaluator(), r#"error("xxyy")"#, false, None).await;

        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err, EvalError::Script { .. }));
        assert!(err.to_string().contains("xxyy"));
        assert_eq!(outputs.timed_out, vec![false]);
    }

    #[tokio::test]
    async fn test_unsettled_promise_fails() {
        let (outcome, _) = evaluate(&evaluator(), "promise(function() end)", false, None).await;

        let err = outcome.into_result().unwrap_err();
        assert!(err.to_string().contains("never settle"), "{err}");
    }

    #[tokio::test]
    async fn test_non_string_input_key() {
        let (outcome, _) = evaluate(&evaluator(), "inputs[1]", false, None).await;

        let err = outcome.into_result().unwrap_err();
        assert!(err.to_string().contains("input name should be a string"));
    }

    #[tokio::test]
    async fn test_timers_cancelled_after_evaluation() {
        let sink = Arc::new(CountingSink::default());
        let evaluator = Evaluator::new(ModuleRegistry::new().with(LogModule::new(sink.clone())));

        let (outcome, _) = evaluate(
            &evaluator,
            r#"
            set_interval(function() log.info("tick") end, 5)
            set_timeout(function() log.info("late") end, 20)
            return 1
            "#,
            false,
            None,
        )
        .await;
        assert!(matches!(outcome, EvaluationOutcome::Success(_)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(sink.messages.lock().unwrap().is_empty());
    }

    async fn assert_timers_cancelled(code: &str, timeout_ms: Option<u64>) -> EvaluationOutcome {
        let sink = Arc::new(CountingSink::default());
        let evaluator = Evaluator::new(ModuleRegistry::new().with(LogModule::new(sink.clone())));

        let (outcome, _) = evaluate(&evaluator, code, false, timeout_ms).await;
        let logged = sink.messages.lock().unwrap().len();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(sink.messages.lock().unwrap().len(), logged);
        outcome
    }

    #[tokio::test]
    async fn test_timers_cancelled_after_timeout() {
        let outcome = assert_timers_cancelled(
            r#"
            set_interval(function() log.info("tick") end, 5)
            return promise(function() end)
            "#,
            Some(50),
        )
        .await;

        assert!(matches!(outcome, EvaluationOutcome::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_timers_cancelled_after_failure() {
        let outcome = assert_timers_cancelled(
            r#"
            set_interval(function() log.info("tick") end, 5)
            error("x")
            "#,
            None,
        )
        .await;

        assert!(matches!(
            outcome,
            EvaluationOutcome::Failure(EvalError::Script { .. })
        ));
    }

    #[tokio::test]
    async fn test_caught_budget_still_times_out() {
        let (outcome, outputs) = evaluate(
            &evaluator(),
            "(function() pcall(function() while true do end end) return 5 end)()",
            false,
            Some(100),
        )
        .await;

        assert!(matches!(outcome, EvaluationOutcome::TimedOut { .. }));
        assert_eq!(outputs.timed_out, vec![true]);
        assert_eq!(outputs.result, None);
    }

    #[tokio::test]
    async fn test_protected_loop_is_interrupted() {
        let started = std::time::Instant::now();
        let (outcome, outputs) = evaluate(
            &evaluator(),
            r#"
            while true do
                pcall(function() while true do end end)
                coroutine.resume(coroutine.create(function() while true do end end))
            end
            "#,
            false,
            Some(100),
        )
        .await;

        assert!(matches!(outcome, EvaluationOutcome::TimedOut { .. }));
        assert_eq!(outputs.timed_out, vec![true]);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_context_is_not_shared_between_evaluations() {
        let evaluator = Evaluator::new(
            ModuleRegistry::new().with(ValueModule::new("settings", json!({"n": 1}), "Settings")),
        );

        evaluate(&evaluator, "settings.n = 99\nleak = true\nreturn 0", false, None).await;
        let (_, outputs) = evaluate(&evaluator, "{settings.n, leak == nil}", false, None).await;

        assert_eq!(outputs.result, Some(json!([1, true])));
    }

    #[tokio::test]
    async fn test_proto_is_an_ordinary_name() {
        let evaluator =
            Evaluator::new(ModuleRegistry::new().with(inputs(&[("__proto__", "p")])));
        let (_, outputs) = evaluate(&evaluator, "inputs.__proto__", false, None).await;

        assert_eq!(outputs.result, Some(json!("p")));
    }
}
