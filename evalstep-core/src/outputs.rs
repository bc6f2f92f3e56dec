//! Publishing evaluation results as step outputs

use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

use crate::error::OutputError;
use crate::platform::CiPlatform;

pub const RESULT_OUTPUT: &str = "result";
pub const TIMED_OUT_OUTPUT: &str = "timedOut";

/// Receiver of the evaluation outcome
pub trait OutputSink: Send {
    /// Publishes the whole result as the single `result` output
    fn set_result(&mut self, value: &JsonValue) -> Result<(), OutputError>;

    /// Publishes the `timedOut` flag
    fn set_timed_out(&mut self, timed_out: bool) -> Result<(), OutputError>;

    /// Publishes one output per entry of `outputs`
    fn set_outputs(&mut self, outputs: &Map<String, JsonValue>) -> Result<(), OutputError>;
}

/// Renders a value as an output string
///
/// Strings are published verbatim, scalars through their textual form and
/// structured values as compact JSON.
pub fn format_output(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => "null".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// [`OutputSink`] writing through a [`CiPlatform`]
pub struct ActionOutputs<P: CiPlatform + ?Sized> {
    platform: Arc<P>,
}

impl<P: CiPlatform + ?Sized> ActionOutputs<P> {
    pub fn new(platform: Arc<P>) -> Self {
        Self { platform }
    }
}

impl<P: CiPlatform + ?Sized> OutputSink for ActionOutputs<P> {
    fn set_result(&mut self, value: &JsonValue) -> Result<(), OutputError> {
        self.platform
            .write_output(RESULT_OUTPUT, &format_output(value))?;
        Ok(())
    }

    fn set_timed_out(&mut self, timed_out: bool) -> Result<(), OutputError> {
        self.platform
            .write_output(TIMED_OUT_OUTPUT, if timed_out { "true" } else { "false" })?;
        Ok(())
    }

    fn set_outputs(&mut self, outputs: &Map<String, JsonValue>) -> Result<(), OutputError> {
        for (name, value) in outputs {
            self.platform
                .write_output(name, &format_output(value))
                .map_err(|e| OutputError::Format {
                    name: name.clone(),
                    cause: e.to_string(),
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, PlatformError};
    use crate::log::LogLevel;
    use crate::platform::InputOptions;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPlatform {
        writes: Mutex<Vec<(String, String)>>,
    }

    impl CiPlatform for RecordingPlatform {
        fn read_input(&self, _name: &str, _options: InputOptions) -> Result<String, ConfigError> {
            Ok(String::new())
        }

        fn write_output(&self, name: &str, value: &str) -> Result<(), PlatformError> {
            if name.is_empty() {
                return Err(PlatformError::InvalidOutput {
                    name: name.to_string(),
                    reason: "empty name".to_string(),
                });
            }
            self.writes
                .lock()
                .unwrap()
                .push((name.to_string(), value.to_string()));
            Ok(())
        }

        fn log(&self, _level: LogLevel, _message: &str) {}

        fn mask(&self, _secret: &str) {}

        fn mark_failed(&self, _message: &str) {}
    }

    #[test]
    fn test_format_primitives() {
        assert_eq!(format_output(&json!("sss")), "sss");
        assert_eq!(format_output(&json!(124)), "124");
        assert_eq!(format_output(&json!(13.43)), "13.43");
        assert_eq!(format_output(&JsonValue::Null), "null");
        assert_eq!(format_output(&json!(false)), "false");
        assert_eq!(format_output(&json!(true)), "true");
    }

    #[test]
    fn test_format_structured() {
        assert_eq!(format_output(&json!({"nested": "bba"})), r#"{"nested":"bba"}"#);
        assert_eq!(format_output(&json!({})), "{}");
        assert_eq!(format_output(&json!(["x", "y"])), r#"["x","y"]"#);
    }

    #[test]
    fn test_set_result_and_timed_out() {
        let platform = Arc::new(RecordingPlatform::default());
        let mut outputs = ActionOutputs::new(platform.clone());

        outputs.set_timed_out(false).unwrap();
        outputs.set_result(&json!("testVal")).unwrap();

        let writes = platform.writes.lock().unwrap();
        assert_eq!(
            *writes,
            vec![
                ("timedOut".to_string(), "false".to_string()),
                ("result".to_string(), "testVal".to_string()),
            ]
        );
    }

    #[test]
    fn test_set_outputs() {
        let platform = Arc::new(RecordingPlatform::default());
        let mut outputs = ActionOutputs::new(platform.clone());

        let values = json!({"prop1": "val1", "prop2": 49, "333": {"a": 2}});
        outputs.set_outputs(values.as_object().unwrap()).unwrap();

        let writes = platform.writes.lock().unwrap();
        assert_eq!(writes.len(), 3);
        assert!(writes.contains(&("prop1".to_string(), "val1".to_string())));
        assert!(writes.contains(&("prop2".to_string(), "49".to_string())));
        assert!(writes.contains(&("333".to_string(), r#"{"a":2}"#.to_string())));
    }

    #[test]
    fn test_set_outputs_names_failing_key() {
        let platform = Arc::new(RecordingPlatform::default());
        let mut outputs = ActionOutputs::new(platform);

        let values = json!({"": 1});
        let err = outputs.set_outputs(values.as_object().unwrap()).unwrap_err();
        assert!(err.to_string().starts_with("Can't format \"\" output."));
    }
}
