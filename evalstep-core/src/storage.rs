//! Lazy, rule-gated JSON coercion of raw key/value lookups
//!
//! [`KeyValueJsonStorage`] sits between a raw `name -> string` lookup (action
//! inputs, environment variables) and the script. Keys selected by a
//! [`MatchKeyRule`] are decoded as JSON on first access and memoized; every
//! other key is passed through verbatim.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::StorageError;
use crate::log::{LogLevel, LogSink};
use crate::match_rule::MatchKeyRule;

/// Raw lookup function: `None` means the key is absent
pub type RawLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Anything that can resolve a name to a script-visible value
pub trait ValueLookup: Send + Sync {
    fn lookup(&self, name: &str) -> Result<Option<JsonValue>, StorageError>;
}

pub struct KeyValueJsonStorage {
    raw_lookup: RawLookup,
    rule: MatchKeyRule,
    case_sensitive_keys: bool,
    entity: String,
    logger: Option<Arc<dyn LogSink>>,
    cache: Mutex<HashMap<String, JsonValue>>,
}

impl KeyValueJsonStorage {
    /// # Arguments
    /// * `raw_lookup` - source of raw string values
    /// * `rule` - selects the keys holding JSON
    /// * `case_sensitive_keys` - whether cache keys keep their case
    /// * `entity` - label used in error messages (e.g. `"input"`)
    pub fn new(
        raw_lookup: RawLookup,
        rule: MatchKeyRule,
        case_sensitive_keys: bool,
        entity: impl Into<String>,
    ) -> Self {
        Self {
            raw_lookup,
            rule,
            case_sensitive_keys,
            entity: entity.into(),
            logger: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Reports every successful JSON decode to `logger`
    pub fn with_logger(mut self, logger: Arc<dyn LogSink>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Returns the value of `name`
    ///
    /// The raw lookup is always consulted. A cached decode for the same
    /// effective name wins over whatever the raw source returns now.
    pub fn get_input(&self, name: &str) -> Result<Option<JsonValue>, StorageError> {
        let raw_value = (self.raw_lookup)(name);

        let effective_name = if self.case_sensitive_keys {
            name.to_string()
        } else {
            name.to_uppercase()
        };

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.get(&effective_name) {
            return Ok(Some(cached.clone()));
        }

        let Some(raw_value) = raw_value else {
            return Ok(None);
        };

        if !self.rule.matches(name) {
            return Ok(Some(JsonValue::String(raw_value)));
        }

        let parsed: JsonValue =
            serde_json::from_str(&raw_value).map_err(|e| StorageError::Parse {
                key: name.to_string(),
                entity: self.entity.clone(),
                message: e.to_string(),
            })?;

        cache.insert(effective_name, parsed.clone());
        drop(cache);

        tracing::debug!("Decoded \"{}\" {} as JSON", name, self.entity);
        if let Some(logger) = &self.logger {
            logger.write(
                LogLevel::Debug,
                &format!("\"{}\" {} parsed as JSON", name, self.entity),
            );
        }

        Ok(Some(parsed))
    }
}

impl ValueLookup for KeyValueJsonStorage {
    fn lookup(&self, name: &str) -> Result<Option<JsonValue>, StorageError> {
        self.get_input(name)
    }
}
