//! Property-access facade over a [`ValueLookup`]
//!
//! Scripts see `inputs` and `env` as plain objects. Every property read goes
//! straight to the lookup; caching, when wanted, lives in the lookup itself
//! (see [`crate::storage::KeyValueJsonStorage`]).

use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::ProxyError;
use crate::storage::ValueLookup;

#[derive(Clone)]
pub struct ProxyObject {
    lookup: Arc<dyn ValueLookup>,
    entity: String,
}

impl ProxyObject {
    /// # Arguments
    /// * `lookup` - resolves property names to values
    /// * `entity` - label used in error messages (e.g. `"input"`)
    pub fn new(lookup: Arc<dyn ValueLookup>, entity: impl Into<String>) -> Self {
        Self {
            lookup,
            entity: entity.into(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Reads the property `name`
    pub fn get(&self, name: &str) -> Result<Option<JsonValue>, ProxyError> {
        self.lookup.lookup(name).map_err(|e| ProxyError::Lookup {
            name: name.to_string(),
            entity: self.entity.clone(),
            cause: e.to_string(),
        })
    }

    /// Error for a property key that isn't a string
    pub fn non_string_key(&self) -> ProxyError {
        ProxyError::NonStringKey {
            entity: self.entity.clone(),
        }
    }

    /// Error for an attempted property assignment
    pub fn read_only(&self, name: &str) -> ProxyError {
        ProxyError::ReadOnly {
            name: name.to_string(),
            entity: self.entity.clone(),
        }
    }
}

impl std::fmt::Debug for ProxyObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyObject")
            .field("entity", &self.entity)
            .finish_non_exhaustive()
    }
}
