//! Accessor registry
//!
//! Accessors are native functions bound to one virtual field at startup.
//! They take precedence over the field's expression.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::document::Document;

/// Native computation of one virtual field
pub type Accessor = Arc<dyn Fn(&Document) -> Value + Send + Sync>;

/// Accessors keyed by `(entity_type, fieldname)`.
#[derive(Default)]
pub struct AccessorRegistry {
    accessors: RwLock<HashMap<(String, String), Accessor>>,
}

impl AccessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `accessor` to a field, replacing any earlier binding.
    pub fn register<F>(&self, entity_type: impl Into<String>, fieldname: impl Into<String>, accessor: F)
    where
        F: Fn(&Document) -> Value + Send + Sync + 'static,
    {
        if let Ok(mut accessors) = self.accessors.write() {
            accessors.insert((entity_type.into(), fieldname.into()), Arc::new(accessor));
        }
    }

    pub fn get(&self, entity_type: &str, fieldname: &str) -> Option<Accessor> {
        self.accessors
            .read()
            .ok()?
            .get(&(entity_type.to_string(), fieldname.to_string()))
            .cloned()
    }

    pub fn contains(&self, entity_type: &str, fieldname: &str) -> bool {
        self.get(entity_type, fieldname).is_some()
    }

    pub fn len(&self) -> usize {
        self.accessors.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
