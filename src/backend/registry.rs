//! Backend registry
//!
//! Maps entity types to the backend that stores them. Ordinary types use
//! the default backend. A virtual-backed type uses the backend registered
//! under its name and never falls back to the default.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::contract::{Backend, BackendOperation};
use super::errors::{BackendError, BackendResult, ConformanceError};
use crate::meta::Meta;

pub struct BackendRegistry {
    default: Arc<dyn Backend>,
    virtual_backends: RwLock<HashMap<String, Arc<dyn Backend>>>,
}

impl BackendRegistry {
    pub fn new(default: Arc<dyn Backend>) -> Self {
        Self {
            default,
            virtual_backends: RwLock::new(HashMap::new()),
        }
    }

    /// Registers the backend for a virtual-backed entity type, replacing
    /// any earlier registration.
    pub fn register(&self, entity_type: impl Into<String>, backend: Arc<dyn Backend>) -> BackendResult<()> {
        self.virtual_backends
            .write()
            .map_err(|_| BackendError::Internal("lock poisoned".into()))?
            .insert(entity_type.into(), backend);
        Ok(())
    }

    pub fn registered(&self, entity_type: &str) -> BackendResult<Option<Arc<dyn Backend>>> {
        Ok(self
            .virtual_backends
            .read()
            .map_err(|_| BackendError::Internal("lock poisoned".into()))?
            .get(entity_type)
            .cloned())
    }

    /// Backend serving `meta`.
    pub fn backend_for(&self, meta: &Meta) -> BackendResult<Arc<dyn Backend>> {
        if !meta.is_virtual_backend() {
            return Ok(Arc::clone(&self.default));
        }
        self.registered(meta.name())?
            .ok_or_else(|| BackendError::NoBackend(meta.name().to_string()))
    }

    /// Checks the backend registered for `entity_type` provides all seven
    /// operations. An unregistered type is missing every operation.
    pub fn check_conformance(&self, entity_type: &str) -> Result<(), ConformanceError> {
        let provided = match self.registered(entity_type) {
            Ok(Some(backend)) => backend.provided_operations(),
            _ => Vec::new(),
        };
        let missing: Vec<BackendOperation> = BackendOperation::ALL
            .into_iter()
            .filter(|op| !provided.contains(op))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConformanceError {
                entity_type: entity_type.to_string(),
                missing,
            })
        }
    }
}
