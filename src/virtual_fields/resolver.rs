//! Virtual field resolution
//!
//! A virtual field is resolved by, in order:
//!
//! 1. the accessor registered for `(entity_type, fieldname)`
//! 2. the field's `expression`
//!
//! A field with neither is unresolved: `resolve` returns `None` and the
//! authoring error is logged. Resolution never mutates the document.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use thiserror::Error;

use super::expr::{self, Expr, ExprError, Scalar};
use super::registry::AccessorRegistry;
use crate::document::Document;
use crate::meta::Meta;
use crate::observability::{log_event, Event};
use crate::schema::FieldSpec;

/// A virtual field's expression failed to parse or evaluate
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{entity_type}.{fieldname}: {source}")]
pub struct ResolveError {
    pub entity_type: String,
    pub fieldname: String,
    #[source]
    pub source: ExprError,
}

impl ResolveError {
    pub fn code(&self) -> &'static str {
        "DOC_VIRTUAL_FIELD_FAILED"
    }
}

pub struct VirtualFieldResolver {
    accessors: Arc<AccessorRegistry>,
    parsed: RwLock<HashMap<String, Arc<Expr>>>,
}

impl VirtualFieldResolver {
    pub fn new(accessors: Arc<AccessorRegistry>) -> Self {
        Self {
            accessors,
            parsed: RwLock::new(HashMap::new()),
        }
    }

    pub fn accessors(&self) -> &Arc<AccessorRegistry> {
        &self.accessors
    }

    /// Computes one virtual field of `doc`.
    ///
    /// `Ok(None)` means the field has no accessor and no expression.
    pub fn resolve(&self, doc: &Document, field: &FieldSpec) -> Result<Option<Value>, ResolveError> {
        self.resolve_with(doc, field, &Map::new())
    }

    /// Computes every virtual field of `meta` in Meta order.
    ///
    /// Expressions may read virtual fields that come earlier. Unresolved
    /// fields map to null.
    pub fn resolve_all(&self, doc: &Document, meta: &Meta) -> Result<Map<String, Value>, ResolveError> {
        let mut computed = Map::new();
        for field in meta.virtual_fields() {
            let value = self.resolve_with(doc, field, &computed)?.unwrap_or(Value::Null);
            computed.insert(field.fieldname.clone(), value);
        }
        Ok(computed)
    }

    fn resolve_with(
        &self,
        doc: &Document,
        field: &FieldSpec,
        computed: &Map<String, Value>,
    ) -> Result<Option<Value>, ResolveError> {
        if let Some(accessor) = self.accessors.get(doc.entity_type(), &field.fieldname) {
            return Ok(Some(accessor(doc)));
        }

        let Some(source) = field.expression.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            log_event(
                Event::VirtualFieldUnresolved,
                &[("entity_type", doc.entity_type()), ("fieldname", &field.fieldname)],
            );
            return Ok(None);
        };

        let fail = |source: ExprError| ResolveError {
            entity_type: doc.entity_type().to_string(),
            fieldname: field.fieldname.clone(),
            source,
        };

        let parsed = self.parsed(source).map_err(fail)?;
        let lookup = |name: &str| computed.get(name).or_else(|| doc.get(name)).cloned();
        parsed.eval(&lookup).map(|s| Some(Scalar::into_json(s))).map_err(fail)
    }

    // Parsed expressions are cached by source text
    fn parsed(&self, source: &str) -> Result<Arc<Expr>, ExprError> {
        if let Some(expr) = self.parsed.read().ok().and_then(|p| p.get(source).cloned()) {
            return Ok(expr);
        }
        let expr = Arc::new(expr::parse(source)?);
        if let Ok(mut parsed) = self.parsed.write() {
            parsed.insert(source.to_string(), Arc::clone(&expr));
        }
        Ok(expr)
    }
}
