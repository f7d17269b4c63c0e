//! Business-validation hook injected into the controller

use super::document::Document;
use super::errors::FieldViolation;
use crate::meta::Meta;

/// Business rules run after type and required checks.
///
/// Returning violations rejects the save.
pub trait ValidationHook: Send + Sync {
    fn validate(&self, meta: &Meta, doc: &Document) -> Vec<FieldViolation>;
}

impl<F> ValidationHook for F
where
    F: Fn(&Meta, &Document) -> Vec<FieldViolation> + Send + Sync,
{
    fn validate(&self, meta: &Meta, doc: &Document) -> Vec<FieldViolation> {
        self(meta, doc)
    }
}

/// Hook that accepts everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl ValidationHook for NoopHook {
    fn validate(&self, _meta: &Meta, _doc: &Document) -> Vec<FieldViolation> {
        Vec::new()
    }
}
