//! Document controller
//!
//! Drives a document through its lifecycle: defaults on create, virtual
//! fields on get, validation then `insert`/`update` on save, `remove` on
//! delete. Every operation resolves the current Meta first and never holds
//! a cache lock across a backend call.
//!
//! Validation order on save:
//!
//! 1. child rows split out of array values
//! 2. unknown fields
//! 3. defaults for missing values, then per-kind coercion
//! 4. required fields, child rows included
//! 5. unique pre-check against the backend (best effort)
//! 6. link targets exist
//! 7. business-validation hook
//!
//! All violations are collected and returned together.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::coerce::{coerce_value, default_value};
use super::document::{Document, NAME_FIELD};
use super::errors::{DocumentError, DocumentResult, FieldRule, FieldValidationError, FieldViolation};
use super::hooks::{NoopHook, ValidationHook};
use super::schema_record;
use super::state::{DocState, Origin};
use crate::admin::MetaAdmin;
use crate::backend::{
    apply_query, count_matching, group_counts, BackendRegistry, FilterExpr, FilterOperator, Query,
    Record, DEFAULT_TEXT_LENGTH,
};
use crate::meta::{Meta, MetaBuilder, MetaError, RecordClass, CUSTOM_FIELD, PROPERTY_OVERRIDE};
use crate::observability::{log_event, Event, MetricsRegistry};
use crate::schema::{FieldKind, ENTITY_TYPE_REGISTRY};
use crate::value::{is_empty, values_equal};
use crate::virtual_fields::VirtualFieldResolver;

pub const DEFAULT_PAGE_LENGTH: usize = 20;
pub const MAX_PAGE_LENGTH: usize = 1000;

pub struct DocumentController {
    builder: Arc<MetaBuilder>,
    backends: Arc<BackendRegistry>,
    resolver: Arc<VirtualFieldResolver>,
    admin: Arc<MetaAdmin>,
    hook: Arc<dyn ValidationHook>,
    metrics: Arc<MetricsRegistry>,
    default_length: u32,
    page_length: usize,
    max_page_length: usize,
}

impl DocumentController {
    pub fn new(
        builder: Arc<MetaBuilder>,
        backends: Arc<BackendRegistry>,
        resolver: Arc<VirtualFieldResolver>,
        admin: Arc<MetaAdmin>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            builder,
            backends,
            resolver,
            admin,
            hook: Arc::new(NoopHook),
            metrics,
            default_length: DEFAULT_TEXT_LENGTH,
            page_length: DEFAULT_PAGE_LENGTH,
            max_page_length: MAX_PAGE_LENGTH,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn ValidationHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_text_length(mut self, length: u32) -> Self {
        self.default_length = length;
        self
    }

    /// Page size applied to `list` when the query sets no limit, and the
    /// upper bound on any limit.
    pub fn with_page_limits(mut self, page_length: usize, max_page_length: usize) -> Self {
        self.page_length = page_length;
        self.max_page_length = max_page_length.max(1);
        self
    }

    pub fn meta(&self, entity_type: &str) -> DocumentResult<Arc<Meta>> {
        Ok(self.builder.get_meta(entity_type)?)
    }

    // ==================== Read path ====================

    /// A new, unsaved document with field defaults applied.
    pub fn create(&self, entity_type: &str) -> DocumentResult<Document> {
        let meta = self.meta(entity_type)?;
        let mut doc = Document::new(meta.name());
        for field in meta.storable_fields() {
            if let Some(value) = default_value(field) {
                let value = coerce_value(field, &value, self.default_length).unwrap_or(value);
                doc.set(field.fieldname.clone(), value)?;
            }
        }
        Ok(doc)
    }

    /// Loads a document and computes its virtual fields.
    pub fn get(&self, entity_type: &str, name: &str) -> DocumentResult<Document> {
        let meta = self.meta(entity_type)?;
        let mut doc = self
            .load_record(&meta, name)?
            .ok_or_else(|| DocumentError::not_found(meta.name(), name))?;
        self.compute(&meta, &mut doc)?;
        Ok(doc)
    }

    /// One page of rows. An unset limit uses the configured page length.
    pub fn list(&self, entity_type: &str, query: &Query) -> DocumentResult<Vec<Record>> {
        let meta = self.meta(entity_type)?;
        let mut query = query.clone();
        query.limit = Some(query.limit.unwrap_or(self.page_length).min(self.max_page_length));

        if meta.class() == RecordClass::Schema {
            let rows = schema_record::records(self.builder.store(), meta.name())?;
            return Ok(apply_query(rows, &query));
        }
        let backend = self.backends.backend_for(&meta)?;
        Ok(backend.list_records(&meta, &query)?)
    }

    /// Rows matching the query's filters; pagination is ignored.
    pub fn count(&self, entity_type: &str, query: &Query) -> DocumentResult<u64> {
        let meta = self.meta(entity_type)?;
        if meta.class() == RecordClass::Schema {
            let rows = schema_record::records(self.builder.store(), meta.name())?;
            return Ok(count_matching(rows.iter(), query));
        }
        let backend = self.backends.backend_for(&meta)?;
        Ok(backend.count_records(&meta, query)?)
    }

    pub fn stats(&self, entity_type: &str, query: &Query) -> DocumentResult<Record> {
        let meta = self.meta(entity_type)?;
        if meta.class() == RecordClass::Schema {
            let Some(field) = &query.group_by else {
                return Ok(Record::new());
            };
            let rows = schema_record::records(self.builder.store(), meta.name())?;
            return Ok(group_counts(rows.iter(), query, field));
        }
        let backend = self.backends.backend_for(&meta)?;
        Ok(backend.stats_records(&meta, query)?)
    }

    fn load_record(&self, meta: &Meta, name: &str) -> DocumentResult<Option<Document>> {
        if meta.class() == RecordClass::Schema {
            return schema_record::load(self.builder.store(), meta.name(), name);
        }
        let backend = self.backends.backend_for(meta)?;
        Ok(backend.load(meta, name)?)
    }

    // Virtual values for the document and each of its child rows
    fn compute(&self, meta: &Meta, doc: &mut Document) -> DocumentResult<()> {
        let computed = self.resolver.resolve_all(doc, meta)?;
        doc.set_computed(computed);

        for field in meta.table_fields() {
            let Some(child) = field.options_trimmed() else {
                continue;
            };
            let child_meta = self.meta(child)?;
            if child_meta.virtual_fields().next().is_none() {
                continue;
            }
            if let Some(rows) = doc.children_mut(&field.fieldname) {
                for row in rows.iter_mut() {
                    let computed = self.resolver.resolve_all(row, &child_meta)?;
                    row.set_computed(computed);
                }
            }
        }
        Ok(())
    }

    // ==================== Write path ====================

    /// Validates and persists a document.
    ///
    /// On rejection the document keeps its values, moves to `Rejected` with
    /// the violations attached and can be fixed and saved again. A backend
    /// failure returns it to the state it was in before the call.
    pub fn save(&self, doc: &mut Document) -> DocumentResult<()> {
        let meta = self.meta(doc.entity_type())?;
        let validating = doc.state().begin_validation()?;
        doc.set_state(validating);
        let origin = match validating {
            DocState::Validating { from } => from,
            _ => Origin::New,
        };

        let violations = match self.validate(&meta, doc) {
            Ok(violations) => violations,
            Err(err) => {
                doc.set_state(doc.state().abort());
                return Err(err);
            }
        };

        if !violations.is_empty() {
            let rejected = doc.state().reject()?;
            doc.set_state(rejected);
            doc.set_errors(violations.clone());
            self.metrics.increment_rejections();
            let count = violations.len().to_string();
            log_event(
                Event::DocumentRejected,
                &[
                    ("entity_type", meta.name()),
                    ("name", doc.name().unwrap_or("")),
                    ("violations", &count),
                ],
            );
            return Err(FieldValidationError {
                entity_type: meta.name().to_string(),
                name: doc.name().map(str::to_string),
                violations,
            }
            .into());
        }

        if let Err(err) = self.persist(&meta, doc, origin) {
            doc.set_state(doc.state().abort());
            return Err(err);
        }

        let persisted = doc.state().accept()?;
        doc.set_state(persisted);
        doc.set_errors(Vec::new());
        settle_children(doc);
        doc.mark_clean();
        self.compute(&meta, doc)?;

        let name = doc.name().unwrap_or("").to_string();
        match origin {
            Origin::New => {
                self.metrics.increment_inserts();
                log_event(Event::DocumentInserted, &[("entity_type", meta.name()), ("name", &name)]);
            }
            Origin::Persisted => {
                self.metrics.increment_updates();
                log_event(Event::DocumentUpdated, &[("entity_type", meta.name()), ("name", &name)]);
            }
        }
        Ok(())
    }

    fn persist(&self, meta: &Meta, doc: &mut Document, origin: Origin) -> DocumentResult<()> {
        if meta.class() == RecordClass::Schema {
            return self.persist_schema(meta, doc);
        }
        let backend = self.backends.backend_for(meta)?;
        match origin {
            Origin::New => backend.insert(meta, doc)?,
            Origin::Persisted => backend.update(meta, doc)?,
        }
        Ok(())
    }

    // Schema records are written through MetaAdmin
    fn persist_schema(&self, meta: &Meta, doc: &mut Document) -> DocumentResult<()> {
        match meta.name() {
            ENTITY_TYPE_REGISTRY => {
                let spec = schema_record::entity_type_from_document(doc)?;
                let name = spec.name.clone();
                self.admin.save_entity_type(spec)?;
                doc.set_name(name);
            }
            CUSTOM_FIELD => {
                let overlay = schema_record::overlay_from_document(doc)?;
                let name = schema_record::overlay_name(&overlay.entity_type, &overlay.field.fieldname);
                self.admin.add_custom_field(overlay)?;
                doc.set_name(name);
            }
            PROPERTY_OVERRIDE => {
                let ov = schema_record::override_from_document(doc)?;
                let name = schema_record::override_name(&ov.entity_type, &ov.fieldname, &ov.property);
                self.admin.set_property_override(ov)?;
                doc.set_name(name);
            }
            other => {
                return Err(DocumentError::SchemaRecord(format!(
                    "{} rows are saved through their parent",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Removes a stored document. The document cannot be used afterwards.
    pub fn delete(&self, doc: &mut Document) -> DocumentResult<()> {
        let deleted = doc.state().delete()?;
        let meta = self.meta(doc.entity_type())?;
        let name = doc
            .name()
            .map(str::to_string)
            .ok_or_else(|| DocumentError::not_found(meta.name(), ""))?;

        if meta.class() == RecordClass::Schema {
            self.delete_schema(&meta, doc, &name)?;
        } else {
            self.backends.backend_for(&meta)?.remove(&meta, &name)?;
        }

        doc.set_state(deleted);
        self.metrics.increment_removes();
        log_event(Event::DocumentDeleted, &[("entity_type", meta.name()), ("name", &name)]);
        Ok(())
    }

    /// Loads then deletes a document by name.
    pub fn delete_by_name(&self, entity_type: &str, name: &str) -> DocumentResult<()> {
        let meta = self.meta(entity_type)?;
        let mut doc = self
            .load_record(&meta, name)?
            .ok_or_else(|| DocumentError::not_found(meta.name(), name))?;
        self.delete(&mut doc)
    }

    fn delete_schema(&self, meta: &Meta, doc: &Document, name: &str) -> DocumentResult<()> {
        let text = |key: &str| doc.value(key).and_then(Value::as_str).unwrap_or("").to_string();
        match meta.name() {
            ENTITY_TYPE_REGISTRY => {
                self.admin.delete_entity_type(name)?;
            }
            CUSTOM_FIELD => {
                self.admin.remove_custom_field(&text("entity_type"), &text("fieldname"))?;
            }
            PROPERTY_OVERRIDE => {
                self.admin
                    .remove_property_override(&text("entity_type"), &text("fieldname"), &text("property"))?;
            }
            other => {
                return Err(DocumentError::SchemaRecord(format!(
                    "{} rows are deleted through their parent",
                    other
                )))
            }
        }
        Ok(())
    }

    // ==================== Validation ====================

    fn validate(&self, meta: &Meta, doc: &mut Document) -> DocumentResult<Vec<FieldViolation>> {
        let mut violations = Vec::new();

        violations.extend(split_children(meta, doc)?);
        violations.extend(self.check_values(meta, doc));

        for field in meta.table_fields() {
            let Some(child) = field.options_trimmed() else {
                continue;
            };
            let child_meta = self.meta(child)?;
            let Some(rows) = doc.children_mut(&field.fieldname) else {
                continue;
            };
            for row in rows.iter_mut() {
                let idx = row.idx();
                violations.extend(
                    self.check_values(&child_meta, row)
                        .into_iter()
                        .map(|v| v.in_row(&field.fieldname, idx)),
                );
            }
        }

        violations.extend(self.check_unique(meta, doc)?);
        violations.extend(self.check_child_unique(meta, doc)?);
        violations.extend(self.check_links(meta, doc)?);
        for field in meta.table_fields() {
            let Some(child) = field.options_trimmed() else {
                continue;
            };
            let child_meta = self.meta(child)?;
            for row in doc.children(&field.fieldname) {
                violations.extend(
                    self.check_links(&child_meta, row)?
                        .into_iter()
                        .map(|v| v.in_row(&field.fieldname, row.idx())),
                );
            }
        }

        violations.extend(self.hook.validate(meta, doc));
        Ok(violations)
    }

    /// Unknown fields, defaults, coercion and required checks for one
    /// document or row.
    fn check_values(&self, meta: &Meta, doc: &mut Document) -> Vec<FieldViolation> {
        let mut violations = Vec::new();

        let keys: Vec<String> = doc.values().keys().cloned().collect();
        for key in keys {
            match meta.field(&key) {
                None => violations.push(FieldViolation::new(
                    FieldRule::UnknownField,
                    &key,
                    format!("{} has no field '{}'", meta.name(), key),
                )),
                // Computed on read; a supplied value is dropped
                Some(field) if field.is_virtual => {
                    doc.values_mut().remove(&key);
                }
                Some(field) if !field.is_stored() => violations.push(FieldViolation::new(
                    FieldRule::UnknownField,
                    &key,
                    format!("{} field '{}' holds no value", field.kind, key),
                )),
                Some(_) => {}
            }
        }

        for field in meta.storable_fields() {
            let values = doc.values_mut();
            if !values.contains_key(&field.fieldname) {
                if let Some(default) = default_value(field) {
                    values.insert(field.fieldname.clone(), default);
                }
            }
            let Some(value) = values.get(&field.fieldname).cloned() else {
                continue;
            };
            match coerce_value(field, &value, self.default_length) {
                Ok(coerced) => {
                    values.insert(field.fieldname.clone(), coerced);
                }
                Err(violation) => violations.push(violation),
            }
        }

        for field in meta.required_fields() {
            let missing = if field.kind.is_table() {
                doc.children(&field.fieldname).is_empty()
            } else {
                doc.value(&field.fieldname).map_or(true, is_empty)
            };
            if missing {
                violations.push(FieldViolation::new(
                    FieldRule::Required,
                    &field.fieldname,
                    format!("'{}' is required", field.display_label()),
                ));
            }
        }
        violations
    }

    /// Best-effort duplicate check; the backend's unique constraint stays
    /// authoritative.
    fn check_unique(&self, meta: &Meta, doc: &Document) -> DocumentResult<Vec<FieldViolation>> {
        let mut violations = Vec::new();
        if meta.class() == RecordClass::Schema || meta.unique_fields().next().is_none() {
            return Ok(violations);
        }
        let backend = self.backends.backend_for(meta)?;

        for field in meta.unique_fields() {
            let Some(value) = doc.value(&field.fieldname).filter(|v| !is_empty(v)) else {
                continue;
            };
            let mut query = Query::new().filter(FilterExpr::eq(&field.fieldname, value.clone()));
            if let Some(name) = doc.name() {
                query = query.filter(FilterExpr::new(NAME_FIELD, FilterOperator::Neq, Value::from(name)));
            }
            if backend.count_records(meta, &query)? > 0 {
                violations.push(FieldViolation::new(
                    FieldRule::Duplicate,
                    &field.fieldname,
                    format!("{} '{}' is already used", field.display_label(), display(value)),
                ));
            }
        }
        Ok(violations)
    }

    /// Unique child fields: no two rows of the document share a value, and
    /// no row of another parent holds it.
    fn check_child_unique(&self, meta: &Meta, doc: &Document) -> DocumentResult<Vec<FieldViolation>> {
        let mut violations = Vec::new();
        if meta.class() == RecordClass::Schema {
            return Ok(violations);
        }

        for table in meta.table_fields() {
            let Some(child) = table.options_trimmed() else {
                continue;
            };
            let child_meta = self.meta(child)?;
            if child_meta.unique_fields().next().is_none() {
                continue;
            }
            // Child rows of a virtual parent live in the parent's backend
            let backend = if child_meta.is_virtual_backend() {
                None
            } else {
                Some(self.backends.backend_for(&child_meta)?)
            };
            let owned_here = |row: &Record| {
                doc.name().is_some()
                    && row.get("parent").and_then(Value::as_str) == doc.name()
                    && row.get("parenttype").and_then(Value::as_str) == Some(meta.name())
            };

            for field in child_meta.unique_fields() {
                let mut seen: Vec<&Value> = Vec::new();
                for row in doc.children(&table.fieldname) {
                    let Some(value) = row.value(&field.fieldname).filter(|v| !is_empty(v)) else {
                        continue;
                    };
                    let clash = if seen.iter().any(|s| values_equal(s, value)) {
                        true
                    } else {
                        seen.push(value);
                        match &backend {
                            Some(backend) => {
                                let query = Query::new().filter(FilterExpr::eq(&field.fieldname, value.clone()));
                                backend
                                    .list_records(&child_meta, &query)?
                                    .iter()
                                    .any(|other| !owned_here(other))
                            }
                            None => false,
                        }
                    };
                    if clash {
                        violations.push(
                            FieldViolation::new(
                                FieldRule::Duplicate,
                                &field.fieldname,
                                format!("{} '{}' is already used", field.display_label(), display(value)),
                            )
                            .in_row(&table.fieldname, row.idx()),
                        );
                    }
                }
            }
        }
        Ok(violations)
    }

    fn check_links(&self, meta: &Meta, doc: &Document) -> DocumentResult<Vec<FieldViolation>> {
        let mut violations = Vec::new();
        for field in meta.link_fields() {
            let Some(target_name) = doc
                .value(&field.fieldname)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
            else {
                continue;
            };
            let target = match field.kind {
                FieldKind::DynamicLink => field
                    .options_trimmed()
                    .and_then(|sibling| doc.value(sibling))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => field.options_trimmed().map(str::to_string),
            };
            let Some(target) = target.filter(|t| !t.trim().is_empty()) else {
                violations.push(FieldViolation::new(
                    FieldRule::InvalidLink,
                    &field.fieldname,
                    "link target entity type is not set",
                ));
                continue;
            };
            if !self.exists(&target, target_name)? {
                violations.push(FieldViolation::new(
                    FieldRule::InvalidLink,
                    &field.fieldname,
                    format!("{} '{}' does not exist", target, target_name),
                ));
            }
        }
        Ok(violations)
    }

    fn exists(&self, entity_type: &str, name: &str) -> DocumentResult<bool> {
        let meta = match self.builder.get_meta(entity_type) {
            Ok(meta) => meta,
            // An unknown target is an invalid link, not a failed save
            Err(MetaError::UnknownEntityType(_)) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        Ok(self.load_record(&meta, name)?.is_some())
    }
}

/// Moves array values of table fields into child rows.
fn split_children(meta: &Meta, doc: &mut Document) -> DocumentResult<Vec<FieldViolation>> {
    let mut violations = Vec::new();
    for field in meta.table_fields() {
        let Some(child) = field.options_trimmed() else {
            continue;
        };
        let Some(value) = doc.values_mut().remove(&field.fieldname) else {
            continue;
        };
        let items = match value {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            other => {
                violations.push(FieldViolation::new(
                    FieldRule::TypeMismatch,
                    &field.fieldname,
                    format!("table field expects a list of rows, got {}", other),
                ));
                continue;
            }
        };

        doc.set_children(field.fieldname.clone(), Vec::new());
        for (pos, item) in items.into_iter().enumerate() {
            let Value::Object(values) = item else {
                violations.push(
                    FieldViolation::new(FieldRule::TypeMismatch, &field.fieldname, "row must be an object")
                        .in_row(&field.fieldname, u32::try_from(pos + 1).unwrap_or(u32::MAX)),
                );
                continue;
            };
            let row = Document::from_values(child, strip_envelope(values));
            doc.append_child(field.fieldname.clone(), row)?;
        }
    }
    Ok(violations)
}

// Envelope keys of an incoming row are reassigned by the parent
fn strip_envelope(mut values: Map<String, Value>) -> Map<String, Value> {
    for key in ["parent", "parenttype", "parentfield", "idx"] {
        values.remove(key);
    }
    values
}

fn settle_children(doc: &mut Document) {
    for (_, rows) in doc.child_tables_mut() {
        for row in rows.iter_mut() {
            row.set_state(DocState::Persisted);
        }
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, RelationalBackend, VirtualBackend};
    use crate::meta::SpecStore;
    use crate::schema::{EntityTypeSpec, FieldSpec};
    use crate::virtual_fields::AccessorRegistry;
    use serde_json::json;

    struct Fixture {
        controller: DocumentController,
        admin: Arc<MetaAdmin>,
        backends: Arc<BackendRegistry>,
    }

    fn fixture() -> Fixture {
        let metrics = Arc::new(MetricsRegistry::new());
        let store = Arc::new(SpecStore::in_memory());
        let builder = Arc::new(MetaBuilder::new(store, Arc::clone(&metrics)));
        let default: Arc<dyn Backend> = Arc::new(RelationalBackend::in_memory(Arc::clone(&builder), 140));
        let backends = Arc::new(BackendRegistry::new(default));
        let admin = Arc::new(MetaAdmin::new(
            Arc::clone(builder.store()),
            Arc::clone(&builder),
            Arc::clone(&backends),
        ));
        let resolver = Arc::new(VirtualFieldResolver::new(Arc::new(AccessorRegistry::new())));
        let controller = DocumentController::new(
            builder,
            Arc::clone(&backends),
            resolver,
            Arc::clone(&admin),
            metrics,
        );
        Fixture {
            controller,
            admin,
            backends,
        }
    }

    fn values(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    fn setup_invoice(admin: &MetaAdmin) {
        admin
            .save_entity_type(
                EntityTypeSpec::new("Customer")
                    .with_autoname("field:customer_name")
                    .with_field(FieldSpec::new("customer_name", FieldKind::Data).required())
                    .with_field(FieldSpec::new("email", FieldKind::Data).with_options("Email").unique()),
            )
            .unwrap();
        admin
            .save_entity_type(
                EntityTypeSpec::child_table("Invoice Item")
                    .with_field(FieldSpec::new("item", FieldKind::Data).required())
                    .with_field(FieldSpec::new("qty", FieldKind::Int)),
            )
            .unwrap();
        admin
            .save_entity_type(
                EntityTypeSpec::new("Invoice")
                    .with_autoname("format:INV-{####}")
                    .with_field(FieldSpec::link("customer", "Customer").required())
                    .with_field(FieldSpec::select("status", &["Draft", "Sent", "Paid"]).with_default("Draft"))
                    .with_field(FieldSpec::new("amount", FieldKind::Currency).with_precision(2))
                    .with_field(FieldSpec::new("posted", FieldKind::Check))
                    .with_field(FieldSpec::table("items", "Invoice Item")),
            )
            .unwrap();
    }

    fn customer(fx: &Fixture, name: &str, email: &str) {
        let mut doc = Document::from_values(
            "Customer",
            values(json!({"customer_name": name, "email": email})),
        );
        fx.controller.save(&mut doc).unwrap();
    }

    #[test]
    fn test_create_applies_defaults() {
        let fx = fixture();
        setup_invoice(&fx.admin);
        let doc = fx.controller.create("Invoice").unwrap();
        assert_eq!(doc.value("status"), Some(&json!("Draft")));
        assert_eq!(doc.value("posted"), Some(&json!(0)));
        assert_eq!(doc.state(), DocState::New);
    }

    #[test]
    fn test_save_insert_then_update() {
        let fx = fixture();
        setup_invoice(&fx.admin);
        customer(&fx, "Acme", "ops@acme.test");

        let mut doc = Document::from_values(
            "Invoice",
            values(json!({
                "customer": "Acme",
                "amount": "99.999",
                "items": [{"item": "Bolt", "qty": "3"}, {"item": "Nut"}]
            })),
        );
        fx.controller.save(&mut doc).unwrap();
        assert_eq!(doc.name(), Some("INV-0001"));
        assert_eq!(doc.state(), DocState::Persisted);
        assert!(!doc.is_dirty());
        assert_eq!(doc.value("amount"), Some(&json!(100)));
        assert_eq!(doc.value("status"), Some(&json!("Draft")));
        assert_eq!(doc.children("items")[0].value("qty"), Some(&json!(3)));

        doc.set("status", "Sent").unwrap();
        fx.controller.save(&mut doc).unwrap();

        let loaded = fx.controller.get("Invoice", "INV-0001").unwrap();
        assert_eq!(loaded.value("status"), Some(&json!("Sent")));
        assert_eq!(loaded.children("items").len(), 2);
    }

    #[test]
    fn test_rejection_collects_every_violation() {
        let fx = fixture();
        setup_invoice(&fx.admin);

        let mut doc = Document::from_values(
            "Invoice",
            values(json!({
                "customer": "Nobody",
                "status": "Pending",
                "amount": "lots",
                "colour": "red",
                "items": [{"qty": 1}]
            })),
        );
        let err = fx.controller.save(&mut doc).unwrap_err();
        let DocumentError::Validation(err) = err else {
            panic!("expected validation failure");
        };
        assert!(err.has_rule(FieldRule::InvalidOption));
        assert!(err.has_rule(FieldRule::TypeMismatch));
        assert!(err.has_rule(FieldRule::UnknownField));
        assert!(err.has_rule(FieldRule::InvalidLink));
        let row = err.for_field("item").next().unwrap();
        assert_eq!(row.rule, FieldRule::Required);
        assert_eq!(row.row.as_ref().map(|r| r.idx), Some(1));

        assert!(matches!(doc.state(), DocState::Rejected { from: Origin::New }));
        assert!(!doc.errors().is_empty());
        assert_eq!(fx.controller.count("Invoice", &Query::new()).unwrap(), 0);
    }

    #[test]
    fn test_rejected_document_can_be_fixed() {
        let fx = fixture();
        setup_invoice(&fx.admin);
        customer(&fx, "Acme", "ops@acme.test");

        let mut doc = Document::from_values("Invoice", values(json!({"customer": "Ghost"})));
        assert!(fx.controller.save(&mut doc).is_err());
        doc.set("customer", "Acme").unwrap();
        fx.controller.save(&mut doc).unwrap();
        assert_eq!(doc.state(), DocState::Persisted);
        assert!(doc.errors().is_empty());
    }

    #[test]
    fn test_unique_precheck() {
        let fx = fixture();
        setup_invoice(&fx.admin);
        customer(&fx, "Acme", "ops@acme.test");

        let mut dup = Document::from_values(
            "Customer",
            values(json!({"customer_name": "Other", "email": "ops@acme.test"})),
        );
        match fx.controller.save(&mut dup).unwrap_err() {
            DocumentError::Validation(e) => assert!(e.has_rule(FieldRule::Duplicate)),
            other => panic!("unexpected error: {other}"),
        }

        // Re-saving the holder of the value is not a duplicate
        let mut acme = fx.controller.get("Customer", "Acme").unwrap();
        fx.controller.save(&mut acme).unwrap();
    }

    #[test]
    fn test_hook_runs_after_type_checks() {
        let fx = fixture();
        setup_invoice(&fx.admin);
        let hook = |_: &Meta, doc: &Document| {
            let mut out = Vec::new();
            if doc.value("customer_name").and_then(Value::as_str) == Some("Blocked") {
                out.push(FieldViolation::new(FieldRule::BusinessRule, "customer_name", "blocked"));
            }
            out
        };
        let controller = fx.controller.with_hook(Arc::new(hook));
        let mut doc = Document::from_values("Customer", values(json!({"customer_name": "Blocked"})));
        match controller.save(&mut doc).unwrap_err() {
            DocumentError::Validation(e) => assert!(e.has_rule(FieldRule::BusinessRule)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_delete_makes_document_unusable() {
        let fx = fixture();
        setup_invoice(&fx.admin);
        customer(&fx, "Acme", "ops@acme.test");

        let mut doc = fx.controller.get("Customer", "Acme").unwrap();
        fx.controller.delete(&mut doc).unwrap();
        assert!(doc.is_deleted());
        assert!(doc.set("email", "x@y.z").is_err());
        assert!(fx.controller.save(&mut doc).is_err());

        let err = fx.controller.get("Customer", "Acme").unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(err.code(), "DOC_NOT_FOUND");
    }

    #[test]
    fn test_backend_error_restores_state() {
        let fx = fixture();
        let failing = VirtualBackend::new("failing")
            .on_list(|_, _| Ok(Vec::new()))
            .on_count(|_, _| Ok(0))
            .on_stats(|_, _| Ok(Record::new()))
            .on_insert(|meta, _| Err(crate::backend::BackendError::handler(meta.name(), "disk full")))
            .on_load(|_, _| Ok(None))
            .on_update(|_, _| Ok(()))
            .on_remove(|_, _| Ok(()));
        fx.backends.register("Sensor", Arc::new(failing)).unwrap();
        fx.admin
            .save_entity_type(
                EntityTypeSpec::new("Sensor")
                    .virtual_backend()
                    .with_field(FieldSpec::new("reading", FieldKind::Float)),
            )
            .unwrap();

        let mut doc = Document::from_values("Sensor", values(json!({"reading": 1.5})));
        let err = fx.controller.save(&mut doc).unwrap_err();
        assert_eq!(err.code(), "BACKEND_HANDLER_FAILED");
        assert_eq!(doc.state(), DocState::New);
    }

    #[test]
    fn test_list_applies_page_limits() {
        let fx = fixture();
        setup_invoice(&fx.admin);
        for n in 0..5 {
            customer(&fx, &format!("C{}", n), &format!("c{}@x.test", n));
        }
        let controller = fx.controller.with_page_limits(2, 3);
        assert_eq!(controller.list("Customer", &Query::new()).unwrap().len(), 2);
        assert_eq!(controller.list("Customer", &Query::new().limit(10)).unwrap().len(), 3);
        assert_eq!(controller.count("Customer", &Query::new().limit(1)).unwrap(), 5);
    }

    #[test]
    fn test_entity_type_saved_as_document() {
        let fx = fixture();
        let mut doc = fx.controller.create(ENTITY_TYPE_REGISTRY).unwrap();
        doc.set_name("Note");
        doc.set(
            "fields",
            json!([
                {"fieldname": "title", "kind": "Data", "required": 1},
                {"fieldname": "body", "kind": "Text Editor"}
            ]),
        )
        .unwrap();
        fx.controller.save(&mut doc).unwrap();

        let meta = fx.controller.meta("Note").unwrap();
        assert!(meta.field("title").unwrap().required);
        assert_eq!(meta.kind_of("body"), Some(FieldKind::TextEditor));

        let listed = fx.controller.list(ENTITY_TYPE_REGISTRY, &Query::new()).unwrap();
        assert_eq!(listed.len(), 1);

        let mut loaded = fx.controller.get(ENTITY_TYPE_REGISTRY, "Note").unwrap();
        fx.controller.delete(&mut loaded).unwrap();
        assert!(fx.controller.meta("Note").is_err());
    }

    #[test]
    fn test_override_saved_as_document() {
        let fx = fixture();
        setup_invoice(&fx.admin);
        let mut doc = Document::from_values(
            PROPERTY_OVERRIDE,
            values(json!({
                "entity_type": "Invoice",
                "fieldname": "amount",
                "property": "label",
                "value": "Grand Total"
            })),
        );
        fx.controller.save(&mut doc).unwrap();
        assert_eq!(doc.name(), Some("Invoice-amount-label"));
        let meta = fx.controller.meta("Invoice").unwrap();
        assert_eq!(meta.field("amount").unwrap().display_label(), "Grand Total");
    }
}
