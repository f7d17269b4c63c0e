//! In-memory record instance
//!
//! A `Document` is one record of one entity type: ordered field values,
//! computed virtual values, child-table rows and dirty tracking against
//! the last persisted copy. It is a per-operation value; callers must not
//! share one across concurrent operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::errors::{DocumentError, DocumentResult, FieldViolation};
use super::state::DocState;
use crate::meta::Meta;

/// Identity field of every record
pub const NAME_FIELD: &str = "name";

/// Keys owned by the record envelope rather than the Meta
pub const ENVELOPE_FIELDS: [&str; 5] = [NAME_FIELD, "parent", "parenttype", "parentfield", "idx"];

/// Back-reference from a child row to its parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    /// Parent record name
    pub parent: String,
    /// Parent entity type
    pub parenttype: String,
    /// Table field on the parent holding this row
    pub parentfield: String,
}

#[derive(Debug, Clone)]
pub struct Document {
    entity_type: String,
    name: Option<String>,
    values: Map<String, Value>,
    computed: Map<String, Value>,
    children: BTreeMap<String, Vec<Document>>,
    parent: Option<ParentRef>,
    idx: u32,
    state: DocState,
    original: Map<String, Value>,
    errors: Vec<FieldViolation>,
}

impl Document {
    /// Creates an empty, unsaved document.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            name: None,
            values: Map::new(),
            computed: Map::new(),
            children: BTreeMap::new(),
            parent: None,
            idx: 0,
            state: DocState::New,
            original: Map::new(),
            errors: Vec::new(),
        }
    }

    /// Creates an unsaved document from a JSON object.
    ///
    /// A `name` key becomes the document name; arrays of objects under
    /// other keys are left as values until the controller splits them
    /// into child rows.
    pub fn from_values(entity_type: impl Into<String>, mut values: Map<String, Value>) -> Self {
        let mut doc = Self::new(entity_type);
        if let Some(Value::String(name)) = values.remove(NAME_FIELD) {
            doc.name = Some(name);
        }
        doc.values = values;
        doc
    }

    /// Rebuilds a persisted document from a stored record.
    pub fn from_record(entity_type: impl Into<String>, mut record: Map<String, Value>) -> Self {
        let mut doc = Self::new(entity_type);
        doc.name = match record.remove(NAME_FIELD) {
            Some(Value::String(name)) => Some(name),
            _ => None,
        };

        let parent = take_string(&mut record, "parent");
        let parenttype = take_string(&mut record, "parenttype");
        let parentfield = take_string(&mut record, "parentfield");
        if let (Some(parent), Some(parenttype), Some(parentfield)) = (parent, parenttype, parentfield) {
            doc.parent = Some(ParentRef {
                parent,
                parenttype,
                parentfield,
            });
        }
        doc.idx = record
            .remove("idx")
            .and_then(|v| v.as_u64())
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);

        doc.values = record;
        doc.state = DocState::Persisted;
        doc.mark_clean();
        doc
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Stored value, falling back to the computed virtual value.
    pub fn get(&self, fieldname: &str) -> Option<&Value> {
        self.values
            .get(fieldname)
            .or_else(|| self.computed.get(fieldname))
    }

    /// Stored value only
    pub fn value(&self, fieldname: &str) -> Option<&Value> {
        self.values.get(fieldname)
    }

    /// Sets a field value. Fails once the document is deleted.
    pub fn set(&mut self, fieldname: impl Into<String>, value: impl Into<Value>) -> DocumentResult<()> {
        self.ensure_live()?;
        self.values.insert(fieldname.into(), value.into());
        Ok(())
    }

    /// Clears a field value.
    pub fn unset(&mut self, fieldname: &str) -> DocumentResult<Option<Value>> {
        self.ensure_live()?;
        Ok(self.values.remove(fieldname))
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.values
    }

    /// Virtual values computed after the last load or save
    pub fn computed(&self) -> &Map<String, Value> {
        &self.computed
    }

    pub(crate) fn set_computed(&mut self, computed: Map<String, Value>) {
        self.computed = computed;
    }

    /// Rows of a table field
    pub fn children(&self, table: &str) -> &[Document] {
        self.children.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children_mut(&mut self, table: &str) -> Option<&mut Vec<Document>> {
        self.children.get_mut(table)
    }

    /// Every table field with its rows
    pub(crate) fn child_tables_mut(&mut self) -> impl Iterator<Item = (&String, &mut Vec<Document>)> {
        self.children.iter_mut()
    }

    /// Appends a row to a table field, numbering it after the last row.
    pub fn append_child(&mut self, table: impl Into<String>, mut child: Document) -> DocumentResult<&mut Document> {
        self.ensure_live()?;
        let table = table.into();
        let rows = self.children.entry(table.clone()).or_default();
        child.idx = u32::try_from(rows.len()).unwrap_or(u32::MAX - 1) + 1;
        child.parent = Some(ParentRef {
            parent: self.name.clone().unwrap_or_default(),
            parenttype: self.entity_type.clone(),
            parentfield: table,
        });
        let pos = rows.len();
        rows.push(child);
        Ok(&mut rows[pos])
    }

    /// Replaces all rows of a table field.
    pub(crate) fn set_children(&mut self, table: impl Into<String>, rows: Vec<Document>) {
        self.children.insert(table.into(), rows);
    }

    pub fn parent(&self) -> Option<&ParentRef> {
        self.parent.as_ref()
    }

    pub(crate) fn set_parent(&mut self, parent: ParentRef, idx: u32) {
        self.parent = Some(parent);
        self.idx = idx;
    }

    /// 1-based position within the parent table, 0 for top-level records
    pub fn idx(&self) -> u32 {
        self.idx
    }

    pub fn state(&self) -> DocState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: DocState) {
        self.state = state;
    }

    pub fn is_deleted(&self) -> bool {
        self.state == DocState::Deleted
    }

    /// Violations from the last rejected save
    pub fn errors(&self) -> &[FieldViolation] {
        &self.errors
    }

    pub(crate) fn set_errors(&mut self, errors: Vec<FieldViolation>) {
        self.errors = errors;
    }

    /// Whether any stored value changed since the last load or save
    pub fn is_dirty(&self) -> bool {
        self.values != self.original
    }

    /// Fields added, changed or cleared since the last load or save
    pub fn dirty_fields(&self) -> Vec<&str> {
        let mut dirty: Vec<&str> = self
            .values
            .iter()
            .filter(|(k, v)| self.original.get(k.as_str()) != Some(v))
            .map(|(k, _)| k.as_str())
            .collect();
        dirty.extend(
            self.original
                .keys()
                .filter(|k| !self.values.contains_key(k.as_str()))
                .map(String::as_str),
        );
        dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.original = self.values.clone();
        for rows in self.children.values_mut() {
            for row in rows {
                row.mark_clean();
            }
        }
    }

    /// Stored values plus envelope keys, as handed to a backend.
    pub fn to_record(&self) -> Map<String, Value> {
        let mut record = Map::new();
        if let Some(name) = &self.name {
            record.insert(NAME_FIELD.to_string(), Value::from(name.as_str()));
        }
        if let Some(parent) = &self.parent {
            record.insert("parent".to_string(), Value::from(parent.parent.as_str()));
            record.insert("parenttype".to_string(), Value::from(parent.parenttype.as_str()));
            record.insert("parentfield".to_string(), Value::from(parent.parentfield.as_str()));
            record.insert("idx".to_string(), Value::from(self.idx));
        }
        for (k, v) in &self.values {
            record.insert(k.clone(), v.clone());
        }
        record
    }

    /// Canonical mapping in Meta order.
    ///
    /// Envelope keys come first, then every value-holding field of `meta`.
    /// Child rows keep their own insertion order. Virtual values are
    /// included only when `include_virtual` is set.
    pub fn to_canonical(&self, meta: &Meta, include_virtual: bool) -> Map<String, Value> {
        self.to_canonical_with(meta, include_virtual, &|_| None)
    }

    /// Like `to_canonical`, ordering child rows by their own Meta.
    pub fn to_canonical_with(
        &self,
        meta: &Meta,
        include_virtual: bool,
        child_meta: &dyn Fn(&str) -> Option<Arc<Meta>>,
    ) -> Map<String, Value> {
        let mut out = self.envelope();

        for field in meta.fields() {
            let key = field.fieldname.clone();
            if field.kind.is_table() {
                let child = field.options_trimmed().and_then(child_meta);
                let rows = self
                    .children(&field.fieldname)
                    .iter()
                    .map(|row| match &child {
                        Some(child) => Value::Object(row.to_canonical_with(child, include_virtual, child_meta)),
                        None => Value::Object(row.plain_canonical()),
                    })
                    .collect();
                out.insert(key, Value::Array(rows));
            } else if field.is_virtual {
                if include_virtual {
                    out.insert(key, self.computed.get(&field.fieldname).cloned().unwrap_or(Value::Null));
                }
            } else if field.kind.has_column() {
                out.insert(key, self.values.get(&field.fieldname).cloned().unwrap_or(Value::Null));
            }
        }
        out
    }

    fn envelope(&self) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert(
            NAME_FIELD.to_string(),
            self.name.as_deref().map(Value::from).unwrap_or(Value::Null),
        );
        if self.parent.is_some() {
            out.insert("idx".to_string(), Value::from(self.idx));
        }
        out
    }

    fn plain_canonical(&self) -> Map<String, Value> {
        let mut out = self.envelope();
        for (k, v) in &self.values {
            out.insert(k.clone(), v.clone());
        }
        out
    }

    fn ensure_live(&self) -> DocumentResult<()> {
        if self.is_deleted() {
            return Err(DocumentError::Deleted {
                entity_type: self.entity_type.clone(),
                name: self.name.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }
}

fn take_string(record: &mut Map<String, Value>, key: &str) -> Option<String> {
    match record.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::RecordClass;
    use crate::schema::{EntityTypeSpec, FieldKind, FieldSpec};
    use serde_json::json;

    fn invoice_meta() -> Meta {
        let spec = EntityTypeSpec::new("Invoice")
            .with_field(FieldSpec::new("amount", FieldKind::Currency))
            .with_field(FieldSpec::new("details", FieldKind::SectionBreak))
            .with_field(FieldSpec::table("items", "Invoice Item"))
            .with_field(FieldSpec::computed("total", FieldKind::Currency, "amount"))
            .with_field(FieldSpec::new("customer", FieldKind::Data));
        Meta::from_spec(spec, RecordClass::Data, 1)
    }

    #[test]
    fn test_get_falls_back_to_computed() {
        let mut doc = Document::new("Invoice");
        doc.set("amount", 100).unwrap();
        let mut computed = Map::new();
        computed.insert("total".into(), json!(110));
        doc.set_computed(computed);

        assert_eq!(doc.get("amount"), Some(&json!(100)));
        assert_eq!(doc.get("total"), Some(&json!(110)));
        assert_eq!(doc.value("total"), None);
    }

    #[test]
    fn test_dirty_tracking() {
        let mut record = Map::new();
        record.insert("name".into(), json!("INV-1"));
        record.insert("amount".into(), json!(100));
        let mut doc = Document::from_record("Invoice", record);
        assert!(!doc.is_dirty());
        assert_eq!(doc.name(), Some("INV-1"));

        doc.set("amount", 120).unwrap();
        doc.set("customer", "ACME").unwrap();
        assert!(doc.is_dirty());
        let mut dirty = doc.dirty_fields();
        dirty.sort();
        assert_eq!(dirty, vec!["amount", "customer"]);
    }

    #[test]
    fn test_deleted_document_rejects_mutation() {
        let mut doc = Document::new("Invoice");
        doc.set_state(DocState::Deleted);
        assert!(matches!(doc.set("amount", 1), Err(DocumentError::Deleted { .. })));
    }

    #[test]
    fn test_append_child_numbers_rows() {
        let mut doc = Document::new("Invoice");
        doc.set_name("INV-1");
        doc.append_child("items", Document::new("Invoice Item")).unwrap();
        let row = doc.append_child("items", Document::new("Invoice Item")).unwrap();
        assert_eq!(row.idx(), 2);
        assert_eq!(row.parent().unwrap().parentfield, "items");
        assert_eq!(doc.children("items").len(), 2);
    }

    #[test]
    fn test_canonical_follows_meta_order() {
        let meta = invoice_meta();
        let mut doc = Document::new("Invoice");
        doc.set("customer", "ACME").unwrap();
        doc.set("amount", 100).unwrap();
        let mut computed = Map::new();
        computed.insert("total".into(), json!(100));
        doc.set_computed(computed);

        let without = doc.to_canonical(&meta, false);
        let keys: Vec<_> = without.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["name", "amount", "items", "customer"]);

        let with = doc.to_canonical(&meta, true);
        assert_eq!(with["total"], json!(100));
    }

    #[test]
    fn test_record_round_trip_keeps_parent() {
        let mut record = Map::new();
        record.insert("name".into(), json!("row-1"));
        record.insert("parent".into(), json!("INV-1"));
        record.insert("parenttype".into(), json!("Invoice"));
        record.insert("parentfield".into(), json!("items"));
        record.insert("idx".into(), json!(3));
        record.insert("qty".into(), json!(2));

        let doc = Document::from_record("Invoice Item", record.clone());
        assert_eq!(doc.idx(), 3);
        assert_eq!(doc.parent().unwrap().parent, "INV-1");
        assert_eq!(doc.values().len(), 1);
        assert_eq!(doc.to_record(), record);
    }
}
