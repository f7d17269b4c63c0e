//! The resolved, read-only descriptor of one entity type

use std::collections::HashMap;

use serde::Serialize;

use crate::schema::{EntityTypeSpec, FieldKind, FieldSpec, PermissionRule};

/// Distinguishes ordinary entity data from schema-describing records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordClass {
    Data,
    /// "Entity Type", "Field Spec", "Custom Field", "Property Override"
    Schema,
}

/// Base spec merged with overlays and overrides, sorted by `idx`.
///
/// A Meta is immutable once built; a metadata write produces a new one.
#[derive(Debug, Clone, Serialize)]
pub struct Meta {
    name: String,
    module: Option<String>,
    fields: Vec<FieldSpec>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    is_virtual_backend: bool,
    is_table: bool,
    autoname: Option<String>,
    permissions: Vec<PermissionRule>,
    class: RecordClass,
    generation: u64,
}

impl Meta {
    /// Freezes a merged spec. Fields must already be in final order.
    pub fn from_spec(spec: EntityTypeSpec, class: RecordClass, generation: u64) -> Self {
        let index = spec
            .fields
            .iter()
            .enumerate()
            .map(|(pos, f)| (f.fieldname.clone(), pos))
            .collect();

        Self {
            name: spec.name,
            module: spec.module,
            fields: spec.fields,
            index,
            is_virtual_backend: spec.is_virtual_backend,
            is_table: spec.is_table,
            autoname: spec.autoname,
            permissions: spec.permissions,
            class,
            generation,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn is_virtual_backend(&self) -> bool {
        self.is_virtual_backend
    }

    pub fn is_table(&self) -> bool {
        self.is_table
    }

    pub fn autoname(&self) -> Option<&str> {
        self.autoname.as_deref()
    }

    pub fn permissions(&self) -> &[PermissionRule] {
        &self.permissions
    }

    pub fn class(&self) -> RecordClass {
        self.class
    }

    /// Store generation this Meta was built from
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// All fields in `idx` order
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, fieldname: &str) -> Option<&FieldSpec> {
        self.index.get(fieldname).map(|&pos| &self.fields[pos])
    }

    pub fn has_field(&self, fieldname: &str) -> bool {
        self.index.contains_key(fieldname)
    }

    /// Fields that occupy a storage column
    pub fn storable_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.is_stored())
    }

    /// Fields computed on read
    pub fn virtual_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.is_virtual)
    }

    /// Table and table-multiselect fields
    pub fn table_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.kind.is_table())
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.storable_fields().filter(|f| f.unique)
    }

    /// Required fields that can hold a value
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(|f| f.required && !f.kind.is_layout() && !f.is_virtual)
    }

    pub fn link_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.storable_fields().filter(|f| f.kind.is_link())
    }

    /// Whether any table field embeds `child`
    pub fn embeds(&self, child: &str) -> bool {
        self.table_fields()
            .any(|f| f.options_trimmed() == Some(child))
    }

    /// Child entity type behind a table field
    pub fn child_type(&self, fieldname: &str) -> Option<&str> {
        self.field(fieldname)
            .filter(|f| f.kind.is_table())
            .and_then(FieldSpec::options_trimmed)
    }

    /// Kind of a field, `None` when the field is unknown
    pub fn kind_of(&self, fieldname: &str) -> Option<FieldKind> {
        self.field(fieldname).map(|f| f.kind)
    }
}
