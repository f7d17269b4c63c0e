//! Schema records
//!
//! "Entity Type", "Custom Field" and "Property Override" documents are the
//! record form of stored metadata. They share the document machinery for
//! validation, but are read from the `SpecStore` and written through
//! `MetaAdmin` rather than a storage backend. "Field Spec" rows only exist
//! as children of an "Entity Type".

use serde_json::{Map, Value};

use super::document::{Document, NAME_FIELD};
use super::errors::{DocumentError, DocumentResult};
use crate::backend::Record;
use crate::meta::{SpecStore, CUSTOM_FIELD, FIELD_SPEC, PROPERTY_OVERRIDE};
use crate::schema::{
    CustomFieldOverlay, EntityTypeSpec, FieldSpec, PermissionRule, PropertyOverride,
    ENTITY_TYPE_REGISTRY,
};
use crate::value::is_empty;

/// Table field of "Entity Type" holding its Field Spec rows
pub const FIELDS_TABLE: &str = "fields";

/// Patchable attributes carried by Field Spec rows and Custom Field records
const FIELD_PROPERTIES: [&str; 18] = [
    "label",
    "options",
    "required",
    "unique",
    "hidden",
    "read_only",
    "is_virtual",
    "indexed",
    "allow_on_submit",
    "in_list_view",
    "in_standard_filter",
    "no_copy",
    "length",
    "precision",
    "width",
    "default",
    "expression",
    "permlevel",
];

/// Record name of a custom field overlay
pub fn overlay_name(entity_type: &str, fieldname: &str) -> String {
    format!("{}-{}", entity_type, fieldname)
}

/// Record name of a property override
pub fn override_name(entity_type: &str, fieldname: &str, property: &str) -> String {
    format!("{}-{}-{}", entity_type, fieldname, property)
}

// ==================== Document → metadata ====================

/// Builds an entity type from an "Entity Type" document and its rows.
pub fn entity_type_from_document(doc: &Document) -> DocumentResult<EntityTypeSpec> {
    let name = doc
        .name()
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| DocumentError::SchemaRecord("an entity type needs a name".into()))?;

    let mut spec = EntityTypeSpec::new(name.trim());
    spec.module = text(doc.values(), "module");
    spec.description = text(doc.values(), "description");
    spec.autoname = text(doc.values(), "autoname");
    spec.is_virtual_backend = flag(doc.values(), "is_virtual_backend");
    spec.is_table = flag(doc.values(), "is_table");
    spec.permissions = match doc.value("permissions") {
        Some(value) if !is_empty(value) => serde_json::from_value::<Vec<PermissionRule>>(value.clone())
            .map_err(|e| DocumentError::SchemaRecord(format!("permissions: {}", e)))?,
        _ => Vec::new(),
    };

    for row in doc.children(FIELDS_TABLE) {
        let mut field = field_from_values(row.values())?;
        if field.idx == 0 {
            field.idx = row.idx();
        }
        spec.fields.push(field);
    }
    Ok(spec)
}

pub fn overlay_from_document(doc: &Document) -> DocumentResult<CustomFieldOverlay> {
    let entity_type = text(doc.values(), "entity_type")
        .ok_or_else(|| DocumentError::SchemaRecord("a custom field needs an entity_type".into()))?;
    let mut field = field_from_values(doc.values())?;
    if let Some(position) = doc.value("position").and_then(Value::as_u64) {
        field.idx = u32::try_from(position).unwrap_or(0);
    }
    Ok(CustomFieldOverlay::new(entity_type, field))
}

pub fn override_from_document(doc: &Document) -> DocumentResult<PropertyOverride> {
    let values = doc.values();
    let required = |key: &str| {
        text(values, key).ok_or_else(|| DocumentError::SchemaRecord(format!("a property override needs '{}'", key)))
    };
    Ok(PropertyOverride::new(
        required("entity_type")?,
        required("fieldname")?,
        required("property")?,
        values.get("value").cloned().unwrap_or(Value::Null),
    ))
}

fn field_from_values(values: &Map<String, Value>) -> DocumentResult<FieldSpec> {
    let fieldname = text(values, "fieldname")
        .ok_or_else(|| DocumentError::SchemaRecord("a field needs a fieldname".into()))?;
    let kind = text(values, "kind")
        .ok_or_else(|| DocumentError::SchemaRecord(format!("field '{}' needs a kind", fieldname)))?
        .parse()
        .map_err(|e: String| DocumentError::SchemaRecord(format!("field '{}': {}", fieldname, e)))?;

    let mut field = FieldSpec::new(&fieldname, kind);
    for property in FIELD_PROPERTIES {
        let Some(value) = values.get(property).filter(|v| !is_empty(v)) else {
            continue;
        };
        field
            .set_property(property, value)
            .map_err(|e| DocumentError::SchemaRecord(format!("field '{}': {}", fieldname, e)))?;
    }
    Ok(field)
}

fn text(values: &Map<String, Value>, key: &str) -> Option<String> {
    values
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn flag(values: &Map<String, Value>, key: &str) -> bool {
    match values.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(v) => v.as_i64() == Some(1),
        None => false,
    }
}

// ==================== metadata → records ====================

fn field_record(field: &FieldSpec) -> Record {
    let mut record = Record::new();
    record.insert("fieldname".into(), Value::from(field.fieldname.as_str()));
    record.insert("kind".into(), Value::from(field.kind.as_str()));
    let optional = [
        ("label", field.label.as_deref()),
        ("options", field.options.as_deref()),
        ("default", field.default.as_deref()),
        ("expression", field.expression.as_deref()),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            record.insert(key.into(), Value::from(value));
        }
    }
    let flags = [
        ("required", field.required),
        ("unique", field.unique),
        ("hidden", field.hidden),
        ("read_only", field.read_only),
        ("is_virtual", field.is_virtual),
        ("indexed", field.indexed),
        ("allow_on_submit", field.allow_on_submit),
        ("in_list_view", field.in_list_view),
        ("in_standard_filter", field.in_standard_filter),
        ("no_copy", field.no_copy),
    ];
    for (key, set) in flags {
        record.insert(key.into(), Value::from(i64::from(set)));
    }
    let numbers = [("length", field.length), ("precision", field.precision), ("width", field.width)];
    for (key, value) in numbers {
        if let Some(value) = value {
            record.insert(key.into(), Value::from(value));
        }
    }
    record.insert("permlevel".into(), Value::from(field.permlevel));
    record
}

fn entity_type_record(spec: &EntityTypeSpec) -> Record {
    let mut record = Record::new();
    record.insert(NAME_FIELD.into(), Value::from(spec.name.as_str()));
    if let Some(module) = &spec.module {
        record.insert("module".into(), Value::from(module.as_str()));
    }
    if let Some(description) = &spec.description {
        record.insert("description".into(), Value::from(description.as_str()));
    }
    record.insert("is_virtual_backend".into(), Value::from(i64::from(spec.is_virtual_backend)));
    record.insert("is_table".into(), Value::from(i64::from(spec.is_table)));
    if let Some(autoname) = &spec.autoname {
        record.insert("autoname".into(), Value::from(autoname.as_str()));
    }
    if !spec.permissions.is_empty() {
        record.insert(
            "permissions".into(),
            serde_json::to_value(&spec.permissions).unwrap_or(Value::Null),
        );
    }
    record
}

fn field_rows(spec: &EntityTypeSpec) -> Vec<Record> {
    spec.fields
        .iter()
        .enumerate()
        .map(|(pos, field)| {
            let mut row = field_record(field);
            row.insert(NAME_FIELD.into(), Value::from(format!("{}-{}", spec.name, field.fieldname)));
            row.insert("parent".into(), Value::from(spec.name.as_str()));
            row.insert("parenttype".into(), Value::from(ENTITY_TYPE_REGISTRY));
            row.insert("parentfield".into(), Value::from(FIELDS_TABLE));
            row.insert("idx".into(), Value::from(pos + 1));
            row
        })
        .collect()
}

fn overlay_record(overlay: &CustomFieldOverlay) -> Record {
    let mut record = field_record(&overlay.field);
    record.insert(
        NAME_FIELD.into(),
        Value::from(overlay_name(&overlay.entity_type, &overlay.field.fieldname)),
    );
    record.insert("entity_type".into(), Value::from(overlay.entity_type.as_str()));
    record.insert("position".into(), Value::from(overlay.field.idx));
    record
}

fn override_record(ov: &PropertyOverride) -> Record {
    let mut record = Record::new();
    record.insert(
        NAME_FIELD.into(),
        Value::from(override_name(&ov.entity_type, &ov.fieldname, &ov.property)),
    );
    record.insert("entity_type".into(), Value::from(ov.entity_type.as_str()));
    record.insert("fieldname".into(), Value::from(ov.fieldname.as_str()));
    record.insert("property".into(), Value::from(ov.property.as_str()));
    record.insert("value".into(), ov.value.clone());
    record
}

/// Every stored record of a schema entity type, in store order.
pub fn records(store: &SpecStore, entity_type: &str) -> DocumentResult<Vec<Record>> {
    let mut out = Vec::new();
    for name in store.entity_type_names()? {
        match entity_type {
            ENTITY_TYPE_REGISTRY => {
                if let Some(spec) = store.base_spec(&name)? {
                    out.push(entity_type_record(&spec));
                }
            }
            FIELD_SPEC => {
                if let Some(spec) = store.base_spec(&name)? {
                    out.extend(field_rows(&spec));
                }
            }
            CUSTOM_FIELD => out.extend(store.overlays_for(&name)?.iter().map(overlay_record)),
            PROPERTY_OVERRIDE => out.extend(store.overrides_for(&name)?.iter().map(override_record)),
            _ => {}
        }
    }
    Ok(out)
}

/// Loads one schema record as a persisted document.
///
/// Several overrides may share a name; the latest one is returned.
pub fn load(store: &SpecStore, entity_type: &str, name: &str) -> DocumentResult<Option<Document>> {
    if entity_type == ENTITY_TYPE_REGISTRY {
        let Some(spec) = store.base_spec(name)? else {
            return Ok(None);
        };
        let mut doc = Document::from_record(ENTITY_TYPE_REGISTRY, entity_type_record(&spec));
        let rows = field_rows(&spec)
            .into_iter()
            .map(|row| Document::from_record(FIELD_SPEC, row))
            .collect();
        doc.set_children(FIELDS_TABLE, rows);
        return Ok(Some(doc));
    }

    let found = records(store, entity_type)?
        .into_iter()
        .rev()
        .find(|r| r.get(NAME_FIELD).and_then(Value::as_str) == Some(name));
    Ok(found.map(|record| Document::from_record(entity_type, record)))
}
