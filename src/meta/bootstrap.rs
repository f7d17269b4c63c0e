//! Hard-coded metadata for the schema-describing entity types
//!
//! Entity types are themselves records. Their own Metas cannot come from
//! the builder without a circular dependency, so they are fixed here.

use crate::schema::{EntityTypeSpec, FieldKind, FieldSpec, ENTITY_TYPE_REGISTRY};

pub const FIELD_SPEC: &str = "Field Spec";
pub const CUSTOM_FIELD: &str = "Custom Field";
pub const PROPERTY_OVERRIDE: &str = "Property Override";

/// Names of every schema entity type
pub const SCHEMA_TYPES: [&str; 4] = [ENTITY_TYPE_REGISTRY, FIELD_SPEC, CUSTOM_FIELD, PROPERTY_OVERRIDE];

pub fn is_schema_type(name: &str) -> bool {
    SCHEMA_TYPES.contains(&name)
}

/// Bootstrap spec for a schema entity type
pub fn bootstrap_spec(name: &str) -> Option<EntityTypeSpec> {
    match name {
        ENTITY_TYPE_REGISTRY => Some(entity_type_spec()),
        FIELD_SPEC => Some(field_spec_spec()),
        CUSTOM_FIELD => Some(custom_field_spec()),
        PROPERTY_OVERRIDE => Some(property_override_spec()),
        _ => None,
    }
}

fn entity_type_spec() -> EntityTypeSpec {
    let mut spec = EntityTypeSpec::new(ENTITY_TYPE_REGISTRY)
        .with_autoname("prompt")
        .with_field(FieldSpec::new("module", FieldKind::Data))
        .with_field(FieldSpec::new("description", FieldKind::SmallText))
        .with_field(FieldSpec::new("is_virtual_backend", FieldKind::Check))
        .with_field(FieldSpec::new("is_table", FieldKind::Check))
        .with_field(FieldSpec::new("autoname", FieldKind::Data))
        .with_field(FieldSpec::table("fields", FIELD_SPEC))
        .with_field(FieldSpec::new("permissions", FieldKind::Json));
    spec.module = Some("Core".to_string());
    spec.normalize();
    spec
}

/// Columns shared by "Field Spec" rows and "Custom Field" records
fn field_properties() -> Vec<FieldSpec> {
    let kinds: Vec<&str> = FieldKind::ALL.iter().map(FieldKind::as_str).collect();
    vec![
        FieldSpec::new("fieldname", FieldKind::Data).required(),
        FieldSpec::select("kind", &kinds).required(),
        FieldSpec::new("label", FieldKind::Data),
        FieldSpec::new("options", FieldKind::SmallText),
        FieldSpec::new("required", FieldKind::Check),
        FieldSpec::new("unique", FieldKind::Check),
        FieldSpec::new("hidden", FieldKind::Check),
        FieldSpec::new("read_only", FieldKind::Check),
        FieldSpec::new("is_virtual", FieldKind::Check),
        FieldSpec::new("indexed", FieldKind::Check),
        FieldSpec::new("allow_on_submit", FieldKind::Check),
        FieldSpec::new("in_list_view", FieldKind::Check),
        FieldSpec::new("in_standard_filter", FieldKind::Check),
        FieldSpec::new("no_copy", FieldKind::Check),
        FieldSpec::new("length", FieldKind::Int),
        FieldSpec::new("precision", FieldKind::Int),
        FieldSpec::new("width", FieldKind::Int),
        FieldSpec::new("default", FieldKind::SmallText),
        FieldSpec::new("expression", FieldKind::Code),
        FieldSpec::new("permlevel", FieldKind::Int),
    ]
}

fn field_spec_spec() -> EntityTypeSpec {
    let mut spec = EntityTypeSpec::child_table(FIELD_SPEC);
    for field in field_properties() {
        spec = spec.with_field(field);
    }
    spec.module = Some("Core".to_string());
    spec.normalize();
    spec
}

fn custom_field_spec() -> EntityTypeSpec {
    let mut spec = EntityTypeSpec::new(CUSTOM_FIELD)
        .with_field(FieldSpec::link("entity_type", ENTITY_TYPE_REGISTRY).required())
        .with_field(FieldSpec::new("position", FieldKind::Int));
    for field in field_properties() {
        spec = spec.with_field(field);
    }
    spec.module = Some("Core".to_string());
    spec.normalize();
    spec
}

fn property_override_spec() -> EntityTypeSpec {
    let mut spec = EntityTypeSpec::new(PROPERTY_OVERRIDE)
        .with_field(FieldSpec::link("entity_type", ENTITY_TYPE_REGISTRY).required())
        .with_field(FieldSpec::new("fieldname", FieldKind::Data).required())
        .with_field(FieldSpec::new("property", FieldKind::Data).required())
        .with_field(FieldSpec::new("value", FieldKind::Json));
    spec.module = Some("Core".to_string());
    spec.normalize();
    spec
}
