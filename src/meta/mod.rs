//! Resolved entity-type metadata
//!
//! A `Meta` is the merge of a base spec, its custom-field overlays and its
//! property overrides, validated and cached by `MetaBuilder`.
//!
//! # Design Principles
//!
//! - Explicit cache service, injected as `Arc<MetaBuilder>`
//! - Readers see a complete old Meta or a complete new one, never a half-merge
//! - Schema entity types are bootstrapped from hard-coded specs

mod bootstrap;
mod builder;
mod errors;
mod store;
mod types;

pub use bootstrap::{
    bootstrap_spec, is_schema_type, CUSTOM_FIELD, FIELD_SPEC, PROPERTY_OVERRIDE, SCHEMA_TYPES,
};
pub use builder::MetaBuilder;
pub use errors::{MetaError, MetaResult};
pub use store::{SpecSnapshot, SpecStore};
pub use types::{Meta, RecordClass};
