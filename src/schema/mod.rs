//! Entity-type metadata and its structural validator
//!
//! Every record type is described by an editable `EntityTypeSpec`: an
//! ordered list of `FieldSpec`s. The validator checks one spec at a time.
//!
//! # Design Principles
//!
//! - Closed kind enumeration, no free-form type strings
//! - Validation is pure and collects every violation
//! - Other entity types are reached only through `EntityTypeRegistry`

mod errors;
mod kinds;
mod types;
mod validator;

pub use errors::{SpecResult, SpecRule, SpecValidationError, SpecViolation};
pub use kinds::FieldKind;
pub use types::{
    normalize_check_defaults, CustomFieldOverlay, EntityTypeSpec, FieldSpec, PermissionRule,
    PropertyOverride, ENTITY_TYPE_REGISTRY,
};
pub use validator::{
    validate, EntityTypeRegistry, SpecValidator, DATA_OPTIONS, PRECISION_RANGE,
    RESERVED_FIELDNAMES,
};
