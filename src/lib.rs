//! metadoc - metadata-driven document records
//!
//! Entity types are described by data. A `MetaBuilder` merges a base spec
//! with custom-field overlays and property overrides into a validated,
//! cached `Meta`; a `DocumentController` validates, coerces and persists
//! documents against it through pluggable storage backends.

pub mod admin;
pub mod backend;
pub mod cli;
pub mod document;
pub mod engine;
pub mod meta;
pub mod observability;
pub mod schema;
pub mod value;
pub mod virtual_fields;

pub use admin::{AdminError, MetaAdmin};
pub use engine::{Engine, EngineBuilder, EngineError};
