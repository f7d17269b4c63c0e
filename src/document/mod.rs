//! Documents and their lifecycle
//!
//! - `Document`: one record instance with dirty tracking and child rows
//! - `DocState`: explicit lifecycle state machine
//! - `DocumentController`: create / get / save / delete / list / count / stats
//!
//! # Design Principles
//!
//! - A document is a per-operation value, mutated through `&mut`
//! - Validation collects every violation before anything is written
//! - Backend errors pass through unmodified, with no retry

mod coerce;
mod controller;
#[allow(clippy::module_inception)]
mod document;
mod errors;
mod hooks;
mod schema_record;
mod state;

pub use coerce::{coerce_value, default_value, DATETIME_FORMAT, DATE_FORMAT, TIME_FORMAT};
pub use controller::{DocumentController, DEFAULT_PAGE_LENGTH, MAX_PAGE_LENGTH};
pub use document::{Document, ParentRef, ENVELOPE_FIELDS, NAME_FIELD};
pub use errors::{
    DocumentError, DocumentResult, FieldRule, FieldValidationError, FieldViolation, RowRef,
};
pub use hooks::{NoopHook, ValidationHook};
pub use schema_record::{overlay_name, override_name, FIELDS_TABLE};
pub use state::{DocState, Origin};
