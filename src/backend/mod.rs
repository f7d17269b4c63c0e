//! Storage backends
//!
//! - `Backend`: the seven-operation contract every storage implements
//! - `RelationalBackend`: typed columns, naming rules, unique columns,
//!   optional append-only journal
//! - `VirtualBackend`: handler table for virtual-backed entity types
//! - `BackendRegistry`: routes a Meta to its backend and runs the
//!   conformance check
//!
//! Backend errors are passed through to callers unmodified.

mod contract;
mod errors;
mod journal;
mod naming;
mod query;
mod registry;
mod relational;
mod virtual_backend;

pub use contract::{Backend, BackendOperation, Record};
pub use errors::{BackendError, BackendResult, ConformanceError};
pub use journal::{Journal, JournalEntry};
pub use naming::NamingRule;
pub use query::{
    apply_query, count_matching, group_counts, FilterExpr, FilterOperator, OrderBy, Query,
    RowMatcher, SortDirection,
};
pub use registry::BackendRegistry;
pub use relational::{columns_for, Column, ColumnType, RelationalBackend, DEFAULT_TEXT_LENGTH};
pub use virtual_backend::VirtualBackend;
