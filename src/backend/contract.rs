//! The seven-operation storage contract
//!
//! Every entity type is persisted through a `Backend`. The relational
//! default serves ordinary types; virtual-backed types register their own.

use serde_json::{Map, Value};

use super::errors::BackendResult;
use super::query::Query;
use crate::document::Document;
use crate::meta::Meta;

/// One row as returned by `list_records`
pub type Record = Map<String, Value>;

/// The operations a backend must provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendOperation {
    ListRecords,
    CountRecords,
    StatsRecords,
    Insert,
    Load,
    Update,
    Remove,
}

impl BackendOperation {
    pub const ALL: [BackendOperation; 7] = [
        BackendOperation::ListRecords,
        BackendOperation::CountRecords,
        BackendOperation::StatsRecords,
        BackendOperation::Insert,
        BackendOperation::Load,
        BackendOperation::Update,
        BackendOperation::Remove,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendOperation::ListRecords => "list_records",
            BackendOperation::CountRecords => "count_records",
            BackendOperation::StatsRecords => "stats_records",
            BackendOperation::Insert => "insert",
            BackendOperation::Load => "load",
            BackendOperation::Update => "update",
            BackendOperation::Remove => "remove",
        }
    }
}

/// Storage for the records of one or more entity types.
///
/// Every call receives the resolved `Meta` of the entity type it acts on.
pub trait Backend: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Filtered, sorted, paginated and projected rows.
    fn list_records(&self, meta: &Meta, query: &Query) -> BackendResult<Vec<Record>>;

    /// Number of rows matching the query's filters; pagination is ignored.
    fn count_records(&self, meta: &Meta, query: &Query) -> BackendResult<u64>;

    /// Aggregates over matching rows. An empty map is a valid answer.
    fn stats_records(&self, meta: &Meta, query: &Query) -> BackendResult<Record>;

    /// Stores a new record, assigning its name if needed. All-or-nothing.
    fn insert(&self, meta: &Meta, doc: &mut Document) -> BackendResult<()>;

    fn load(&self, meta: &Meta, name: &str) -> BackendResult<Option<Document>>;

    /// Overwrites a stored record, last writer wins.
    fn update(&self, meta: &Meta, doc: &Document) -> BackendResult<()>;

    /// Deletes a record. Removing a missing name is not an error.
    fn remove(&self, meta: &Meta, name: &str) -> BackendResult<()>;

    /// Operations this backend actually implements.
    ///
    /// Checked when a virtual-backed entity type is saved.
    fn provided_operations(&self) -> Vec<BackendOperation> {
        BackendOperation::ALL.to_vec()
    }
}
