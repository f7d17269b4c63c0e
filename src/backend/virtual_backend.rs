//! Handler-table backend for virtual-backed entity types
//!
//! Each operation is an optional closure. The backend reports exactly the
//! operations it was given, so the conformance gate can name what is
//! missing; calling an empty slot returns `BackendError::Unsupported`.

use std::sync::Arc;

use super::contract::{Backend, BackendOperation, Record};
use super::errors::{BackendError, BackendResult};
use super::query::Query;
use crate::document::Document;
use crate::meta::Meta;

type ListFn = dyn Fn(&Meta, &Query) -> BackendResult<Vec<Record>> + Send + Sync;
type CountFn = dyn Fn(&Meta, &Query) -> BackendResult<u64> + Send + Sync;
type StatsFn = dyn Fn(&Meta, &Query) -> BackendResult<Record> + Send + Sync;
type InsertFn = dyn Fn(&Meta, &mut Document) -> BackendResult<()> + Send + Sync;
type LoadFn = dyn Fn(&Meta, &str) -> BackendResult<Option<Document>> + Send + Sync;
type UpdateFn = dyn Fn(&Meta, &Document) -> BackendResult<()> + Send + Sync;
type RemoveFn = dyn Fn(&Meta, &str) -> BackendResult<()> + Send + Sync;

/// Backend assembled from individual handlers.
///
/// ```ignore
/// let backend = VirtualBackend::new("workers")
///     .on_list(|_, _| Ok(Vec::new()))
///     .on_count(|_, _| Ok(0));
/// ```
#[derive(Clone, Default)]
pub struct VirtualBackend {
    name: String,
    list: Option<Arc<ListFn>>,
    count: Option<Arc<CountFn>>,
    stats: Option<Arc<StatsFn>>,
    insert: Option<Arc<InsertFn>>,
    load: Option<Arc<LoadFn>>,
    update: Option<Arc<UpdateFn>>,
    remove: Option<Arc<RemoveFn>>,
}

impl VirtualBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn on_list<F>(mut self, f: F) -> Self
    where
        F: Fn(&Meta, &Query) -> BackendResult<Vec<Record>> + Send + Sync + 'static,
    {
        self.list = Some(Arc::new(f));
        self
    }

    pub fn on_count<F>(mut self, f: F) -> Self
    where
        F: Fn(&Meta, &Query) -> BackendResult<u64> + Send + Sync + 'static,
    {
        self.count = Some(Arc::new(f));
        self
    }

    pub fn on_stats<F>(mut self, f: F) -> Self
    where
        F: Fn(&Meta, &Query) -> BackendResult<Record> + Send + Sync + 'static,
    {
        self.stats = Some(Arc::new(f));
        self
    }

    pub fn on_insert<F>(mut self, f: F) -> Self
    where
        F: Fn(&Meta, &mut Document) -> BackendResult<()> + Send + Sync + 'static,
    {
        self.insert = Some(Arc::new(f));
        self
    }

    pub fn on_load<F>(mut self, f: F) -> Self
    where
        F: Fn(&Meta, &str) -> BackendResult<Option<Document>> + Send + Sync + 'static,
    {
        self.load = Some(Arc::new(f));
        self
    }

    pub fn on_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&Meta, &Document) -> BackendResult<()> + Send + Sync + 'static,
    {
        self.update = Some(Arc::new(f));
        self
    }

    pub fn on_remove<F>(mut self, f: F) -> Self
    where
        F: Fn(&Meta, &str) -> BackendResult<()> + Send + Sync + 'static,
    {
        self.remove = Some(Arc::new(f));
        self
    }

    fn missing(meta: &Meta, operation: BackendOperation) -> BackendError {
        BackendError::Unsupported {
            entity_type: meta.name().to_string(),
            operation,
        }
    }
}

impl Backend for VirtualBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_records(&self, meta: &Meta, query: &Query) -> BackendResult<Vec<Record>> {
        let f = self
            .list
            .as_ref()
            .ok_or_else(|| Self::missing(meta, BackendOperation::ListRecords))?;
        f(meta, query)
    }

    fn count_records(&self, meta: &Meta, query: &Query) -> BackendResult<u64> {
        let f = self
            .count
            .as_ref()
            .ok_or_else(|| Self::missing(meta, BackendOperation::CountRecords))?;
        f(meta, query)
    }

    fn stats_records(&self, meta: &Meta, query: &Query) -> BackendResult<Record> {
        let f = self
            .stats
            .as_ref()
            .ok_or_else(|| Self::missing(meta, BackendOperation::StatsRecords))?;
        f(meta, query)
    }

    fn insert(&self, meta: &Meta, doc: &mut Document) -> BackendResult<()> {
        let f = self
            .insert
            .as_ref()
            .ok_or_else(|| Self::missing(meta, BackendOperation::Insert))?;
        f(meta, doc)
    }

    fn load(&self, meta: &Meta, name: &str) -> BackendResult<Option<Document>> {
        let f = self
            .load
            .as_ref()
            .ok_or_else(|| Self::missing(meta, BackendOperation::Load))?;
        f(meta, name)
    }

    fn update(&self, meta: &Meta, doc: &Document) -> BackendResult<()> {
        let f = self
            .update
            .as_ref()
            .ok_or_else(|| Self::missing(meta, BackendOperation::Update))?;
        f(meta, doc)
    }

    fn remove(&self, meta: &Meta, name: &str) -> BackendResult<()> {
        let f = self
            .remove
            .as_ref()
            .ok_or_else(|| Self::missing(meta, BackendOperation::Remove))?;
        f(meta, name)
    }

    fn provided_operations(&self) -> Vec<BackendOperation> {
        let slots = [
            (BackendOperation::ListRecords, self.list.is_some()),
            (BackendOperation::CountRecords, self.count.is_some()),
            (BackendOperation::StatsRecords, self.stats.is_some()),
            (BackendOperation::Insert, self.insert.is_some()),
            (BackendOperation::Load, self.load.is_some()),
            (BackendOperation::Update, self.update.is_some()),
            (BackendOperation::Remove, self.remove.is_some()),
        ];
        slots
            .into_iter()
            .filter(|(_, present)| *present)
            .map(|(op, _)| op)
            .collect()
    }
}
