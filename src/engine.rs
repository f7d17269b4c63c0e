//! Engine wiring
//!
//! Builds the spec store, Meta cache, default backend, backend registry,
//! virtual-field resolver, metadata admin and document controller in
//! dependency order. Accessors and virtual backends are registered here,
//! before the engine serves its first operation.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::admin::MetaAdmin;
use crate::backend::{Backend, BackendError, BackendRegistry, RelationalBackend, DEFAULT_TEXT_LENGTH};
use crate::document::{
    Document, DocumentController, ValidationHook, DEFAULT_PAGE_LENGTH, MAX_PAGE_LENGTH,
};
use crate::meta::{MetaBuilder, MetaError, SpecStore};
use crate::observability::MetricsRegistry;
use crate::virtual_fields::{AccessorRegistry, VirtualFieldResolver};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("metadata store: {0}")]
    Meta(#[from] MetaError),

    #[error("record storage: {0}")]
    Backend(#[from] BackendError),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Meta(e) => e.code(),
            EngineError::Backend(e) => e.code(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

pub struct EngineBuilder {
    data_dir: Option<PathBuf>,
    persist_documents: bool,
    text_length: u32,
    page_length: usize,
    max_page_length: usize,
    hook: Option<Arc<dyn ValidationHook>>,
    accessors: Arc<AccessorRegistry>,
    virtual_backends: Vec<(String, Arc<dyn Backend>)>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            data_dir: None,
            persist_documents: true,
            text_length: DEFAULT_TEXT_LENGTH,
            page_length: DEFAULT_PAGE_LENGTH,
            max_page_length: MAX_PAGE_LENGTH,
            hook: None,
            accessors: Arc::new(AccessorRegistry::new()),
            virtual_backends: Vec::new(),
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists metadata (and documents, unless disabled) under `path`.
    /// Without a data directory everything lives in memory.
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Whether the default backend journals records to disk
    pub fn persist_documents(mut self, persist: bool) -> Self {
        self.persist_documents = persist;
        self
    }

    pub fn text_length(mut self, length: u32) -> Self {
        self.text_length = length;
        self
    }

    pub fn page_limits(mut self, page_length: usize, max_page_length: usize) -> Self {
        self.page_length = page_length;
        self.max_page_length = max_page_length;
        self
    }

    pub fn hook(mut self, hook: Arc<dyn ValidationHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Binds a function computing a virtual field.
    pub fn accessor<F>(self, entity_type: &str, fieldname: &str, accessor: F) -> Self
    where
        F: Fn(&Document) -> Value + Send + Sync + 'static,
    {
        self.accessors.register(entity_type, fieldname, accessor);
        self
    }

    /// Registers the backend of a virtual-backed entity type.
    pub fn virtual_backend(mut self, entity_type: &str, backend: Arc<dyn Backend>) -> Self {
        self.virtual_backends.push((entity_type.to_string(), backend));
        self
    }

    pub fn build(self) -> EngineResult<Engine> {
        let metrics = Arc::new(MetricsRegistry::new());
        let store = Arc::new(match &self.data_dir {
            Some(dir) => SpecStore::open(dir)?,
            None => SpecStore::in_memory(),
        });
        let builder = Arc::new(MetaBuilder::new(Arc::clone(&store), Arc::clone(&metrics)));

        let relational = Arc::new(match &self.data_dir {
            Some(dir) if self.persist_documents => {
                let backend = RelationalBackend::open(Arc::clone(&builder), dir, self.text_length)?;
                metrics.add_journal_records(backend.journal_records());
                backend
            }
            _ => RelationalBackend::in_memory(Arc::clone(&builder), self.text_length),
        });
        let default: Arc<dyn Backend> = relational.clone();
        let backends = Arc::new(BackendRegistry::new(default));
        for (entity_type, backend) in self.virtual_backends {
            backends.register(entity_type, backend)?;
        }

        let resolver = Arc::new(VirtualFieldResolver::new(Arc::clone(&self.accessors)));
        let admin = Arc::new(MetaAdmin::new(
            Arc::clone(&store),
            Arc::clone(&builder),
            Arc::clone(&backends),
        ));

        let mut controller = DocumentController::new(
            Arc::clone(&builder),
            Arc::clone(&backends),
            resolver,
            Arc::clone(&admin),
            Arc::clone(&metrics),
        )
        .with_text_length(self.text_length)
        .with_page_limits(self.page_length, self.max_page_length);
        if let Some(hook) = self.hook {
            controller = controller.with_hook(hook);
        }

        Ok(Engine {
            store,
            builder,
            backends,
            relational,
            accessors: self.accessors,
            admin,
            controller,
            metrics,
        })
    }
}

/// Every service of one metadoc instance.
pub struct Engine {
    store: Arc<SpecStore>,
    builder: Arc<MetaBuilder>,
    backends: Arc<BackendRegistry>,
    relational: Arc<RelationalBackend>,
    accessors: Arc<AccessorRegistry>,
    admin: Arc<MetaAdmin>,
    controller: DocumentController,
    metrics: Arc<MetricsRegistry>,
}

impl Engine {
    /// An in-memory engine with default settings.
    pub fn in_memory() -> EngineResult<Self> {
        EngineBuilder::new().build()
    }

    pub fn store(&self) -> &Arc<SpecStore> {
        &self.store
    }

    pub fn meta_builder(&self) -> &Arc<MetaBuilder> {
        &self.builder
    }

    pub fn backends(&self) -> &Arc<BackendRegistry> {
        &self.backends
    }

    /// The default backend serving non-virtual entity types
    pub fn relational(&self) -> &Arc<RelationalBackend> {
        &self.relational
    }

    pub fn accessors(&self) -> &Arc<AccessorRegistry> {
        &self.accessors
    }

    pub fn admin(&self) -> &MetaAdmin {
        &self.admin
    }

    pub fn documents(&self) -> &DocumentController {
        &self.controller
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }
}
