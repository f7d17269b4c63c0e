//! Meta builder and cache
//!
//! Merges base spec, overlays and property overrides into one validated
//! `Meta` and caches it per entity type.
//!
//! # Cache Discipline
//!
//! - The lock is held only to clone or swap an `Arc<Meta>` and, on
//!   install, to re-read the store generation
//! - Builds run outside the lock
//! - A build is cached only if the store generation it read is still current
//! - A failed build leaves the cached entry untouched

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use super::bootstrap::{bootstrap_spec, is_schema_type};
use super::errors::{MetaError, MetaResult};
use super::store::{SpecSnapshot, SpecStore};
use super::types::{Meta, RecordClass};
use crate::observability::{log_event, Event, MetricsRegistry};
use crate::schema::{
    normalize_check_defaults, CustomFieldOverlay, EntityTypeSpec, PropertyOverride, SpecRule,
    SpecValidator, SpecViolation,
};

/// Cached, validated Metas keyed by entity-type name.
pub struct MetaBuilder {
    store: Arc<SpecStore>,
    cache: RwLock<HashMap<String, Arc<Meta>>>,
    metrics: Arc<MetricsRegistry>,
}

impl MetaBuilder {
    pub fn new(store: Arc<SpecStore>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<SpecStore> {
        &self.store
    }

    /// Returns the Meta for `name`, building and caching it on a miss.
    ///
    /// Repeated calls without an intervening metadata write return the
    /// same `Arc`.
    pub fn get_meta(&self, name: &str) -> MetaResult<Arc<Meta>> {
        if let Some(meta) = self.cached(name)? {
            self.metrics.increment_cache_hits();
            log_event(Event::MetaCacheHit, &[("entity_type", name)]);
            return Ok(meta);
        }
        self.metrics.increment_cache_misses();

        if is_schema_type(name) {
            let spec = bootstrap_spec(name)
                .ok_or_else(|| MetaError::UnknownEntityType(name.to_string()))?;
            let meta = Arc::new(Meta::from_spec(spec, RecordClass::Schema, 0));
            return self.install(name, meta, 0);
        }

        let snapshot = self
            .store
            .snapshot(name)?
            .ok_or_else(|| MetaError::UnknownEntityType(name.to_string()))?;
        let generation = snapshot.generation;

        let meta = match self.build(&snapshot) {
            Ok(spec) => Arc::new(Meta::from_spec(spec, RecordClass::Data, generation)),
            Err(violations) => {
                self.metrics.increment_meta_build_failures();
                let count = violations.len().to_string();
                log_event(
                    Event::MetaBuildFailed,
                    &[("entity_type", name), ("violations", &count)],
                );
                return Err(MetaError::Build {
                    name: name.to_string(),
                    violations,
                });
            }
        };

        self.metrics.increment_meta_builds();
        let fields = meta.fields().len().to_string();
        let gen = generation.to_string();
        log_event(
            Event::MetaBuilt,
            &[("entity_type", name), ("fields", &fields), ("generation", &gen)],
        );
        self.install(name, meta, generation)
    }

    fn cached(&self, name: &str) -> MetaResult<Option<Arc<Meta>>> {
        let cache = self
            .cache
            .read()
            .map_err(|_| MetaError::Internal("lock poisoned".into()))?;
        Ok(cache.get(name).cloned())
    }

    // Caches `meta` unless a write landed while it was being built. The
    // generation is read under the cache write lock: a writer bumps the
    // store before it invalidates, so either the bump is seen here or the
    // invalidation runs after this entry is in place.
    fn install(&self, name: &str, meta: Arc<Meta>, generation: u64) -> MetaResult<Arc<Meta>> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| MetaError::Internal("lock poisoned".into()))?;
        let current = if is_schema_type(name) {
            0
        } else {
            self.store.generation(name)?
        };
        if current != generation {
            return Ok(meta);
        }

        let entry = cache.entry(name.to_string()).or_insert_with(|| Arc::clone(&meta));
        // A concurrent build of the same generation may have won the race
        if entry.generation() < meta.generation() {
            *entry = Arc::clone(&meta);
        }
        Ok(Arc::clone(entry))
    }

    fn build(&self, snapshot: &SpecSnapshot) -> Result<EntityTypeSpec, Vec<SpecViolation>> {
        self.compose(&snapshot.base, &snapshot.overlays, &snapshot.overrides)
    }

    /// Merges and validates without touching the cache.
    ///
    /// 1. base fields, positional `idx` assigned where missing
    /// 2. overlays appended; a colliding fieldname is a violation
    /// 3. overrides applied in record order, last write wins
    /// 4. check fields default to 0
    /// 5. stable sort by `idx`
    /// 6. structural validation
    pub fn compose(
        &self,
        base: &EntityTypeSpec,
        overlays: &[CustomFieldOverlay],
        overrides: &[PropertyOverride],
    ) -> Result<EntityTypeSpec, Vec<SpecViolation>> {
        let Merged {
            spec,
            mut violations,
            ignored,
        } = merge(base, overlays, overrides);

        for ov in ignored {
            log_event(
                Event::OverrideIgnored,
                &[
                    ("entity_type", &ov.entity_type),
                    ("fieldname", &ov.fieldname),
                    ("property", &ov.property),
                ],
            );
        }

        violations.extend(SpecValidator::new(self.store.as_ref()).validate(&spec));

        if violations.is_empty() {
            Ok(spec)
        } else {
            Err(violations)
        }
    }

    /// Drops `name` and every cached parent embedding it as a child table.
    pub fn invalidate(&self, name: &str) -> MetaResult<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| MetaError::Internal("lock poisoned".into()))?;

        let mut dropped = Vec::new();
        if cache.remove(name).is_some() {
            dropped.push(name.to_string());
        }
        let parents: Vec<String> = cache
            .iter()
            .filter(|(_, meta)| meta.embeds(name))
            .map(|(key, _)| key.clone())
            .collect();
        for parent in parents {
            cache.remove(&parent);
            dropped.push(parent);
        }
        drop(cache);

        self.metrics.increment_invalidations();
        let dropped = dropped.join(",");
        log_event(
            Event::MetaInvalidated,
            &[("entity_type", name), ("dropped", &dropped)],
        );
        Ok(())
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.cached(name).ok().flatten().is_some()
    }
}

/// A base spec with overlays and overrides applied, not yet validated.
pub(crate) struct Merged<'a> {
    pub spec: EntityTypeSpec,
    pub violations: Vec<SpecViolation>,
    /// Overrides naming a field the merged spec does not have
    pub ignored: Vec<&'a PropertyOverride>,
}

/// Steps 1 to 5 of `MetaBuilder::compose`.
pub(crate) fn merge<'a>(
    base: &EntityTypeSpec,
    overlays: &[CustomFieldOverlay],
    overrides: &'a [PropertyOverride],
) -> Merged<'a> {
    let mut spec = base.clone();
    let mut violations = Vec::new();
    let mut ignored = Vec::new();

    let mut next = spec.next_idx();
    for field in &mut spec.fields {
        if field.idx == 0 {
            field.idx = next;
            next += 1;
        }
    }

    let base_names: HashSet<String> = spec.fields.iter().map(|f| f.fieldname.clone()).collect();
    for overlay in overlays {
        if base_names.contains(&overlay.field.fieldname) {
            violations.push(SpecViolation::field(
                SpecRule::OverlayCollision,
                &overlay.field.fieldname,
                format!(
                    "custom field '{}' collides with a field of '{}'",
                    overlay.field.fieldname, spec.name
                ),
            ));
            continue;
        }
        let mut field = overlay.field.clone();
        if field.idx == 0 {
            field.idx = spec.next_idx();
        }
        spec.fields.push(field);
    }

    for ov in overrides {
        let Some(field) = spec.fields.iter_mut().find(|f| f.fieldname == ov.fieldname) else {
            ignored.push(ov);
            continue;
        };
        if let Err(message) = field.set_property(&ov.property, &ov.value) {
            violations.push(SpecViolation::field(
                SpecRule::InvalidOverride,
                &ov.fieldname,
                message,
            ));
        }
    }

    normalize_check_defaults(&mut spec.fields);
    spec.fields.sort_by_key(|f| f.idx);

    Merged {
        spec,
        violations,
        ignored,
    }
}
