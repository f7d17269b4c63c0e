//! Metadata administration
//!
//! The only write path for entity types, custom-field overlays and
//! property overrides. Every edit is merged and validated against what is
//! already stored before it is persisted, and every accepted edit
//! invalidates the Meta cache.
//!
//! Saving a virtual-backed entity type also requires a registered backend
//! that provides all seven storage operations.

use std::sync::Arc;

use thiserror::Error;

use crate::backend::{BackendRegistry, ConformanceError};
use crate::meta::{is_schema_type, MetaBuilder, MetaError, SpecStore};
use crate::observability::{log_event, Event};
use crate::schema::{CustomFieldOverlay, EntityTypeSpec, PropertyOverride, SpecValidationError};

#[derive(Debug, Clone, Error)]
pub enum AdminError {
    /// The edit would produce an invalid merged Meta
    #[error(transparent)]
    Spec(#[from] SpecValidationError),

    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error(transparent)]
    Conformance(#[from] ConformanceError),
}

impl AdminError {
    pub fn code(&self) -> &'static str {
        match self {
            AdminError::Spec(e) => e.code(),
            AdminError::Meta(e) => e.code(),
            AdminError::Conformance(e) => e.code(),
        }
    }

    /// Spec violations are fixable by the author and are not fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            AdminError::Spec(_) => false,
            AdminError::Meta(e) => e.is_fatal(),
            AdminError::Conformance(e) => e.is_fatal(),
        }
    }
}

pub type AdminResult<T> = Result<T, AdminError>;

pub struct MetaAdmin {
    store: Arc<SpecStore>,
    builder: Arc<MetaBuilder>,
    backends: Arc<BackendRegistry>,
}

impl MetaAdmin {
    pub fn new(store: Arc<SpecStore>, builder: Arc<MetaBuilder>, backends: Arc<BackendRegistry>) -> Self {
        Self {
            store,
            builder,
            backends,
        }
    }

    /// Creates or replaces an entity type.
    pub fn save_entity_type(&self, mut spec: EntityTypeSpec) -> AdminResult<()> {
        spec.normalize();
        let name = spec.name.clone();
        if is_schema_type(&name) {
            return Err(MetaError::Protected(name).into());
        }

        let overlays = self.store.overlays_for(&name)?;
        let overrides = self.store.overrides_for(&name)?;
        self.check_merge(&spec, &overlays, &overrides)?;

        if spec.is_virtual_backend {
            if let Err(err) = self.backends.check_conformance(&name) {
                let missing = err
                    .missing
                    .iter()
                    .map(|op| op.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                log_event(
                    Event::ConformanceFailed,
                    &[("entity_type", &name), ("missing", &missing)],
                );
                return Err(err.into());
            }
        }

        self.store.put_entity_type(spec)?;
        self.builder.invalidate(&name)?;
        log_event(Event::SpecSaved, &[("entity_type", &name), ("record", "entity_type")]);
        Ok(())
    }

    /// Deletes an entity type with its overlays and overrides.
    ///
    /// Returns false when the entity type did not exist.
    pub fn delete_entity_type(&self, name: &str) -> AdminResult<bool> {
        let removed = self.store.remove_entity_type(name)?;
        if removed {
            self.builder.invalidate(name)?;
            log_event(Event::SpecSaved, &[("entity_type", name), ("record", "entity_type_deleted")]);
        }
        Ok(removed)
    }

    /// Adds or replaces a custom field on an existing entity type.
    pub fn add_custom_field(&self, overlay: CustomFieldOverlay) -> AdminResult<()> {
        let name = overlay.entity_type.clone();
        let base = self.base_spec(&name)?;

        let mut overlays = self.store.overlays_for(&name)?;
        overlays.retain(|o| o.key() != overlay.key());
        overlays.push(overlay.clone());
        let overrides = self.store.overrides_for(&name)?;
        self.check_merge(&base, &overlays, &overrides)?;

        self.store.put_overlay(overlay)?;
        self.builder.invalidate(&name)?;
        log_event(Event::SpecSaved, &[("entity_type", &name), ("record", "custom_field")]);
        Ok(())
    }

    /// Removes a custom field; false when it did not exist.
    pub fn remove_custom_field(&self, entity_type: &str, fieldname: &str) -> AdminResult<bool> {
        let removed = self.store.remove_overlay(entity_type, fieldname)?;
        if removed {
            self.builder.invalidate(entity_type)?;
            log_event(
                Event::SpecSaved,
                &[("entity_type", entity_type), ("record", "custom_field_removed")],
            );
        }
        Ok(removed)
    }

    /// Records a property override. Later overrides of the same property win.
    pub fn set_property_override(&self, ov: PropertyOverride) -> AdminResult<()> {
        let name = ov.entity_type.clone();
        let base = self.base_spec(&name)?;

        let overlays = self.store.overlays_for(&name)?;
        let mut overrides = self.store.overrides_for(&name)?;
        overrides.push(ov.clone());
        self.check_merge(&base, &overlays, &overrides)?;

        self.store.push_override(ov)?;
        self.builder.invalidate(&name)?;
        log_event(Event::SpecSaved, &[("entity_type", &name), ("record", "property_override")]);
        Ok(())
    }

    /// Drops every override of one property; returns how many were removed.
    pub fn remove_property_override(&self, entity_type: &str, fieldname: &str, property: &str) -> AdminResult<usize> {
        let removed = self.store.remove_overrides(entity_type, fieldname, property)?;
        if removed > 0 {
            self.builder.invalidate(entity_type)?;
            log_event(
                Event::SpecSaved,
                &[("entity_type", entity_type), ("record", "property_override_removed")],
            );
        }
        Ok(removed)
    }

    fn base_spec(&self, name: &str) -> AdminResult<EntityTypeSpec> {
        if is_schema_type(name) {
            return Err(MetaError::Protected(name.to_string()).into());
        }
        self.store
            .base_spec(name)?
            .ok_or_else(|| MetaError::UnknownEntityType(name.to_string()).into())
    }

    // Validates the prospective merge without touching the cache
    fn check_merge(
        &self,
        base: &EntityTypeSpec,
        overlays: &[CustomFieldOverlay],
        overrides: &[PropertyOverride],
    ) -> AdminResult<()> {
        match self.builder.compose(base, overlays, overrides) {
            Ok(_) => Ok(()),
            Err(violations) => {
                let count = violations.len().to_string();
                log_event(
                    Event::SpecRejected,
                    &[("entity_type", &base.name), ("violations", &count)],
                );
                Err(SpecValidationError::new(base.name.clone(), violations).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOperation, RelationalBackend, VirtualBackend};
    use crate::observability::MetricsRegistry;
    use crate::schema::{FieldKind, FieldSpec, SpecRule};
    use serde_json::json;

    fn admin() -> (MetaAdmin, Arc<MetaBuilder>, Arc<BackendRegistry>) {
        let store = Arc::new(SpecStore::in_memory());
        let builder = Arc::new(MetaBuilder::new(Arc::clone(&store), Arc::new(MetricsRegistry::new())));
        let default = Arc::new(RelationalBackend::in_memory(Arc::clone(&builder), 140));
        let backends = Arc::new(BackendRegistry::new(default));
        (
            MetaAdmin::new(store, Arc::clone(&builder), Arc::clone(&backends)),
            builder,
            backends,
        )
    }

    fn customer() -> EntityTypeSpec {
        EntityTypeSpec::new("Customer")
            .with_field(FieldSpec::new("customer_name", FieldKind::Data).required())
            .with_field(FieldSpec::new("notes", FieldKind::Text))
    }

    #[test]
    fn test_save_invalidates_cache() {
        let (admin, builder, _) = admin();
        admin.save_entity_type(customer()).unwrap();
        let first = builder.get_meta("Customer").unwrap();

        admin
            .save_entity_type(customer().with_field(FieldSpec::new("email", FieldKind::Data)))
            .unwrap();
        assert!(!builder.is_cached("Customer"));
        let second = builder.get_meta("Customer").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.has_field("email"));
    }

    #[test]
    fn test_invalid_spec_is_not_stored() {
        let (admin, builder, _) = admin();
        let bad = customer().with_field(FieldSpec::new("notes_2", FieldKind::Text).unique());
        let err = admin.save_entity_type(bad).unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(err, AdminError::Spec(ref e) if e.has_rule(SpecRule::UniqueNotAllowed)));
        assert!(matches!(builder.get_meta("Customer"), Err(MetaError::UnknownEntityType(_))));
    }

    #[test]
    fn test_overlay_collision_is_rejected() {
        let (admin, _, _) = admin();
        admin.save_entity_type(customer()).unwrap();
        let overlay = CustomFieldOverlay::new("Customer", FieldSpec::new("notes", FieldKind::Data));
        let err = admin.add_custom_field(overlay).unwrap_err();
        assert!(matches!(err, AdminError::Spec(ref e) if e.has_rule(SpecRule::OverlayCollision)));
    }

    #[test]
    fn test_custom_field_and_override() {
        let (admin, builder, _) = admin();
        admin.save_entity_type(customer()).unwrap();
        admin
            .add_custom_field(CustomFieldOverlay::new("Customer", FieldSpec::new("region", FieldKind::Data)))
            .unwrap();
        admin
            .set_property_override(PropertyOverride::new("Customer", "region", "label", json!("Sales Region")))
            .unwrap();

        let meta = builder.get_meta("Customer").unwrap();
        assert_eq!(meta.field("region").unwrap().display_label(), "Sales Region");

        assert_eq!(admin.remove_property_override("Customer", "region", "label").unwrap(), 1);
        assert!(admin.remove_custom_field("Customer", "region").unwrap());
        assert!(!builder.get_meta("Customer").unwrap().has_field("region"));
    }

    #[test]
    fn test_override_on_unknown_entity_type() {
        let (admin, _, _) = admin();
        let err = admin
            .set_property_override(PropertyOverride::new("Ghost", "x", "label", json!("X")))
            .unwrap_err();
        assert_eq!(err.code(), "META_UNKNOWN_ENTITY_TYPE");
    }

    #[test]
    fn test_conformance_gate() {
        let (admin, _, backends) = admin();
        let spec = EntityTypeSpec::new("Worker")
            .virtual_backend()
            .with_field(FieldSpec::new("host", FieldKind::Data));

        let err = admin.save_entity_type(spec.clone()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.code(), "BACKEND_CONFORMANCE_FAILED");

        let partial = VirtualBackend::new("workers")
            .on_list(|_, _| Ok(Vec::new()))
            .on_count(|_, _| Ok(0))
            .on_stats(|_, _| Ok(Default::default()))
            .on_insert(|_, _| Ok(()))
            .on_load(|_, _| Ok(None))
            .on_update(|_, _| Ok(()));
        backends.register("Worker", Arc::new(partial.clone())).unwrap();
        match admin.save_entity_type(spec.clone()).unwrap_err() {
            AdminError::Conformance(e) => assert_eq!(e.missing, vec![BackendOperation::Remove]),
            other => panic!("unexpected error: {other}"),
        }

        backends
            .register("Worker", Arc::new(partial.on_remove(|_, _| Ok(()))))
            .unwrap();
        admin.save_entity_type(spec).unwrap();
    }

    #[test]
    fn test_schema_types_are_protected() {
        let (admin, _, _) = admin();
        let err = admin.save_entity_type(EntityTypeSpec::new("Entity Type")).unwrap_err();
        assert_eq!(err.code(), "META_PROTECTED");
    }
}
