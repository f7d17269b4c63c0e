//! Meta cache tests
//!
//! Behaviour of the merged-Meta cache:
//! - Repeated reads return the identical cached object
//! - Every metadata write through the admin produces a new Meta
//! - Overlay collisions are build errors, never silent overwrites
//! - Property overrides apply in record order, last write wins
//! - Readers never observe a half-merged Meta

use std::sync::Arc;
use std::thread;

use metadoc::meta::{MetaBuilder, MetaError, SpecStore};
use metadoc::observability::MetricsRegistry;
use metadoc::schema::{CustomFieldOverlay, EntityTypeSpec, FieldKind, FieldSpec, PropertyOverride, SpecRule};
use metadoc::{AdminError, Engine};
use serde_json::json;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn customer() -> EntityTypeSpec {
    EntityTypeSpec::new("Customer")
        .with_field(FieldSpec::new("customer_name", FieldKind::Data).required())
        .with_field(FieldSpec::new("customer_ref", FieldKind::Data))
}

fn engine_with_customer() -> Engine {
    let engine = Engine::in_memory().unwrap();
    engine.admin().save_entity_type(customer()).unwrap();
    engine
}

fn label_override(value: &str) -> PropertyOverride {
    PropertyOverride::new("Customer", "customer_ref", "label", json!(value))
}

// =============================================================================
// Identity and Invalidation
// =============================================================================

/// Two reads without an intervening write return the same object.
#[test]
fn test_repeated_reads_share_one_meta() {
    let engine = engine_with_customer();
    let builder = engine.meta_builder();

    let first = builder.get_meta("Customer").unwrap();
    let second = builder.get_meta("Customer").unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let snapshot = engine.metrics().snapshot();
    assert_eq!(snapshot.meta_builds, 1);
    assert!(snapshot.cache_hits >= 1);
}

/// An overlay write yields a structurally different Meta on the next read.
#[test]
fn test_overlay_write_rebuilds_meta() {
    let engine = engine_with_customer();
    let before = engine.meta_builder().get_meta("Customer").unwrap();

    engine
        .admin()
        .add_custom_field(CustomFieldOverlay::new(
            "Customer",
            FieldSpec::new("region", FieldKind::Data),
        ))
        .unwrap();

    let after = engine.meta_builder().get_meta("Customer").unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(!before.has_field("region"));
    assert!(after.has_field("region"));
    assert_eq!(after.fields().len(), before.fields().len() + 1);
    assert!(after.generation() > before.generation());
}

/// An override write yields a structurally different Meta on the next read.
#[test]
fn test_override_write_rebuilds_meta() {
    let engine = engine_with_customer();
    let before = engine.meta_builder().get_meta("Customer").unwrap();

    engine
        .admin()
        .set_property_override(PropertyOverride::new("Customer", "customer_ref", "hidden", json!(true)))
        .unwrap();

    let after = engine.meta_builder().get_meta("Customer").unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(!before.field("customer_ref").unwrap().hidden);
    assert!(after.field("customer_ref").unwrap().hidden);
}

/// Without invalidation the cached Meta keeps being served.
#[test]
fn test_raw_store_write_is_invisible_until_invalidated() {
    let engine = engine_with_customer();
    let builder = engine.meta_builder();
    let cached = builder.get_meta("Customer").unwrap();

    engine.store().push_override(label_override("Client Code")).unwrap();
    assert!(Arc::ptr_eq(&cached, &builder.get_meta("Customer").unwrap()));

    builder.invalidate("Customer").unwrap();
    let rebuilt = builder.get_meta("Customer").unwrap();
    assert_eq!(rebuilt.field("customer_ref").unwrap().display_label(), "Client Code");
}

/// Invalidating a child table also drops the parents that embed it.
#[test]
fn test_child_invalidation_drops_parents() {
    let engine = Engine::in_memory().unwrap();
    let admin = engine.admin();
    admin
        .save_entity_type(
            EntityTypeSpec::child_table("Invoice Item")
                .with_field(FieldSpec::new("item_code", FieldKind::Data).required()),
        )
        .unwrap();
    admin
        .save_entity_type(EntityTypeSpec::new("Invoice").with_field(FieldSpec::table("items", "Invoice Item")))
        .unwrap();

    let builder = engine.meta_builder();
    builder.get_meta("Invoice").unwrap();
    builder.get_meta("Invoice Item").unwrap();
    assert!(builder.is_cached("Invoice"));

    admin
        .add_custom_field(CustomFieldOverlay::new(
            "Invoice Item",
            FieldSpec::new("discount", FieldKind::Percent).with_precision(2),
        ))
        .unwrap();

    assert!(!builder.is_cached("Invoice Item"));
    assert!(!builder.is_cached("Invoice"));
}

// =============================================================================
// Overlay Collisions and Failed Builds
// =============================================================================

/// The admin refuses an overlay that shadows a base field.
#[test]
fn test_colliding_overlay_is_refused() {
    let engine = engine_with_customer();
    let err = engine
        .admin()
        .add_custom_field(CustomFieldOverlay::new(
            "Customer",
            FieldSpec::new("customer_name", FieldKind::Int),
        ))
        .unwrap_err();

    match err {
        AdminError::Spec(e) => assert!(e.has_rule(SpecRule::OverlayCollision)),
        other => panic!("unexpected error: {other}"),
    }
    let meta = engine.meta_builder().get_meta("Customer").unwrap();
    assert_eq!(meta.field("customer_name").unwrap().kind, FieldKind::Data);
}

/// A collision that reached the store fails the build and is never cached.
#[test]
fn test_stored_collision_fails_build() {
    let store = Arc::new(SpecStore::in_memory());
    let builder = MetaBuilder::new(Arc::clone(&store), Arc::new(MetricsRegistry::new()));
    store.put_entity_type(customer()).unwrap();
    store
        .put_overlay(CustomFieldOverlay::new("Customer", FieldSpec::new("customer_ref", FieldKind::Int)))
        .unwrap();

    for _ in 0..2 {
        match builder.get_meta("Customer").unwrap_err() {
            MetaError::Build { name, violations } => {
                assert_eq!(name, "Customer");
                assert!(violations.iter().any(|v| v.rule == SpecRule::OverlayCollision));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!builder.is_cached("Customer"));
    }

    assert!(store.remove_overlay("Customer", "customer_ref").unwrap());
    builder.invalidate("Customer").unwrap();
    assert!(builder.get_meta("Customer").is_ok());
}

/// An override naming a field that does not exist is skipped.
#[test]
fn test_override_on_missing_field_is_ignored() {
    let engine = engine_with_customer();
    engine
        .admin()
        .set_property_override(PropertyOverride::new("Customer", "retired_field", "label", json!("Old")))
        .unwrap();

    let meta = engine.meta_builder().get_meta("Customer").unwrap();
    assert!(!meta.has_field("retired_field"));
}

/// An override with an unusable value is a build violation.
#[test]
fn test_invalid_override_value_is_refused() {
    let engine = engine_with_customer();
    let err = engine
        .admin()
        .set_property_override(PropertyOverride::new("Customer", "customer_ref", "length", json!("wide")))
        .unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(err.code(), "SPEC_VALIDATION_FAILED");
}

// =============================================================================
// Override Ordering
// =============================================================================

/// Two label overrides on one field: the later record wins.
#[test]
fn test_later_label_override_wins() {
    let engine = engine_with_customer();
    engine.admin().set_property_override(label_override("Customer Reference")).unwrap();
    engine.admin().set_property_override(label_override("Client Code")).unwrap();

    assert_eq!(engine.store().overrides_for("Customer").unwrap().len(), 2);
    let meta = engine.meta_builder().get_meta("Customer").unwrap();
    assert_eq!(meta.field("customer_ref").unwrap().display_label(), "Client Code");
}

/// Override order survives reopening the metadata directory.
#[test]
fn test_override_order_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = SpecStore::open(dir.path()).unwrap();
        store.put_entity_type(customer()).unwrap();
        for label in ["First", "Second", "Third", "Fourth", "Fifth", "Sixth", "Seventh", "Eighth", "Ninth", "Tenth", "Eleventh"] {
            store.push_override(label_override(label)).unwrap();
        }
    }

    let store = Arc::new(SpecStore::open(dir.path()).unwrap());
    let builder = MetaBuilder::new(Arc::clone(&store), Arc::new(MetricsRegistry::new()));
    let meta = builder.get_meta("Customer").unwrap();
    assert_eq!(meta.field("customer_ref").unwrap().display_label(), "Eleventh");
}

// =============================================================================
// Concurrent Readers
// =============================================================================

/// Readers racing a writer see either the old or the new field set.
#[test]
fn test_readers_never_see_a_partial_merge() {
    let store = Arc::new(SpecStore::in_memory());
    let builder = Arc::new(MetaBuilder::new(Arc::clone(&store), Arc::new(MetricsRegistry::new())));
    store.put_entity_type(customer()).unwrap();

    thread::scope(|scope| {
        for _ in 0..4 {
            let builder = Arc::clone(&builder);
            scope.spawn(move || {
                for _ in 0..500 {
                    let meta = builder.get_meta("Customer").unwrap();
                    let has_region = meta.has_field("region");
                    let has_label = meta
                        .field("customer_ref")
                        .map_or(false, |f| f.label.as_deref() == Some("Region Ref"));
                    assert_eq!(meta.fields().len(), if has_region { 3 } else { 2 });
                    assert_eq!(has_region, has_label);
                }
            });
        }

        let writer_store = Arc::clone(&store);
        let writer_builder = Arc::clone(&builder);
        scope.spawn(move || {
            for _ in 0..100 {
                let mut spec = customer().with_field(FieldSpec::new("region", FieldKind::Data));
                spec.fields[1].label = Some("Region Ref".into());
                writer_store.put_entity_type(spec).unwrap();
                writer_builder.invalidate("Customer").unwrap();

                writer_store.put_entity_type(customer()).unwrap();
                writer_builder.invalidate("Customer").unwrap();
            }
        });
    });
}
