//! Field-spec rule tests
//!
//! Structural rules checked by the validator on a single entity type:
//! - Every violation is collected, in field order
//! - Validation is deterministic and idempotent
//! - Rules resolve link and table targets through the spec store

use metadoc::meta::SpecStore;
use metadoc::schema::{validate, EntityTypeSpec, FieldKind, FieldSpec, SpecRule, SpecViolation};

// =============================================================================
// Helper Functions
// =============================================================================

fn rules(violations: &[SpecViolation]) -> Vec<SpecRule> {
    violations.iter().map(|v| v.rule).collect()
}

fn store_with(specs: Vec<EntityTypeSpec>) -> SpecStore {
    let store = SpecStore::in_memory();
    for spec in specs {
        store.put_entity_type(spec).unwrap();
    }
    store
}

fn invoice() -> EntityTypeSpec {
    EntityTypeSpec::new("Invoice")
        .with_field(FieldSpec::link("customer", "Customer").required())
        .with_field(FieldSpec::select("status", &["Draft", "Sent", "Paid"]).with_default("Draft"))
        .with_field(FieldSpec::new("amount", FieldKind::Currency).with_precision(2))
        .with_field(FieldSpec::new("paid", FieldKind::Check))
        .with_field(FieldSpec::new("notes", FieldKind::Text))
}

// =============================================================================
// Hidden Required Fields
// =============================================================================

/// A required hidden field without a default is reported, whatever its kind.
#[test]
fn test_hidden_required_without_default_is_reported_for_every_kind() {
    let store = store_with(vec![EntityTypeSpec::new("Customer")]);

    for kind in FieldKind::ALL {
        let spec = EntityTypeSpec::new("Sample")
            .with_field(FieldSpec::new("sample", kind).required().hidden());
        let violations = validate(&spec, &store);

        assert!(
            violations.iter().any(|v| v.rule == SpecRule::HiddenRequiredWithoutDefault
                && v.fieldname.as_deref() == Some("sample")),
            "{} did not report hidden+required",
            kind
        );
    }
}

/// A default satisfies the rule.
#[test]
fn test_hidden_required_with_default_is_accepted() {
    let store = SpecStore::in_memory();
    let spec = EntityTypeSpec::new("Ticket")
        .with_field(FieldSpec::new("source", FieldKind::Data).required().hidden().with_default("web"));

    assert!(validate(&spec, &store).is_empty());
}

// =============================================================================
// Determinism
// =============================================================================

/// Re-validating a valid spec yields no new errors, also after normalizing it.
#[test]
fn test_revalidation_is_idempotent() {
    let store = store_with(vec![EntityTypeSpec::new("Customer")]);
    let mut spec = invoice();

    assert!(validate(&spec, &store).is_empty());
    assert!(validate(&spec, &store).is_empty());

    spec.normalize();
    assert_eq!(spec.field("paid").unwrap().default.as_deref(), Some("0"));
    assert!(validate(&spec, &store).is_empty());
}

/// An invalid spec reports the same list in the same order each time.
#[test]
fn test_violations_are_deterministic() {
    let store = SpecStore::in_memory();
    let spec = EntityTypeSpec::new("Broken")
        .with_field(FieldSpec::new("name", FieldKind::Data))
        .with_field(FieldSpec::link("owner_ref", "Nowhere"))
        .with_field(FieldSpec::new("score", FieldKind::Rating).with_options("12"));

    let first = validate(&spec, &store);
    for _ in 0..50 {
        assert_eq!(validate(&spec, &store), first);
    }
    assert_eq!(
        rules(&first),
        vec![
            SpecRule::ReservedFieldname,
            SpecRule::LinkTargetMissing,
            SpecRule::RatingOutOfRange,
        ]
    );
}

/// Validation does not stop at the first violation.
#[test]
fn test_all_violations_are_collected() {
    let store = SpecStore::in_memory();
    let spec = EntityTypeSpec::new("Messy")
        .with_field(FieldSpec::new("title", FieldKind::Data))
        .with_field(FieldSpec::new("title", FieldKind::Data))
        .with_field(FieldSpec::new("intro", FieldKind::SectionBreak).required())
        .with_field(FieldSpec::new("body", FieldKind::Text).unique().indexed())
        .with_field(FieldSpec::new("price", FieldKind::Currency).with_precision(9).with_width(40))
        .with_field(FieldSpec::new("flag", FieldKind::Check).with_default("yes"))
        .with_field(FieldSpec::new("email", FieldKind::Data).with_options("a\nb"));

    let found = rules(&validate(&spec, &store));
    for expected in [
        SpecRule::DuplicateFieldname,
        SpecRule::MandatoryOnLayout,
        SpecRule::UniqueNotAllowed,
        SpecRule::IndexOnLargeText,
        SpecRule::PrecisionOutOfRange,
        SpecRule::CurrencyWidthTooSmall,
        SpecRule::CheckDefaultInvalid,
        SpecRule::TextOptionsInvalid,
    ] {
        assert!(found.contains(&expected), "missing {:?} in {:?}", expected, found);
    }
}

// =============================================================================
// Select, Link and Table Rules
// =============================================================================

/// A select default outside its options fails validation.
#[test]
fn test_select_default_must_be_an_option() {
    let store = SpecStore::in_memory();
    let spec = EntityTypeSpec::new("Quote").with_field(
        FieldSpec::new("status", FieldKind::Select)
            .with_options("Draft\nSent\nPaid")
            .with_default("Pending"),
    );

    let violations = validate(&spec, &store);
    assert_eq!(rules(&violations), vec![SpecRule::SelectDefaultNotInOptions]);
    assert_eq!(violations[0].fieldname.as_deref(), Some("status"));
}

/// Surrounding whitespace on options and default is ignored.
#[test]
fn test_select_options_are_trimmed() {
    let store = SpecStore::in_memory();
    let spec = EntityTypeSpec::new("Quote").with_field(
        FieldSpec::new("status", FieldKind::Select)
            .with_options("  Draft \n\n Sent\n")
            .with_default(" Sent "),
    );
    assert!(validate(&spec, &store).is_empty());

    let empty = EntityTypeSpec::new("Quote")
        .with_field(FieldSpec::new("status", FieldKind::Select).with_options(" \n "));
    assert_eq!(rules(&validate(&empty, &store)), vec![SpecRule::SelectOptionsEmpty]);
}

/// A link may point at its own entity type.
#[test]
fn test_self_link_is_allowed() {
    let store = SpecStore::in_memory();
    let spec = EntityTypeSpec::new("Employee").with_field(FieldSpec::link("reports_to", "Employee"));
    assert!(validate(&spec, &store).is_empty());
}

/// A dynamic link names a sibling holding the type, never a literal type.
#[test]
fn test_dynamic_link_points_at_a_sibling() {
    let store = store_with(vec![EntityTypeSpec::new("Customer")]);

    let literal = EntityTypeSpec::new("Comment")
        .with_field(FieldSpec::new("reference_name", FieldKind::DynamicLink).with_options("Customer"));
    assert_eq!(
        rules(&validate(&literal, &store)),
        vec![SpecRule::DynamicLinkTargetInvalid]
    );

    let pointer = EntityTypeSpec::new("Comment")
        .with_field(FieldSpec::link("reference_type", "Entity Type"))
        .with_field(FieldSpec::new("reference_name", FieldKind::DynamicLink).with_options("reference_type"));
    assert!(validate(&pointer, &store).is_empty());
}

/// A multiselect table whose child has no link field fails validation.
#[test]
fn test_table_multiselect_needs_a_link_in_the_child() {
    let store = store_with(vec![
        EntityTypeSpec::new("Tag"),
        EntityTypeSpec::child_table("Tag Note").with_field(FieldSpec::new("note", FieldKind::Data)),
        EntityTypeSpec::child_table("Tag Row").with_field(FieldSpec::link("tag", "Tag")),
    ]);

    let bare = EntityTypeSpec::new("Post")
        .with_field(FieldSpec::new("tags", FieldKind::TableMultiSelect).with_options("Tag Note"));
    assert_eq!(
        rules(&validate(&bare, &store)),
        vec![SpecRule::TableMultiSelectWithoutLink]
    );

    let linked = EntityTypeSpec::new("Post")
        .with_field(FieldSpec::new("tags", FieldKind::TableMultiSelect).with_options("Tag Row"));
    assert!(validate(&linked, &store).is_empty());
}

/// Table targets must exist, be child tables and share the backend kind.
#[test]
fn test_table_target_rules() {
    let store = store_with(vec![
        EntityTypeSpec::new("Customer"),
        EntityTypeSpec::child_table("Remote Row").virtual_backend(),
    ]);

    let spec = EntityTypeSpec::new("Order")
        .with_field(FieldSpec::table("missing", "Ghost Row"))
        .with_field(FieldSpec::table("not_child", "Customer"))
        .with_field(FieldSpec::table("remote", "Remote Row"));

    assert_eq!(
        rules(&validate(&spec, &store)),
        vec![
            SpecRule::TableTargetMissing,
            SpecRule::TableTargetNotChild,
            SpecRule::TableBackendMismatch,
        ]
    );
}

// =============================================================================
// Fold Placement
// =============================================================================

/// A fold must be unique, precede a section break and not end the list.
#[test]
fn test_fold_placement() {
    let store = SpecStore::in_memory();

    let valid = EntityTypeSpec::new("Profile")
        .with_field(FieldSpec::new("summary", FieldKind::Data))
        .with_field(FieldSpec::new("more", FieldKind::Fold))
        .with_field(FieldSpec::new("details", FieldKind::SectionBreak))
        .with_field(FieldSpec::new("bio", FieldKind::Text));
    assert!(validate(&valid, &store).is_empty());

    let invalid = EntityTypeSpec::new("Profile")
        .with_field(FieldSpec::new("fold_a", FieldKind::Fold))
        .with_field(FieldSpec::new("bio", FieldKind::Text))
        .with_field(FieldSpec::new("fold_b", FieldKind::Fold));
    assert_eq!(
        rules(&validate(&invalid, &store)),
        vec![
            SpecRule::FoldNotBeforeSection,
            SpecRule::FoldDuplicated,
            SpecRule::FoldLastField,
        ]
    );
}
