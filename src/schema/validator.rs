//! Field-spec validator
//!
//! Checks one entity type's field list against the structural rules.
//!
//! - Pure: no side effects, no I/O beyond registry lookups
//! - Deterministic: violations come out in field order
//! - Exhaustive: every violation is collected, nothing fails fast

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use super::errors::{SpecResult, SpecRule, SpecValidationError, SpecViolation};
use super::kinds::FieldKind;
use super::types::{EntityTypeSpec, FieldSpec, ENTITY_TYPE_REGISTRY};

/// Fieldnames owned by the record envelope.
pub const RESERVED_FIELDNAMES: &[&str] = &[
    "name",
    "owner",
    "creation",
    "modified",
    "modified_by",
    "docstatus",
    "parent",
    "parenttype",
    "parentfield",
    "idx",
    "doctype",
    "id",
    "type",
];

/// Allowed `options` values on a Data field.
pub const DATA_OPTIONS: &[&str] = &["Email", "Name", "Phone", "URL", "Barcode", "IBAN"];

/// Precision bounds for decimal kinds.
pub const PRECISION_RANGE: (u32, u32) = (1, 6);

/// Minimum render width for currency fields.
pub const MIN_CURRENCY_WIDTH: u32 = 100;

/// Bounds for a rating field's maximum value.
pub const RATING_RANGE: (u32, u32) = (3, 10);

/// Read-only view over the known entity types.
///
/// The validator only needs to resolve names other fields point at.
pub trait EntityTypeRegistry {
    /// Returns the structural view of an entity type: its base fields plus
    /// any overlay fields.
    fn entity_type(&self, name: &str) -> Option<EntityTypeSpec>;

    /// Whether an entity type with this name exists.
    fn entity_type_exists(&self, name: &str) -> bool {
        self.entity_type(name).is_some()
    }
}

fn fieldname_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("static pattern"))
}

/// Validates entity-type specs against the structural rules.
pub struct SpecValidator<'a> {
    registry: &'a dyn EntityTypeRegistry,
}

impl<'a> SpecValidator<'a> {
    /// Creates a validator resolving targets through `registry`.
    pub fn new(registry: &'a dyn EntityTypeRegistry) -> Self {
        Self { registry }
    }

    /// Returns every violation in `spec`, in field order.
    pub fn validate(&self, spec: &EntityTypeSpec) -> Vec<SpecViolation> {
        let mut violations = Vec::new();

        if spec.name.trim().is_empty() {
            violations.push(SpecViolation::entity(
                SpecRule::InvalidEntityTypeName,
                "entity type name must not be empty",
            ));
        }

        check_names(spec, &mut violations);

        for field in &spec.fields {
            check_flags(field, &mut violations);
            check_numeric(field, &mut violations);
            match field.kind {
                FieldKind::Link => self.check_link(spec, field, &mut violations),
                FieldKind::DynamicLink => check_dynamic_link(spec, field, &mut violations),
                FieldKind::Select => check_select(field, &mut violations),
                FieldKind::Table | FieldKind::TableMultiSelect => {
                    self.check_table(spec, field, &mut violations)
                }
                FieldKind::Check => check_check_default(field, &mut violations),
                FieldKind::Rating => check_rating(field, &mut violations),
                FieldKind::Data => check_data_options(field, &mut violations),
                _ => {}
            }
        }

        check_fold(spec, &mut violations);

        violations
    }

    /// Validates and wraps any violations into an error.
    pub fn check(&self, spec: &EntityTypeSpec) -> SpecResult<()> {
        let violations = self.validate(spec);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SpecValidationError::new(&spec.name, violations))
        }
    }

    fn check_link(&self, spec: &EntityTypeSpec, field: &FieldSpec, out: &mut Vec<SpecViolation>) {
        match field.options_trimmed() {
            None => out.push(SpecViolation::field(
                SpecRule::LinkTargetMissing,
                &field.fieldname,
                "link field must name its target entity type in options",
            )),
            Some(target) if target == spec.name => {}
            Some(target) if !self.registry.entity_type_exists(target) => {
                out.push(SpecViolation::field(
                    SpecRule::LinkTargetMissing,
                    &field.fieldname,
                    format!("link target '{}' is not a known entity type", target),
                ))
            }
            Some(_) => {}
        }
    }

    fn check_table(&self, spec: &EntityTypeSpec, field: &FieldSpec, out: &mut Vec<SpecViolation>) {
        let Some(target) = field.options_trimmed() else {
            out.push(SpecViolation::field(
                SpecRule::TableTargetMissing,
                &field.fieldname,
                "table field must name its child entity type in options",
            ));
            return;
        };

        let child = if target == spec.name {
            Some(spec.clone())
        } else {
            self.registry.entity_type(target)
        };

        let Some(child) = child else {
            out.push(SpecViolation::field(
                SpecRule::TableTargetMissing,
                &field.fieldname,
                format!("child entity type '{}' does not exist", target),
            ));
            return;
        };

        if !child.is_table {
            out.push(SpecViolation::field(
                SpecRule::TableTargetNotChild,
                &field.fieldname,
                format!("'{}' is not a child-table entity type", target),
            ));
        }

        if child.is_virtual_backend != spec.is_virtual_backend {
            out.push(SpecViolation::field(
                SpecRule::TableBackendMismatch,
                &field.fieldname,
                format!(
                    "child '{}' has is_virtual_backend={} but parent has {}",
                    target, child.is_virtual_backend, spec.is_virtual_backend
                ),
            ));
        }

        if field.kind == FieldKind::TableMultiSelect
            && !child.fields.iter().any(|f| f.kind == FieldKind::Link)
        {
            out.push(SpecViolation::field(
                SpecRule::TableMultiSelectWithoutLink,
                &field.fieldname,
                format!("child '{}' has no link field to select through", target),
            ));
        }
    }
}

/// Validates `spec` against `registry`, collecting every violation.
pub fn validate(spec: &EntityTypeSpec, registry: &dyn EntityTypeRegistry) -> Vec<SpecViolation> {
    SpecValidator::new(registry).validate(spec)
}

fn check_names(spec: &EntityTypeSpec, out: &mut Vec<SpecViolation>) {
    let mut seen = HashSet::new();
    for field in &spec.fields {
        let name = field.fieldname.as_str();

        if !fieldname_pattern().is_match(name) {
            out.push(SpecViolation::field(
                SpecRule::InvalidFieldname,
                name,
                "fieldname must be lowercase letters, digits and underscores, starting with a letter",
            ));
        }

        if RESERVED_FIELDNAMES.contains(&name) {
            out.push(SpecViolation::field(
                SpecRule::ReservedFieldname,
                name,
                format!("'{}' is reserved by the record envelope", name),
            ));
        }

        if !seen.insert(name) {
            out.push(SpecViolation::field(
                SpecRule::DuplicateFieldname,
                name,
                format!("fieldname '{}' appears more than once", name),
            ));
        }
    }
}

fn check_flags(field: &FieldSpec, out: &mut Vec<SpecViolation>) {
    let name = &field.fieldname;

    if field.required && field.kind.is_layout() {
        out.push(SpecViolation::field(
            SpecRule::MandatoryOnLayout,
            name,
            format!("{} fields hold no value and cannot be required", field.kind),
        ));
    }

    if field.required && field.hidden && field.default_trimmed().is_none() {
        out.push(SpecViolation::field(
            SpecRule::HiddenRequiredWithoutDefault,
            name,
            "a hidden required field needs a default",
        ));
    }

    if field.unique && !field.kind.supports_unique() {
        out.push(SpecViolation::field(
            SpecRule::UniqueNotAllowed,
            name,
            format!("unique is not allowed on {} fields", field.kind),
        ));
    }

    if field.indexed && field.kind.is_large_text() {
        out.push(SpecViolation::field(
            SpecRule::IndexOnLargeText,
            name,
            format!("{} fields cannot be indexed", field.kind),
        ));
    }

    if field.is_virtual && field.indexed {
        out.push(SpecViolation::field(
            SpecRule::VirtualWithIndex,
            name,
            "virtual fields have no column to index",
        ));
    }

    if field.is_virtual && field.in_list_view {
        out.push(SpecViolation::field(
            SpecRule::VirtualInListView,
            name,
            "virtual fields cannot be shown in list view",
        ));
    }
}

fn check_numeric(field: &FieldSpec, out: &mut Vec<SpecViolation>) {
    if field.kind.takes_precision() {
        if let Some(precision) = field.precision {
            let (lo, hi) = PRECISION_RANGE;
            if precision < lo || precision > hi {
                out.push(SpecViolation::field(
                    SpecRule::PrecisionOutOfRange,
                    &field.fieldname,
                    format!("precision {} outside [{}, {}]", precision, lo, hi),
                ));
            }
        }
    }

    if field.kind == FieldKind::Currency {
        if let Some(width) = field.width {
            if width < MIN_CURRENCY_WIDTH {
                out.push(SpecViolation::field(
                    SpecRule::CurrencyWidthTooSmall,
                    &field.fieldname,
                    format!("currency width {} below minimum {}", width, MIN_CURRENCY_WIDTH),
                ));
            }
        }
    }
}

fn check_dynamic_link(spec: &EntityTypeSpec, field: &FieldSpec, out: &mut Vec<SpecViolation>) {
    let Some(pointer) = field.options_trimmed() else {
        out.push(SpecViolation::field(
            SpecRule::DynamicLinkTargetInvalid,
            &field.fieldname,
            "dynamic link must name a sibling field holding the target entity type",
        ));
        return;
    };

    let valid = spec.field(pointer).map_or(false, |sibling| match sibling.kind {
        FieldKind::Select => true,
        FieldKind::Link => sibling.options_trimmed() == Some(ENTITY_TYPE_REGISTRY),
        _ => false,
    });

    if !valid {
        out.push(SpecViolation::field(
            SpecRule::DynamicLinkTargetInvalid,
            &field.fieldname,
            format!(
                "options '{}' must name a sibling Select field or Link to '{}'",
                pointer, ENTITY_TYPE_REGISTRY
            ),
        ));
    }
}

fn check_select(field: &FieldSpec, out: &mut Vec<SpecViolation>) {
    let choices = field.option_lines();
    if choices.is_empty() {
        out.push(SpecViolation::field(
            SpecRule::SelectOptionsEmpty,
            &field.fieldname,
            "select field needs at least one option",
        ));
        return;
    }

    if let Some(default) = field.default_trimmed() {
        if !choices.contains(&default) {
            out.push(SpecViolation::field(
                SpecRule::SelectDefaultNotInOptions,
                &field.fieldname,
                format!("default '{}' is not one of: {}", default, choices.join(", ")),
            ));
        }
    }
}

fn check_check_default(field: &FieldSpec, out: &mut Vec<SpecViolation>) {
    if let Some(default) = field.default_trimmed() {
        if !matches!(default.parse::<i64>(), Ok(0) | Ok(1)) {
            out.push(SpecViolation::field(
                SpecRule::CheckDefaultInvalid,
                &field.fieldname,
                format!("check default '{}' must be 0 or 1", default),
            ));
        }
    }
}

fn check_rating(field: &FieldSpec, out: &mut Vec<SpecViolation>) {
    if let Some(raw) = field.options_trimmed() {
        let (lo, hi) = RATING_RANGE;
        match raw.parse::<u32>() {
            Ok(max) if (lo..=hi).contains(&max) => {}
            _ => out.push(SpecViolation::field(
                SpecRule::RatingOutOfRange,
                &field.fieldname,
                format!("rating maximum '{}' must be an integer in [{}, {}]", raw, lo, hi),
            )),
        }
    }
}

fn check_data_options(field: &FieldSpec, out: &mut Vec<SpecViolation>) {
    if let Some(options) = field.options_trimmed() {
        if !DATA_OPTIONS.contains(&options) {
            let hint = if options.contains('\n') {
                "; a list of choices belongs on a Select field"
            } else {
                ""
            };
            out.push(SpecViolation::field(
                SpecRule::TextOptionsInvalid,
                &field.fieldname,
                format!(
                    "data options must be one of {}{}",
                    DATA_OPTIONS.join(", "),
                    hint
                ),
            ));
        }
    }
}

fn check_fold(spec: &EntityTypeSpec, out: &mut Vec<SpecViolation>) {
    let mut folds = 0;
    for (pos, field) in spec.fields.iter().enumerate() {
        if field.kind != FieldKind::Fold {
            continue;
        }

        folds += 1;
        if folds > 1 {
            out.push(SpecViolation::field(
                SpecRule::FoldDuplicated,
                &field.fieldname,
                "only one fold is allowed per entity type",
            ));
        }

        match spec.fields.get(pos + 1) {
            None => out.push(SpecViolation::field(
                SpecRule::FoldLastField,
                &field.fieldname,
                "fold cannot be the last field",
            )),
            Some(next) if next.kind != FieldKind::SectionBreak => out.push(SpecViolation::field(
                SpecRule::FoldNotBeforeSection,
                &field.fieldname,
                format!("fold must be followed by a Section Break, found {}", next.kind),
            )),
            Some(_) => {}
        }
    }
}
