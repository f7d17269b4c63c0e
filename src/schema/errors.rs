//! Structural rule violations reported by the field-spec validator
//!
//! Violations are collected exhaustively and reported as a batch; each one
//! names the rule it breaks through a stable code (`SPEC_*`).

use std::fmt;

use thiserror::Error;

/// Structural rules checked against an entity type's field list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecRule {
    InvalidEntityTypeName,
    InvalidFieldname,
    DuplicateFieldname,
    ReservedFieldname,
    MandatoryOnLayout,
    HiddenRequiredWithoutDefault,
    UniqueNotAllowed,
    LinkTargetMissing,
    DynamicLinkTargetInvalid,
    SelectOptionsEmpty,
    SelectDefaultNotInOptions,
    TableTargetMissing,
    TableTargetNotChild,
    TableBackendMismatch,
    TableMultiSelectWithoutLink,
    PrecisionOutOfRange,
    CurrencyWidthTooSmall,
    CheckDefaultInvalid,
    RatingOutOfRange,
    FoldDuplicated,
    FoldNotBeforeSection,
    FoldLastField,
    IndexOnLargeText,
    VirtualWithIndex,
    VirtualInListView,
    TextOptionsInvalid,
    /// Overlay fieldname collides with a base fieldname
    OverlayCollision,
    /// Property override could not be applied
    InvalidOverride,
}

impl SpecRule {
    /// Returns the stable rule code
    pub fn code(&self) -> &'static str {
        match self {
            SpecRule::InvalidEntityTypeName => "SPEC_INVALID_ENTITY_TYPE_NAME",
            SpecRule::InvalidFieldname => "SPEC_INVALID_FIELDNAME",
            SpecRule::DuplicateFieldname => "SPEC_DUPLICATE_FIELDNAME",
            SpecRule::ReservedFieldname => "SPEC_RESERVED_FIELDNAME",
            SpecRule::MandatoryOnLayout => "SPEC_MANDATORY_ON_LAYOUT",
            SpecRule::HiddenRequiredWithoutDefault => "SPEC_HIDDEN_REQUIRED_WITHOUT_DEFAULT",
            SpecRule::UniqueNotAllowed => "SPEC_UNIQUE_NOT_ALLOWED",
            SpecRule::LinkTargetMissing => "SPEC_LINK_TARGET_MISSING",
            SpecRule::DynamicLinkTargetInvalid => "SPEC_DYNAMIC_LINK_TARGET_INVALID",
            SpecRule::SelectOptionsEmpty => "SPEC_SELECT_OPTIONS_EMPTY",
            SpecRule::SelectDefaultNotInOptions => "SPEC_SELECT_DEFAULT_NOT_IN_OPTIONS",
            SpecRule::TableTargetMissing => "SPEC_TABLE_TARGET_MISSING",
            SpecRule::TableTargetNotChild => "SPEC_TABLE_TARGET_NOT_CHILD",
            SpecRule::TableBackendMismatch => "SPEC_TABLE_BACKEND_MISMATCH",
            SpecRule::TableMultiSelectWithoutLink => "SPEC_TABLE_MULTISELECT_WITHOUT_LINK",
            SpecRule::PrecisionOutOfRange => "SPEC_PRECISION_OUT_OF_RANGE",
            SpecRule::CurrencyWidthTooSmall => "SPEC_CURRENCY_WIDTH_TOO_SMALL",
            SpecRule::CheckDefaultInvalid => "SPEC_CHECK_DEFAULT_INVALID",
            SpecRule::RatingOutOfRange => "SPEC_RATING_OUT_OF_RANGE",
            SpecRule::FoldDuplicated => "SPEC_FOLD_DUPLICATED",
            SpecRule::FoldNotBeforeSection => "SPEC_FOLD_NOT_BEFORE_SECTION",
            SpecRule::FoldLastField => "SPEC_FOLD_LAST_FIELD",
            SpecRule::IndexOnLargeText => "SPEC_INDEX_ON_LARGE_TEXT",
            SpecRule::VirtualWithIndex => "SPEC_VIRTUAL_WITH_INDEX",
            SpecRule::VirtualInListView => "SPEC_VIRTUAL_IN_LIST_VIEW",
            SpecRule::TextOptionsInvalid => "SPEC_TEXT_OPTIONS_INVALID",
            SpecRule::OverlayCollision => "SPEC_OVERLAY_COLLISION",
            SpecRule::InvalidOverride => "SPEC_INVALID_OVERRIDE",
        }
    }
}

impl fmt::Display for SpecRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One broken rule, optionally pinned to a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecViolation {
    pub rule: SpecRule,
    pub fieldname: Option<String>,
    pub message: String,
}

impl SpecViolation {
    /// Violation pinned to a field
    pub fn field(rule: SpecRule, fieldname: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule,
            fieldname: Some(fieldname.into()),
            message: message.into(),
        }
    }

    /// Violation of the entity type as a whole
    pub fn entity(rule: SpecRule, message: impl Into<String>) -> Self {
        Self {
            rule,
            fieldname: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for SpecViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.fieldname {
            Some(name) => write!(f, "[{}] field '{}': {}", self.rule, name, self.message),
            None => write!(f, "[{}] {}", self.rule, self.message),
        }
    }
}

/// The batch of violations for one entity type.
///
/// Recoverable by the metadata author: fix the spec and save again.
#[derive(Debug, Clone, Error)]
#[error("entity type '{entity_type}' failed validation with {} violation(s): {}", .violations.len(), summarize(.violations))]
pub struct SpecValidationError {
    pub entity_type: String,
    pub violations: Vec<SpecViolation>,
}

impl SpecValidationError {
    pub fn new(entity_type: impl Into<String>, violations: Vec<SpecViolation>) -> Self {
        Self {
            entity_type: entity_type.into(),
            violations,
        }
    }

    /// Whether any violation breaks `rule`
    pub fn has_rule(&self, rule: SpecRule) -> bool {
        self.violations.iter().any(|v| v.rule == rule)
    }

    pub fn code(&self) -> &'static str {
        "SPEC_VALIDATION_FAILED"
    }
}

fn summarize(violations: &[SpecViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for spec validation
pub type SpecResult<T> = Result<T, SpecValidationError>;
