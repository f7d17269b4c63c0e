//! # Document Errors
//!
//! Validation failures are collected and returned as one batch; backend
//! failures pass through unmodified.

use std::fmt;

use thiserror::Error;

use crate::admin::AdminError;
use crate::backend::BackendError;
use crate::meta::MetaError;
use crate::virtual_fields::ResolveError;

/// Field-level rules checked while a document is validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRule {
    /// Value is not in the merged Meta
    UnknownField,
    Required,
    /// Value cannot be coerced to the field kind
    TypeMismatch,
    /// Select value not in the option list
    InvalidOption,
    /// Link target record does not exist
    InvalidLink,
    /// Value already used by another record
    Duplicate,
    TooLong,
    /// Email / phone / URL format check failed
    InvalidFormat,
    /// Raised by the business-validation hook
    BusinessRule,
}

impl FieldRule {
    pub fn code(&self) -> &'static str {
        match self {
            FieldRule::UnknownField => "DOC_UNKNOWN_FIELD",
            FieldRule::Required => "DOC_REQUIRED",
            FieldRule::TypeMismatch => "DOC_TYPE_MISMATCH",
            FieldRule::InvalidOption => "DOC_INVALID_OPTION",
            FieldRule::InvalidLink => "DOC_INVALID_LINK",
            FieldRule::Duplicate => "DOC_DUPLICATE",
            FieldRule::TooLong => "DOC_TOO_LONG",
            FieldRule::InvalidFormat => "DOC_INVALID_FORMAT",
            FieldRule::BusinessRule => "DOC_BUSINESS_RULE",
        }
    }
}

impl fmt::Display for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Position of a child row: table field and 1-based row index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRef {
    pub table: String,
    pub idx: u32,
}

/// One field-level failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub rule: FieldRule,
    pub fieldname: String,
    pub message: String,
    /// Set when the failure is inside a child row
    pub row: Option<RowRef>,
}

impl FieldViolation {
    pub fn new(rule: FieldRule, fieldname: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule,
            fieldname: fieldname.into(),
            message: message.into(),
            row: None,
        }
    }

    /// Pins the violation to a child row
    pub fn in_row(mut self, table: impl Into<String>, idx: u32) -> Self {
        self.row = Some(RowRef {
            table: table.into(),
            idx,
        });
        self
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.row {
            Some(row) => write!(
                f,
                "[{}] {} row {} field '{}': {}",
                self.rule, row.table, row.idx, self.fieldname, self.message
            ),
            None => write!(f, "[{}] field '{}': {}", self.rule, self.fieldname, self.message),
        }
    }
}

/// Every field-level failure of one save attempt
#[derive(Debug, Clone, Error)]
#[error("{entity_type} '{}' failed validation: {}", .name.as_deref().unwrap_or("<new>"), summarize(.violations))]
pub struct FieldValidationError {
    pub entity_type: String,
    pub name: Option<String>,
    pub violations: Vec<FieldViolation>,
}

impl FieldValidationError {
    pub fn has_rule(&self, rule: FieldRule) -> bool {
        self.violations.iter().any(|v| v.rule == rule)
    }

    /// Violations for one field, any row
    pub fn for_field<'a>(&'a self, fieldname: &'a str) -> impl Iterator<Item = &'a FieldViolation> {
        self.violations.iter().filter(move |v| v.fieldname == fieldname)
    }
}

fn summarize(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for document operations
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Document lifecycle errors
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Validation(#[from] FieldValidationError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("{entity_type} '{name}' not found")]
    NotFound { entity_type: String, name: String },

    #[error("{entity_type} '{name}' has been deleted")]
    Deleted { entity_type: String, name: String },

    #[error("cannot {action} a document in state {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },

    /// Schema record could not be turned into metadata
    #[error("invalid schema record: {0}")]
    SchemaRecord(String),
}

impl DocumentError {
    pub fn not_found(entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        DocumentError::NotFound {
            entity_type: entity_type.into(),
            name: name.into(),
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            DocumentError::Validation(_) => "DOC_VALIDATION_FAILED",
            DocumentError::Backend(e) => e.code(),
            DocumentError::Meta(e) => e.code(),
            DocumentError::Admin(e) => e.code(),
            DocumentError::Resolve(_) => "DOC_VIRTUAL_FIELD_FAILED",
            DocumentError::NotFound { .. } => "DOC_NOT_FOUND",
            DocumentError::Deleted { .. } => "DOC_DELETED",
            DocumentError::InvalidTransition { .. } => "DOC_INVALID_TRANSITION",
            DocumentError::SchemaRecord(_) => "DOC_SCHEMA_RECORD_INVALID",
        }
    }

    /// Validation and not-found are expected outcomes; backend failures
    /// abort the operation.
    pub fn is_fatal(&self) -> bool {
        match self {
            DocumentError::Validation(_)
            | DocumentError::NotFound { .. }
            | DocumentError::Deleted { .. }
            | DocumentError::InvalidTransition { .. }
            | DocumentError::SchemaRecord(_) => false,
            DocumentError::Backend(e) => e.is_fatal(),
            DocumentError::Meta(e) => e.is_fatal(),
            DocumentError::Admin(e) => e.is_fatal(),
            DocumentError::Resolve(_) => true,
        }
    }
}
