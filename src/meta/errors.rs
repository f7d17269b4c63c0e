//! # Meta Errors

use thiserror::Error;

use crate::schema::{SpecValidationError, SpecViolation};

/// Result type for meta operations
pub type MetaResult<T> = Result<T, MetaError>;

/// Errors raised while loading, merging or persisting metadata
#[derive(Debug, Clone, Error)]
pub enum MetaError {
    /// The merged spec broke structural rules; the cached Meta is untouched
    #[error("cannot build meta for '{name}': {}", summarize(.violations))]
    Build {
        name: String,
        violations: Vec<SpecViolation>,
    },

    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Schema entity types are hard-coded and cannot be edited
    #[error("entity type '{0}' is built in and cannot be modified")]
    Protected(String),

    #[error("metadata store error at {path}: {message}")]
    Store { path: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetaError {
    pub fn store(path: impl Into<String>, message: impl Into<String>) -> Self {
        MetaError::Store {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            MetaError::Build { .. } => "META_BUILD_FAILED",
            MetaError::UnknownEntityType(_) => "META_UNKNOWN_ENTITY_TYPE",
            MetaError::Protected(_) => "META_PROTECTED",
            MetaError::Store { .. } => "META_STORE_FAILED",
            MetaError::Internal(_) => "META_INTERNAL",
        }
    }

    /// Build failures are fixed by the metadata author; an unknown entity
    /// type is a configuration error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MetaError::Build { .. } | MetaError::Protected(_))
    }

    /// Violations behind a build failure, empty otherwise
    pub fn violations(&self) -> &[SpecViolation] {
        match self {
            MetaError::Build { violations, .. } => violations,
            _ => &[],
        }
    }
}

impl From<SpecValidationError> for MetaError {
    fn from(err: SpecValidationError) -> Self {
        MetaError::Build {
            name: err.entity_type,
            violations: err.violations,
        }
    }
}

fn summarize(violations: &[SpecViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
