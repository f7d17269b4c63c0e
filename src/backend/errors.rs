//! # Backend Errors
//!
//! Backend errors are opaque to the controller: they abort the operation
//! and propagate unmodified, with no retry.

use std::fmt;

use thiserror::Error;

use super::contract::BackendOperation;
use crate::meta::MetaError;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Authoritative unique-constraint failure
    #[error("{entity_type}: value '{value}' for unique field '{fieldname}' already exists")]
    UniqueViolation {
        entity_type: String,
        fieldname: String,
        value: String,
    },

    #[error("{entity_type} '{name}' already exists")]
    DuplicateName { entity_type: String, name: String },

    /// Naming rule needs a value the document does not carry
    #[error("{entity_type}: cannot assign a name: {message}")]
    Naming { entity_type: String, message: String },

    /// Update of a record that is not stored
    #[error("{entity_type} '{name}' does not exist")]
    MissingRecord { entity_type: String, name: String },

    #[error("{entity_type}: backend does not provide '{operation}'")]
    Unsupported {
        entity_type: String,
        operation: BackendOperation,
    },

    #[error("no backend registered for virtual entity type '{0}'")]
    NoBackend(String),

    #[error("{entity_type}.{fieldname}: {message}")]
    TypeMismatch {
        entity_type: String,
        fieldname: String,
        message: String,
    },

    #[error("{entity_type}.{fieldname}: length {length} exceeds column width {max}")]
    ValueTooLong {
        entity_type: String,
        fieldname: String,
        length: usize,
        max: u32,
    },

    #[error("journal corruption at offset {offset}: {message}")]
    Corruption { offset: u64, message: String },

    #[error("backend I/O error: {0}")]
    Io(String),

    /// Meta of a child table could not be resolved
    #[error("cannot resolve meta: {0}")]
    Meta(String),

    /// Failure raised inside a custom backend handler
    #[error("{entity_type}: {message}")]
    Handler { entity_type: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl BackendError {
    pub fn handler(entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::Handler {
            entity_type: entity_type.into(),
            message: message.into(),
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            BackendError::UniqueViolation { .. } => "BACKEND_UNIQUE_VIOLATION",
            BackendError::DuplicateName { .. } => "BACKEND_DUPLICATE_NAME",
            BackendError::Naming { .. } => "BACKEND_NAMING_FAILED",
            BackendError::MissingRecord { .. } => "BACKEND_MISSING_RECORD",
            BackendError::Unsupported { .. } => "BACKEND_UNSUPPORTED",
            BackendError::NoBackend(_) => "BACKEND_NOT_REGISTERED",
            BackendError::TypeMismatch { .. } => "BACKEND_TYPE_MISMATCH",
            BackendError::ValueTooLong { .. } => "BACKEND_VALUE_TOO_LONG",
            BackendError::Corruption { .. } => "BACKEND_CORRUPTION",
            BackendError::Io(_) => "BACKEND_IO",
            BackendError::Meta(_) => "BACKEND_META",
            BackendError::Handler { .. } => "BACKEND_HANDLER_FAILED",
            BackendError::Internal(_) => "BACKEND_INTERNAL",
        }
    }

    /// Every backend error aborts the operation that raised it.
    pub fn is_fatal(&self) -> bool {
        true
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Io(err.to_string())
    }
}

impl From<MetaError> for BackendError {
    fn from(err: MetaError) -> Self {
        BackendError::Meta(err.to_string())
    }
}

/// A virtual-backed entity type whose backend lacks operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entity type '{entity_type}' is virtual-backed but its backend does not provide: {}", join(.missing))]
pub struct ConformanceError {
    pub entity_type: String,
    pub missing: Vec<BackendOperation>,
}

impl ConformanceError {
    pub fn code(&self) -> &'static str {
        "BACKEND_CONFORMANCE_FAILED"
    }

    /// Conformance failures always abort the spec save.
    pub fn is_fatal(&self) -> bool {
        true
    }
}

fn join(ops: &[BackendOperation]) -> String {
    ops.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for BackendOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
