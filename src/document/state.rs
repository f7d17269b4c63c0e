//! Document lifecycle state machine
//!
//! - `New → Validating → Persisted` (insert)
//! - `Persisted → Validating → Persisted` (update)
//! - `Validating → Rejected`, which keeps the origin so the document can be
//!   fixed and saved again
//! - `Persisted → Deleted` (terminal)
//!
//! Transitions are explicit; an illegal one is an error, never a no-op.

use std::fmt;

use super::errors::{DocumentError, DocumentResult};

/// Settled state a validation pass started from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    New,
    Persisted,
}

impl Origin {
    fn settled(self) -> DocState {
        match self {
            Origin::New => DocState::New,
            Origin::Persisted => DocState::Persisted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocState {
    /// Never written to a backend
    #[default]
    New,
    Validating { from: Origin },
    Persisted,
    /// Validation failed; errors are attached to the document
    Rejected { from: Origin },
    /// Removed from its backend; no further mutation
    Deleted,
}

impl DocState {
    pub fn name(&self) -> &'static str {
        match self {
            DocState::New => "New",
            DocState::Validating { .. } => "Validating",
            DocState::Persisted => "Persisted",
            DocState::Rejected { .. } => "Rejected",
            DocState::Deleted => "Deleted",
        }
    }

    /// Whether the backend holds a copy of this document
    pub fn is_stored(&self) -> bool {
        matches!(
            self,
            DocState::Persisted
                | DocState::Validating { from: Origin::Persisted }
                | DocState::Rejected { from: Origin::Persisted }
        )
    }

    /// New | Persisted | Rejected → Validating
    pub fn begin_validation(self) -> DocumentResult<DocState> {
        match self {
            DocState::New => Ok(DocState::Validating { from: Origin::New }),
            DocState::Persisted => Ok(DocState::Validating { from: Origin::Persisted }),
            DocState::Rejected { from } => Ok(DocState::Validating { from }),
            other => Err(other.invalid("validate")),
        }
    }

    /// Validating → Persisted
    pub fn accept(self) -> DocumentResult<DocState> {
        match self {
            DocState::Validating { .. } => Ok(DocState::Persisted),
            other => Err(other.invalid("persist")),
        }
    }

    /// Validating → Rejected
    pub fn reject(self) -> DocumentResult<DocState> {
        match self {
            DocState::Validating { from } => Ok(DocState::Rejected { from }),
            other => Err(other.invalid("reject")),
        }
    }

    /// Validating → origin, used when the backend call fails
    pub fn abort(self) -> DocState {
        match self {
            DocState::Validating { from } => from.settled(),
            other => other,
        }
    }

    /// Stored → Deleted
    pub fn delete(self) -> DocumentResult<DocState> {
        if self.is_stored() && !matches!(self, DocState::Validating { .. }) {
            Ok(DocState::Deleted)
        } else {
            Err(self.invalid("delete"))
        }
    }

    fn invalid(self, action: &'static str) -> DocumentError {
        DocumentError::InvalidTransition {
            state: self.name(),
            action,
        }
    }
}

impl fmt::Display for DocState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
