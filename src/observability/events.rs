//! Observable events
//!
//! Events are explicit and typed. Each carries its default severity.

use std::fmt;

use super::logger::Severity;

/// Observable events in metadoc
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Meta cache
    /// A Meta was merged, validated and cached
    MetaBuilt,
    /// A cached Meta was served
    MetaCacheHit,
    /// A cache entry was dropped after a metadata write
    MetaInvalidated,
    /// A merge failed validation; the old entry is untouched
    MetaBuildFailed,
    /// A property override targeted a missing field
    OverrideIgnored,

    // Metadata administration
    /// An entity type, overlay or override was persisted
    SpecSaved,
    /// A metadata edit was refused by the validator
    SpecRejected,
    /// A virtual-backed entity type lacks backend operations
    ConformanceFailed,

    // Documents
    DocumentInserted,
    DocumentUpdated,
    DocumentDeleted,
    /// Document validation failed
    DocumentRejected,
    /// A virtual field has neither accessor nor expression
    VirtualFieldUnresolved,

    // Storage
    /// The record journal was replayed on open
    JournalReplayed,
    /// A corrupt journal record was found
    JournalCorruption,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::MetaBuilt => "META_BUILT",
            Event::MetaCacheHit => "META_CACHE_HIT",
            Event::MetaInvalidated => "META_INVALIDATED",
            Event::MetaBuildFailed => "META_BUILD_FAILED",
            Event::OverrideIgnored => "OVERRIDE_IGNORED",
            Event::SpecSaved => "SPEC_SAVED",
            Event::SpecRejected => "SPEC_REJECTED",
            Event::ConformanceFailed => "CONFORMANCE_FAILED",
            Event::DocumentInserted => "DOCUMENT_INSERTED",
            Event::DocumentUpdated => "DOCUMENT_UPDATED",
            Event::DocumentDeleted => "DOCUMENT_DELETED",
            Event::DocumentRejected => "DOCUMENT_REJECTED",
            Event::VirtualFieldUnresolved => "VIRTUAL_FIELD_UNRESOLVED",
            Event::JournalReplayed => "JOURNAL_REPLAYED",
            Event::JournalCorruption => "JOURNAL_CORRUPTION",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::MetaCacheHit => Severity::Trace,
            Event::OverrideIgnored
            | Event::SpecRejected
            | Event::DocumentRejected
            | Event::VirtualFieldUnresolved => Severity::Warn,
            Event::MetaBuildFailed | Event::ConformanceFailed => Severity::Error,
            Event::JournalCorruption => Severity::Fatal,
            _ => Severity::Info,
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
