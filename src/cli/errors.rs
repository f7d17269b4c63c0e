//! CLI-specific error types
//!
//! Every CLI error ends the command with a non-zero exit.

use std::fmt;
use std::io;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Config file unreadable, malformed or out of range
    ConfigError,
    /// stdin/stdout failure or undecodable request JSON
    IoError,
    AlreadyInitialized,
    NotInitialized,
    /// Spec store or record journal could not be opened
    BootFailed,
    /// Bad command input (unknown entity type, malformed filter)
    InvalidInput,
    /// A metadata or document operation was refused
    OperationFailed,
}

impl CliErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "METADOC_CLI_CONFIG_ERROR",
            Self::IoError => "METADOC_CLI_IO_ERROR",
            Self::AlreadyInitialized => "METADOC_CLI_ALREADY_INITIALIZED",
            Self::NotInitialized => "METADOC_CLI_NOT_INITIALIZED",
            Self::BootFailed => "METADOC_CLI_BOOT_FAILED",
            Self::InvalidInput => "METADOC_CLI_INVALID_INPUT",
            Self::OperationFailed => "METADOC_CLI_OPERATION_FAILED",
        }
    }
}

/// A failed command: a stable code plus a human-readable message
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn already_initialized() -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            "Data directory already initialized",
        )
    }

    pub fn not_initialized() -> Self {
        Self::new(
            CliErrorCode::NotInitialized,
            "Data directory not initialized. Run 'metadoc init' first.",
        )
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BootFailed, msg)
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::InvalidInput, msg)
    }

    /// Refused operation, carrying the underlying error code
    pub fn operation_failed(code: &str, msg: impl std::fmt::Display) -> Self {
        Self::new(CliErrorCode::OperationFailed, format!("{}: {}", code, msg))
    }

    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Code string written into the error envelope
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("malformed JSON: {}", e))
    }
}

impl From<crate::engine::EngineError> for CliError {
    fn from(e: crate::engine::EngineError) -> Self {
        Self::boot_failed(format!("{}: {}", e.code(), e))
    }
}

impl From<crate::meta::MetaError> for CliError {
    fn from(e: crate::meta::MetaError) -> Self {
        Self::operation_failed(e.code(), &e)
    }
}

impl From<crate::document::DocumentError> for CliError {
    fn from(e: crate::document::DocumentError) -> Self {
        Self::operation_failed(e.code(), &e)
    }
}

pub type CliResult<T> = Result<T, CliError>;
