//! Configuration file
//!
//! A single JSON object. Only `data_dir` is required; every other key has
//! a default.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::observability::Severity;

use super::errors::{CliError, CliResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory (required)
    pub data_dir: String,

    /// Column length for Data-like fields without an explicit length
    #[serde(default = "default_text_length")]
    pub default_text_length: u32,

    /// Page length applied to `list` when no limit is given
    #[serde(default = "default_page_length")]
    pub default_page_length: usize,

    /// Upper bound on any requested page length
    #[serde(default = "default_max_page_length")]
    pub max_page_length: usize,

    /// Minimum log severity ("trace", "info", "warn", "error", "fatal")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether documents are journaled to `<data_dir>/data`
    #[serde(default = "default_persist_documents")]
    pub persist_documents: bool,
}

fn default_text_length() -> u32 {
    140
}
fn default_page_length() -> usize {
    20
}
fn default_max_page_length() -> usize {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_persist_documents() -> bool {
    true
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> CliResult<()> {
        if self.data_dir.trim().is_empty() {
            return Err(CliError::config_error("data_dir must not be empty"));
        }

        if self.default_text_length == 0 {
            return Err(CliError::config_error("default_text_length must be > 0"));
        }

        if self.default_page_length == 0 {
            return Err(CliError::config_error("default_page_length must be > 0"));
        }

        if self.max_page_length < self.default_page_length {
            return Err(CliError::config_error(format!(
                "max_page_length ({}) must be >= default_page_length ({})",
                self.max_page_length, self.default_page_length
            )));
        }

        self.severity()?;

        Ok(())
    }

    /// Get data directory as Path
    pub fn data_path(&self) -> &Path {
        Path::new(&self.data_dir)
    }

    /// Parsed `log_level`
    pub fn severity(&self) -> CliResult<Severity> {
        self.log_level
            .parse::<Severity>()
            .map_err(|e| CliError::config_error(format!("Invalid log_level: {}", e)))
    }
}
