//! Record naming rules
//!
//! - `hash`: 10 hex characters from a random v4 UUID (default)
//! - `field:<fieldname>`: the value of a field
//! - `prompt`: the caller supplies the name
//! - `autoincrement`: 1, 2, 3, ... per entity type
//! - `format:PREFIX-{####}`: zero-padded counter per entity type

use std::str::FromStr;

use uuid::Uuid;

use super::errors::{BackendError, BackendResult};
use crate::document::Document;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NamingRule {
    #[default]
    Hash,
    Field(String),
    Prompt,
    Autoincrement,
    /// Text before and after the `{#...}` counter, and its width
    Format {
        prefix: String,
        width: usize,
        suffix: String,
    },
}

impl FromStr for NamingRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "" | "hash" => return Ok(NamingRule::Hash),
            "prompt" => return Ok(NamingRule::Prompt),
            "autoincrement" => return Ok(NamingRule::Autoincrement),
            _ => {}
        }

        if let Some(field) = s.strip_prefix("field:") {
            let field = field.trim();
            if field.is_empty() {
                return Err("field: rule needs a fieldname".to_string());
            }
            return Ok(NamingRule::Field(field.to_string()));
        }

        if let Some(pattern) = s.strip_prefix("format:") {
            let open = pattern
                .find("{#")
                .ok_or_else(|| format!("format rule '{}' has no {{#...}} counter", s))?;
            let close = pattern[open..]
                .find('}')
                .map(|i| open + i)
                .ok_or_else(|| format!("format rule '{}' has an unclosed counter", s))?;
            let hashes = &pattern[open + 1..close];
            if hashes.is_empty() || !hashes.chars().all(|c| c == '#') {
                return Err(format!("format rule '{}' counter must be only '#'", s));
            }
            return Ok(NamingRule::Format {
                prefix: pattern[..open].to_string(),
                width: hashes.len(),
                suffix: pattern[close + 1..].to_string(),
            });
        }

        Err(format!("unknown naming rule '{}'", s))
    }
}

impl NamingRule {
    /// Parses the rule from an optional `autoname` value.
    pub fn from_autoname(entity_type: &str, autoname: Option<&str>) -> BackendResult<Self> {
        autoname
            .map(str::parse::<NamingRule>)
            .transpose()
            .map(Option::unwrap_or_default)
            .map_err(|message| BackendError::Naming {
                entity_type: entity_type.to_string(),
                message,
            })
    }

    /// Whether this rule consumes the per-type counter
    pub fn uses_counter(&self) -> bool {
        matches!(self, NamingRule::Autoincrement | NamingRule::Format { .. })
    }

    /// Produces a name for `doc`. `counter` is the next counter value and is
    /// only read by counter rules.
    pub fn assign(&self, doc: &Document, counter: u64) -> BackendResult<String> {
        let naming_error = |message: String| BackendError::Naming {
            entity_type: doc.entity_type().to_string(),
            message,
        };

        match self {
            NamingRule::Hash => Ok(Uuid::new_v4().simple().to_string()[..10].to_string()),
            NamingRule::Prompt => doc
                .name()
                .filter(|n| !n.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| naming_error("a name must be supplied".to_string())),
            NamingRule::Field(field) => match doc.value(field) {
                Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
                Some(v) if !v.is_null() && !v.is_string() => Ok(v.to_string()),
                _ => Err(naming_error(format!("field '{}' is empty", field))),
            },
            NamingRule::Autoincrement => Ok(counter.to_string()),
            NamingRule::Format {
                prefix,
                width,
                suffix,
            } => Ok(format!("{}{:0width$}{}", prefix, counter, suffix, width = *width)),
        }
    }
}
