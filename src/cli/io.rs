//! stdin/stdout JSON for the CLI
//!
//! `save` reads one JSON object from stdin; every command answers with one
//! envelope line on stdout.

use std::io::{self, BufRead, Read, Write};

use serde_json::{json, Value};

use super::errors::{CliError, CliResult};

pub fn read_request() -> CliResult<Value> {
    let stdin = io::stdin();
    parse_request(stdin.lock())
}

/// Read a JSON request from any reader. The whole input is one object,
/// possibly spread over several lines.
pub fn parse_request(mut reader: impl BufRead) -> CliResult<Value> {
    let mut input = String::new();
    reader.read_to_string(&mut input)?;

    if input.trim().is_empty() {
        return Err(CliError::io_error("Empty input"));
    }

    let value: Value = serde_json::from_str(&input)?;
    if !value.is_object() {
        return Err(CliError::io_error("Request must be a JSON object"));
    }
    Ok(value)
}

/// Write `{"status": "ok", "data": ...}` to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    emit(&json!({"status": "ok", "data": data}))
}

/// Write `{"status": "error", "code": ..., "message": ...}` to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    emit(&json!({"status": "error", "code": code, "message": message}))
}

// One envelope per line, flushed before the process exits
fn emit(envelope: &Value) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, envelope)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_multiline_request() {
        let input = "{\n  \"entity_type\": \"Note\",\n  \"values\": {}\n}\n";
        let value = parse_request(Cursor::new(input)).unwrap();
        assert_eq!(value["entity_type"], "Note");
    }

    #[test]
    fn test_parse_rejects_empty_and_non_object() {
        let err = parse_request(Cursor::new("  \n")).unwrap_err();
        assert_eq!(err.code_str(), "METADOC_CLI_IO_ERROR");
        assert!(parse_request(Cursor::new("[1, 2]")).is_err());
    }
}
