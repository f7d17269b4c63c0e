//! CLI command implementations
//!
//! Every command except `init` boots an engine from the configured data
//! directory, performs one operation and prints one JSON response.

use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};

use crate::backend::{FilterExpr, Query};
use crate::document::{Document, DocumentError};
use crate::engine::{Engine, EngineBuilder};
use crate::meta::{MetaError, RecordClass};
use crate::observability::Logger;

use super::args::Command;
use super::config::Config;
use super::errors::{CliError, CliResult};
use super::io::{read_request, write_response};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Validate { config, entity } => {
            let engine = boot(&Config::load(&config)?)?;
            write_response(validate_report(&engine, entity.as_deref())?)
        }
        Command::Meta { config, entity } => {
            let engine = boot(&Config::load(&config)?)?;
            write_response(meta_json(&engine, &entity)?)
        }
        Command::List {
            config,
            entity,
            limit,
            offset,
            filter,
        } => {
            let engine = boot(&Config::load(&config)?)?;
            write_response(list_json(&engine, &entity, limit, offset, &filter)?)
        }
        Command::Get { config, entity, name } => {
            let engine = boot(&Config::load(&config)?)?;
            write_response(get_json(&engine, &entity, &name)?)
        }
        Command::Save { config } => {
            let engine = boot(&Config::load(&config)?)?;
            let request = read_request()?;
            write_response(save_json(&engine, request)?)
        }
        Command::Delete { config, entity, name } => {
            let engine = boot(&Config::load(&config)?)?;
            engine.documents().delete_by_name(&entity, &name)?;
            write_response(json!({"deleted": true, "entity_type": entity, "name": name}))
        }
    }
}

/// Initialize a new metadoc data directory
///
/// Creates the record journal directory and the three metadata
/// directories. Refuses to touch a directory that is already initialized.
pub fn init(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    let data_dir = config.data_path();

    if is_initialized(data_dir) {
        return Err(CliError::already_initialized());
    }

    let metadata = data_dir.join("metadata");
    let dirs = [
        data_dir.join("data"),
        metadata.join("entity_types"),
        metadata.join("custom_fields"),
        metadata.join("property_overrides"),
    ];

    for dir in &dirs {
        fs::create_dir_all(dir).map_err(|e| {
            CliError::config_error(format!("Failed to create directory {:?}: {}", dir, e))
        })?;
    }

    write_response(json!({"initialized": true}))?;

    Ok(())
}

fn is_initialized(data_dir: &Path) -> bool {
    data_dir.join("data").exists() && data_dir.join("metadata").join("entity_types").exists()
}

/// Boots an engine over an initialized data directory.
pub fn boot(config: &Config) -> CliResult<Engine> {
    let data_dir = config.data_path();
    if !is_initialized(data_dir) {
        return Err(CliError::not_initialized());
    }

    Logger::set_min_severity(config.severity()?);

    let engine = EngineBuilder::new()
        .data_dir(data_dir)
        .persist_documents(config.persist_documents)
        .text_length(config.default_text_length)
        .page_limits(config.default_page_length, config.max_page_length)
        .build()?;
    Ok(engine)
}

/// Builds the Meta of each stored entity type, collecting violations.
pub fn validate_report(engine: &Engine, entity: Option<&str>) -> CliResult<Value> {
    let names = match entity {
        Some(name) if engine.store().contains(name) => vec![name.to_string()],
        Some(name) => return Err(MetaError::UnknownEntityType(name.to_string()).into()),
        None => engine.store().entity_type_names()?,
    };

    let mut all_valid = true;
    let mut reports = Vec::with_capacity(names.len());
    for name in names {
        match engine.meta_builder().get_meta(&name) {
            Ok(meta) => reports.push(json!({
                "entity_type": name,
                "valid": true,
                "fields": meta.fields().len(),
            })),
            Err(MetaError::Build { violations, .. }) => {
                all_valid = false;
                let violations: Vec<Value> = violations
                    .iter()
                    .map(|v| {
                        json!({
                            "rule": v.rule.code(),
                            "fieldname": v.fieldname,
                            "message": v.message,
                        })
                    })
                    .collect();
                reports.push(json!({
                    "entity_type": name,
                    "valid": false,
                    "violations": violations,
                }));
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(json!({"valid": all_valid, "entity_types": reports}))
}

/// The merged Meta, plus the column layout for relationally stored types.
pub fn meta_json(engine: &Engine, entity: &str) -> CliResult<Value> {
    let meta = engine.meta_builder().get_meta(entity)?;
    let mut out = serde_json::to_value(&*meta)?;

    if meta.class() == RecordClass::Data && !meta.is_virtual_backend() {
        let columns: Vec<Value> = engine
            .relational()
            .columns(&meta)
            .into_iter()
            .map(|c| json!({"name": c.name, "type": c.column_type.sql_name(), "unique": c.unique}))
            .collect();
        out["columns"] = Value::Array(columns);
    }
    Ok(out)
}

pub fn list_json(
    engine: &Engine,
    entity: &str,
    limit: Option<usize>,
    offset: usize,
    filters: &[String],
) -> CliResult<Value> {
    let mut query = Query::new().offset(offset);
    if let Some(limit) = limit {
        query = query.limit(limit);
    }
    for raw in filters {
        let filter = FilterExpr::parse(raw)
            .ok_or_else(|| CliError::invalid_input(format!("Malformed filter '{}'", raw)))?;
        query = query.filter(filter);
    }

    let rows = engine.documents().list(entity, &query)?;
    Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
}

pub fn get_json(engine: &Engine, entity: &str, name: &str) -> CliResult<Value> {
    let doc = engine.documents().get(entity, name)?;
    let meta = engine.documents().meta(entity)?;
    Ok(Value::Object(doc.to_canonical(&meta, true)))
}

/// Saves `{"entity_type": ..., "values": {...}}`.
///
/// A `name` in `values` that already exists updates that document;
/// anything else is inserted.
pub fn save_json(engine: &Engine, request: Value) -> CliResult<Value> {
    let entity = request
        .get("entity_type")
        .and_then(Value::as_str)
        .ok_or_else(|| CliError::invalid_input("Request needs an 'entity_type' string"))?
        .to_string();
    let values = match request.get("values") {
        Some(Value::Object(values)) => values.clone(),
        None => Map::new(),
        Some(_) => return Err(CliError::invalid_input("'values' must be an object")),
    };

    let existing = match values.get("name").and_then(Value::as_str) {
        Some(name) => match engine.documents().get(&entity, name) {
            Ok(doc) => Some(doc),
            Err(DocumentError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        },
        None => None,
    };

    let mut doc = match existing {
        Some(mut doc) => {
            for (key, value) in values {
                if key != "name" {
                    doc.set(key, value)?;
                }
            }
            doc
        }
        None => Document::from_values(entity.as_str(), values),
    };

    engine.documents().save(&mut doc)?;
    let meta = engine.documents().meta(&entity)?;
    Ok(Value::Object(doc.to_canonical(&meta, true)))
}

#[cfg(test)]
mod tests {
    use super::super::errors::CliErrorCode;
    use super::*;
    use std::fs;
    use crate::schema::{EntityTypeSpec, FieldKind, FieldSpec};
    use tempfile::TempDir;

    fn create_config(temp_dir: &TempDir) -> std::path::PathBuf {
        let config_path = temp_dir.path().join("metadoc.json");
        let data_dir = temp_dir.path().join("data");

        let config = json!({
            "data_dir": data_dir.to_string_lossy(),
            "log_level": "error"
        });

        fs::write(&config_path, config.to_string()).unwrap();
        config_path
    }

    fn booted(temp_dir: &TempDir) -> Engine {
        let config_path = create_config(temp_dir);
        init(&config_path).unwrap();
        boot(&Config::load(&config_path).unwrap()).unwrap()
    }

    fn write_spec(temp_dir: &TempDir, file: &str, spec: Value) {
        let path = temp_dir
            .path()
            .join("data")
            .join("metadata")
            .join("entity_types")
            .join(file);
        fs::write(path, spec.to_string()).unwrap();
    }

    fn invoice_request(values: Value) -> Value {
        json!({"entity_type": "Invoice", "values": values})
    }

    fn save_invoice_type(engine: &Engine) {
        use crate::schema::{EntityTypeSpec, FieldKind, FieldSpec};
        engine
            .admin()
            .save_entity_type(
                EntityTypeSpec::new("Invoice")
                    .with_autoname("field:code")
                    .with_field(FieldSpec::new("code", FieldKind::Data).required())
                    .with_field(FieldSpec::select("status", &["Draft", "Paid"]).with_default("Draft")),
            )
            .unwrap();
    }

    #[test]
    fn test_init_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(&temp_dir);
        let data_dir = temp_dir.path().join("data");

        init(&config_path).unwrap();

        assert!(data_dir.join("data").exists());
        assert!(data_dir.join("metadata").join("entity_types").exists());
        assert!(data_dir.join("metadata").join("custom_fields").exists());
        assert!(data_dir.join("metadata").join("property_overrides").exists());
    }

    #[test]
    fn test_init_refuses_reinit() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(&temp_dir);

        init(&config_path).unwrap();

        let result = init(&config_path);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().code(),
            &CliErrorCode::AlreadyInitialized
        );
    }

    #[test]
    fn test_boot_requires_init() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(&temp_dir);

        let result = boot(&Config::load(&config_path).unwrap());
        assert_eq!(result.err().unwrap().code(), &CliErrorCode::NotInitialized);
    }

    #[test]
    fn test_validate_reports_violations() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config(&temp_dir);
        init(&config_path).unwrap();
        write_spec(
            &temp_dir,
            "Ticket.json",
            json!({
                "name": "Ticket",
                "fields": [
                    {"fieldname": "status", "kind": "Select", "options": "Open\nClosed", "default": "Pending"}
                ]
            }),
        );
        write_spec(
            &temp_dir,
            "Note.json",
            json!({"name": "Note", "fields": [{"fieldname": "title", "kind": "Data"}]}),
        );

        let engine = boot(&Config::load(&config_path).unwrap()).unwrap();
        let report = validate_report(&engine, None).unwrap();
        assert_eq!(report["valid"], false);

        let ticket = report["entity_types"]
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["entity_type"] == "Ticket")
            .unwrap();
        assert_eq!(ticket["violations"][0]["rule"], "SPEC_SELECT_DEFAULT_NOT_IN_OPTIONS");

        let note = validate_report(&engine, Some("Note")).unwrap();
        assert_eq!(note["valid"], true);

        let err = validate_report(&engine, Some("Ghost")).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::OperationFailed);
    }

    #[test]
    fn test_save_get_list_round() {
        let temp_dir = TempDir::new().unwrap();
        let engine = booted(&temp_dir);
        save_invoice_type(&engine);

        let saved = save_json(&engine, invoice_request(json!({"code": "A-1"}))).unwrap();
        assert_eq!(saved["name"], "A-1");
        assert_eq!(saved["status"], "Draft");

        save_json(&engine, invoice_request(json!({"code": "A-2", "status": "Paid"}))).unwrap();
        let updated = save_json(&engine, invoice_request(json!({"name": "A-1", "status": "Paid"}))).unwrap();
        assert_eq!(updated["status"], "Paid");

        let paid = list_json(&engine, "Invoice", None, 0, &["status=Paid".to_string()]).unwrap();
        assert_eq!(paid.as_array().unwrap().len(), 2);

        let one = list_json(&engine, "Invoice", Some(1), 1, &[]).unwrap();
        assert_eq!(one.as_array().unwrap().len(), 1);

        let loaded = get_json(&engine, "Invoice", "A-2").unwrap();
        assert_eq!(loaded["code"], "A-2");
    }

    #[test]
    fn test_list_rejects_malformed_filter() {
        let temp_dir = TempDir::new().unwrap();
        let engine = booted(&temp_dir);
        save_invoice_type(&engine);

        let err = list_json(&engine, "Invoice", None, 0, &["status".to_string()]).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::InvalidInput);
    }

    #[test]
    fn test_save_requires_entity_type() {
        let temp_dir = TempDir::new().unwrap();
        let engine = booted(&temp_dir);
        let err = save_json(&engine, json!({"values": {}})).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::InvalidInput);
    }

    #[test]
    fn test_meta_of_schema_type() {
        let temp_dir = TempDir::new().unwrap();
        let engine = booted(&temp_dir);
        let meta = meta_json(&engine, "Entity Type").unwrap();
        assert_eq!(meta["name"], "Entity Type");
        assert_eq!(meta["class"], "Schema");
        assert!(meta.get("columns").is_none());
    }

    #[test]
    fn test_meta_lists_columns() {
        let temp_dir = TempDir::new().unwrap();
        let engine = booted(&temp_dir);
        engine
            .admin()
            .save_entity_type(
                EntityTypeSpec::new("Note")
                    .with_field(FieldSpec::new("title", FieldKind::Data).unique())
                    .with_field(FieldSpec::new("body", FieldKind::Text)),
            )
            .unwrap();

        let meta = meta_json(&engine, "Note").unwrap();
        let columns = meta["columns"].as_array().unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[1], json!({"name": "title", "type": "varchar(140)", "unique": true}));
        assert_eq!(columns[2]["type"], "longtext");
    }
}
