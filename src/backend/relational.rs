//! Relational default backend
//!
//! Every storable field becomes a typed column. Rows live in one table per
//! entity type, keyed by record name. Child-table rows live in the child
//! entity type's table and carry `parent`, `parenttype`, `parentfield` and
//! `idx`.
//!
//! # Write Discipline
//!
//! 1. All checks run before anything changes
//! 2. The journal is appended and synced
//! 3. Only then is the in-memory table updated
//!
//! A failed write leaves both the journal and the tables untouched.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use uuid::Uuid;

use super::contract::{Backend, Record};
use super::errors::{BackendError, BackendResult};
use super::journal::{Journal, JournalEntry};
use super::naming::NamingRule;
use super::query::{apply_query, count_matching, group_counts, Query};
use crate::document::{Document, ParentRef, NAME_FIELD};
use crate::meta::{Meta, MetaBuilder};
use crate::schema::{FieldKind, FieldSpec};
use crate::value::{decimal_from_value, values_equal};

/// Width of `Varchar` columns without an explicit `length`
pub const DEFAULT_TEXT_LENGTH: u32 = 140;

/// Default decimal places for float-like kinds
const DEFAULT_FLOAT_PRECISION: u32 = 9;
const DEFAULT_CURRENCY_PRECISION: u32 = 2;

/// Typed cell of a relational column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Varchar(u32),
    LongText,
    Decimal(u32),
    Int,
    Bool,
    Date,
    Datetime,
    Time,
    Json,
}

impl ColumnType {
    /// Column type for a field, `None` for kinds that hold no cell.
    pub fn for_field(field: &FieldSpec, default_length: u32) -> Option<Self> {
        if !field.is_stored() {
            return None;
        }
        let column = match field.kind {
            FieldKind::Int | FieldKind::Rating | FieldKind::Duration => ColumnType::Int,
            FieldKind::Check => ColumnType::Bool,
            FieldKind::Currency => ColumnType::Decimal(field.precision.unwrap_or(DEFAULT_CURRENCY_PRECISION)),
            FieldKind::Float | FieldKind::Percent | FieldKind::Decimal => {
                ColumnType::Decimal(field.precision.unwrap_or(DEFAULT_FLOAT_PRECISION))
            }
            FieldKind::Date => ColumnType::Date,
            FieldKind::Datetime => ColumnType::Datetime,
            FieldKind::Time => ColumnType::Time,
            FieldKind::Json | FieldKind::Geolocation => ColumnType::Json,
            kind if kind.is_large_text() => ColumnType::LongText,
            FieldKind::Barcode => ColumnType::LongText,
            _ => ColumnType::Varchar(field.length.unwrap_or(default_length)),
        };
        Some(column)
    }

    pub fn sql_name(&self) -> String {
        match self {
            ColumnType::Varchar(n) => format!("varchar({})", n),
            ColumnType::LongText => "longtext".to_string(),
            ColumnType::Decimal(p) => format!("decimal(21,{})", p),
            ColumnType::Int => "int".to_string(),
            ColumnType::Bool => "bool".to_string(),
            ColumnType::Date => "date".to_string(),
            ColumnType::Datetime => "datetime(6)".to_string(),
            ColumnType::Time => "time(6)".to_string(),
            ColumnType::Json => "json".to_string(),
        }
    }
}

/// One column of an entity type's table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub unique: bool,
}

/// Columns of the table backing `meta`: the name, the child envelope for
/// child-table types, then one column per storable field in Meta order.
pub fn columns_for(meta: &Meta, default_length: u32) -> Vec<Column> {
    let mut columns = vec![Column {
        name: NAME_FIELD.to_string(),
        column_type: ColumnType::Varchar(default_length),
        unique: true,
    }];

    if meta.is_table() {
        for name in ["parent", "parenttype", "parentfield"] {
            columns.push(Column {
                name: name.to_string(),
                column_type: ColumnType::Varchar(default_length),
                unique: false,
            });
        }
        columns.push(Column {
            name: "idx".to_string(),
            column_type: ColumnType::Int,
            unique: false,
        });
    }

    columns.extend(meta.fields().iter().filter_map(|field| {
        ColumnType::for_field(field, default_length).map(|column_type| Column {
            name: field.fieldname.clone(),
            column_type,
            unique: field.unique,
        })
    }));
    columns
}

#[derive(Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<String, Record>>,
    counters: HashMap<String, u64>,
}

impl Tables {
    fn table(&self, entity_type: &str) -> Option<&BTreeMap<String, Record>> {
        self.rows.get(entity_type)
    }

    fn contains(&self, entity_type: &str, name: &str) -> bool {
        self.table(entity_type).is_some_and(|t| t.contains_key(name))
    }

    fn apply(&mut self, entry: JournalEntry) {
        let table = self.rows.entry(entry.entity_type).or_default();
        if entry.tombstone {
            table.remove(&entry.name);
        } else {
            table.insert(entry.name, entry.body);
        }
    }

    // Child rows owned by (parenttype, parent), keyed by child table
    fn child_names(&self, child_type: &str, parenttype: &str, parent: &str) -> Vec<String> {
        self.table(child_type)
            .map(|t| {
                t.iter()
                    .filter(|(_, row)| {
                        row.get("parent").and_then(Value::as_str) == Some(parent)
                            && row.get("parenttype").and_then(Value::as_str) == Some(parenttype)
                    })
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    // Next counter value, seeded from stored names on first use
    fn next_counter(&mut self, entity_type: &str, rule: &NamingRule) -> u64 {
        if !self.counters.contains_key(entity_type) {
            let seed = self
                .table(entity_type)
                .map(|t| t.keys().filter_map(|n| counter_of(rule, n)).max().unwrap_or(0))
                .unwrap_or(0);
            self.counters.insert(entity_type.to_string(), seed);
        }
        let counter = self.counters.entry(entity_type.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }
}

fn counter_of(rule: &NamingRule, name: &str) -> Option<u64> {
    match rule {
        NamingRule::Autoincrement => name.parse().ok(),
        NamingRule::Format { prefix, suffix, .. } => name
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_suffix(suffix.as_str()))
            .and_then(|digits| digits.parse().ok()),
        _ => None,
    }
}

/// The default backend for non-virtual entity types.
pub struct RelationalBackend {
    builder: Arc<MetaBuilder>,
    default_length: u32,
    tables: RwLock<Tables>,
    journal: Option<Mutex<Journal>>,
}

impl RelationalBackend {
    /// Tables kept only in memory.
    pub fn in_memory(builder: Arc<MetaBuilder>, default_length: u32) -> Self {
        Self {
            builder,
            default_length,
            tables: RwLock::new(Tables::default()),
            journal: None,
        }
    }

    /// Tables journaled under `data_dir`, rebuilt from the journal.
    pub fn open(builder: Arc<MetaBuilder>, data_dir: &Path, default_length: u32) -> BackendResult<Self> {
        let (journal, entries) = Journal::open(data_dir)?;
        let mut tables = Tables::default();
        for entry in entries {
            tables.apply(entry);
        }
        Ok(Self {
            builder,
            default_length,
            tables: RwLock::new(tables),
            journal: Some(Mutex::new(journal)),
        })
    }

    /// Journal records written or replayed, 0 when not journaled
    pub fn journal_records(&self) -> u64 {
        self.journal
            .as_ref()
            .and_then(|j| j.lock().ok().map(|j| j.record_count()))
            .unwrap_or(0)
    }

    pub fn columns(&self, meta: &Meta) -> Vec<Column> {
        columns_for(meta, self.default_length)
    }

    fn read_tables(&self) -> BackendResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| BackendError::Internal("lock poisoned".into()))
    }

    fn write_tables(&self) -> BackendResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| BackendError::Internal("lock poisoned".into()))
    }

    // Journal first, memory second
    fn commit(&self, tables: &mut Tables, entries: Vec<JournalEntry>) -> BackendResult<()> {
        if let Some(journal) = &self.journal {
            journal
                .lock()
                .map_err(|_| BackendError::Internal("lock poisoned".into()))?
                .append(&entries)?;
        }
        for entry in entries {
            tables.apply(entry);
        }
        Ok(())
    }

    // Child Metas keyed by table fieldname, resolved before any lock is taken
    fn child_metas(&self, meta: &Meta) -> BackendResult<Vec<(String, Arc<Meta>)>> {
        meta.table_fields()
            .filter_map(|f| f.options_trimmed().map(|child| (f.fieldname.clone(), child.to_string())))
            .map(|(fieldname, child)| Ok::<_, BackendError>((fieldname, self.builder.get_meta(&child)?)))
            .collect()
    }

    /// Converts a document into a row of typed cells.
    fn row_for(
        &self,
        meta: &Meta,
        doc: &Document,
        name: &str,
        parent: Option<(&ParentRef, u32)>,
    ) -> BackendResult<Record> {
        let mut row = Record::new();
        row.insert(NAME_FIELD.to_string(), Value::from(name));
        if let Some((parent, idx)) = parent {
            row.insert("parent".to_string(), Value::from(parent.parent.as_str()));
            row.insert("parenttype".to_string(), Value::from(parent.parenttype.as_str()));
            row.insert("parentfield".to_string(), Value::from(parent.parentfield.as_str()));
            row.insert("idx".to_string(), Value::from(idx));
        }

        for column in self.columns(meta) {
            if row.contains_key(&column.name) {
                continue;
            }
            let value = doc.value(&column.name).cloned().unwrap_or(Value::Null);
            check_cell(meta.name(), &column, &value)?;
            row.insert(column.name, value);
        }
        Ok(row)
    }

    /// Authoritative unique check against every other stored row.
    fn check_unique(&self, tables: &Tables, meta: &Meta, row: &Record) -> BackendResult<()> {
        let Some(table) = tables.table(meta.name()) else {
            return Ok(());
        };
        unique_against(meta, row, table.values())
    }

    /// Journal entries replacing every child row of `doc`.
    ///
    /// Rows without a name get a random one. Returns the entries and the
    /// child names assigned per table, in row order.
    fn child_entries(
        &self,
        tables: &Tables,
        meta: &Meta,
        children: &[(String, Arc<Meta>)],
        doc: &Document,
        name: &str,
    ) -> BackendResult<(Vec<JournalEntry>, Vec<(String, Vec<String>)>)> {
        let mut entries = Vec::new();
        let mut assigned = Vec::new();

        // Every row this parent owns through a table field is replaced
        let mut replaced: HashSet<(String, String)> = HashSet::new();
        for (fieldname, child_meta) in children {
            for stale in tables.child_names(child_meta.name(), meta.name(), name) {
                let owned_by_field = tables
                    .table(child_meta.name())
                    .and_then(|t| t.get(&stale))
                    .and_then(|row| row.get("parentfield"))
                    .and_then(Value::as_str)
                    == Some(fieldname.as_str());
                if owned_by_field {
                    entries.push(JournalEntry::tombstone(child_meta.name(), stale.clone()));
                    replaced.insert((child_meta.name().to_string(), stale));
                }
            }
        }

        let mut pending: Vec<(String, Record)> = Vec::new();
        for (fieldname, child_meta) in children {
            let parent = ParentRef {
                parent: name.to_string(),
                parenttype: meta.name().to_string(),
                parentfield: fieldname.clone(),
            };
            let mut names = Vec::new();
            for (pos, row) in doc.children(fieldname).iter().enumerate() {
                let row_name = row
                    .name()
                    .filter(|n| !n.trim().is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..10].to_string());
                let idx = u32::try_from(pos + 1).unwrap_or(u32::MAX);
                let cells = self.row_for(child_meta, row, &row_name, Some((&parent, idx)))?;

                if child_meta.unique_fields().next().is_some() {
                    let stored = tables
                        .table(child_meta.name())
                        .into_iter()
                        .flat_map(|t| t.iter())
                        .filter(|(other, _)| {
                            **other != row_name
                                && !replaced.contains(&(child_meta.name().to_string(), (*other).clone()))
                        })
                        .map(|(_, r)| r);
                    let batch = pending
                        .iter()
                        .filter(|(entity_type, _)| entity_type == child_meta.name())
                        .map(|(_, r)| r);
                    unique_against(child_meta, &cells, stored.chain(batch))?;
                    pending.push((child_meta.name().to_string(), cells.clone()));
                }

                entries.push(JournalEntry::put(child_meta.name(), row_name.clone(), cells));
                names.push(row_name);
            }
            assigned.push((fieldname.clone(), names));
        }
        Ok((entries, assigned))
    }
}

// First unique field of `row` whose value another row already holds;
// `others` must not contain `row` itself
fn unique_against<'a>(meta: &Meta, row: &Record, others: impl Iterator<Item = &'a Record> + Clone) -> BackendResult<()> {
    let self_name = row.get(NAME_FIELD).and_then(Value::as_str);
    for field in meta.unique_fields() {
        let Some(value) = row.get(&field.fieldname).filter(|v| !crate::value::is_empty(v)) else {
            continue;
        };
        let clash = others.clone().any(|other| {
            other.get(NAME_FIELD).and_then(Value::as_str) != self_name
                && other.get(&field.fieldname).is_some_and(|o| values_equal(o, value))
        });
        if clash {
            return Err(BackendError::UniqueViolation {
                entity_type: meta.name().to_string(),
                fieldname: field.fieldname.clone(),
                value: display_value(value),
            });
        }
    }
    Ok(())
}

// Stamps assigned names and parent references back onto the document
fn stamp_children(doc: &mut Document, meta_name: &str, name: &str, assigned: Vec<(String, Vec<String>)>) {
    for (fieldname, names) in assigned {
        if let Some(rows) = doc.children_mut(&fieldname) {
            for (pos, (row, row_name)) in rows.iter_mut().zip(names).enumerate() {
                row.set_name(row_name);
                row.set_parent(
                    ParentRef {
                        parent: name.to_string(),
                        parenttype: meta_name.to_string(),
                        parentfield: fieldname.clone(),
                    },
                    u32::try_from(pos + 1).unwrap_or(u32::MAX),
                );
            }
        }
    }
}

/// Verifies a value fits its column.
fn check_cell(entity_type: &str, column: &Column, value: &Value) -> BackendResult<()> {
    if value.is_null() {
        return Ok(());
    }
    let mismatch = |expected: &str| BackendError::TypeMismatch {
        entity_type: entity_type.to_string(),
        fieldname: column.name.clone(),
        message: format!("expected {}, got {}", expected, value),
    };

    match column.column_type {
        ColumnType::Varchar(max) => {
            let s = value.as_str().ok_or_else(|| mismatch("text"))?;
            let length = s.chars().count();
            if length > max as usize {
                return Err(BackendError::ValueTooLong {
                    entity_type: entity_type.to_string(),
                    fieldname: column.name.clone(),
                    length,
                    max,
                });
            }
        }
        ColumnType::LongText | ColumnType::Date | ColumnType::Datetime | ColumnType::Time => {
            if !value.is_string() {
                return Err(mismatch("text"));
            }
        }
        ColumnType::Decimal(_) => {
            if value.is_boolean() || decimal_from_value(value).is_none() {
                return Err(mismatch("a decimal"));
            }
        }
        ColumnType::Int => {
            if value.as_i64().is_none() {
                return Err(mismatch("an integer"));
            }
        }
        ColumnType::Bool => {
            let ok = value.is_boolean() || matches!(value.as_i64(), Some(0) | Some(1));
            if !ok {
                return Err(mismatch("0 or 1"));
            }
        }
        ColumnType::Json => {}
    }
    Ok(())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Backend for RelationalBackend {
    fn name(&self) -> &str {
        "relational"
    }

    fn list_records(&self, meta: &Meta, query: &Query) -> BackendResult<Vec<Record>> {
        let tables = self.read_tables()?;
        let rows = tables
            .table(meta.name())
            .map(|t| t.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        drop(tables);
        Ok(apply_query(rows, query))
    }

    fn count_records(&self, meta: &Meta, query: &Query) -> BackendResult<u64> {
        let tables = self.read_tables()?;
        Ok(tables
            .table(meta.name())
            .map(|t| count_matching(t.values(), query))
            .unwrap_or(0))
    }

    fn stats_records(&self, meta: &Meta, query: &Query) -> BackendResult<Record> {
        let Some(field) = &query.group_by else {
            return Ok(Record::new());
        };
        let tables = self.read_tables()?;
        Ok(tables
            .table(meta.name())
            .map(|t| group_counts(t.values(), query, field))
            .unwrap_or_default())
    }

    fn insert(&self, meta: &Meta, doc: &mut Document) -> BackendResult<()> {
        let rule = NamingRule::from_autoname(meta.name(), meta.autoname())?;
        let children = self.child_metas(meta)?;
        let mut tables = self.write_tables()?;

        let supplied = doc.name().filter(|n| !n.trim().is_empty()).map(str::to_string);
        let name = match supplied {
            Some(name) => name,
            None => {
                let counter = if rule.uses_counter() {
                    tables.next_counter(meta.name(), &rule)
                } else {
                    0
                };
                rule.assign(doc, counter)?
            }
        };

        if tables.contains(meta.name(), &name) {
            return Err(BackendError::DuplicateName {
                entity_type: meta.name().to_string(),
                name,
            });
        }

        let parent = doc.parent().cloned();
        let row = self.row_for(meta, doc, &name, parent.as_ref().map(|p| (p, doc.idx())))?;
        self.check_unique(&tables, meta, &row)?;
        let (child_entries, assigned) = self.child_entries(&tables, meta, &children, doc, &name)?;

        let mut entries = vec![JournalEntry::put(meta.name(), name.clone(), row)];
        entries.extend(child_entries);
        self.commit(&mut tables, entries)?;
        drop(tables);

        doc.set_name(name.clone());
        stamp_children(doc, meta.name(), &name, assigned);
        Ok(())
    }

    fn load(&self, meta: &Meta, name: &str) -> BackendResult<Option<Document>> {
        let children = self.child_metas(meta)?;
        let tables = self.read_tables()?;
        let Some(row) = tables.table(meta.name()).and_then(|t| t.get(name)) else {
            return Ok(None);
        };
        let mut doc = Document::from_record(meta.name(), row.clone());

        for (fieldname, child_meta) in &children {
            let mut rows: Vec<Record> = tables
                .table(child_meta.name())
                .map(|t| {
                    t.values()
                        .filter(|r| {
                            r.get("parent").and_then(Value::as_str) == Some(name)
                                && r.get("parenttype").and_then(Value::as_str) == Some(meta.name())
                                && r.get("parentfield").and_then(Value::as_str) == Some(fieldname.as_str())
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            rows.sort_by_key(|r| r.get("idx").and_then(Value::as_u64).unwrap_or(0));
            let rows = rows
                .into_iter()
                .map(|r| Document::from_record(child_meta.name(), r))
                .collect();
            doc.set_children(fieldname.clone(), rows);
        }
        Ok(Some(doc))
    }

    fn update(&self, meta: &Meta, doc: &Document) -> BackendResult<()> {
        let name = doc.name().map(str::to_string).unwrap_or_default();
        let children = self.child_metas(meta)?;
        let mut tables = self.write_tables()?;

        if !tables.contains(meta.name(), &name) {
            return Err(BackendError::MissingRecord {
                entity_type: meta.name().to_string(),
                name,
            });
        }

        let parent = doc.parent().cloned();
        let row = self.row_for(meta, doc, &name, parent.as_ref().map(|p| (p, doc.idx())))?;
        self.check_unique(&tables, meta, &row)?;
        let (child_entries, _) = self.child_entries(&tables, meta, &children, doc, &name)?;

        let mut entries = vec![JournalEntry::put(meta.name(), name, row)];
        entries.extend(child_entries);
        self.commit(&mut tables, entries)
    }

    fn remove(&self, meta: &Meta, name: &str) -> BackendResult<()> {
        let children = self.child_metas(meta)?;
        let mut tables = self.write_tables()?;
        if !tables.contains(meta.name(), name) {
            return Ok(());
        }

        let mut entries = vec![JournalEntry::tombstone(meta.name(), name)];
        for (_, child_meta) in &children {
            for child in tables.child_names(child_meta.name(), meta.name(), name) {
                entries.push(JournalEntry::tombstone(child_meta.name(), child));
            }
        }
        self.commit(&mut tables, entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FilterExpr;
    use crate::meta::SpecStore;
    use crate::observability::MetricsRegistry;
    use crate::schema::EntityTypeSpec;
    use serde_json::json;
    use tempfile::TempDir;

    fn builder_with(specs: Vec<EntityTypeSpec>) -> Arc<MetaBuilder> {
        let store = Arc::new(SpecStore::in_memory());
        for spec in specs {
            store.put_entity_type(spec).unwrap();
        }
        Arc::new(MetaBuilder::new(store, Arc::new(MetricsRegistry::new())))
    }

    fn invoice_specs() -> Vec<EntityTypeSpec> {
        vec![
            EntityTypeSpec::child_table("Invoice Item")
                .with_field(FieldSpec::new("item", FieldKind::Data))
                .with_field(FieldSpec::new("qty", FieldKind::Int)),
            EntityTypeSpec::new("Invoice")
                .with_autoname("format:INV-{####}")
                .with_field(FieldSpec::new("customer", FieldKind::Data).with_length(10))
                .with_field(FieldSpec::new("amount", FieldKind::Currency))
                .with_field(FieldSpec::new("ref", FieldKind::Data).unique())
                .with_field(FieldSpec::table("items", "Invoice Item"))
                .with_field(FieldSpec::computed("total", FieldKind::Currency, "amount * 1.1")),
        ]
    }

    fn invoice(amount: i64, r: &str) -> Document {
        let mut doc = Document::new("Invoice");
        doc.set("customer", "ACME").unwrap();
        doc.set("amount", amount).unwrap();
        doc.set("ref", r).unwrap();
        doc
    }

    #[test]
    fn test_columns_skip_virtual_and_layout() {
        let builder = builder_with(invoice_specs());
        let meta = builder.get_meta("Invoice").unwrap();
        let columns = columns_for(&meta, DEFAULT_TEXT_LENGTH);
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["name", "customer", "amount", "ref"]);
        assert_eq!(columns[1].column_type, ColumnType::Varchar(10));
        assert_eq!(columns[2].column_type, ColumnType::Decimal(2));
        assert!(columns[3].unique);

        let child = builder.get_meta("Invoice Item").unwrap();
        let names: Vec<_> = columns_for(&child, 140).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["name", "parent", "parenttype", "parentfield", "idx", "item", "qty"]);
    }

    #[test]
    fn test_insert_names_and_loads_children() {
        let builder = builder_with(invoice_specs());
        let backend = RelationalBackend::in_memory(Arc::clone(&builder), DEFAULT_TEXT_LENGTH);
        let meta = builder.get_meta("Invoice").unwrap();

        let mut doc = invoice(100, "R1");
        let mut row = Document::new("Invoice Item");
        row.set("item", "Widget").unwrap();
        row.set("qty", 2).unwrap();
        doc.append_child("items", row).unwrap();

        backend.insert(&meta, &mut doc).unwrap();
        assert_eq!(doc.name(), Some("INV-0001"));
        assert_eq!(doc.children("items")[0].parent().unwrap().parent, "INV-0001");

        let loaded = backend.load(&meta, "INV-0001").unwrap().unwrap();
        assert_eq!(loaded.value("amount"), Some(&json!(100)));
        assert_eq!(loaded.children("items").len(), 1);
        assert_eq!(loaded.children("items")[0].value("qty"), Some(&json!(2)));
        assert!(loaded.value("total").is_none());

        let mut second = invoice(50, "R2");
        backend.insert(&meta, &mut second).unwrap();
        assert_eq!(second.name(), Some("INV-0002"));
    }

    #[test]
    fn test_unique_and_length_are_enforced() {
        let builder = builder_with(invoice_specs());
        let backend = RelationalBackend::in_memory(Arc::clone(&builder), DEFAULT_TEXT_LENGTH);
        let meta = builder.get_meta("Invoice").unwrap();

        backend.insert(&meta, &mut invoice(1, "R1")).unwrap();
        let err = backend.insert(&meta, &mut invoice(2, "R1")).unwrap_err();
        assert!(matches!(err, BackendError::UniqueViolation { ref fieldname, .. } if fieldname == "ref"));

        let mut long = invoice(3, "R3");
        long.set("customer", "A very long customer").unwrap();
        assert!(matches!(
            backend.insert(&meta, &mut long),
            Err(BackendError::ValueTooLong { max: 10, .. })
        ));
        assert_eq!(backend.count_records(&meta, &Query::new()).unwrap(), 1);
    }

    fn shipment(serials: &[&str]) -> Document {
        let mut doc = Document::new("Shipment");
        for serial in serials {
            let mut row = Document::new("Serial Row");
            row.set("serial", *serial).unwrap();
            doc.append_child("serials", row).unwrap();
        }
        doc
    }

    #[test]
    fn test_unique_child_field_spans_parents() {
        let builder = builder_with(vec![
            EntityTypeSpec::child_table("Serial Row").with_field(FieldSpec::new("serial", FieldKind::Data).unique()),
            EntityTypeSpec::new("Shipment").with_field(FieldSpec::table("serials", "Serial Row")),
        ]);
        let backend = RelationalBackend::in_memory(Arc::clone(&builder), DEFAULT_TEXT_LENGTH);
        let meta = builder.get_meta("Shipment").unwrap();
        let rows = builder.get_meta("Serial Row").unwrap();

        let mut first = shipment(&["S-1", "S-2"]);
        backend.insert(&meta, &mut first).unwrap();

        let err = backend.insert(&meta, &mut shipment(&["S-3", "S-1"])).unwrap_err();
        assert!(matches!(err, BackendError::UniqueViolation { ref fieldname, .. } if fieldname == "serial"));
        assert!(matches!(
            backend.insert(&meta, &mut shipment(&["S-4", "S-4"])),
            Err(BackendError::UniqueViolation { .. })
        ));
        assert_eq!(backend.count_records(&rows, &Query::new()).unwrap(), 2);

        // Rewriting the owner's rows keeps its own values
        let name = first.name().unwrap().to_string();
        let loaded = backend.load(&meta, &name).unwrap().unwrap();
        backend.update(&meta, &loaded).unwrap();
        let mut swapped = shipment(&["S-2", "S-1"]);
        swapped.set_name(name);
        backend.update(&meta, &swapped).unwrap();
        assert_eq!(backend.count_records(&rows, &Query::new()).unwrap(), 2);
    }

    #[test]
    fn test_duplicate_supplied_name() {
        let builder = builder_with(invoice_specs());
        let backend = RelationalBackend::in_memory(Arc::clone(&builder), DEFAULT_TEXT_LENGTH);
        let meta = builder.get_meta("Invoice").unwrap();

        let mut a = invoice(1, "A");
        a.set_name("X");
        backend.insert(&meta, &mut a).unwrap();
        let mut b = invoice(2, "B");
        b.set_name("X");
        assert!(matches!(
            backend.insert(&meta, &mut b),
            Err(BackendError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_update_replaces_children_and_remove_is_idempotent() {
        let builder = builder_with(invoice_specs());
        let backend = RelationalBackend::in_memory(Arc::clone(&builder), DEFAULT_TEXT_LENGTH);
        let meta = builder.get_meta("Invoice").unwrap();
        let child = builder.get_meta("Invoice Item").unwrap();

        let mut doc = invoice(100, "R1");
        doc.append_child("items", Document::new("Invoice Item")).unwrap();
        doc.append_child("items", Document::new("Invoice Item")).unwrap();
        backend.insert(&meta, &mut doc).unwrap();
        assert_eq!(backend.count_records(&child, &Query::new()).unwrap(), 2);

        let mut loaded = backend.load(&meta, doc.name().unwrap()).unwrap().unwrap();
        loaded.set("amount", 120).unwrap();
        loaded.children_mut("items").unwrap().truncate(1);
        backend.update(&meta, &loaded).unwrap();
        assert_eq!(backend.count_records(&child, &Query::new()).unwrap(), 1);

        let name = doc.name().unwrap().to_string();
        backend.remove(&meta, &name).unwrap();
        backend.remove(&meta, &name).unwrap();
        assert!(backend.load(&meta, &name).unwrap().is_none());
        assert_eq!(backend.count_records(&child, &Query::new()).unwrap(), 0);
    }

    #[test]
    fn test_update_missing_record() {
        let builder = builder_with(invoice_specs());
        let backend = RelationalBackend::in_memory(Arc::clone(&builder), DEFAULT_TEXT_LENGTH);
        let meta = builder.get_meta("Invoice").unwrap();
        let mut doc = invoice(1, "R");
        doc.set_name("INV-9999");
        assert!(matches!(
            backend.update(&meta, &doc),
            Err(BackendError::MissingRecord { .. })
        ));
    }

    #[test]
    fn test_count_ignores_pagination_and_stats_groups() {
        let builder = builder_with(invoice_specs());
        let backend = RelationalBackend::in_memory(Arc::clone(&builder), DEFAULT_TEXT_LENGTH);
        let meta = builder.get_meta("Invoice").unwrap();
        for (i, amount) in [10, 20, 30].iter().enumerate() {
            backend.insert(&meta, &mut invoice(*amount, &format!("R{}", i))).unwrap();
        }

        let query = Query::new().filter(FilterExpr::gt("amount", 15)).limit(1);
        assert_eq!(backend.list_records(&meta, &query).unwrap().len(), 1);
        assert_eq!(backend.count_records(&meta, &query).unwrap(), 2);

        assert!(backend.stats_records(&meta, &Query::new()).unwrap().is_empty());
        let stats = backend
            .stats_records(&meta, &Query::new().group_by("customer"))
            .unwrap();
        assert_eq!(stats["ACME"], json!(3));
    }

    #[test]
    fn test_journal_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let builder = builder_with(invoice_specs());
        let meta = builder.get_meta("Invoice").unwrap();
        {
            let backend = RelationalBackend::open(Arc::clone(&builder), dir.path(), 140).unwrap();
            backend.insert(&meta, &mut invoice(1, "A")).unwrap();
            backend.insert(&meta, &mut invoice(2, "B")).unwrap();
            backend.remove(&meta, "INV-0001").unwrap();
        }

        let backend = RelationalBackend::open(Arc::clone(&builder), dir.path(), 140).unwrap();
        assert_eq!(backend.journal_records(), 3);
        assert!(backend.load(&meta, "INV-0001").unwrap().is_none());
        assert!(backend.load(&meta, "INV-0002").unwrap().is_some());

        let mut next = invoice(3, "C");
        backend.insert(&meta, &mut next).unwrap();
        assert_eq!(next.name(), Some("INV-0003"));
    }
}
