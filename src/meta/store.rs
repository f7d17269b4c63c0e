//! Persistent store for entity-type metadata
//!
//! Layout under `<data_dir>/metadata/`:
//! - `entity_types/<slug>.json`: one base spec per file
//! - `custom_fields/<seq>.json`: one overlay per file
//! - `property_overrides/<seq>.json`: one override per file
//!
//! Overlays and overrides keep record order through their sequence
//! number. Every write bumps the generation of the affected entity type.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::bootstrap::{bootstrap_spec, is_schema_type};
use super::builder::merge;
use super::errors::{MetaError, MetaResult};
use crate::schema::{CustomFieldOverlay, EntityTypeRegistry, EntityTypeSpec, PropertyOverride};

const ENTITY_TYPES_DIR: &str = "entity_types";
const CUSTOM_FIELDS_DIR: &str = "custom_fields";
const OVERRIDES_DIR: &str = "property_overrides";

/// Everything the builder needs for one entity type, read atomically.
#[derive(Debug, Clone)]
pub struct SpecSnapshot {
    pub base: EntityTypeSpec,
    pub overlays: Vec<CustomFieldOverlay>,
    pub overrides: Vec<PropertyOverride>,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    entity_types: BTreeMap<String, EntityTypeSpec>,
    overlays: Vec<(u64, CustomFieldOverlay)>,
    overrides: Vec<(u64, PropertyOverride)>,
    generations: HashMap<String, u64>,
    next_seq: u64,
}

impl StoreState {
    fn bump(&mut self, name: &str) {
        *self.generations.entry(name.to_string()).or_insert(0) += 1;
    }

    fn take_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Base specs, overlays and overrides, optionally backed by JSON files.
#[derive(Debug)]
pub struct SpecStore {
    /// `<data_dir>/metadata`, `None` for an in-memory store
    root: Option<PathBuf>,
    state: RwLock<StoreState>,
}

impl SpecStore {
    /// Creates a store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            root: None,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Opens the store under `<data_dir>/metadata`, loading every file.
    ///
    /// Malformed files are fatal.
    pub fn open(data_dir: &Path) -> MetaResult<Self> {
        let root = data_dir.join("metadata");
        let mut state = StoreState::default();

        for (_, spec) in load_dir::<EntityTypeSpec>(&root.join(ENTITY_TYPES_DIR))? {
            state.entity_types.insert(spec.name.clone(), spec);
        }
        for (seq, overlay) in load_dir::<CustomFieldOverlay>(&root.join(CUSTOM_FIELDS_DIR))? {
            state.next_seq = state.next_seq.max(seq);
            state.overlays.push((seq, overlay));
        }
        for (seq, ov) in load_dir::<PropertyOverride>(&root.join(OVERRIDES_DIR))? {
            state.next_seq = state.next_seq.max(seq);
            state.overrides.push((seq, ov));
        }
        state.overlays.sort_by_key(|(seq, _)| *seq);
        state.overrides.sort_by_key(|(seq, _)| *seq);

        Ok(Self {
            root: Some(root),
            state: RwLock::new(state),
        })
    }

    /// Metadata directory, if persistent
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn read(&self) -> MetaResult<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| MetaError::Internal("lock poisoned".into()))
    }

    fn write(&self) -> MetaResult<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| MetaError::Internal("lock poisoned".into()))
    }

    /// Base spec as stored, without overlays
    pub fn base_spec(&self, name: &str) -> MetaResult<Option<EntityTypeSpec>> {
        Ok(self.read()?.entity_types.get(name).cloned())
    }

    /// Whether a base spec or bootstrap spec exists
    pub fn contains(&self, name: &str) -> bool {
        is_schema_type(name)
            || self
                .read()
                .map(|s| s.entity_types.contains_key(name))
                .unwrap_or(false)
    }

    /// Names of every stored entity type, sorted
    pub fn entity_type_names(&self) -> MetaResult<Vec<String>> {
        Ok(self.read()?.entity_types.keys().cloned().collect())
    }

    pub fn overlays_for(&self, name: &str) -> MetaResult<Vec<CustomFieldOverlay>> {
        Ok(self
            .read()?
            .overlays
            .iter()
            .filter(|(_, o)| o.entity_type == name)
            .map(|(_, o)| o.clone())
            .collect())
    }

    pub fn overrides_for(&self, name: &str) -> MetaResult<Vec<PropertyOverride>> {
        Ok(self
            .read()?
            .overrides
            .iter()
            .filter(|(_, o)| o.entity_type == name)
            .map(|(_, o)| o.clone())
            .collect())
    }

    /// Current generation of an entity type
    pub fn generation(&self, name: &str) -> MetaResult<u64> {
        Ok(self.read()?.generations.get(name).copied().unwrap_or(0))
    }

    /// Reads base, overlays, overrides and generation under one lock.
    pub fn snapshot(&self, name: &str) -> MetaResult<Option<SpecSnapshot>> {
        let state = self.read()?;
        let Some(base) = state.entity_types.get(name) else {
            return Ok(None);
        };
        Ok(Some(SpecSnapshot {
            base: base.clone(),
            overlays: state
                .overlays
                .iter()
                .filter(|(_, o)| o.entity_type == name)
                .map(|(_, o)| o.clone())
                .collect(),
            overrides: state
                .overrides
                .iter()
                .filter(|(_, o)| o.entity_type == name)
                .map(|(_, o)| o.clone())
                .collect(),
            generation: state.generations.get(name).copied().unwrap_or(0),
        }))
    }

    /// Entity types whose base or overlay fields embed `child` as a table
    pub fn parents_of(&self, child: &str) -> MetaResult<Vec<String>> {
        let state = self.read()?;
        let embeds = |f: &crate::schema::FieldSpec| {
            f.kind.is_table() && f.options_trimmed() == Some(child)
        };

        let mut parents: Vec<String> = state
            .entity_types
            .values()
            .filter(|s| s.fields.iter().any(embeds))
            .map(|s| s.name.clone())
            .collect();
        for (_, overlay) in &state.overlays {
            if embeds(&overlay.field) && !parents.contains(&overlay.entity_type) {
                parents.push(overlay.entity_type.clone());
            }
        }
        Ok(parents)
    }

    /// Inserts or replaces a base spec.
    pub fn put_entity_type(&self, spec: EntityTypeSpec) -> MetaResult<()> {
        if is_schema_type(&spec.name) {
            return Err(MetaError::Protected(spec.name));
        }
        let mut state = self.write()?;
        if let Some(root) = &self.root {
            write_json(&root.join(ENTITY_TYPES_DIR).join(spec_filename(&spec.name)), &spec)?;
        }
        state.bump(&spec.name);
        state.entity_types.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Removes a base spec along with its overlays and overrides.
    ///
    /// Returns false when nothing was stored under `name`.
    pub fn remove_entity_type(&self, name: &str) -> MetaResult<bool> {
        if is_schema_type(name) {
            return Err(MetaError::Protected(name.to_string()));
        }
        let mut state = self.write()?;
        if state.entity_types.remove(name).is_none() {
            return Ok(false);
        }

        let overlay_seqs: Vec<u64> = state
            .overlays
            .iter()
            .filter(|(_, o)| o.entity_type == name)
            .map(|(seq, _)| *seq)
            .collect();
        let override_seqs: Vec<u64> = state
            .overrides
            .iter()
            .filter(|(_, o)| o.entity_type == name)
            .map(|(seq, _)| *seq)
            .collect();

        if let Some(root) = &self.root {
            remove_file(&root.join(ENTITY_TYPES_DIR).join(spec_filename(name)))?;
            for seq in &overlay_seqs {
                remove_file(&root.join(CUSTOM_FIELDS_DIR).join(seq_filename(*seq)))?;
            }
            for seq in &override_seqs {
                remove_file(&root.join(OVERRIDES_DIR).join(seq_filename(*seq)))?;
            }
        }

        state.overlays.retain(|(_, o)| o.entity_type != name);
        state.overrides.retain(|(_, o)| o.entity_type != name);
        state.bump(name);
        Ok(true)
    }

    /// Inserts an overlay, replacing one with the same key in place.
    pub fn put_overlay(&self, overlay: CustomFieldOverlay) -> MetaResult<()> {
        let mut state = self.write()?;
        let existing = state
            .overlays
            .iter()
            .position(|(_, o)| o.key() == overlay.key());
        let seq = match existing {
            Some(pos) => state.overlays[pos].0,
            None => state.take_seq(),
        };

        if let Some(root) = &self.root {
            write_json(&root.join(CUSTOM_FIELDS_DIR).join(seq_filename(seq)), &overlay)?;
        }

        state.bump(&overlay.entity_type);
        match existing {
            Some(pos) => state.overlays[pos].1 = overlay,
            None => state.overlays.push((seq, overlay)),
        }
        Ok(())
    }

    /// Removes an overlay; false when it did not exist.
    pub fn remove_overlay(&self, entity_type: &str, fieldname: &str) -> MetaResult<bool> {
        let mut state = self.write()?;
        let Some(pos) = state
            .overlays
            .iter()
            .position(|(_, o)| o.key() == (entity_type, fieldname))
        else {
            return Ok(false);
        };

        let seq = state.overlays[pos].0;
        if let Some(root) = &self.root {
            remove_file(&root.join(CUSTOM_FIELDS_DIR).join(seq_filename(seq)))?;
        }
        state.overlays.remove(pos);
        state.bump(entity_type);
        Ok(true)
    }

    /// Appends an override record. Earlier records for the same property
    /// are kept; the builder applies them in order.
    pub fn push_override(&self, ov: PropertyOverride) -> MetaResult<()> {
        let mut state = self.write()?;
        let seq = state.take_seq();
        if let Some(root) = &self.root {
            write_json(&root.join(OVERRIDES_DIR).join(seq_filename(seq)), &ov)?;
        }
        state.bump(&ov.entity_type);
        state.overrides.push((seq, ov));
        Ok(())
    }

    /// Removes every override record for one property; returns how many.
    pub fn remove_overrides(
        &self,
        entity_type: &str,
        fieldname: &str,
        property: &str,
    ) -> MetaResult<usize> {
        let mut state = self.write()?;
        let matches = |o: &PropertyOverride| {
            o.entity_type == entity_type && o.fieldname == fieldname && o.property == property
        };
        let seqs: Vec<u64> = state
            .overrides
            .iter()
            .filter(|(_, o)| matches(o))
            .map(|(seq, _)| *seq)
            .collect();
        if seqs.is_empty() {
            return Ok(0);
        }

        if let Some(root) = &self.root {
            for seq in &seqs {
                remove_file(&root.join(OVERRIDES_DIR).join(seq_filename(*seq)))?;
            }
        }
        state.overrides.retain(|(_, o)| !matches(o));
        state.bump(entity_type);
        Ok(seqs.len())
    }
}

impl EntityTypeRegistry for SpecStore {
    /// Bootstrap specs first, then stored specs merged with their overlays
    /// and property overrides, as a Meta would see them.
    fn entity_type(&self, name: &str) -> Option<EntityTypeSpec> {
        if let Some(spec) = bootstrap_spec(name) {
            return Some(spec);
        }
        let snapshot = self.snapshot(name).ok()??;
        Some(merge(&snapshot.base, &snapshot.overlays, &snapshot.overrides).spec)
    }

    fn entity_type_exists(&self, name: &str) -> bool {
        self.contains(name)
    }
}

/// File name for a spec; names may contain spaces
fn spec_filename(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{}.json", slug)
}

fn seq_filename(seq: u64) -> String {
    format!("{:010}.json", seq)
}

fn load_dir<T: DeserializeOwned>(dir: &Path) -> MetaResult<Vec<(u64, T)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir)
        .map_err(|e| MetaError::store(dir.display().to_string(), format!("failed to read directory: {}", e)))?;

    let mut loaded = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| MetaError::store(dir.display().to_string(), format!("failed to read entry: {}", e)))?
            .path();

        if path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| MetaError::store(path.display().to_string(), format!("failed to read file: {}", e)))?;
        let record: T = serde_json::from_str(&content)
            .map_err(|e| MetaError::store(path.display().to_string(), format!("invalid JSON: {}", e)))?;

        // Sequence comes from the file stem; spec files have none
        let seq = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        loaded.push((seq, record));
    }
    Ok(loaded)
}

fn write_json<T: Serialize>(path: &Path, record: &T) -> MetaResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            MetaError::store(parent.display().to_string(), format!("failed to create directory: {}", e))
        })?;
    }
    let content = serde_json::to_string_pretty(record)
        .map_err(|e| MetaError::store(path.display().to_string(), format!("failed to serialize: {}", e)))?;
    fs::write(path, content)
        .map_err(|e| MetaError::store(path.display().to_string(), format!("failed to write file: {}", e)))
}

fn remove_file(path: &Path) -> MetaResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MetaError::store(path.display().to_string(), format!("failed to remove file: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, FieldSpec};
    use serde_json::json;
    use tempfile::TempDir;

    fn note() -> EntityTypeSpec {
        EntityTypeSpec::new("Sales Note").with_field(FieldSpec::new("title", FieldKind::Data))
    }

    #[test]
    fn test_put_bumps_generation() {
        let store = SpecStore::in_memory();
        assert_eq!(store.generation("Sales Note").unwrap(), 0);
        store.put_entity_type(note()).unwrap();
        assert_eq!(store.generation("Sales Note").unwrap(), 1);
        store
            .put_overlay(CustomFieldOverlay::new("Sales Note", FieldSpec::new("tag", FieldKind::Data)))
            .unwrap();
        assert_eq!(store.generation("Sales Note").unwrap(), 2);
    }

    #[test]
    fn test_registry_view_includes_overlays() {
        let store = SpecStore::in_memory();
        store.put_entity_type(note()).unwrap();
        store
            .put_overlay(CustomFieldOverlay::new("Sales Note", FieldSpec::new("tag", FieldKind::Data)))
            .unwrap();
        let view = store.entity_type("Sales Note").unwrap();
        assert_eq!(view.fields.len(), 2);
        assert!(store.entity_type_exists("Entity Type"));
    }

    #[test]
    fn test_registry_view_applies_overrides() {
        let store = SpecStore::in_memory();
        store.put_entity_type(note()).unwrap();
        store
            .push_override(PropertyOverride::new("Sales Note", "title", "kind", json!("Small Text")))
            .unwrap();
        let view = store.entity_type("Sales Note").unwrap();
        assert_eq!(view.field("title").map(|f| f.kind), Some(FieldKind::SmallText));
    }

    #[test]
    fn test_schema_types_are_protected() {
        let store = SpecStore::in_memory();
        let err = store.put_entity_type(EntityTypeSpec::new("Entity Type")).unwrap_err();
        assert_eq!(err.code(), "META_PROTECTED");
    }

    #[test]
    fn test_persists_and_reloads_in_record_order() {
        let dir = TempDir::new().unwrap();
        {
            let store = SpecStore::open(dir.path()).unwrap();
            store.put_entity_type(note()).unwrap();
            store
                .push_override(PropertyOverride::new("Sales Note", "title", "label", json!("First")))
                .unwrap();
            store
                .push_override(PropertyOverride::new("Sales Note", "title", "label", json!("Second")))
                .unwrap();
        }

        let store = SpecStore::open(dir.path()).unwrap();
        let snapshot = store.snapshot("Sales Note").unwrap().unwrap();
        assert_eq!(snapshot.base, note());
        let labels: Vec<_> = snapshot.overrides.iter().map(|o| o.value.clone()).collect();
        assert_eq!(labels, vec![json!("First"), json!("Second")]);
        assert!(dir.path().join("metadata/entity_types/sales_note.json").exists());
    }

    #[test]
    fn test_remove_entity_type_cascades() {
        let store = SpecStore::in_memory();
        store.put_entity_type(note()).unwrap();
        store
            .put_overlay(CustomFieldOverlay::new("Sales Note", FieldSpec::new("tag", FieldKind::Data)))
            .unwrap();
        store
            .push_override(PropertyOverride::new("Sales Note", "title", "hidden", json!(1)))
            .unwrap();

        assert!(store.remove_entity_type("Sales Note").unwrap());
        assert!(store.overlays_for("Sales Note").unwrap().is_empty());
        assert!(store.overrides_for("Sales Note").unwrap().is_empty());
        assert!(!store.remove_entity_type("Sales Note").unwrap());
    }

    #[test]
    fn test_remove_overrides_counts() {
        let store = SpecStore::in_memory();
        store.put_entity_type(note()).unwrap();
        for label in ["a", "b"] {
            store
                .push_override(PropertyOverride::new("Sales Note", "title", "label", json!(label)))
                .unwrap();
        }
        assert_eq!(store.remove_overrides("Sales Note", "title", "label").unwrap(), 2);
        assert_eq!(store.remove_overrides("Sales Note", "title", "label").unwrap(), 0);
    }

    #[test]
    fn test_parents_of() {
        let store = SpecStore::in_memory();
        store.put_entity_type(EntityTypeSpec::child_table("Line")).unwrap();
        store
            .put_entity_type(EntityTypeSpec::new("Order").with_field(FieldSpec::table("lines", "Line")))
            .unwrap();
        assert_eq!(store.parents_of("Line").unwrap(), vec!["Order".to_string()]);
    }
}
