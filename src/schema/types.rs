//! Entity-type metadata records
//!
//! - `FieldSpec`: one field's metadata entry
//! - `EntityTypeSpec`: a named record schema with its ordered field list
//! - `CustomFieldOverlay`: a field merged into a base spec without editing it
//! - `PropertyOverride`: a single-attribute patch to an existing field

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::kinds::FieldKind;

/// Link target naming the entity-type registry itself.
pub const ENTITY_TYPE_REGISTRY: &str = "Entity Type";

/// Metadata for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field identifier, unique within the merged meta
    pub fieldname: String,
    /// Field kind
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Kind-dependent payload (link target, select list, rating max, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub read_only: bool,
    /// Value computed on read, never stored
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub allow_on_submit: bool,
    #[serde(default)]
    pub in_list_view: bool,
    #[serde(default)]
    pub in_standard_filter: bool,
    #[serde(default)]
    pub no_copy: bool,
    /// Maximum character length for text columns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    /// Decimal places for numeric kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    /// Render width in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Default-value spec: a literal, `Today` or `Now`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Order index
    #[serde(default)]
    pub idx: u32,
    /// Side-effect-free expression for virtual fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default)]
    pub permlevel: u8,
}

impl FieldSpec {
    /// Create a field with every flag cleared.
    pub fn new(fieldname: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            fieldname: fieldname.into(),
            kind,
            label: None,
            options: None,
            required: false,
            unique: false,
            hidden: false,
            read_only: false,
            is_virtual: false,
            indexed: false,
            allow_on_submit: false,
            in_list_view: false,
            in_standard_filter: false,
            no_copy: false,
            length: None,
            precision: None,
            width: None,
            default: None,
            idx: 0,
            expression: None,
            permlevel: 0,
        }
    }

    /// Create a link field pointing at `target`.
    pub fn link(fieldname: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(fieldname, FieldKind::Link).with_options(target)
    }

    /// Create a select field from a list of choices.
    pub fn select(fieldname: impl Into<String>, choices: &[&str]) -> Self {
        Self::new(fieldname, FieldKind::Select).with_options(choices.join("\n"))
    }

    /// Create a child-table field.
    pub fn table(fieldname: impl Into<String>, child: impl Into<String>) -> Self {
        Self::new(fieldname, FieldKind::Table).with_options(child)
    }

    /// Create a virtual field computed from an expression.
    pub fn computed(fieldname: impl Into<String>, kind: FieldKind, expression: impl Into<String>) -> Self {
        let mut field = Self::new(fieldname, kind);
        field.is_virtual = true;
        field.expression = Some(expression.into());
        field
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_idx(mut self, idx: u32) -> Self {
        self.idx = idx;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn virtual_field(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn in_list_view(mut self) -> Self {
        self.in_list_view = true;
        self
    }

    /// Display label, falling back to the fieldname.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.fieldname)
    }

    /// Non-empty, whitespace-trimmed option lines.
    pub fn option_lines(&self) -> Vec<&str> {
        self.options
            .as_deref()
            .unwrap_or("")
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Trimmed `options`, `None` when unset or blank.
    pub fn options_trimmed(&self) -> Option<&str> {
        self.options
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
    }

    /// Trimmed `default`, `None` when unset or blank.
    pub fn default_trimmed(&self) -> Option<&str> {
        self.default
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }

    /// Whether the field occupies a storage column.
    pub fn is_stored(&self) -> bool {
        self.kind.has_column() && !self.is_virtual
    }

    /// Patches one attribute by name.
    ///
    /// Accepts both the canonical names and the short aliases metadata
    /// authors tend to use (`reqd`, `fieldtype`, `search_index`).
    pub fn set_property(&mut self, property: &str, value: &Value) -> Result<(), String> {
        match property {
            "label" => self.label = opt_string(value),
            "options" => self.options = opt_string(value),
            "default" => self.default = opt_string(value),
            "expression" => self.expression = opt_string(value),
            "kind" | "fieldtype" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| format!("'{}' expects a kind name", property))?;
                self.kind = raw.parse()?;
            }
            "required" | "reqd" => self.required = as_flag(property, value)?,
            "unique" => self.unique = as_flag(property, value)?,
            "hidden" => self.hidden = as_flag(property, value)?,
            "read_only" => self.read_only = as_flag(property, value)?,
            "is_virtual" => self.is_virtual = as_flag(property, value)?,
            "indexed" | "search_index" => self.indexed = as_flag(property, value)?,
            "allow_on_submit" => self.allow_on_submit = as_flag(property, value)?,
            "in_list_view" => self.in_list_view = as_flag(property, value)?,
            "in_standard_filter" => self.in_standard_filter = as_flag(property, value)?,
            "no_copy" => self.no_copy = as_flag(property, value)?,
            "length" => self.length = opt_u32(property, value)?,
            "precision" => self.precision = opt_u32(property, value)?,
            "width" => self.width = opt_u32(property, value)?,
            "idx" => self.idx = opt_u32(property, value)?.unwrap_or(0),
            "permlevel" => {
                let level = opt_u32(property, value)?.unwrap_or(0);
                self.permlevel = u8::try_from(level)
                    .map_err(|_| format!("permlevel {} out of range", level))?;
            }
            "fieldname" => return Err("fieldname cannot be overridden".to_string()),
            other => return Err(format!("unknown property '{}'", other)),
        }
        Ok(())
    }
}

fn opt_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn as_flag(property: &str, value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_i64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_i64() == Some(1) => Ok(true),
        Value::String(s) if s.trim() == "0" => Ok(false),
        Value::String(s) if s.trim() == "1" => Ok(true),
        Value::Null => Ok(false),
        other => Err(format!("'{}' expects 0 or 1, got {}", property, other)),
    }
}

fn opt_u32(property: &str, value: &Value) -> Result<Option<u32>, String> {
    let parsed = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_u64(),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| u32::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| format!("'{}' expects a non-negative integer, got {}", property, value))
}

/// Role-based access rule attached to an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub role: String,
    #[serde(default)]
    pub permlevel: u8,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub delete: bool,
}

/// A named record schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Persistence is implemented by a registered custom backend
    #[serde(default)]
    pub is_virtual_backend: bool,
    /// Rows of this type only exist as children of a parent record
    #[serde(default)]
    pub is_table: bool,
    #[serde(default)]
    pub permissions: Vec<PermissionRule>,
    /// Naming rule, see `backend::NamingRule`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoname: Option<String>,
}

impl EntityTypeSpec {
    /// Create an empty entity type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: None,
            description: None,
            fields: Vec::new(),
            is_virtual_backend: false,
            is_table: false,
            permissions: Vec::new(),
            autoname: None,
        }
    }

    /// Create a child-table entity type.
    pub fn child_table(name: impl Into<String>) -> Self {
        Self {
            is_table: true,
            ..Self::new(name)
        }
    }

    /// Appends a field, assigning the next order index when unset.
    pub fn with_field(mut self, mut field: FieldSpec) -> Self {
        if field.idx == 0 {
            field.idx = self.next_idx();
        }
        self.fields.push(field);
        self
    }

    pub fn with_autoname(mut self, rule: impl Into<String>) -> Self {
        self.autoname = Some(rule.into());
        self
    }

    pub fn virtual_backend(mut self) -> Self {
        self.is_virtual_backend = true;
        self
    }

    /// Looks up a field by name.
    pub fn field(&self, fieldname: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.fieldname == fieldname)
    }

    /// One past the highest order index in use.
    pub fn next_idx(&self) -> u32 {
        self.fields.iter().map(|f| f.idx).max().unwrap_or(0) + 1
    }

    /// Assigns positional order indexes to fields that have none and
    /// applies the implicit `0` default to check fields.
    pub fn normalize(&mut self) {
        let mut next = self.next_idx();
        for field in &mut self.fields {
            if field.idx == 0 {
                field.idx = next;
                next += 1;
            }
        }
        normalize_check_defaults(&mut self.fields);
    }
}

/// Check fields without a default get `0`.
pub fn normalize_check_defaults(fields: &mut [FieldSpec]) {
    for field in fields {
        if field.kind == FieldKind::Check && field.default_trimmed().is_none() {
            field.default = Some("0".to_string());
        }
    }
}

/// A field merged into an entity type without editing its base spec.
///
/// Serialized flat: `entity_type` sits beside the field's own keys. Reading
/// goes through a plain map so numeric attributes keep their exact text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct CustomFieldOverlay {
    /// Entity type the field is merged into
    pub entity_type: String,
    #[serde(flatten)]
    pub field: FieldSpec,
}

impl CustomFieldOverlay {
    pub fn new(entity_type: impl Into<String>, field: FieldSpec) -> Self {
        Self {
            entity_type: entity_type.into(),
            field,
        }
    }

    /// Overlay identity: (entity type, fieldname)
    pub fn key(&self) -> (&str, &str) {
        (&self.entity_type, &self.field.fieldname)
    }
}

impl TryFrom<Map<String, Value>> for CustomFieldOverlay {
    type Error = String;

    fn try_from(mut map: Map<String, Value>) -> Result<Self, Self::Error> {
        let entity_type = match map.remove("entity_type") {
            Some(Value::String(name)) => name,
            _ => return Err("custom field overlay needs a string entity_type".to_string()),
        };
        let field = serde_json::from_value(Value::Object(map)).map_err(|e| e.to_string())?;
        Ok(Self { entity_type, field })
    }
}

/// A patch to one attribute of an existing field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyOverride {
    pub entity_type: String,
    pub fieldname: String,
    pub property: String,
    pub value: Value,
}

impl PropertyOverride {
    pub fn new(
        entity_type: impl Into<String>,
        fieldname: impl Into<String>,
        property: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            fieldname: fieldname.into(),
            property: property.into(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_field_assigns_idx() {
        let spec = EntityTypeSpec::new("Note")
            .with_field(FieldSpec::new("title", FieldKind::Data))
            .with_field(FieldSpec::new("body", FieldKind::Text));
        assert_eq!(spec.fields[0].idx, 1);
        assert_eq!(spec.fields[1].idx, 2);
    }

    #[test]
    fn test_normalize_defaults_check_to_zero() {
        let mut spec = EntityTypeSpec::new("Note");
        spec.fields.push(FieldSpec::new("pinned", FieldKind::Check));
        spec.normalize();
        assert_eq!(spec.fields[0].default.as_deref(), Some("0"));
        assert_eq!(spec.fields[0].idx, 1);
    }

    #[test]
    fn test_option_lines_trim_and_skip_blanks() {
        let field = FieldSpec::new("status", FieldKind::Select).with_options(" Draft \n\nSent\n");
        assert_eq!(field.option_lines(), vec!["Draft", "Sent"]);
    }

    #[test]
    fn test_set_property_aliases() {
        let mut field = FieldSpec::new("title", FieldKind::Data);
        field.set_property("reqd", &json!(1)).unwrap();
        field.set_property("label", &json!("Headline")).unwrap();
        field.set_property("length", &json!("80")).unwrap();
        assert!(field.required);
        assert_eq!(field.label.as_deref(), Some("Headline"));
        assert_eq!(field.length, Some(80));
    }

    #[test]
    fn test_set_property_rejects_unknown() {
        let mut field = FieldSpec::new("title", FieldKind::Data);
        assert!(field.set_property("colour", &json!("red")).is_err());
        assert!(field.set_property("fieldname", &json!("x")).is_err());
        assert!(field.set_property("hidden", &json!("maybe")).is_err());
    }

    #[test]
    fn test_overlay_flattens_field() {
        let overlay = CustomFieldOverlay::new("Note", FieldSpec::new("tag", FieldKind::Data));
        let value = serde_json::to_value(&overlay).unwrap();
        assert_eq!(value["entity_type"], "Note");
        assert_eq!(value["fieldname"], "tag");
        assert_eq!(value["kind"], "Data");

        let back: CustomFieldOverlay = serde_json::from_value(value).unwrap();
        assert_eq!(back, overlay);
    }

    /// Numeric attributes survive a text round trip of a flat overlay.
    #[test]
    fn test_overlay_reads_numeric_attributes_from_text() {
        let text = r#"{"entity_type": "Invoice", "fieldname": "fee", "kind": "Currency", "precision": 2}"#;
        let overlay: CustomFieldOverlay = serde_json::from_str(text).unwrap();
        assert_eq!(overlay.entity_type, "Invoice");
        assert_eq!(overlay.field.precision, Some(2));

        let missing = r#"{"fieldname": "fee", "kind": "Currency"}"#;
        assert!(serde_json::from_str::<CustomFieldOverlay>(missing).is_err());
    }
}
