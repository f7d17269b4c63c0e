//! The closed enumeration of field kinds
//!
//! Kinds serialize under their display names ("Section Break", "Link", ...)
//! so that spec files read the way metadata authors write them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Every field kind a FieldSpec may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldKind {
    Autocomplete,
    Attach,
    #[serde(rename = "Attach Image")]
    AttachImage,
    Barcode,
    Button,
    Check,
    Code,
    Color,
    #[serde(rename = "Column Break")]
    ColumnBreak,
    Currency,
    Data,
    Date,
    Datetime,
    Decimal,
    Duration,
    #[serde(rename = "Dynamic Link")]
    DynamicLink,
    Float,
    Fold,
    Geolocation,
    Heading,
    #[serde(rename = "HTML")]
    Html,
    #[serde(rename = "HTML Editor")]
    HtmlEditor,
    Icon,
    Image,
    Int,
    #[serde(rename = "JSON")]
    Json,
    Link,
    #[serde(rename = "Long Text")]
    LongText,
    #[serde(rename = "Markdown Editor")]
    MarkdownEditor,
    Password,
    Percent,
    Phone,
    #[serde(rename = "Read Only")]
    ReadOnly,
    Rating,
    #[serde(rename = "Section Break")]
    SectionBreak,
    Select,
    Signature,
    #[serde(rename = "Small Text")]
    SmallText,
    #[serde(rename = "Tab Break")]
    TabBreak,
    Table,
    #[serde(rename = "Table MultiSelect")]
    TableMultiSelect,
    Text,
    #[serde(rename = "Text Editor")]
    TextEditor,
    Time,
}

impl FieldKind {
    /// All kinds, in display-name order.
    pub const ALL: [FieldKind; 44] = [
        FieldKind::Autocomplete,
        FieldKind::Attach,
        FieldKind::AttachImage,
        FieldKind::Barcode,
        FieldKind::Button,
        FieldKind::Check,
        FieldKind::Code,
        FieldKind::Color,
        FieldKind::ColumnBreak,
        FieldKind::Currency,
        FieldKind::Data,
        FieldKind::Date,
        FieldKind::Datetime,
        FieldKind::Decimal,
        FieldKind::Duration,
        FieldKind::DynamicLink,
        FieldKind::Float,
        FieldKind::Fold,
        FieldKind::Geolocation,
        FieldKind::Heading,
        FieldKind::Html,
        FieldKind::HtmlEditor,
        FieldKind::Icon,
        FieldKind::Image,
        FieldKind::Int,
        FieldKind::Json,
        FieldKind::Link,
        FieldKind::LongText,
        FieldKind::MarkdownEditor,
        FieldKind::Password,
        FieldKind::Percent,
        FieldKind::Phone,
        FieldKind::ReadOnly,
        FieldKind::Rating,
        FieldKind::SectionBreak,
        FieldKind::Select,
        FieldKind::Signature,
        FieldKind::SmallText,
        FieldKind::TabBreak,
        FieldKind::Table,
        FieldKind::TableMultiSelect,
        FieldKind::Text,
        FieldKind::TextEditor,
        FieldKind::Time,
    ];

    /// Returns the display name used in spec files.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Autocomplete => "Autocomplete",
            FieldKind::Attach => "Attach",
            FieldKind::AttachImage => "Attach Image",
            FieldKind::Barcode => "Barcode",
            FieldKind::Button => "Button",
            FieldKind::Check => "Check",
            FieldKind::Code => "Code",
            FieldKind::Color => "Color",
            FieldKind::ColumnBreak => "Column Break",
            FieldKind::Currency => "Currency",
            FieldKind::Data => "Data",
            FieldKind::Date => "Date",
            FieldKind::Datetime => "Datetime",
            FieldKind::Decimal => "Decimal",
            FieldKind::Duration => "Duration",
            FieldKind::DynamicLink => "Dynamic Link",
            FieldKind::Float => "Float",
            FieldKind::Fold => "Fold",
            FieldKind::Geolocation => "Geolocation",
            FieldKind::Heading => "Heading",
            FieldKind::Html => "HTML",
            FieldKind::HtmlEditor => "HTML Editor",
            FieldKind::Icon => "Icon",
            FieldKind::Image => "Image",
            FieldKind::Int => "Int",
            FieldKind::Json => "JSON",
            FieldKind::Link => "Link",
            FieldKind::LongText => "Long Text",
            FieldKind::MarkdownEditor => "Markdown Editor",
            FieldKind::Password => "Password",
            FieldKind::Percent => "Percent",
            FieldKind::Phone => "Phone",
            FieldKind::ReadOnly => "Read Only",
            FieldKind::Rating => "Rating",
            FieldKind::SectionBreak => "Section Break",
            FieldKind::Select => "Select",
            FieldKind::Signature => "Signature",
            FieldKind::SmallText => "Small Text",
            FieldKind::TabBreak => "Tab Break",
            FieldKind::Table => "Table",
            FieldKind::TableMultiSelect => "Table MultiSelect",
            FieldKind::Text => "Text",
            FieldKind::TextEditor => "Text Editor",
            FieldKind::Time => "Time",
        }
    }

    /// Layout and display kinds: they hold no value at all.
    pub fn is_layout(&self) -> bool {
        matches!(
            self,
            FieldKind::SectionBreak
                | FieldKind::ColumnBreak
                | FieldKind::TabBreak
                | FieldKind::Heading
                | FieldKind::Html
                | FieldKind::Button
                | FieldKind::Image
                | FieldKind::Fold
        )
    }

    /// Child-table kinds. Their rows live in the child entity type's storage.
    pub fn is_table(&self) -> bool {
        matches!(self, FieldKind::Table | FieldKind::TableMultiSelect)
    }

    /// Whether a value of this kind occupies a column on its own record.
    pub fn has_column(&self) -> bool {
        !self.is_layout() && !self.is_table()
    }

    /// Kinds stored as unbounded text; never indexable.
    pub fn is_large_text(&self) -> bool {
        matches!(
            self,
            FieldKind::Text
                | FieldKind::SmallText
                | FieldKind::LongText
                | FieldKind::TextEditor
                | FieldKind::MarkdownEditor
                | FieldKind::HtmlEditor
                | FieldKind::Code
                | FieldKind::Json
                | FieldKind::Signature
                | FieldKind::Geolocation
        )
    }

    /// Kinds that may carry `unique = true`.
    pub fn supports_unique(&self) -> bool {
        matches!(
            self,
            FieldKind::Data | FieldKind::Link | FieldKind::ReadOnly | FieldKind::Int
        )
    }

    /// Kinds whose `precision` is meaningful.
    pub fn takes_precision(&self) -> bool {
        matches!(
            self,
            FieldKind::Float | FieldKind::Currency | FieldKind::Percent | FieldKind::Decimal
        )
    }

    /// Kinds holding a decimal value.
    pub fn is_decimal(&self) -> bool {
        self.takes_precision()
    }

    /// Kinds holding an integral value.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldKind::Int | FieldKind::Check | FieldKind::Rating | FieldKind::Duration
        )
    }

    /// Kinds whose value references another record.
    pub fn is_link(&self) -> bool {
        matches!(self, FieldKind::Link | FieldKind::DynamicLink)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown field kind '{}'", s))
    }
}
