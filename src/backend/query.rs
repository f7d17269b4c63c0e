//! # Record Queries
//!
//! Filters, ordering, pagination and projection shared by every backend.
//! In-memory backends run `apply_query` and `count_matching` over the same
//! filter pass, so a count never drifts from the list it describes.

use std::cmp::Ordering;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::contract::Record;
use crate::value::{compare_operand, compare_values, is_empty, values_equal};

/// Filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// SQL LIKE: `%` any run, `_` one character
    Like,
    In,
    NotIn,
    /// Value present and non-empty
    IsSet,
    IsNotSet,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Neq => "!=",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
            FilterOperator::Like => "like",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not in",
            FilterOperator::IsSet => "is set",
            FilterOperator::IsNotSet => "is not set",
        }
    }
}

/// A filter expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

impl FilterExpr {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Eq, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Gt, value.into())
    }

    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, FilterOperator::In, Value::Array(values))
    }

    /// Parses `field=value`, `field>=value`, `field!=value` and friends.
    ///
    /// Values that parse as JSON are used as such, anything else as text.
    pub fn parse(raw: &str) -> Option<Self> {
        const OPS: [(&str, FilterOperator); 6] = [
            (">=", FilterOperator::Gte),
            ("<=", FilterOperator::Lte),
            ("!=", FilterOperator::Neq),
            ("=", FilterOperator::Eq),
            (">", FilterOperator::Gt),
            ("<", FilterOperator::Lt),
        ];
        for (token, op) in OPS {
            if let Some((field, value)) = raw.split_once(token) {
                let field = field.trim();
                if field.is_empty() {
                    return None;
                }
                let value = value.trim();
                let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
                return Some(Self::new(field, op, value));
            }
        }
        None
    }

    /// Whether a row satisfies this filter
    ///
    /// Compiles a `like` pattern on every call; use `Query::matcher` to test
    /// many rows.
    pub fn matches(&self, row: &Record) -> bool {
        self.test(row, self.compile().as_ref())
    }

    fn compile(&self) -> Option<Regex> {
        match (self.operator, self.value.as_str()) {
            (FilterOperator::Like, Some(pattern)) => like_regex(pattern),
            _ => None,
        }
    }

    fn test(&self, row: &Record, like: Option<&Regex>) -> bool {
        let field_value = row.get(&self.field).unwrap_or(&Value::Null);

        match self.operator {
            FilterOperator::Eq => values_equal(field_value, &self.value),
            FilterOperator::Neq => !values_equal(field_value, &self.value),
            FilterOperator::Gt => compare_operand(field_value, &self.value) == Ordering::Greater,
            FilterOperator::Gte => compare_operand(field_value, &self.value) != Ordering::Less,
            FilterOperator::Lt => compare_operand(field_value, &self.value) == Ordering::Less,
            FilterOperator::Lte => compare_operand(field_value, &self.value) != Ordering::Greater,
            FilterOperator::Like => match (field_value.as_str(), like) {
                (Some(text), Some(re)) => re.is_match(text),
                _ => false,
            },
            FilterOperator::In => self
                .value
                .as_array()
                .map_or(false, |list| list.iter().any(|v| values_equal(field_value, v))),
            FilterOperator::NotIn => self
                .value
                .as_array()
                .map_or(true, |list| !list.iter().any(|v| values_equal(field_value, v))),
            FilterOperator::IsSet => !is_empty(field_value),
            FilterOperator::IsNotSet => is_empty(field_value),
        }
    }
}

/// A query's filters with their `like` patterns compiled once.
pub struct RowMatcher<'q> {
    filters: Vec<(&'q FilterExpr, Option<Regex>)>,
}

impl RowMatcher<'_> {
    /// Whether a row passes every filter
    pub fn matches(&self, row: &Record) -> bool {
        self.filters.iter().all(|(f, like)| f.test(row, like.as_ref()))
    }
}

fn like_regex(pattern: &str) -> Option<Regex> {
    let mut source = String::from("(?is)^");
    for c in pattern.chars() {
        match c {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    #[cfg(test)]
    LIKE_COMPILES.with(|n| n.set(n.get() + 1));
    Regex::new(&source).ok()
}

#[cfg(test)]
thread_local! {
    static LIKE_COMPILES: std::cell::Cell<usize> = std::cell::Cell::new(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// A list/count/stats request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub filters: Vec<FilterExpr>,
    /// Sort keys, most significant first
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub offset: usize,
    /// `None` returns every matching row
    #[serde(default)]
    pub limit: Option<usize>,
    /// Projection; `None` returns every column
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    /// Grouping column for `stats_records`
    #[serde(default)]
    pub group_by: Option<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: FilterExpr) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by = Some(field.into());
        self
    }

    /// Whether a row passes every filter
    pub fn matches(&self, row: &Record) -> bool {
        self.matcher().matches(row)
    }

    /// Compiles the filters for testing many rows.
    pub fn matcher(&self) -> RowMatcher<'_> {
        RowMatcher {
            filters: self.filters.iter().map(|f| (f, f.compile())).collect(),
        }
    }
}

/// Filter, sort, paginate and project.
///
/// Sorting is stable, so rows equal on every key keep their input order.
pub fn apply_query(rows: impl IntoIterator<Item = Record>, query: &Query) -> Vec<Record> {
    let matcher = query.matcher();
    let mut matched: Vec<Record> = rows.into_iter().filter(|r| matcher.matches(r)).collect();

    if !query.order_by.is_empty() {
        matched.sort_by(|a, b| compare_rows(a, b, &query.order_by));
    }

    let page = matched
        .into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX));

    match &query.fields {
        None => page.collect(),
        Some(fields) => page.map(|row| project(row, fields)).collect(),
    }
}

/// Number of rows passing the filters, ignoring pagination
pub fn count_matching<'a>(rows: impl IntoIterator<Item = &'a Record>, query: &Query) -> u64 {
    let matcher = query.matcher();
    rows.into_iter().filter(|r| matcher.matches(r)).count() as u64
}

/// Row counts per distinct value of `field`, keyed by the value's text
pub fn group_counts<'a>(rows: impl IntoIterator<Item = &'a Record>, query: &Query, field: &str) -> Record {
    let matcher = query.matcher();
    let mut counts: Vec<(String, u64)> = Vec::new();
    for row in rows.into_iter().filter(|r| matcher.matches(r)) {
        let key = match row.get(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        match counts.iter_mut().find(|(k, _)| *k == key) {
            Some((_, n)) => *n += 1,
            None => counts.push((key, 1)),
        }
    }
    counts.sort_by(|a, b| a.0.cmp(&b.0));
    counts
        .into_iter()
        .map(|(k, n)| (k, Value::from(n)))
        .collect()
}

fn compare_rows(a: &Record, b: &Record, keys: &[OrderBy]) -> Ordering {
    for key in keys {
        let av = a.get(&key.field).unwrap_or(&Value::Null);
        let bv = b.get(&key.field).unwrap_or(&Value::Null);
        let ordering = match key.direction {
            SortDirection::Asc => compare_values(av, bv),
            SortDirection::Desc => compare_values(av, bv).reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn project(row: Record, fields: &[String]) -> Record {
    let mut out = Map::new();
    for field in fields {
        out.insert(field.clone(), row.get(field).cloned().unwrap_or(Value::Null));
    }
    out
}
