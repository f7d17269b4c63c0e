//! Value helpers shared by coercion, querying and expression evaluation
//!
//! Documents carry `serde_json::Value`s. Numeric fields are compared and
//! computed as arbitrary-precision decimals so that `100 + 100 * 10 / 100`
//! is exactly `110`, never `110.00000000000001`. serde_json is built with
//! `arbitrary_precision`, so a decimal cell keeps every digit on its way
//! through the journal.

use std::cmp::Ordering;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Number, Value};

/// Parses a decimal out of a JSON number or a numeric string.
pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => decimal_from_number(n),
        Value::String(s) => parse_decimal(s.trim()),
        Value::Bool(b) => Some(if *b { Decimal::ONE } else { Decimal::ZERO }),
        _ => None,
    }
}

fn decimal_from_number(n: &Number) -> Option<Decimal> {
    if let Some(i) = n.as_i64() {
        return Some(Decimal::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(Decimal::from(u));
    }
    parse_decimal(&n.to_string())
}

/// Parses plain or scientific decimal notation.
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// Converts a decimal into its canonical JSON form.
///
/// The number is written from the normalized decimal text, so `110.00`
/// becomes `110` and `1234567890123456.78` keeps all of its digits.
pub fn decimal_to_value(d: Decimal) -> Value {
    serde_json::from_str::<Number>(&d.normalize().to_string())
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Returns true for null, empty strings and empty arrays.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Total ordering over JSON values, used for sorting.
///
/// - null < bool < number < string < array < object
/// - numbers compare as decimals, strings compare as text
/// - arrays and objects are equal to each other within their rank
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (decimal_from_number(x), decimal_from_number(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.to_string().cmp(&y.to_string()),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Compares a stored value against a filter operand.
///
/// When either side is a JSON number and the other is number-like, both
/// compare as decimals, so `amount > "100"` works on a numeric cell. Two
/// strings always compare as text.
pub fn compare_operand(value: &Value, operand: &Value) -> Ordering {
    match numeric_pair(value, operand) {
        Some((x, y)) => x.cmp(&y),
        None => compare_values(value, operand),
    }
}

/// Filter equality: numbers equal number-like values of the same amount;
/// two strings are equal only when their text is.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match numeric_pair(a, b) {
        Some((x, y)) => x == y,
        None => false,
    }
}

// Decimal pair when at least one side is a JSON number
fn numeric_pair(a: &Value, b: &Value) -> Option<(Decimal, Decimal)> {
    if !a.is_number() && !b.is_number() {
        return None;
    }
    Some((numeric(a)?, numeric(b)?))
}

fn numeric(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => decimal_from_number(n),
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }
}
