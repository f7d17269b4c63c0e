//! Per-kind value coercion and defaults
//!
//! Incoming values are normalised to the canonical JSON form of their
//! field kind before any other check runs:
//!
//! | Kind                     | Canonical form                      |
//! |--------------------------|-------------------------------------|
//! | Int, Rating, Duration    | integer                             |
//! | Check                    | 0 or 1                              |
//! | Float, Currency, Percent | number rounded to the precision     |
//! | Date                     | `YYYY-MM-DD`                        |
//! | Datetime                 | `YYYY-MM-DD HH:MM:SS[.ffffff]`      |
//! | Time                     | `HH:MM:SS[.ffffff]`                 |
//! | JSON, Geolocation        | any JSON value                      |
//! | everything else          | string                              |

use std::sync::OnceLock;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use rust_decimal::RoundingStrategy;
use serde_json::Value;

use super::errors::{FieldRule, FieldViolation};
use crate::schema::{FieldKind, FieldSpec};
use crate::value::{decimal_from_value, decimal_to_value};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";

const FLOAT_PRECISION: u32 = 9;
const CURRENCY_PRECISION: u32 = 2;

/// Value a field takes when the caller supplies none.
///
/// `Today` and `Now` are evaluated at call time; anything else is a
/// literal that still goes through coercion.
pub fn default_value(field: &FieldSpec) -> Option<Value> {
    let spec = field.default_trimmed()?;
    let value = match (field.kind, spec.to_ascii_lowercase().as_str()) {
        (_, "today") => Value::from(Local::now().date_naive().format(DATE_FORMAT).to_string()),
        (FieldKind::Time, "now") => Value::from(Local::now().time().format("%H:%M:%S").to_string()),
        (_, "now") => Value::from(Local::now().naive_local().format("%Y-%m-%d %H:%M:%S").to_string()),
        _ => Value::from(spec),
    };
    Some(value)
}

/// Coerces `value` to the canonical form of `field`'s kind.
///
/// `default_length` bounds text columns without an explicit `length`.
pub fn coerce_value(field: &FieldSpec, value: &Value, default_length: u32) -> Result<Value, FieldViolation> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    let kind = field.kind;
    let mismatch = |expected: &str| {
        FieldViolation::new(
            FieldRule::TypeMismatch,
            &field.fieldname,
            format!("{} expects {}, got {}", kind, expected, value),
        )
    };

    // Blank input clears every non-text field
    if value.as_str().is_some_and(|s| s.trim().is_empty()) && !is_text_kind(kind) {
        return Ok(Value::Null);
    }

    match kind {
        FieldKind::Int | FieldKind::Rating | FieldKind::Duration => coerce_int(value).ok_or_else(|| mismatch("an integer")),
        FieldKind::Check => coerce_check(value).ok_or_else(|| mismatch("0 or 1")),
        FieldKind::Float | FieldKind::Currency | FieldKind::Percent | FieldKind::Decimal => {
            if value.is_boolean() {
                return Err(mismatch("a number"));
            }
            let d = decimal_from_value(value).ok_or_else(|| mismatch("a number"))?;
            let places = field.precision.unwrap_or(if kind == FieldKind::Currency {
                CURRENCY_PRECISION
            } else {
                FLOAT_PRECISION
            });
            Ok(decimal_to_value(
                d.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero),
            ))
        }
        FieldKind::Date => parse_date(value)
            .map(|d| Value::from(d.format(DATE_FORMAT).to_string()))
            .ok_or_else(|| mismatch("a date (YYYY-MM-DD)")),
        FieldKind::Datetime => parse_datetime(value)
            .map(|dt| Value::from(dt.format(DATETIME_FORMAT).to_string()))
            .ok_or_else(|| mismatch("a datetime (YYYY-MM-DD HH:MM:SS)")),
        FieldKind::Time => parse_time(value)
            .map(|t| Value::from(t.format(TIME_FORMAT).to_string()))
            .ok_or_else(|| mismatch("a time (HH:MM:SS)")),
        FieldKind::Json | FieldKind::Geolocation => Ok(value.clone()),
        FieldKind::Select => {
            let text = coerce_text(value).ok_or_else(|| mismatch("text"))?;
            let options = field.option_lines();
            if text.is_empty() || options.contains(&text.as_str()) {
                Ok(Value::from(text))
            } else {
                Err(FieldViolation::new(
                    FieldRule::InvalidOption,
                    &field.fieldname,
                    format!("'{}' is not one of: {}", text, options.join(", ")),
                ))
            }
        }
        _ => {
            let text = coerce_text(value).ok_or_else(|| mismatch("text"))?;
            check_length(field, &text, default_length)?;
            check_format(field, &text)?;
            Ok(Value::from(text))
        }
    }
}

fn is_text_kind(kind: FieldKind) -> bool {
    !(kind.is_integer()
        || kind.is_decimal()
        || matches!(
            kind,
            FieldKind::Date | FieldKind::Datetime | FieldKind::Time | FieldKind::Json | FieldKind::Geolocation
        ))
}

fn coerce_int(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(b) => Some(Value::from(i64::from(*b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(Value::from(i));
            }
            let d = decimal_from_value(value)?;
            if d.fract().is_zero() {
                Some(decimal_to_value(d))
            } else {
                None
            }
        }
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

fn coerce_check(value: &Value) -> Option<Value> {
    let flag = match value {
        Value::Bool(b) => *b,
        Value::Number(n) => match n.as_i64() {
            Some(0) => false,
            Some(1) => true,
            _ => return None,
        },
        Value::String(s) => match s.trim() {
            "0" => false,
            "1" => true,
            _ => return None,
        },
        _ => return None,
    };
    Some(Value::from(i64::from(flag)))
}

fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?.trim();
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .or_else(|| parse_datetime(value).map(|dt| dt.date()))
}

fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    let s = value.as_str()?.trim();
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_time(value: &Value) -> Option<NaiveTime> {
    let s = value.as_str()?.trim();
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn check_length(field: &FieldSpec, text: &str, default_length: u32) -> Result<(), FieldViolation> {
    if field.kind.is_large_text() || field.kind == FieldKind::Barcode {
        return Ok(());
    }
    let max = field.length.unwrap_or(default_length) as usize;
    let length = text.chars().count();
    if length > max {
        return Err(FieldViolation::new(
            FieldRule::TooLong,
            &field.fieldname,
            format!("{} characters exceeds the limit of {}", length, max),
        ));
    }
    Ok(())
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static pattern"))
}

fn phone_pattern() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE.get_or_init(|| Regex::new(r"^\+?[0-9][0-9 ().\-]{3,19}$").expect("static pattern"))
}

fn url_pattern() -> &'static Regex {
    static URL: OnceLock<Regex> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r"^(https?|ftp)://[^\s/$.?#][^\s]*$").expect("static pattern"))
}

/// Data fields whose options name a format are checked against it.
fn check_format(field: &FieldSpec, text: &str) -> Result<(), FieldViolation> {
    if field.kind != FieldKind::Data || text.is_empty() {
        return Ok(());
    }
    let (pattern, what) = match field.options_trimmed() {
        Some("Email") => (email_pattern(), "an email address"),
        Some("Phone") => (phone_pattern(), "a phone number"),
        Some("URL") => (url_pattern(), "a URL"),
        _ => return Ok(()),
    };
    if pattern.is_match(text.trim()) {
        Ok(())
    } else {
        Err(FieldViolation::new(
            FieldRule::InvalidFormat,
            &field.fieldname,
            format!("'{}' is not {}", text, what),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coerce(field: &FieldSpec, value: Value) -> Result<Value, FieldViolation> {
        coerce_value(field, &value, 140)
    }

    #[test]
    fn test_int_coercion() {
        let f = FieldSpec::new("qty", FieldKind::Int);
        assert_eq!(coerce(&f, json!("42")).unwrap(), json!(42));
        assert_eq!(coerce(&f, json!(3.0)).unwrap(), json!(3));
        assert_eq!(coerce(&f, json!("")).unwrap(), Value::Null);
        assert_eq!(coerce(&f, json!("4.5")).unwrap_err().rule, FieldRule::TypeMismatch);
    }

    #[test]
    fn test_check_coercion() {
        let f = FieldSpec::new("active", FieldKind::Check);
        assert_eq!(coerce(&f, json!(true)).unwrap(), json!(1));
        assert_eq!(coerce(&f, json!("0")).unwrap(), json!(0));
        assert_eq!(coerce(&f, json!(1)).unwrap(), json!(1));
        assert!(coerce(&f, json!(2)).is_err());
        assert!(coerce(&f, json!("yes")).is_err());
    }

    #[test]
    fn test_decimal_rounding() {
        let currency = FieldSpec::new("amount", FieldKind::Currency);
        assert_eq!(coerce(&currency, json!("10.005")).unwrap(), json!(10.01));
        assert_eq!(coerce(&currency, json!(100)).unwrap(), json!(100));
        let precise = FieldSpec::new("rate", FieldKind::Float).with_precision(3);
        assert_eq!(coerce(&precise, json!(1.23456)).unwrap(), json!(1.235));
        assert!(coerce(&precise, json!(true)).is_err());
    }

    #[test]
    fn test_temporal_coercion() {
        let date = FieldSpec::new("due", FieldKind::Date);
        assert_eq!(coerce(&date, json!("2024-02-29")).unwrap(), json!("2024-02-29"));
        assert_eq!(coerce(&date, json!("2024-02-29 10:00:00")).unwrap(), json!("2024-02-29"));
        assert!(coerce(&date, json!("2023-02-29")).is_err());

        let dt = FieldSpec::new("at", FieldKind::Datetime);
        assert_eq!(coerce(&dt, json!("2024-01-02T03:04:05")).unwrap(), json!("2024-01-02 03:04:05"));
        assert_eq!(coerce(&dt, json!("2024-01-02")).unwrap(), json!("2024-01-02 00:00:00"));

        let time = FieldSpec::new("start", FieldKind::Time);
        assert_eq!(coerce(&time, json!("09:30")).unwrap(), json!("09:30:00"));
    }

    #[test]
    fn test_select_must_be_an_option() {
        let f = FieldSpec::select("status", &["Pending", "Done"]);
        assert_eq!(coerce(&f, json!("Done")).unwrap(), json!("Done"));
        assert_eq!(coerce(&f, json!("")).unwrap(), json!(""));
        assert_eq!(coerce(&f, json!("Lost")).unwrap_err().rule, FieldRule::InvalidOption);
    }

    #[test]
    fn test_text_length_and_format() {
        let code = FieldSpec::new("code", FieldKind::Data).with_length(3);
        assert_eq!(coerce(&code, json!(12)).unwrap(), json!("12"));
        assert_eq!(coerce(&code, json!("ABCD")).unwrap_err().rule, FieldRule::TooLong);

        let email = FieldSpec::new("email", FieldKind::Data).with_options("Email");
        assert!(coerce(&email, json!("a@b.io")).is_ok());
        assert_eq!(coerce(&email, json!("nope")).unwrap_err().rule, FieldRule::InvalidFormat);

        let url = FieldSpec::new("site", FieldKind::Data).with_options("URL");
        assert!(coerce(&url, json!("https://example.com/x")).is_ok());
        assert!(coerce(&url, json!("example")).is_err());

        let notes = FieldSpec::new("notes", FieldKind::LongText);
        assert!(coerce(&notes, json!("x".repeat(500))).is_ok());
    }

    #[test]
    fn test_defaults() {
        let status = FieldSpec::select("status", &["Pending", "Done"]).with_default("Pending");
        assert_eq!(default_value(&status), Some(json!("Pending")));

        let due = FieldSpec::new("due", FieldKind::Date).with_default("Today");
        let today = default_value(&due).unwrap();
        assert!(coerce(&due, today).is_ok());

        assert_eq!(default_value(&FieldSpec::new("x", FieldKind::Data)), None);
    }
}
