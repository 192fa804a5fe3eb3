use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::{Row, Value};
use crate::error::{Error, Result};

/// What to do with input that cannot be cast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CastPolicy {
    /// Fail the whole transform with a validation error.
    Strict,
    /// Substitute NaN for numeric casts and null for date casts.
    #[default]
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum CastType {
    Number,
    Integer,
    Boolean,
    String,
    Date,
    DateTime,
}

impl FromStr for CastType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "number" | "float" | "double" => Ok(CastType::Number),
            "integer" | "int" => Ok(CastType::Integer),
            "boolean" | "bool" => Ok(CastType::Boolean),
            "string" => Ok(CastType::String),
            "date" => Ok(CastType::Date),
            "datetime" => Ok(CastType::DateTime),
            other => Err(Error::Validation(format!("Unknown cast type: {}", other))),
        }
    }
}

impl TryFrom<String> for CastType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for CastType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CastType::Number => "number",
            CastType::Integer => "integer",
            CastType::Boolean => "boolean",
            CastType::String => "string",
            CastType::Date => "date",
            CastType::DateTime => "datetime",
        };
        f.write_str(name)
    }
}

impl From<CastType> for String {
    fn from(t: CastType) -> Self {
        t.to_string()
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        _ => None,
    }
}

fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::DateTime(dt) => Some(*dt),
        Value::Date(d) => d.and_hms_opt(0, 0, 0),
        Value::Integer(millis) => DateTime::from_timestamp_millis(*millis).map(|dt| dt.naive_utc()),
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.naive_utc())
                .ok()
                .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok())
                .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok())
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        }
        _ => None,
    }
}

/// `false`, `"false"`, `"0"`, `""`, zero and null are false; everything else is true.
pub fn cast_boolean(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Boolean(b) => *b,
        Value::String(s) => !(s.is_empty() || s == "false" || s == "0"),
        Value::Integer(i) => *i != 0,
        Value::Float(f) => *f != 0.0 && !f.is_nan(),
        Value::Date(_) | Value::DateTime(_) => true,
    }
}

/// Casts one value. `None` means the input could not be interpreted as the target type.
fn cast_value(value: &Value, target: CastType) -> Option<Value> {
    if value.is_null() && target != CastType::Boolean {
        return Some(Value::Null);
    }
    match target {
        CastType::Number => parse_number(value).map(Value::Float),
        CastType::Integer => parse_integer(value).map(Value::Integer),
        CastType::Boolean => Some(Value::Boolean(cast_boolean(value))),
        CastType::String => Some(Value::String(value.to_display_string())),
        CastType::Date => parse_datetime(value).map(|dt| Value::Date(dt.date())),
        CastType::DateTime => parse_datetime(value).map(Value::DateTime),
    }
}

fn invalid_marker(target: CastType) -> Value {
    match target {
        CastType::Number | CastType::Integer => Value::Float(f64::NAN),
        _ => Value::Null,
    }
}

/// Casts the named fields of every row. Fields absent from a row are left alone.
pub fn apply_type_casts(
    rows: Vec<Row>,
    casts: &BTreeMap<String, CastType>,
    policy: CastPolicy,
) -> Result<Vec<Row>> {
    if casts.is_empty() {
        return Ok(rows);
    }

    rows.into_iter()
        .enumerate()
        .map(|(idx, mut row)| {
            for (field, target) in casts {
                let Some(current) = row.get(field) else {
                    continue;
                };
                let cast = match cast_value(current, *target) {
                    Some(v) => v,
                    None if policy == CastPolicy::Lenient => invalid_marker(*target),
                    None => {
                        return Err(Error::Validation(format!(
                            "Row {}: cannot cast field '{}' value '{}' to {}",
                            idx,
                            field,
                            current.to_display_string(),
                            target
                        )))
                    }
                };
                row.insert(field.clone(), cast);
            }
            Ok(row)
        })
        .collect()
}
