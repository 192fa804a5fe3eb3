use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;

use crate::domain::{ColumnDef, Row, Value};

/// Strips `Nullable(...)` and `LowCardinality(...)` wrappers from a ClickHouse type name.
fn base_type(column_type: &str) -> &str {
    let mut ty = column_type.trim();
    loop {
        let inner = ty
            .strip_prefix("Nullable(")
            .or_else(|| ty.strip_prefix("LowCardinality("))
            .and_then(|rest| rest.strip_suffix(')'));
        match inner {
            Some(inner) => ty = inner.trim(),
            None => return ty,
        }
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Converts one cell of a `JSONCompact` result into a `Value` using the column's declared type.
/// Cells that do not match their declared type are kept as strings rather than dropped.
pub fn value_from_json(column_type: &str, value: JsonValue) -> Value {
    if value.is_null() {
        return Value::Null;
    }

    let ty = base_type(column_type);
    match (ty, value) {
        (t, JsonValue::Number(n)) if t.starts_with("Int") || t.starts_with("UInt") => n
            .as_i64()
            .map(Value::Integer)
            .unwrap_or_else(|| Value::String(n.to_string())),
        (t, JsonValue::String(s)) if t.starts_with("Int") || t.starts_with("UInt") => {
            s.parse::<i64>().map(Value::Integer).unwrap_or(Value::String(s))
        }
        (t, JsonValue::Number(n)) if t.starts_with("Float") || t.starts_with("Decimal") => {
            n.as_f64().map(Value::Float).unwrap_or(Value::Null)
        }
        (t, JsonValue::String(s)) if t.starts_with("Float") || t.starts_with("Decimal") => {
            match s.as_str() {
                "nan" => Value::Float(f64::NAN),
                "inf" | "+inf" => Value::Float(f64::INFINITY),
                "-inf" => Value::Float(f64::NEG_INFINITY),
                _ => s.parse::<f64>().map(Value::Float).unwrap_or(Value::String(s)),
            }
        }
        ("Bool", JsonValue::Bool(b)) => Value::Boolean(b),
        (t, JsonValue::String(s)) if t.starts_with("Date32") || t == "Date" => {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map(Value::Date)
                .unwrap_or(Value::String(s))
        }
        (t, JsonValue::String(s)) if t.starts_with("DateTime") => {
            parse_datetime(&s).map(Value::DateTime).unwrap_or(Value::String(s))
        }
        (_, other) => Value::from_json(other),
    }
}

/// Zips `JSONCompact` metadata with its data arrays into ordered rows.
pub fn rows_from_compact(meta: &[ColumnDef], data: Vec<Vec<JsonValue>>) -> Vec<Row> {
    data.into_iter()
        .map(|cells| {
            let mut row = Row::with_capacity(meta.len());
            for (col, cell) in meta.iter().zip(cells) {
                row.insert(col.name.clone(), value_from_json(&col.column_type, cell));
            }
            row
        })
        .collect()
}
