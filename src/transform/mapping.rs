use serde::{Deserialize, Serialize};

use crate::domain::{Row, Value};

/// Produces a new field value from a whole input row. Implementations must be pure.
pub trait Derive {
    fn derive(&self, row: &Row) -> Value;
}

/// Named derivation strategies that can travel in a request payload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derivation {
    Constant {
        #[serde(default)]
        value: Value,
    },
    Concat {
        fields: Vec<String>,
        #[serde(default)]
        separator: String,
    },
    Upper {
        field: String,
    },
    Lower {
        field: String,
    },
    Trim {
        field: String,
    },
    /// First non-null, non-empty field.
    Coalesce {
        fields: Vec<String>,
    },
}

fn text_of(row: &Row, field: &str) -> Option<String> {
    match row.get(field) {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.to_display_string()),
    }
}

impl Derive for Derivation {
    fn derive(&self, row: &Row) -> Value {
        match self {
            Derivation::Constant { value } => value.clone(),
            Derivation::Concat { fields, separator } => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|f| text_of(row, f).unwrap_or_default())
                    .collect();
                Value::String(parts.join(separator))
            }
            Derivation::Upper { field } => text_of(row, field)
                .map(|s| Value::String(s.to_uppercase()))
                .unwrap_or(Value::Null),
            Derivation::Lower { field } => text_of(row, field)
                .map(|s| Value::String(s.to_lowercase()))
                .unwrap_or(Value::Null),
            Derivation::Trim { field } => text_of(row, field)
                .map(|s| Value::String(s.trim().to_string()))
                .unwrap_or(Value::Null),
            Derivation::Coalesce { fields } => fields
                .iter()
                .filter_map(|f| row.get(f))
                .find(|v| match v {
                    Value::Null => false,
                    Value::String(s) => !s.is_empty(),
                    _ => true,
                })
                .cloned()
                .unwrap_or(Value::Null),
        }
    }
}

/// Where a mapped field takes its value from. In JSON a bare string is a rename, an object is a derivation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FieldSource {
    Field(String),
    Derive(Derivation),
}

impl FieldSource {
    fn resolve(&self, row: &Row) -> Value {
        match self {
            FieldSource::Field(name) => row.get(name).cloned().unwrap_or(Value::Null),
            FieldSource::Derive(d) => d.derive(row),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FieldMapping {
    pub target: String,
    pub source: FieldSource,
}

impl FieldMapping {
    pub fn rename(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: FieldSource::Field(source.into()),
        }
    }

    pub fn derive(target: impl Into<String>, derivation: Derivation) -> Self {
        Self {
            target: target.into(),
            source: FieldSource::Derive(derivation),
        }
    }
}

/// Rewrites each row: mapped targets first, in mapping order, then every remaining field that was not
/// consumed by a rename. A target always wins over a pass-through field of the same name.
pub fn apply_mapping(rows: Vec<Row>, mappings: &[FieldMapping]) -> Vec<Row> {
    if mappings.is_empty() {
        return rows;
    }

    let consumed: Vec<&str> = mappings
        .iter()
        .filter_map(|m| match &m.source {
            FieldSource::Field(name) => Some(name.as_str()),
            FieldSource::Derive(_) => None,
        })
        .collect();

    rows.into_iter()
        .map(|row| {
            let mut out = Row::with_capacity(row.len() + mappings.len());
            for mapping in mappings {
                out.insert(mapping.target.clone(), mapping.source.resolve(&row));
            }
            for (name, value) in row {
                if consumed.contains(&name.as_str()) || out.contains(&name) {
                    continue;
                }
                out.insert(name, value);
            }
            out
        })
        .collect()
}
