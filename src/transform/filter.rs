use std::cmp::Ordering;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{Row, Value};
use crate::error::{Error, Result};

/// Comparison applied by a [`Filter`]. Names outside the known set parse as `Unknown`, which keeps every
/// row unless the transfer settings ask for strict operators.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum FilterOperator {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
    Unknown(String),
}

impl FilterOperator {
    pub fn is_unknown(&self) -> bool {
        matches!(self, FilterOperator::Unknown(_))
    }
}

impl FromStr for FilterOperator {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Infallible> {
        let op = match s.trim().to_ascii_lowercase().as_str() {
            "eq" | "=" | "==" | "equals" => FilterOperator::Eq,
            "neq" | "!=" | "<>" | "not equals" => FilterOperator::NotEq,
            "gt" | ">" | "greater than" => FilterOperator::Gt,
            "gte" | ">=" | "greater than or equals" => FilterOperator::GtEq,
            "lt" | "<" | "less than" => FilterOperator::Lt,
            "lte" | "<=" | "less than or equals" => FilterOperator::LtEq,
            "contains" => FilterOperator::Contains,
            "starts with" => FilterOperator::StartsWith,
            "ends with" => FilterOperator::EndsWith,
            "is null" => FilterOperator::IsNull,
            "is not null" => FilterOperator::IsNotNull,
            _ => FilterOperator::Unknown(s.to_string()),
        };
        Ok(op)
    }
}

impl From<String> for FilterOperator {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(op) => op,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterOperator::Eq => "eq",
            FilterOperator::NotEq => "neq",
            FilterOperator::Gt => "gt",
            FilterOperator::GtEq => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::LtEq => "lte",
            FilterOperator::Contains => "contains",
            FilterOperator::StartsWith => "starts with",
            FilterOperator::EndsWith => "ends with",
            FilterOperator::IsNull => "is null",
            FilterOperator::IsNotNull => "is not null",
            FilterOperator::Unknown(raw) => raw.as_str(),
        };
        f.write_str(name)
    }
}

impl From<FilterOperator> for String {
    fn from(op: FilterOperator) -> Self {
        op.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Filter {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        // A filter without a field name constrains nothing.
        if self.field.is_empty() {
            return true;
        }

        let cell = row.get(&self.field).unwrap_or(&Value::Null);
        let ordering = || cell.loose_cmp(&self.value);
        let text = || (!cell.is_null()).then(|| cell.to_display_string());
        let needle = self.value.to_display_string();

        match &self.operator {
            FilterOperator::Eq => cell.loose_eq(&self.value),
            FilterOperator::NotEq => !cell.loose_eq(&self.value),
            FilterOperator::Gt => ordering() == Some(Ordering::Greater),
            FilterOperator::GtEq => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
            FilterOperator::Lt => ordering() == Some(Ordering::Less),
            FilterOperator::LtEq => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
            FilterOperator::Contains => text().is_some_and(|t| t.contains(&needle)),
            FilterOperator::StartsWith => text().is_some_and(|t| t.starts_with(&needle)),
            FilterOperator::EndsWith => text().is_some_and(|t| t.ends_with(&needle)),
            FilterOperator::IsNull => cell.is_null(),
            FilterOperator::IsNotNull => !cell.is_null(),
            FilterOperator::Unknown(_) => true,
        }
    }
}

/// Fails on the first filter whose operator is not recognised.
pub fn check_operators(filters: &[Filter]) -> Result<()> {
    match filters.iter().find(|f| f.operator.is_unknown()) {
        Some(f) => Err(Error::Validation(format!(
            "Unknown filter operator '{}' on field '{}'",
            f.operator, f.field
        ))),
        None => Ok(()),
    }
}

/// Keeps the rows that satisfy every filter. Filters with an unknown operator keep every row.
pub fn filter_rows(rows: Vec<Row>, filters: &[Filter]) -> Vec<Row> {
    if filters.is_empty() {
        return rows;
    }
    for f in filters.iter().filter(|f| f.operator.is_unknown()) {
        warn!(field = %f.field, operator = %f.operator, "Unknown filter operator, condition ignored");
    }
    rows.into_iter()
        .filter(|row| filters.iter().all(|f| f.matches(row)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Vec<Row> {
        vec![
            Row::from_iter([("name", Value::from("Ann")), ("age", Value::from("30"))]),
            Row::from_iter([("name", Value::from("Bo")), ("age", Value::Integer(30))]),
            Row::from_iter([("name", Value::from("Cy")), ("age", Value::from("41"))]),
            Row::from_iter([("name", Value::Null), ("age", Value::from("17"))]),
        ]
    }

    fn names(rows: &[Row]) -> Vec<String> {
        rows.iter()
            .map(|r| r.get("name").map(|v| v.to_display_string()).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_loose_equality_on_age() {
        let out = filter_rows(people(), &[Filter::new("age", FilterOperator::Eq, 30i64)]);
        assert_eq!(names(&out), vec!["Ann", "Bo"]);
    }

    #[test]
    fn test_relational_operators() {
        let out = filter_rows(people(), &[Filter::new("age", FilterOperator::Gt, 29i64)]);
        assert_eq!(out.len(), 3);
        let out = filter_rows(people(), &[Filter::new("age", FilterOperator::LtEq, 30i64)]);
        assert_eq!(names(&out), vec!["Ann", "Bo", ""]);
    }

    #[test]
    fn test_and_semantics() {
        let out = filter_rows(
            people(),
            &[
                Filter::new("age", FilterOperator::GtEq, 30i64),
                Filter::new("name", FilterOperator::NotEq, "Bo"),
            ],
        );
        assert_eq!(names(&out), vec!["Ann", "Cy"]);
    }

    #[test]
    fn test_string_operators_and_nulls() {
        let out = filter_rows(people(), &[Filter::new("name", FilterOperator::StartsWith, "C")]);
        assert_eq!(names(&out), vec!["Cy"]);
        let out = filter_rows(people(), &[Filter::new("name", FilterOperator::Contains, "n")]);
        assert_eq!(names(&out), vec!["Ann"]);
        let out = filter_rows(people(), &[Filter::new("name", FilterOperator::IsNull, Value::Null)]);
        assert_eq!(out.len(), 1);
        let out = filter_rows(people(), &[Filter::new("email", FilterOperator::IsNull, Value::Null)]);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_operator_synonyms() {
        for s in ["eq", "=", "==", "EQUALS"] {
            assert_eq!(s.parse::<FilterOperator>().unwrap(), FilterOperator::Eq);
        }
        for s in ["neq", "!=", "<>", "not equals"] {
            assert_eq!(s.parse::<FilterOperator>().unwrap(), FilterOperator::NotEq);
        }
        assert_eq!("Greater Than Or Equals".parse::<FilterOperator>().unwrap(), FilterOperator::GtEq);
        assert_eq!("is not null".parse::<FilterOperator>().unwrap(), FilterOperator::IsNotNull);
    }

    #[test]
    fn test_unknown_operator_keeps_every_row() {
        let f: Filter =
            serde_json::from_str(r#"{"field": "age", "operator": "between", "value": 3}"#).unwrap();
        assert_eq!(f.operator, FilterOperator::Unknown("between".into()));
        assert_eq!(filter_rows(people(), &[f.clone()]).len(), 4);

        // Still combines with the other filters.
        let out = filter_rows(people(), &[f, Filter::new("name", FilterOperator::Eq, "Cy")]);
        assert_eq!(names(&out), vec!["Cy"]);
    }

    #[test]
    fn test_check_operators_flags_unknown() {
        let filters = vec![
            Filter::new("age", FilterOperator::Gt, 1i64),
            Filter::new("age", "approximately".parse::<FilterOperator>().unwrap(), 3i64),
        ];
        let err = check_operators(&filters).unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("approximately"));
        assert!(check_operators(&filters[..1]).is_ok());
    }

    #[test]
    fn test_unknown_operator_round_trips_raw_name() {
        let f = Filter::new("age", FilterOperator::from("Between".to_string()), 3i64);
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["operator"], "Between");
    }

    #[test]
    fn test_filter_deserializes() {
        let f: Filter = serde_json::from_str(r#"{"field": "age", "operator": ">=", "value": 30}"#).unwrap();
        assert_eq!(f, Filter::new("age", FilterOperator::GtEq, 30i64));
    }
}
