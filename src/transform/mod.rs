//! Row transforms applied between reading and writing: field mapping, type casts and filtering.

mod casts;
mod filter;
mod mapping;

pub use casts::{apply_type_casts, cast_boolean, CastPolicy, CastType};
pub use filter::{check_operators, filter_rows, Filter, FilterOperator};
pub use mapping::{apply_mapping, Derivation, Derive, FieldMapping, FieldSource};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Row;
use crate::error::Result;

/// The optional transform a job applies, in the order mapping, casts, filters.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformSpec {
    pub mappings: Vec<FieldMapping>,
    pub casts: BTreeMap<String, CastType>,
    pub filters: Vec<Filter>,
    /// Falls back to the configured policy when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cast_policy: Option<CastPolicy>,
}

impl TransformSpec {
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty() && self.casts.is_empty() && self.filters.is_empty()
    }

    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn with_cast(mut self, field: impl Into<String>, cast: CastType) -> Self {
        self.casts.insert(field.into(), cast);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Rejects filters whose operator is not recognised. Used when strict operators are configured.
    pub fn check_operators(&self) -> Result<()> {
        check_operators(&self.filters)
    }

    pub fn apply(&self, rows: Vec<Row>, default_policy: CastPolicy) -> Result<Vec<Row>> {
        if self.is_empty() {
            return Ok(rows);
        }

        let before = rows.len();
        let rows = apply_mapping(rows, &self.mappings);
        let rows = apply_type_casts(rows, &self.casts, self.cast_policy.unwrap_or(default_policy))?;
        let rows = filter_rows(rows, &self.filters);
        debug!(rows_in = before, rows_out = rows.len(), "Applied transform");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Value;

    #[test]
    fn test_empty_spec_is_identity() {
        let rows = vec![Row::from_iter([("a", Value::from("1"))])];
        let out = TransformSpec::default().apply(rows.clone(), CastPolicy::Strict).unwrap();
        assert_eq!(out, rows);
    }

    #[test]
    fn test_steps_run_in_order() {
        // The cast and the filter both see the renamed field.
        let spec = TransformSpec::default()
            .with_mapping(FieldMapping::rename("years", "age"))
            .with_cast("years", CastType::Integer)
            .with_filter(Filter::new("years", FilterOperator::Gt, 18i64));
        let rows = vec![
            Row::from_iter([("name", Value::from("Ann")), ("age", Value::from("30"))]),
            Row::from_iter([("name", Value::from("Bo")), ("age", Value::from("12"))]),
        ];
        let out = spec.apply(rows, CastPolicy::Strict).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("years"), Some(&Value::Integer(30)));
        assert_eq!(out[0].field_names().collect::<Vec<_>>(), vec!["years", "name"]);
    }

    #[test]
    fn test_policy_override() {
        let rows = vec![Row::from_iter([("n", Value::from("x"))])];
        let strict = TransformSpec::default().with_cast("n", CastType::Number);
        assert!(strict.apply(rows.clone(), CastPolicy::Strict).is_err());

        let lenient = TransformSpec {
            cast_policy: Some(CastPolicy::Lenient),
            ..strict
        };
        assert!(lenient.apply(rows, CastPolicy::Strict).is_ok());
    }

    #[test]
    fn test_spec_deserializes() {
        let json = r#"{
            "mappings": [{"target": "who", "source": "name"}],
            "casts": {"age": "int"},
            "filters": [{"field": "age", "operator": "==", "value": "30"}],
            "castPolicy": "lenient"
        }"#;
        let spec: TransformSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.casts.get("age"), Some(&CastType::Integer));
        assert_eq!(spec.cast_policy, Some(CastPolicy::Lenient));
        assert_eq!(spec.filters[0].operator, FilterOperator::Eq);
    }
}
