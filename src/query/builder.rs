use std::collections::HashSet;
use std::fmt::Write as _;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::domain::{ColumnDef, JoinSpec, Row, Value};
use crate::error::{Error, Result};
use crate::validation::{
    quote_identifier, quote_qualified, validate_column_name, validate_identifier,
    validate_table_name,
};

use super::predicate::Condition;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub table: String,
    pub on: Condition,
}

/// A validated SELECT. Identifiers have passed the allow-list and conditions are parsed trees.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub joins: Vec<JoinClause>,
    pub columns: Vec<String>,
    pub filter: Option<Condition>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn to_sql(&self) -> String {
        let mut sql = String::with_capacity(64 + self.columns.len() * 16);
        sql.push_str("SELECT ");
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            let cols: Vec<String> = self.columns.iter().map(|c| quote_qualified(c)).collect();
            sql.push_str(&cols.join(", "));
        }
        let _ = write!(sql, " FROM {}", quote_qualified(&self.table));
        for join in &self.joins {
            let _ = write!(sql, " JOIN {} ON {}", quote_qualified(&join.table), join.on);
        }
        if let Some(filter) = &self.filter {
            let _ = write!(sql, " WHERE {}", filter);
        }
        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {}", limit);
        }
        sql
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.table.as_str()).chain(self.joins.iter().map(|j| j.table.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

impl CreateTable {
    pub fn to_sql(&self) -> String {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_identifier(&c.name), c.column_type))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}) ENGINE = MergeTree() ORDER BY tuple()",
            quote_qualified(&self.table),
            cols.join(", ")
        )
    }
}

/// One INSERT statement worth of rows. Values travel in the `JSONEachRow` body, never in the SQL text.
#[derive(Debug, Clone, Copy)]
pub struct InsertBatch<'a> {
    pub table: &'a str,
    pub columns: &'a [String],
    pub rows: &'a [Row],
}

impl InsertBatch<'_> {
    pub fn to_sql(&self) -> String {
        let cols: Vec<String> = self.columns.iter().map(|c| quote_identifier(c)).collect();
        format!(
            "INSERT INTO {} ({}) FORMAT JSONEachRow",
            quote_qualified(self.table),
            cols.join(", ")
        )
    }

    /// Newline-delimited JSON objects, one per row, keyed by the selected columns in order.
    /// Fields missing from a row are sent as null.
    pub fn payload(&self) -> Result<String> {
        let mut body = String::with_capacity(self.rows.len() * (self.columns.len() * 16 + 2));
        for row in self.rows {
            let line = serde_json::to_string(&PayloadRow {
                columns: self.columns,
                row,
            })?;
            body.push_str(&line);
            body.push('\n');
        }
        Ok(body)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

struct PayloadRow<'a> {
    columns: &'a [String],
    row: &'a Row,
}

impl Serialize for PayloadRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for col in self.columns {
            map.serialize_entry(col, self.row.get(col).unwrap_or(&Value::Null))?;
        }
        map.end()
    }
}

fn check_duplicates(columns: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(columns.len());
    for col in columns {
        if !seen.insert(col.as_str()) {
            return Err(Error::Validation(format!("Duplicate column in selection: {}", col)));
        }
    }
    Ok(())
}

fn select_columns(columns: &[String]) -> Result<Vec<String>> {
    for col in columns {
        validate_column_name(col)?;
    }
    check_duplicates(columns)?;
    Ok(columns.to_vec())
}

fn parse_filter(predicate: Option<&str>) -> Result<Option<Condition>> {
    match predicate.map(str::trim) {
        Some(text) if !text.is_empty() => Condition::parse(text).map(Some),
        _ => Ok(None),
    }
}

/// `SELECT <cols> FROM <table> [WHERE <predicate>] [LIMIT <n>]`. An empty column list selects `*`.
pub fn build_select(
    table: &str,
    columns: &[String],
    predicate: Option<&str>,
    limit: Option<usize>,
) -> Result<SelectQuery> {
    validate_table_name(table)?;
    Ok(SelectQuery {
        table: table.to_string(),
        joins: Vec::new(),
        columns: select_columns(columns)?,
        filter: parse_filter(predicate)?,
        limit,
    })
}

/// `tables[0]` is the main table; `predicates[i]` joins `tables[i + 1]`.
pub fn build_join_select(
    tables: &[String],
    predicates: &[String],
    columns: &[String],
    predicate: Option<&str>,
    limit: Option<usize>,
) -> Result<SelectQuery> {
    let spec = JoinSpec::new(tables.to_vec(), predicates.to_vec());
    spec.validate()?;
    for table in tables {
        validate_table_name(table)?;
    }

    let joins = tables[1..]
        .iter()
        .zip(predicates)
        .map(|(table, on)| {
            Ok(JoinClause {
                table: table.clone(),
                on: Condition::parse(on)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SelectQuery {
        table: tables[0].clone(),
        joins,
        columns: select_columns(columns)?,
        filter: parse_filter(predicate)?,
        limit,
    })
}

fn insert_columns(columns: &[String]) -> Result<()> {
    if columns.is_empty() {
        return Err(Error::Validation("At least one column is required".into()));
    }
    for col in columns {
        validate_identifier(col)?;
    }
    check_duplicates(columns)
}

/// Fallback schema for a missing import target: every column is `String`.
pub fn build_create_table(table: &str, columns: &[String]) -> Result<CreateTable> {
    validate_table_name(table)?;
    insert_columns(columns)?;
    Ok(CreateTable {
        table: table.to_string(),
        columns: columns.iter().map(ColumnDef::string).collect(),
    })
}

pub fn build_batch_insert<'a>(
    table: &'a str,
    columns: &'a [String],
    rows: &'a [Row],
) -> Result<InsertBatch<'a>> {
    validate_table_name(table)?;
    insert_columns(columns)?;
    Ok(InsertBatch {
        table,
        columns,
        rows,
    })
}
