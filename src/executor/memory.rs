use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlparser::ast::{
    Expr, JoinConstraint, JoinOperator, SelectItem, SetExpr, Statement, TableFactor,
    Value as SqlValue,
};
use sqlparser::dialect::ClickHouseDialect;
use sqlparser::parser::Parser;

use super::{Connector, ExecutorMode, QueryResult, StoreBackend};
use crate::domain::{ColumnDef, ConnectionDescriptor, Row, TableInfo, Value};
use crate::error::{Error, Result};
use crate::query::{Condition, CreateTable, InsertBatch, JoinClause, SelectQuery};

struct MemTable {
    columns: Vec<ColumnDef>,
    rows: Vec<Row>,
}

impl MemTable {
    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// In-process table storage backing mock mode. Shared between sessions through an `Arc`.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, MemTable>>,
    required_token: Option<String>,
}

/// `db.table` and `table` address the same table.
fn table_key(name: &str) -> &str {
    name.rsplit_once('.').map(|(_, t)| t).unwrap_or(name)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections must present this token or fail to open.
    pub fn with_required_token(token: impl Into<String>) -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            required_token: Some(token.into()),
        }
    }

    pub fn seed_table(&self, name: &str, columns: Vec<ColumnDef>, rows: Vec<Row>) {
        self.tables
            .write()
            .insert(table_key(name).to_string(), MemTable { columns, rows });
    }

    pub fn table_rows(&self, name: &str) -> Option<Vec<Row>> {
        self.tables.read().get(table_key(name)).map(|t| t.rows.clone())
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    pub fn drop_table(&self, name: &str) -> bool {
        self.tables.write().remove(table_key(name)).is_some()
    }
}

fn lookup<'a>(tables: &'a BTreeMap<String, MemTable>, name: &str) -> Result<&'a MemTable> {
    tables
        .get(table_key(name))
        .ok_or_else(|| Error::Query(format!("Table {} does not exist", name)))
}

/// The tables visible to a SELECT, in FROM/JOIN order.
struct Scope<'a> {
    sources: Vec<(&'a str, &'a MemTable)>,
}

impl<'a> Scope<'a> {
    /// Finds the source index and bare column name for `col`, `table.col` or `db.table.col`.
    fn locate<'r>(&self, reference: &'r str) -> Option<(usize, &'r str)> {
        match reference.rsplit_once('.') {
            Some((qualifier, column)) => {
                let qualifier = table_key(qualifier);
                self.sources
                    .iter()
                    .position(|(name, table)| table_key(name) == qualifier && table.has_column(column))
                    .map(|idx| (idx, column))
            }
            None => self
                .sources
                .iter()
                .position(|(_, table)| table.has_column(reference))
                .map(|idx| (idx, reference)),
        }
    }

    fn check(&self, reference: &str) -> Result<()> {
        match self.locate(reference) {
            Some(_) => Ok(()),
            None => Err(Error::Query(format!(
                "Missing columns: '{}' while processing query",
                reference
            ))),
        }
    }

    fn resolve(&self, combo: &[&Row], reference: &str) -> Value {
        self.locate(reference)
            .and_then(|(idx, column)| combo.get(idx).and_then(|row| row.get(column)))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Expands the selection into `(output name, source index, column)` triples.
    fn projection(&self, columns: &[String]) -> Result<Vec<(String, usize, ColumnDef)>> {
        let mut out = Vec::new();
        let all = columns.is_empty() || columns.iter().any(|c| c == "*");
        if all {
            for (idx, (_, table)) in self.sources.iter().enumerate() {
                for col in &table.columns {
                    out.push((col.name.clone(), idx, col.clone()));
                }
            }
            return Ok(out);
        }

        for reference in columns {
            if let Some(qualifier) = reference.strip_suffix(".*") {
                let qualifier = table_key(qualifier);
                let idx = self
                    .sources
                    .iter()
                    .position(|(name, _)| table_key(name) == qualifier)
                    .ok_or_else(|| Error::Query(format!("Unknown table in {}", reference)))?;
                for col in &self.sources[idx].1.columns {
                    out.push((col.name.clone(), idx, col.clone()));
                }
                continue;
            }
            self.check(reference)?;
            if let Some((idx, column)) = self.locate(reference) {
                if let Some(def) = self.sources[idx].1.column(column) {
                    out.push((reference.clone(), idx, ColumnDef::new(reference.clone(), def.column_type.clone())));
                }
            }
        }
        Ok(out)
    }
}

fn run_select(tables: &BTreeMap<String, MemTable>, query: &SelectQuery) -> Result<QueryResult> {
    let mut sources = Vec::with_capacity(query.joins.len() + 1);
    for name in query.tables() {
        sources.push((name, lookup(tables, name)?));
    }
    let scope = Scope { sources };

    let conditions = query.joins.iter().map(|j| &j.on).chain(query.filter.iter());
    for condition in conditions {
        for reference in condition.referenced_columns() {
            scope.check(reference)?;
        }
    }
    let projection = scope.projection(&query.columns)?;

    let mut combos: Vec<Vec<&Row>> = scope.sources[0].1.rows.iter().map(|r| vec![r]).collect();
    for (i, join) in query.joins.iter().enumerate() {
        let table = scope.sources[i + 1].1;
        let mut next = Vec::new();
        for combo in &combos {
            for candidate in &table.rows {
                let mut extended = combo.clone();
                extended.push(candidate);
                if join.on.evaluate(&|name: &str| scope.resolve(&extended, name)) {
                    next.push(extended);
                }
            }
        }
        combos = next;
    }

    let mut rows = Vec::new();
    for combo in &combos {
        if let Some(filter) = &query.filter {
            if !filter.evaluate(&|name: &str| scope.resolve(combo, name)) {
                continue;
            }
        }
        if query.limit.is_some_and(|limit| rows.len() >= limit) {
            break;
        }
        let row: Row = projection
            .iter()
            .map(|(out_name, idx, def)| {
                let column = def.name.rsplit('.').next().unwrap_or(&def.name);
                let value = combo[*idx].get(column).cloned().unwrap_or(Value::Null);
                (out_name.clone(), value)
            })
            .collect();
        rows.push(row);
    }

    Ok(QueryResult {
        columns: projection.into_iter().map(|(name, _, def)| ColumnDef::new(name, def.column_type)).collect(),
        rows,
    })
}

fn object_name(factor: &TableFactor) -> Result<String> {
    match factor {
        TableFactor::Table { name, .. } => Ok(name
            .0
            .iter()
            .map(|ident| ident.value.as_str())
            .collect::<Vec<_>>()
            .join(".")),
        other => Err(Error::Query(format!("Unsupported table expression in mock mode: {}", other))),
    }
}

fn constant(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Value(SqlValue::Number(n, _)) => n
            .parse::<i64>()
            .map(Value::Integer)
            .ok()
            .or_else(|| n.parse::<f64>().ok().map(Value::Float)),
        Expr::Value(SqlValue::SingleQuotedString(s)) => Some(Value::String(s.clone())),
        Expr::Value(SqlValue::Boolean(b)) => Some(Value::Boolean(*b)),
        Expr::Value(SqlValue::Null) => Some(Value::Null),
        _ => None,
    }
}

enum ParsedSql {
    Constant(QueryResult),
    Select(SelectQuery),
}

/// Understands the subset of SELECT the mock store can answer: a column list (or `*`), one table
/// with inner joins, a WHERE clause and LIMIT. A SELECT without FROM may project constants.
fn parse_select(sql: &str) -> Result<ParsedSql> {
    let dialect = ClickHouseDialect {};
    let statements = Parser::parse_sql(&dialect, sql)
        .map_err(|e| Error::Query(format!("Syntax error: {}\n\nSQL: {}", e, sql)))?;
    let query = match statements.as_slice() {
        [Statement::Query(query)] => query,
        _ => {
            return Err(Error::Query(
                "Only single SELECT statements are supported in mock mode".into(),
            ))
        }
    };
    let select = match query.body.as_ref() {
        SetExpr::Select(select) => select,
        _ => return Err(Error::Query("Set operations are not supported in mock mode".into())),
    };

    if select.from.is_empty() {
        let mut result = QueryResult::default();
        let mut row = Row::new();
        for item in &select.projection {
            let (name, expr) = match item {
                SelectItem::UnnamedExpr(expr) => (expr.to_string(), expr),
                SelectItem::ExprWithAlias { expr, alias } => (alias.value.clone(), expr),
                _ => return Err(Error::Query("Unsupported projection in mock mode".into())),
            };
            let value = constant(expr)
                .ok_or_else(|| Error::Query(format!("Unsupported expression in mock mode: {}", expr)))?;
            let column_type = match value {
                Value::Integer(_) => "Int64",
                Value::Float(_) => "Float64",
                Value::Boolean(_) => "Bool",
                _ => "String",
            };
            result.columns.push(ColumnDef::new(name.clone(), column_type));
            row.insert(name, value);
        }
        result.rows.push(row);
        return Ok(ParsedSql::Constant(result));
    }

    if select.from.len() != 1 {
        return Err(Error::Query("Comma joins are not supported in mock mode".into()));
    }
    let from = &select.from[0];
    let table = object_name(&from.relation)?;
    let mut joins = Vec::with_capacity(from.joins.len());
    for join in &from.joins {
        let on = match &join.join_operator {
            JoinOperator::Inner(JoinConstraint::On(expr)) => Condition::parse(&expr.to_string())?,
            _ => return Err(Error::Query("Only INNER JOIN ... ON is supported in mock mode".into())),
        };
        joins.push(JoinClause {
            table: object_name(&join.relation)?,
            on,
        });
    }

    let mut columns = Vec::with_capacity(select.projection.len());
    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) => columns.push("*".to_string()),
            SelectItem::QualifiedWildcard(name, _) => columns.push(format!(
                "{}.*",
                name.0.iter().map(|i| i.value.as_str()).collect::<Vec<_>>().join(".")
            )),
            SelectItem::UnnamedExpr(Expr::Identifier(ident)) => columns.push(ident.value.clone()),
            SelectItem::UnnamedExpr(Expr::CompoundIdentifier(idents)) => columns.push(
                idents.iter().map(|i| i.value.as_str()).collect::<Vec<_>>().join("."),
            ),
            other => {
                return Err(Error::Query(format!(
                    "Unsupported projection in mock mode: {}",
                    other
                )))
            }
        }
    }

    let filter = match &select.selection {
        Some(expr) => Some(Condition::parse(&expr.to_string())?),
        None => None,
    };
    let limit = match &query.limit {
        Some(Expr::Value(SqlValue::Number(n, _))) => Some(
            n.parse::<usize>()
                .map_err(|_| Error::Query(format!("Invalid LIMIT: {}", n)))?,
        ),
        Some(other) => return Err(Error::Query(format!("Unsupported LIMIT in mock mode: {}", other))),
        None => None,
    };

    Ok(ParsedSql::Select(SelectQuery {
        table,
        joins,
        columns,
        filter,
        limit,
    }))
}

pub struct MemoryExecutor {
    store: Arc<MemoryStore>,
}

impl MemoryExecutor {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StoreBackend for MemoryExecutor {
    fn mode(&self) -> ExecutorMode {
        ExecutorMode::Mock
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn select(&self, query: &SelectQuery) -> Result<QueryResult> {
        let tables = self.store.tables.read();
        run_select(&tables, query)
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        match parse_select(sql)? {
            ParsedSql::Constant(result) => Ok(result),
            ParsedSql::Select(query) => {
                let tables = self.store.tables.read();
                run_select(&tables, &query)
            }
        }
    }

    async fn create_table(&self, stmt: &CreateTable) -> Result<()> {
        let mut tables = self.store.tables.write();
        tables
            .entry(table_key(&stmt.table).to_string())
            .or_insert_with(|| MemTable {
                columns: stmt.columns.clone(),
                rows: Vec::new(),
            });
        Ok(())
    }

    async fn insert(&self, batch: &InsertBatch<'_>) -> Result<u64> {
        let mut tables = self.store.tables.write();
        let table = tables
            .get_mut(table_key(batch.table))
            .ok_or_else(|| Error::Query(format!("Table {} does not exist", batch.table)))?;

        if let Some(missing) = batch.columns.iter().find(|c| !table.has_column(c)) {
            return Err(Error::Query(format!(
                "No such column {} in table {}",
                missing, batch.table
            )));
        }

        for source in batch.rows {
            let row: Row = table
                .columns
                .iter()
                .map(|col| {
                    let value = if batch.columns.contains(&col.name) {
                        source.get(&col.name).cloned().unwrap_or(Value::Null)
                    } else {
                        Value::Null
                    };
                    (col.name.clone(), value)
                })
                .collect();
            table.rows.push(row);
        }
        Ok(batch.len() as u64)
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        Ok(self
            .store
            .table_names()
            .into_iter()
            .map(|name| TableInfo { name })
            .collect())
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDef>> {
        self.store
            .tables
            .read()
            .get(table_key(table))
            .map(|t| t.columns.clone())
            .ok_or_else(|| Error::SchemaAbsent(table.to_string()))
    }
}

pub struct MemoryConnector {
    store: Arc<MemoryStore>,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn mode(&self) -> ExecutorMode {
        ExecutorMode::Mock
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn StoreBackend>> {
        if let Some(expected) = &self.store.required_token {
            if descriptor.auth_token.as_deref() != Some(expected.as_str()) {
                return Err(Error::Connection("Authentication failed: invalid token".into()));
            }
        }
        Ok(Box::new(MemoryExecutor::new(Arc::clone(&self.store))))
    }
}
