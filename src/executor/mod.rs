mod clickhouse;
mod converters;
mod memory;

pub use self::clickhouse::{ClickHouseConnector, ClickHouseExecutor};
pub use self::converters::{rows_from_compact, value_from_json};
pub use self::memory::{MemoryConnector, MemoryExecutor, MemoryStore};
pub use crate::domain::ColumnDef;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{ConnectionDescriptor, Row, TableInfo};
use crate::error::Result;
use crate::query::{CreateTable, InsertBatch, SelectQuery};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutorMode {
    #[default]
    Mock,
    ClickHouse,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// A live handle to one store. Implementations own their transport; dropping the handle releases it.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    fn mode(&self) -> ExecutorMode;

    /// Trivial probe statement used when a session opens.
    async fn ping(&self) -> Result<()>;

    async fn select(&self, query: &SelectQuery) -> Result<QueryResult>;

    /// Runs caller-supplied SQL that has already passed `validate_sql_for_query`.
    async fn execute_sql(&self, sql: &str) -> Result<QueryResult>;

    async fn create_table(&self, stmt: &CreateTable) -> Result<()>;

    /// Returns the number of rows written.
    async fn insert(&self, batch: &InsertBatch<'_>) -> Result<u64>;

    async fn list_tables(&self) -> Result<Vec<TableInfo>>;

    /// Columns in store order. A missing table is `Error::SchemaAbsent`.
    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDef>>;
}

/// Opens backends from connection descriptors.
#[async_trait]
pub trait Connector: Send + Sync {
    fn mode(&self) -> ExecutorMode;

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn StoreBackend>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Value;

    #[test]
    fn test_executor_mode_default() {
        let mode: ExecutorMode = Default::default();
        assert_eq!(mode, ExecutorMode::Mock);
    }

    #[test]
    fn test_executor_mode_eq() {
        assert_eq!(ExecutorMode::Mock, ExecutorMode::Mock);
        assert_ne!(ExecutorMode::Mock, ExecutorMode::ClickHouse);
    }

    #[test]
    fn test_query_result_column_names() {
        let result = QueryResult {
            columns: vec![ColumnDef::int64("id"), ColumnDef::string("name")],
            rows: vec![Row::from_iter([("id", Value::Integer(1)), ("name", Value::from("Ann"))])],
        };
        assert_eq!(result.column_names(), vec!["id", "name"]);
    }

    #[tokio::test]
    async fn test_memory_connector_mode() {
        let connector = MemoryConnector::new(std::sync::Arc::new(MemoryStore::new()));
        assert_eq!(connector.mode(), ExecutorMode::Mock);
        let backend = connector
            .connect(&ConnectionDescriptor::new("localhost", 8123, "default"))
            .await
            .unwrap();
        assert_eq!(backend.mode(), ExecutorMode::Mock);
        assert!(backend.ping().await.is_ok());
    }
}
