use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::converters::rows_from_compact;
use super::{Connector, ExecutorMode, QueryResult, StoreBackend};
use crate::domain::{ColumnDef, ConnectionDescriptor, TableInfo};
use crate::error::{Error, Result};
use crate::query::{CreateTable, InsertBatch, SelectQuery};

#[derive(Debug, Deserialize)]
struct CompactResponse {
    #[serde(default)]
    meta: Vec<ColumnDef>,
    #[serde(default)]
    data: Vec<Vec<JsonValue>>,
}

/// Talks to ClickHouse over its HTTP interface.
pub struct ClickHouseExecutor {
    client: Client,
    base_url: String,
    database: String,
    username: String,
    password: String,
    auth_token: Option<String>,
}

impl ClickHouseExecutor {
    pub fn new(descriptor: &ConnectionDescriptor, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: descriptor.base_url(),
            database: descriptor.database.clone(),
            username: descriptor.username.clone(),
            password: descriptor.password.clone(),
            auth_token: descriptor.auth_token.clone(),
        })
    }

    /// Sends one statement. With a body, the statement travels in the `query` URL parameter and the
    /// body carries the data; otherwise the statement is the body. `params` become `param_<name>`.
    async fn send(&self, sql: &str, body: Option<String>, params: &[(&str, &str)]) -> Result<String> {
        let mut query: Vec<(String, String)> = vec![
            ("database".into(), self.database.clone()),
            ("output_format_json_quote_64bit_integers".into(), "0".into()),
        ];
        for (name, value) in params {
            query.push((format!("param_{}", name), value.to_string()));
        }

        let payload = match body {
            Some(data) => {
                query.push(("query".into(), sql.to_string()));
                data
            }
            None => sql.to_string(),
        };

        let mut request = self.client.post(&self.base_url).query(&query).body(payload);
        request = match &self.auth_token {
            Some(token) if !token.is_empty() && self.password.is_empty() => request.bearer_auth(token),
            _ => request
                .header("X-ClickHouse-User", &self.username)
                .header("X-ClickHouse-Key", &self.password),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                Error::Connection(format!("Cannot reach ClickHouse at {}: {}", self.base_url, e))
            } else {
                Error::Query(format!("Request failed: {}\n\nSQL: {}", e, sql))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Query(format!("Failed to read response: {}", e)))?;

        match status {
            s if s.is_success() => Ok(text),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Connection(format!(
                "Authentication failed: {}",
                text.trim()
            ))),
            s => Err(Error::Query(format!(
                "ClickHouse returned {}: {}\n\nSQL: {}",
                s,
                text.trim(),
                sql
            ))),
        }
    }

    async fn fetch(&self, sql: &str, params: &[(&str, &str)]) -> Result<QueryResult> {
        let sql = format!("{} FORMAT JSONCompact", sql.trim().trim_end_matches(';'));
        let text = self.send(&sql, None, params).await?;
        let response: CompactResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Query(format!("Unexpected response format: {}", e)))?;
        let rows = rows_from_compact(&response.meta, response.data);
        Ok(QueryResult {
            columns: response.meta,
            rows,
        })
    }

    fn split_table<'a>(&'a self, table: &'a str) -> (&'a str, &'a str) {
        match table.split_once('.') {
            Some((db, name)) => (db, name),
            None => (self.database.as_str(), table),
        }
    }
}

fn returns_rows(sql: &str) -> bool {
    let head = sql.trim_start().to_ascii_uppercase();
    ["SELECT", "WITH", "SHOW", "DESCRIBE", "DESC ", "EXPLAIN"]
        .iter()
        .any(|kw| head.starts_with(kw))
}

#[async_trait]
impl StoreBackend for ClickHouseExecutor {
    fn mode(&self) -> ExecutorMode {
        ExecutorMode::ClickHouse
    }

    async fn ping(&self) -> Result<()> {
        self.send("SELECT 1", None, &[]).await.map_err(|e| match e {
            Error::Connection(msg) => Error::Connection(msg),
            other => Error::Connection(format!("Probe query failed: {}", other)),
        })?;
        Ok(())
    }

    async fn select(&self, query: &SelectQuery) -> Result<QueryResult> {
        let sql = query.to_sql();
        tracing::debug!(sql = %sql, "Running select");
        self.fetch(&sql, &[]).await
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        if returns_rows(sql) {
            self.fetch(sql, &[]).await
        } else {
            self.send(sql, None, &[]).await?;
            Ok(QueryResult::default())
        }
    }

    async fn create_table(&self, stmt: &CreateTable) -> Result<()> {
        let sql = stmt.to_sql();
        tracing::info!(table = %stmt.table, "Creating table with fallback schema");
        self.send(&sql, None, &[]).await?;
        Ok(())
    }

    async fn insert(&self, batch: &InsertBatch<'_>) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }
        let payload = batch.payload()?;
        self.send(&batch.to_sql(), Some(payload), &[]).await?;
        Ok(batch.len() as u64)
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let result = self
            .fetch(
                "SELECT name FROM system.tables WHERE database = {db:String} ORDER BY name",
                &[("db", self.database.as_str())],
            )
            .await?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| row.get("name").map(|v| TableInfo {
                name: v.to_display_string(),
            }))
            .collect())
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDef>> {
        let (db, name) = self.split_table(table);
        let result = self
            .fetch(
                "SELECT name, type FROM system.columns WHERE database = {db:String} AND table = {table:String} ORDER BY position",
                &[("db", db), ("table", name)],
            )
            .await?;
        if result.rows.is_empty() {
            return Err(Error::SchemaAbsent(table.to_string()));
        }
        Ok(result
            .rows
            .iter()
            .map(|row| {
                ColumnDef::new(
                    row.get("name").map(|v| v.to_display_string()).unwrap_or_default(),
                    row.get("type").map(|v| v.to_display_string()).unwrap_or_default(),
                )
            })
            .collect())
    }
}

pub struct ClickHouseConnector {
    timeout: Duration,
}

impl ClickHouseConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ClickHouseConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Connector for ClickHouseConnector {
    fn mode(&self) -> ExecutorMode {
        ExecutorMode::ClickHouse
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn StoreBackend>> {
        Ok(Box::new(ClickHouseExecutor::new(descriptor, self.timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("  with x AS (SELECT 1) SELECT * FROM x"));
        assert!(returns_rows("show tables"));
        assert!(!returns_rows("INSERT INTO t VALUES (1)"));
        assert!(!returns_rows("DELETE FROM t WHERE 1"));
    }

    #[test]
    fn test_split_table() {
        let desc = ConnectionDescriptor::new("localhost", 8123, "analytics");
        let executor = ClickHouseExecutor::new(&desc, Duration::from_secs(1)).unwrap();
        assert_eq!(executor.split_table("events"), ("analytics", "events"));
        assert_eq!(executor.split_table("other.events"), ("other", "events"));
    }

    #[test]
    fn test_compact_response_parse() {
        let text = r#"{"meta":[{"name":"id","type":"UInt32"},{"name":"name","type":"String"}],"data":[[1,"Ann"],[2,"Bo"]],"rows":2}"#;
        let response: CompactResponse = serde_json::from_str(text).unwrap();
        assert_eq!(response.meta.len(), 2);
        let rows = rows_from_compact(&response.meta, response.data);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("name").unwrap().to_display_string(), "Bo");
    }

    #[tokio::test]
    async fn test_ping_unreachable_is_connection_error() {
        let desc = ConnectionDescriptor::new("127.0.0.1", 1, "default");
        let executor = ClickHouseExecutor::new(&desc, Duration::from_millis(500)).unwrap();
        let err = executor.ping().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Connection);
    }
}
