use tracing::debug;

use super::Session;
use crate::domain::{ColumnDef, TableInfo};
use crate::error::{Error, Result};
use crate::validation::validate_table_name;

pub async fn list_tables(session: &Session) -> Result<Vec<TableInfo>> {
    let tables = session.backend()?.list_tables().await?;
    debug!(session_id = %session.id(), count = tables.len(), "Listed tables");
    Ok(tables)
}

/// Columns in the order the store reports them. A missing table is `Error::SchemaAbsent`.
pub async fn describe_table(session: &Session, table: &str) -> Result<Vec<ColumnDef>> {
    validate_table_name(table)?;
    session.backend()?.describe_table(table).await
}

pub async fn table_exists(session: &Session, table: &str) -> Result<bool> {
    match describe_table(session, table).await {
        Ok(_) => Ok(true),
        Err(Error::SchemaAbsent(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConnectionDescriptor, Row, Value};
    use crate::error::ErrorKind;
    use crate::executor::{MemoryConnector, MemoryStore};
    use std::sync::Arc;

    async fn session_with_users() -> Session {
        let store = Arc::new(MemoryStore::new());
        store.seed_table(
            "users",
            vec![ColumnDef::int64("id"), ColumnDef::string("name")],
            vec![Row::from_iter([("id", Value::Integer(1)), ("name", Value::from("Ann"))])],
        );
        let connector = MemoryConnector::new(store);
        Session::open(&connector, &ConnectionDescriptor::new("localhost", 8123, "default").with_token("t"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_tables() {
        let session = session_with_users().await;
        let tables = list_tables(&session).await.unwrap();
        assert_eq!(tables, vec![TableInfo { name: "users".into() }]);
    }

    #[tokio::test]
    async fn test_describe_table_is_idempotent() {
        let session = session_with_users().await;
        let first = describe_table(&session, "users").await.unwrap();
        let second = describe_table(&session, "users").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec![ColumnDef::int64("id"), ColumnDef::string("name")]);
    }

    #[tokio::test]
    async fn test_describe_missing_table() {
        let session = session_with_users().await;
        let err = describe_table(&session, "ghosts").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaAbsent);
        assert!(!table_exists(&session, "ghosts").await.unwrap());
        assert!(table_exists(&session, "users").await.unwrap());
    }

    #[tokio::test]
    async fn test_describe_rejects_bad_name() {
        let session = session_with_users().await;
        let err = describe_table(&session, "users; DROP TABLE users").await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_closed_session_errors() {
        let mut session = session_with_users().await;
        session.close();
        let err = list_tables(&session).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }
}
