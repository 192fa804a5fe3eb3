use crate::error::{Error, Result};
use regex::Regex;
use sqlparser::ast::Statement;
use sqlparser::dialect::ClickHouseDialect;
use sqlparser::parser::Parser;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

const MAX_IDENTIFIER_LEN: usize = 128;

static IDENTIFIER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("IDENTIFIER_REGEX pattern is valid")
});

static TABLE_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)?$")
        .expect("TABLE_NAME_REGEX pattern is valid")
});

static COLUMN_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\*|[a-zA-Z_][a-zA-Z0-9_]*(\.([a-zA-Z_][a-zA-Z0-9_]*|\*))?)$")
        .expect("COLUMN_NAME_REGEX pattern is valid")
});

pub fn validate_identifier(name: &str) -> Result<()> {
    if name.len() > MAX_IDENTIFIER_LEN || !IDENTIFIER_REGEX.is_match(name) {
        return Err(Error::Validation(format!("Invalid identifier: {}", name)));
    }
    Ok(())
}

/// Accepts `table` or `database.table`.
pub fn validate_table_name(name: &str) -> Result<()> {
    if name.len() > MAX_IDENTIFIER_LEN || !TABLE_NAME_REGEX.is_match(name) {
        return Err(Error::Validation(format!("Invalid table name: {}", name)));
    }
    Ok(())
}

/// Accepts `col`, `table.col`, `table.*` and `*`.
pub fn validate_column_name(name: &str) -> Result<()> {
    if name.len() > MAX_IDENTIFIER_LEN || !COLUMN_NAME_REGEX.is_match(name) {
        return Err(Error::Validation(format!("Invalid column name: {}", name)));
    }
    Ok(())
}

pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quotes each dotted part separately, leaving `*` bare.
pub fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(|part| if part == "*" { "*".to_string() } else { quote_identifier(part) })
        .collect::<Vec<_>>()
        .join(".")
}

/// Validates SQL for ad hoc execution.
/// Blocks DDL statements (CREATE, DROP, ALTER, TRUNCATE) but allows queries and DML.
pub fn validate_sql_for_query(sql: &str) -> Result<()> {
    if sql.trim().is_empty() {
        return Err(Error::Validation("Query cannot be empty".into()));
    }

    let dialect = ClickHouseDialect {};

    let statements = Parser::parse_sql(&dialect, sql)
        .map_err(|e| Error::Validation(format!("Invalid SQL syntax: {}", e)))?;

    if statements.len() != 1 {
        return Err(Error::Validation("Only single statements allowed".into()));
    }

    match &statements[0] {
        Statement::Query(_) => Ok(()),
        Statement::Insert(_) => Ok(()),
        Statement::Update { .. } => Ok(()),
        Statement::Delete(_) => Ok(()),
        Statement::ShowTables { .. } | Statement::ExplainTable { .. } => Ok(()),
        Statement::CreateTable { .. } => Err(Error::Validation(
            "CREATE TABLE not allowed via executeQuery; import a file instead".into(),
        )),
        Statement::CreateView { .. } => Err(Error::Validation("CREATE VIEW not allowed".into())),
        Statement::Drop { .. } => Err(Error::Validation(
            "DROP statements not allowed via executeQuery".into(),
        )),
        Statement::AlterTable { .. } => Err(Error::Validation("ALTER TABLE not allowed".into())),
        Statement::Truncate { .. } => Err(Error::Validation("TRUNCATE not allowed".into())),
        Statement::Grant { .. } => Err(Error::Validation("GRANT not allowed".into())),
        Statement::Revoke { .. } => Err(Error::Validation("REVOKE not allowed".into())),
        _ => Err(Error::Validation(
            "Statement type not allowed via executeQuery".into(),
        )),
    }
}

fn validate_path_preliminary(path: &str) -> Result<&Path> {
    if path.trim().is_empty() {
        return Err(Error::Validation("Path cannot be empty".into()));
    }
    if path.contains('\0') {
        return Err(Error::Validation("Path contains null byte".into()));
    }

    let path = Path::new(path);
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(Error::Validation("Path traversal not allowed".into()));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Validation("Absolute paths not allowed".into()));
            }
            _ => {}
        }
    }

    Ok(path)
}

/// Resolves a client-supplied file name inside the upload directory.
/// Names that already start with the upload directory are taken as-is.
pub fn resolve_upload_path(upload_dir: &Path, name: &str, block_symlinks: bool) -> Result<PathBuf> {
    let relative = validate_path_preliminary(name)?;
    let resolved = if relative.starts_with(upload_dir) {
        relative.to_path_buf()
    } else {
        upload_dir.join(relative)
    };

    if block_symlinks {
        if let Ok(meta) = std::fs::symlink_metadata(&resolved) {
            if meta.file_type().is_symlink() {
                return Err(Error::Validation("Symlinks not allowed".into()));
            }
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_simple() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("my_table").is_ok());
        assert!(validate_identifier("_private").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_dots() {
        assert!(validate_identifier("db.users").is_err());
    }

    #[test]
    fn test_validate_table_name_qualified() {
        assert!(validate_table_name("analytics.events").is_ok());
        assert!(validate_table_name("a.b.c").is_err());
    }

    #[test]
    fn test_validate_table_name_invalid_start() {
        assert!(validate_table_name("123table").is_err());
        assert!(validate_table_name("-table").is_err());
    }

    #[test]
    fn test_validate_table_name_invalid_chars() {
        assert!(validate_table_name("table-name").is_err());
        assert!(validate_table_name("table name").is_err());
        assert!(validate_table_name("users; DROP TABLE users").is_err());
    }

    #[test]
    fn test_validate_table_name_length() {
        assert!(validate_table_name(&"a".repeat(128)).is_ok());
        assert!(validate_table_name(&"a".repeat(129)).is_err());
        assert!(validate_table_name("").is_err());
    }

    #[test]
    fn test_validate_column_name() {
        assert!(validate_column_name("id").is_ok());
        assert!(validate_column_name("orders.id").is_ok());
        assert!(validate_column_name("orders.*").is_ok());
        assert!(validate_column_name("*").is_ok());
        assert!(validate_column_name("count(*)").is_err());
        assert!(validate_column_name("id, password").is_err());
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("my_table"), "`my_table`");
        assert_eq!(quote_identifier("my`table"), "`my``table`");
    }

    #[test]
    fn test_quote_qualified() {
        assert_eq!(quote_qualified("orders.id"), "`orders`.`id`");
        assert_eq!(quote_qualified("orders.*"), "`orders`.*");
        assert_eq!(quote_qualified("*"), "*");
        assert_eq!(quote_qualified("name"), "`name`");
    }

    #[test]
    fn test_query_select_allowed() {
        assert!(validate_sql_for_query("SELECT id, name FROM users WHERE id > 1").is_ok());
        assert!(validate_sql_for_query("SELECT 1").is_ok());
    }

    #[test]
    fn test_query_insert_allowed() {
        assert!(validate_sql_for_query("INSERT INTO users (id) VALUES (1)").is_ok());
    }

    #[test]
    fn test_query_drop_blocked() {
        let result = validate_sql_for_query("DROP TABLE users");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("DROP"));
    }

    #[test]
    fn test_query_create_table_blocked() {
        assert!(validate_sql_for_query("CREATE TABLE t (id Int64) ENGINE = Memory").is_err());
    }

    #[test]
    fn test_query_truncate_blocked() {
        assert!(validate_sql_for_query("TRUNCATE TABLE users").is_err());
    }

    #[test]
    fn test_query_multi_statement_blocked() {
        let result = validate_sql_for_query("SELECT 1; DROP TABLE users");
        assert!(result.is_err());
    }

    #[test]
    fn test_query_empty_blocked() {
        assert!(validate_sql_for_query("   ").is_err());
    }

    #[test]
    fn test_query_invalid_syntax() {
        let result = validate_sql_for_query("SELEC id FROM");
        assert!(result.unwrap_err().is_client_error());
    }

    #[test]
    fn test_resolve_upload_path_joins_dir() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_upload_path(dir.path(), "out.csv", true).unwrap();
        assert_eq!(resolved, dir.path().join("out.csv"));
    }

    #[test]
    fn test_resolve_upload_path_keeps_prefixed_name() {
        let resolved = resolve_upload_path(Path::new("uploads"), "uploads/abc.csv", true).unwrap();
        assert_eq!(resolved, PathBuf::from("uploads/abc.csv"));
    }

    #[test]
    fn test_resolve_upload_path_traversal_blocked() {
        let result = resolve_upload_path(Path::new("uploads"), "../etc/passwd", true);
        assert!(result.unwrap_err().to_string().contains("traversal"));
    }

    #[test]
    fn test_resolve_upload_path_absolute_blocked() {
        assert!(resolve_upload_path(Path::new("uploads"), "/etc/passwd", true).is_err());
    }

    #[test]
    fn test_resolve_upload_path_null_byte_blocked() {
        assert!(resolve_upload_path(Path::new("uploads"), "a\0b.csv", true).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_upload_path_symlink_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real.csv");
        std::fs::write(&target, "a\n1\n").unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("link.csv")).unwrap();

        assert!(resolve_upload_path(dir.path(), "link.csv", true).is_err());
        assert!(resolve_upload_path(dir.path(), "link.csv", false).is_ok());
    }
}
