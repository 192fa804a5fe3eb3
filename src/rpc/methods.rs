use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::types::{
    ApiResult, ConnectParams, DescribeTableParams, ExecuteQueryParams, ExportJoinParams,
    ExportTableParams, FileParams, ImportFileParams, PreviewFileParams, PreviewTableParams,
};
use crate::config::{Config, StoreConfig};
use crate::domain::JoinSpec;
use crate::error::{Error, Result};
use crate::executor::Connector;
use crate::flatfile::{self, ReadOptions};
use crate::metrics::{record_request, record_request_error};
use crate::query::build_select;
use crate::session;
use crate::transfer::{ExportJob, ImportJob, JoinExportJob, TransferEngine};
use crate::validation::{resolve_upload_path, validate_sql_for_query};

pub const METHODS: &[&str] = &[
    "connect",
    "listTables",
    "describeTable",
    "executeQuery",
    "previewTable",
    "exportTable",
    "exportJoin",
    "importFile",
    "previewFile",
    "listFiles",
    "deleteFile",
];

fn parse<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::Validation(format!("Missing or invalid fields: {}", e)))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

pub struct RpcMethods {
    engine: TransferEngine,
    store: StoreConfig,
    block_symlinks: bool,
    restrict_queries: bool,
}

impl RpcMethods {
    pub fn new(connector: Arc<dyn Connector>, config: &Config) -> Self {
        Self {
            engine: TransferEngine::new(connector, config.transfer.clone()),
            store: config.store.clone(),
            block_symlinks: config.security.block_symlinks,
            restrict_queries: config.security.restrict_queries,
        }
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    pub fn is_known(method: &str) -> bool {
        METHODS.contains(&method)
    }

    /// Runs one operation and always answers with an envelope. Errors and panics become
    /// `success: false` with an error kind.
    pub async fn dispatch(&self, method: &str, params: Value) -> ApiResult {
        record_request(method);

        let result = match AssertUnwindSafe(self.call(method, params)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(Error::Internal(format!("Handler panicked: {}", panic_message(payload)))),
        };

        match result {
            Ok(envelope) => envelope,
            Err(e) => {
                let e = e.with_context(method);
                record_request_error(method, e.kind().as_str());
                if e.is_client_error() {
                    warn!(method, error = %e, "Request rejected");
                } else {
                    error!(method, error = %e, "Request failed");
                }
                ApiResult::from_error(&e, self.engine.settings().production)
            }
        }
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<ApiResult> {
        match method {
            "connect" => self.connect(params).await,
            "listTables" => self.list_tables(params).await,
            "describeTable" => self.describe_table(params).await,
            "executeQuery" => self.execute_query(params).await,
            "previewTable" => self.preview_table(params).await,
            "exportTable" => self.export_table(params).await,
            "exportJoin" => self.export_join(params).await,
            "importFile" => self.import_file(params).await,
            "previewFile" => self.preview_file(params).await,
            "listFiles" => self.list_files(params).await,
            "deleteFile" => self.delete_file(params).await,
            _ => Err(Error::Validation(format!("Unknown method: {}", method))),
        }
    }

    fn upload_path(&self, name: &str) -> Result<PathBuf> {
        resolve_upload_path(&self.engine.settings().upload_dir, name, self.block_symlinks)
    }

    /// Resolves a file for download. The HTTP layer streams it; it is not a JSON-RPC method.
    pub fn download_path(&self, name: &str) -> Result<PathBuf> {
        let path = self.upload_path(name)?;
        if !path.is_file() {
            return Err(Error::FileNotFound(path));
        }
        Ok(path)
    }

    async fn connect(&self, params: Value) -> Result<ApiResult> {
        let p: ConnectParams = parse(params)?;
        let mut session = self.engine.open_session(&p.connection.descriptor(&self.store)).await?;
        session.close();
        Ok(ApiResult::ok("Connected to ClickHouse successfully"))
    }

    async fn list_tables(&self, params: Value) -> Result<ApiResult> {
        let p: ConnectParams = parse(params)?;
        let mut session = self.engine.open_session(&p.connection.descriptor(&self.store)).await?;
        let tables = session::list_tables(&session).await;
        session.close();
        let tables = tables?;
        Ok(ApiResult::ok("Tables listed")
            .with_count(tables.len())
            .with_data(json!(tables)))
    }

    async fn describe_table(&self, params: Value) -> Result<ApiResult> {
        let p: DescribeTableParams = parse(params)?;
        let mut session = self.engine.open_session(&p.connection.descriptor(&self.store)).await?;
        let columns = session::describe_table(&session, &p.table_name).await;
        session.close();
        let columns = columns?;
        Ok(ApiResult::ok(format!("Schema for {}", p.table_name))
            .with_count(columns.len())
            .with_data(json!(columns)))
    }

    async fn execute_query(&self, params: Value) -> Result<ApiResult> {
        let p: ExecuteQueryParams = parse(params)?;
        if self.restrict_queries {
            validate_sql_for_query(&p.query)?;
        } else if p.query.trim().is_empty() {
            return Err(Error::Validation("Query cannot be empty".into()));
        }
        let mut session = self.engine.open_session(&p.connection.descriptor(&self.store)).await?;
        let result = match session.backend() {
            Ok(backend) => backend.execute_sql(&p.query).await,
            Err(e) => Err(e),
        };
        session.close();
        let result = result?;
        Ok(ApiResult::ok("Query executed")
            .with_count(result.rows.len())
            .with_schema(json!(result.columns))
            .with_data(json!(result.rows)))
    }

    async fn preview_table(&self, params: Value) -> Result<ApiResult> {
        let p: PreviewTableParams = parse(params)?;
        let limit = p.limit.unwrap_or(self.engine.settings().preview_limit);
        let query = build_select(&p.table_name, &p.selected_columns, None, Some(limit))?;
        let mut session = self.engine.open_session(&p.connection.descriptor(&self.store)).await?;
        let result = match session.backend() {
            Ok(backend) => backend.select(&query).await,
            Err(e) => Err(e),
        };
        session.close();
        let result = result?;
        Ok(ApiResult::ok("Preview loaded")
            .with_count(result.rows.len())
            .with_data(json!(result.rows)))
    }

    async fn export_table(&self, params: Value) -> Result<ApiResult> {
        let p: ExportTableParams = parse(params)?;
        let job = ExportJob {
            connection: p.connection.descriptor(&self.store),
            table: p.table_name,
            columns: p.selected_columns,
            predicate: p.conditions,
            output: self.upload_path(&p.output_file_name)?,
            delimiter: p.delimiter,
            transform: p.transform,
        };
        let outcome = self.engine.run_export_to_file(job).await?;
        info!(rows = outcome.row_count, path = %outcome.file_path.display(), "Table exported");
        Ok(ApiResult::ok("Data successfully exported to file")
            .with_count(outcome.row_count)
            .with_file_path(outcome.file_path.display().to_string()))
    }

    async fn export_join(&self, params: Value) -> Result<ApiResult> {
        let p: ExportJoinParams = parse(params)?;
        let job = JoinExportJob {
            connection: p.connection.descriptor(&self.store),
            join: JoinSpec::new(p.tables, p.join_conditions),
            columns: p.selected_columns,
            predicate: p.conditions,
            output: self.upload_path(&p.output_file_name)?,
            delimiter: p.delimiter,
            transform: p.transform,
        };
        let outcome = self.engine.run_join_export_to_file(job).await?;
        Ok(ApiResult::ok("Joined data successfully exported to file")
            .with_count(outcome.row_count)
            .with_file_path(outcome.file_path.display().to_string()))
    }

    async fn import_file(&self, params: Value) -> Result<ApiResult> {
        let p: ImportFileParams = parse(params)?;
        let job = ImportJob {
            connection: p.connection.descriptor(&self.store),
            table: p.table_name,
            columns: p.selected_columns,
            input: self.upload_path(&p.file_path)?,
            delimiter: p.delimiter,
            has_header: p.has_header,
            transform: p.transform,
            batch_size: p.batch_size,
        };
        let outcome = self.engine.run_import_from_file(job).await?.into_result()?;
        Ok(ApiResult::ok("Data successfully imported to ClickHouse")
            .with_count(outcome.inserted_count as usize)
            .with_inserted_count(outcome.inserted_count))
    }

    async fn preview_file(&self, params: Value) -> Result<ApiResult> {
        let p: PreviewFileParams = parse(params)?;
        let path = self.upload_path(&p.file_path)?;
        let mut opts = ReadOptions::new(p.delimiter).with_max_file_size(self.engine.settings().max_file_size);
        if !p.has_header {
            opts = opts.without_header();
        }
        let limit = p.limit.unwrap_or(self.engine.settings().preview_limit);
        let preview = flatfile::run_blocking(move || flatfile::preview(&path, &opts, limit)).await?;
        Ok(ApiResult::ok("File preview loaded")
            .with_count(preview.total)
            .with_schema(json!(preview.schema))
            .with_data(json!(preview.rows)))
    }

    async fn list_files(&self, _params: Value) -> Result<ApiResult> {
        let dir = self.engine.settings().upload_dir.clone();
        let files = flatfile::run_blocking(move || {
            std::fs::create_dir_all(&dir).map_err(|e| Error::FileIo(e.to_string()))?;
            let mut names = Vec::new();
            for entry in std::fs::read_dir(&dir).map_err(|e| Error::FileIo(e.to_string()))? {
                let entry = entry.map_err(|e| Error::FileIo(e.to_string()))?;
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            Ok(names)
        })
        .await?;
        Ok(ApiResult::ok("Files listed").with_count(files.len()).with_data(json!(files)))
    }

    async fn delete_file(&self, params: Value) -> Result<ApiResult> {
        let p: FileParams = parse(params)?;
        let path = self.upload_path(&p.file_path)?;
        flatfile::run_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::FileNotFound(path)),
            Err(e) => Err(Error::FileIo(e.to_string())),
        })
        .await?;
        Ok(ApiResult::ok("File deleted successfully"))
    }
}
