use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Batch {batch_index} failed after {inserted_count} rows were inserted: {message}")]
    ImportBatch {
        batch_index: usize,
        inserted_count: u64,
        message: String,
    },

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("File IO error: {0}")]
    FileIo(String),

    #[error("Table does not exist: {0}")]
    SchemaAbsent(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Machine-readable classification carried in result envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Connection,
    Validation,
    Query,
    ImportBatch,
    FileNotFound,
    FileIo,
    SchemaAbsent,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Validation => "validation",
            ErrorKind::Query => "query",
            ErrorKind::ImportBatch => "importBatch",
            ErrorKind::FileNotFound => "fileNotFound",
            ErrorKind::FileIo => "fileIo",
            ErrorKind::SchemaAbsent => "schemaAbsent",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) => ErrorKind::Connection,
            Error::Validation(_) | Error::Json(_) => ErrorKind::Validation,
            Error::Query(_) => ErrorKind::Query,
            Error::ImportBatch { .. } => ErrorKind::ImportBatch,
            Error::FileNotFound(_) => ErrorKind::FileNotFound,
            Error::FileIo(_) => ErrorKind::FileIo,
            Error::SchemaAbsent(_) => ErrorKind::SchemaAbsent,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Error::Connection(_) => -32001,
            Error::Validation(_) => -32600,
            Error::Query(_) => -32000,
            Error::ImportBatch { .. } => -32002,
            Error::FileNotFound(_) => -32003,
            Error::FileIo(_) => -32004,
            Error::SchemaAbsent(_) => -32005,
            Error::Internal(_) => -32603,
            Error::Json(_) => -32602,
        }
    }

    /// Validation failures are correctable by the caller; everything else is a store or file fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::Validation)
    }

    pub fn with_context(self, method: &str) -> Self {
        let context = format!("[method={}]", method);

        match self {
            Error::Connection(msg) => Error::Connection(format!("{} {}", context, msg)),
            Error::Query(msg) => Error::Query(format!("{} {}", context, msg)),
            Error::FileIo(msg) => Error::FileIo(format!("{} {}", context, msg)),
            Error::Internal(msg) => Error::Internal(format!("{} {}", context, msg)),
            other => other,
        }
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::FileIo(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
