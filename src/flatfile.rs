//! Delimited flat-file reading and writing. Whole files are materialized in memory; async callers
//! go through [`run_blocking`].

use std::fs;
use std::io;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::Serialize;
use tracing::debug;

use crate::domain::{Delimiter, Row, Value};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub delimiter: Delimiter,
    pub has_header: bool,
    pub max_file_size: Option<u64>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            delimiter: Delimiter::COMMA,
            has_header: true,
            max_file_size: None,
        }
    }
}

impl ReadOptions {
    pub fn new(delimiter: Delimiter) -> Self {
        Self {
            delimiter,
            ..Self::default()
        }
    }

    pub fn without_header(mut self) -> Self {
        self.has_header = false;
        self
    }

    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = Some(max);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub delimiter: Delimiter,
    pub headers: Option<Vec<String>>,
}

impl WriteOptions {
    pub fn new(delimiter: Delimiter) -> Self {
        Self {
            delimiter,
            headers: None,
        }
    }

    pub fn with_headers(mut self, headers: Vec<String>) -> Self {
        self.headers = Some(headers);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlatFileData {
    pub rows: Vec<Row>,
    pub schema: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FilePreview {
    pub rows: Vec<Row>,
    pub total: usize,
    pub schema: Vec<String>,
}

fn io_error(path: &Path, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
        _ => Error::FileIo(format!("{}: {}", path.display(), err)),
    }
}

fn check_size(path: &Path, max: Option<u64>) -> Result<()> {
    let meta = fs::metadata(path).map_err(|e| io_error(path, e))?;
    if !meta.is_file() {
        return Err(Error::FileIo(format!("{} is not a regular file", path.display())));
    }
    if let Some(max) = max {
        if meta.len() > max {
            return Err(Error::FileIo(format!(
                "{} is {} bytes, larger than the {} byte limit",
                path.display(),
                meta.len(),
                max
            )));
        }
    }
    Ok(())
}

fn record_to_row(names: &[String], record: &StringRecord) -> Row {
    let mut row = Row::with_capacity(names.len());
    for (idx, name) in names.iter().enumerate() {
        let value = record
            .get(idx)
            .map(|cell| Value::String(cell.to_string()))
            .unwrap_or(Value::Null);
        row.insert(name.clone(), value);
    }
    row
}

/// Reads every record. Cells come back as strings; cells missing from a short record are null.
/// Without a header row, fields are named by position: `"0"`, `"1"`, ...
pub fn read(path: &Path, opts: &ReadOptions) -> Result<FlatFileData> {
    check_size(path, opts.max_file_size)?;

    let file = fs::File::open(path).map_err(|e| io_error(path, e))?;
    let mut reader = ReaderBuilder::new()
        .delimiter(opts.delimiter.as_byte())
        .has_headers(opts.has_header)
        .flexible(true)
        .from_reader(file);

    let mut names: Vec<String> = if opts.has_header {
        reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect()
    } else {
        Vec::new()
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if !opts.has_header && record.len() > names.len() {
            names.extend((names.len()..record.len()).map(|i| i.to_string()));
        }
        rows.push(record_to_row(&names, &record));
    }

    debug!(path = %path.display(), rows = rows.len(), columns = names.len(), "Read flat file");
    Ok(FlatFileData {
        rows,
        schema: names,
    })
}

/// Writes rows under the given headers, or the first row's field names. Null and missing fields are
/// written as empty cells. The parent directory is created when absent.
pub fn write(rows: &[Row], path: &Path, opts: &WriteOptions) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }

    let headers: Vec<String> = match &opts.headers {
        Some(h) => h.clone(),
        None => rows
            .first()
            .map(|r| r.field_names().map(str::to_string).collect())
            .unwrap_or_default(),
    };

    let mut writer = WriterBuilder::new()
        .delimiter(opts.delimiter.as_byte())
        .from_path(path)?;

    if !headers.is_empty() {
        writer.write_record(&headers)?;
        for row in rows {
            writer.write_record(headers.iter().map(|h| {
                row.get(h).map(Value::to_display_string).unwrap_or_default()
            }))?;
        }
    }
    writer.flush().map_err(|e| io_error(path, e))?;

    debug!(path = %path.display(), rows = rows.len(), "Wrote flat file");
    Ok(rows.len())
}

/// First `limit` rows plus the total row count.
pub fn preview(path: &Path, opts: &ReadOptions, limit: usize) -> Result<FilePreview> {
    let data = read(path, opts)?;
    let total = data.rows.len();
    let mut rows = data.rows;
    rows.truncate(limit);
    Ok(FilePreview {
        rows,
        total,
        schema: data.schema,
    })
}

/// Runs blocking file work off the async executor.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("File task failed: {}", e)))?
}
