mod events;
#[cfg(test)]
mod tests;

pub use events::{JobDirection, JobEvent, JobState, ProgressReceiver, ProgressSender};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::domain::{ConnectionDescriptor, Delimiter, JoinSpec, Row};
use crate::error::{Error, Result};
use crate::executor::Connector;
use crate::flatfile::{self, ReadOptions, WriteOptions};
use crate::metrics::{record_batch_failed, record_rows_exported, record_rows_imported};
use crate::query::{build_batch_insert, build_create_table, build_join_select, build_select};
use crate::session::{self, Session};
use crate::transform::TransformSpec;

use events::JobTracker;

#[derive(Debug, Clone)]
pub struct ExportJob {
    pub connection: ConnectionDescriptor,
    pub table: String,
    pub columns: Vec<String>,
    pub predicate: Option<String>,
    pub output: PathBuf,
    pub delimiter: Delimiter,
    pub transform: Option<TransformSpec>,
}

#[derive(Debug, Clone)]
pub struct JoinExportJob {
    pub connection: ConnectionDescriptor,
    pub join: JoinSpec,
    pub columns: Vec<String>,
    pub predicate: Option<String>,
    pub output: PathBuf,
    pub delimiter: Delimiter,
    pub transform: Option<TransformSpec>,
}

#[derive(Debug, Clone)]
pub struct ImportJob {
    pub connection: ConnectionDescriptor,
    pub table: String,
    /// Empty means every column of the file.
    pub columns: Vec<String>,
    pub input: PathBuf,
    pub delimiter: Delimiter,
    pub has_header: bool,
    pub transform: Option<TransformSpec>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum TransferJob {
    Export(ExportJob),
    JoinExport(JoinExportJob),
    Import(ImportJob),
}

impl TransferJob {
    pub fn direction(&self) -> JobDirection {
        match self {
            TransferJob::Export(_) => JobDirection::Export,
            TransferJob::JoinExport(_) => JobDirection::JoinExport,
            TransferJob::Import(_) => JobDirection::Import,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutcome {
    pub row_count: usize,
    pub file_path: PathBuf,
}

/// Result of a batched import. A failed batch halts the import; earlier batches stay committed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub inserted_count: u64,
    pub batch_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failing_batch_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl ImportOutcome {
    pub fn is_complete(&self) -> bool {
        self.failing_batch_index.is_none()
    }

    /// Turns a partial import into `Error::ImportBatch`.
    pub fn into_result(self) -> Result<Self> {
        match self.failing_batch_index {
            None => Ok(self),
            Some(batch_index) => Err(Error::ImportBatch {
                batch_index,
                inserted_count: self.inserted_count,
                message: self.failure_message.unwrap_or_default(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "direction", rename_all = "camelCase")]
pub enum JobOutput {
    Export(ExportOutcome),
    Import(ImportOutcome),
}

/// A job running on its own task, with its progress events.
pub struct JobHandle {
    id: Uuid,
    handle: JoinHandle<Result<JobOutput>>,
    events: ProgressReceiver,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn events(&mut self) -> &mut ProgressReceiver {
        &mut self.events
    }

    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    pub async fn join(self) -> Result<JobOutput> {
        self.handle
            .await
            .map_err(|e| Error::Internal(format!("Job task failed: {}", e)))?
    }
}

/// Runs transfer jobs. Each job opens exactly one session and closes it before returning.
#[derive(Clone)]
pub struct TransferEngine {
    connector: Arc<dyn Connector>,
    settings: TransferConfig,
}

impl TransferEngine {
    pub fn new(connector: Arc<dyn Connector>, settings: TransferConfig) -> Self {
        Self { connector, settings }
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub fn settings(&self) -> &TransferConfig {
        &self.settings
    }

    pub async fn open_session(&self, descriptor: &ConnectionDescriptor) -> Result<Session> {
        Session::open(self.connector.as_ref(), descriptor).await
    }

    pub async fn export_direction(
        &self,
        session: &Session,
        table: &str,
        columns: &[String],
        predicate: Option<&str>,
    ) -> Result<Vec<Row>> {
        let query = build_select(table, columns, predicate, None)?;
        let result = session.backend()?.select(&query).await?;
        debug!(session_id = %session.id(), table, rows = result.rows.len(), "Exported rows");
        Ok(result.rows)
    }

    pub async fn export_join(
        &self,
        session: &Session,
        join: &JoinSpec,
        columns: &[String],
        predicate: Option<&str>,
    ) -> Result<Vec<Row>> {
        let query = build_join_select(&join.tables, &join.predicates, columns, predicate, None)?;
        let result = session.backend()?.select(&query).await?;
        debug!(
            session_id = %session.id(),
            tables = join.tables.len(),
            rows = result.rows.len(),
            "Exported joined rows"
        );
        Ok(result.rows)
    }

    /// Creates the table with the all-`String` fallback schema when it does not exist, then inserts
    /// `rows` in order in batches of the configured size.
    pub async fn import_direction(
        &self,
        session: &Session,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<ImportOutcome> {
        self.import_batches(session, table, columns, rows, self.settings.batch_size, None)
            .await
    }

    async fn import_batches(
        &self,
        session: &Session,
        table: &str,
        columns: &[String],
        rows: &[Row],
        batch_size: usize,
        tracker: Option<&JobTracker>,
    ) -> Result<ImportOutcome> {
        if batch_size == 0 {
            return Err(Error::Validation("Batch size must be greater than zero".into()));
        }
        // Validate every statement shape before touching the store.
        let create = build_create_table(table, columns)?;
        build_batch_insert(table, columns, &[])?;

        if !session::table_exists(session, table).await? {
            info!(session_id = %session.id(), table, "Target table missing, creating it");
            session.backend()?.create_table(&create).await?;
        }

        let backend = session.backend()?;
        let mut outcome = ImportOutcome::default();

        for (batch_index, chunk) in rows.chunks(batch_size).enumerate() {
            let batch = build_batch_insert(table, columns, chunk)?;
            match backend.insert(&batch).await {
                Ok(written) => {
                    outcome.inserted_count += written;
                    outcome.batch_count += 1;
                    debug!(table, batch_index, rows = chunk.len(), "Batch inserted");
                    if let Some(t) = tracker {
                        t.emit(JobEvent::BatchInserted {
                            job_id: t.id(),
                            batch_index,
                            rows: chunk.len(),
                            inserted_total: outcome.inserted_count,
                        });
                    }
                }
                Err(e) => {
                    record_batch_failed();
                    warn!(table, batch_index, error = %e, "Batch insert failed, halting import");
                    if let Some(t) = tracker {
                        t.emit(JobEvent::BatchFailed {
                            job_id: t.id(),
                            batch_index,
                            message: e.to_string(),
                        });
                    }
                    outcome.failing_batch_index = Some(batch_index);
                    outcome.failure_message = Some(e.to_string());
                    break;
                }
            }
        }

        record_rows_imported(outcome.inserted_count);
        Ok(outcome)
    }

    pub async fn run(&self, job: TransferJob) -> Result<JobOutput> {
        let tracker = JobTracker::new(job.direction(), None);
        self.run_tracked(job, tracker).await
    }

    pub async fn run_export_to_file(&self, job: ExportJob) -> Result<ExportOutcome> {
        let mut tracker = JobTracker::new(JobDirection::Export, None);
        let result = self.export_to_file(&job, &mut tracker).await;
        tracker.finish(result)
    }

    pub async fn run_join_export_to_file(&self, job: JoinExportJob) -> Result<ExportOutcome> {
        let mut tracker = JobTracker::new(JobDirection::JoinExport, None);
        let result = self.join_export_to_file(&job, &mut tracker).await;
        tracker.finish(result)
    }

    pub async fn run_import_from_file(&self, job: ImportJob) -> Result<ImportOutcome> {
        let mut tracker = JobTracker::new(JobDirection::Import, None);
        let result = self.import_from_file(&job, &mut tracker).await;
        tracker.finish(result)
    }

    /// Runs `job` on a new task. Events arrive on the handle until the job reaches a terminal state.
    pub fn spawn(&self, job: TransferJob) -> JobHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = JobTracker::new(job.direction(), Some(tx));
        let id = tracker.id();
        let engine = self.clone();
        let handle = tokio::spawn(async move { engine.run_tracked(job, tracker).await });
        JobHandle {
            id,
            handle,
            events: rx,
        }
    }

    async fn run_tracked(&self, job: TransferJob, mut tracker: JobTracker) -> Result<JobOutput> {
        let result = match &job {
            TransferJob::Export(j) => self.export_to_file(j, &mut tracker).await.map(JobOutput::Export),
            TransferJob::JoinExport(j) => self
                .join_export_to_file(j, &mut tracker)
                .await
                .map(JobOutput::Export),
            TransferJob::Import(j) => self.import_from_file(j, &mut tracker).await.map(JobOutput::Import),
        };
        tracker.finish(result)
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor, tracker: &mut JobTracker) -> Result<Session> {
        tracker.transition(JobState::Connecting);
        self.open_session(descriptor).await
    }

    fn check_transform(&self, transform: Option<&TransformSpec>) -> Result<()> {
        match transform {
            Some(spec) if self.settings.strict_filters => spec.check_operators(),
            _ => Ok(()),
        }
    }

    async fn export_to_file(&self, job: &ExportJob, tracker: &mut JobTracker) -> Result<ExportOutcome> {
        self.check_transform(job.transform.as_ref())?;
        let mut session = self.connect(&job.connection, tracker).await?;
        tracker.transition(JobState::Querying);
        let rows = self
            .export_direction(&session, &job.table, &job.columns, job.predicate.as_deref())
            .await;
        session.close();
        self.finish_export(rows?, &job.columns, job.transform.as_ref(), &job.output, job.delimiter, tracker)
            .await
    }

    async fn join_export_to_file(&self, job: &JoinExportJob, tracker: &mut JobTracker) -> Result<ExportOutcome> {
        job.join.validate()?;
        self.check_transform(job.transform.as_ref())?;
        let mut session = self.connect(&job.connection, tracker).await?;
        tracker.transition(JobState::Querying);
        let rows = self
            .export_join(&session, &job.join, &job.columns, job.predicate.as_deref())
            .await;
        session.close();
        self.finish_export(rows?, &job.columns, job.transform.as_ref(), &job.output, job.delimiter, tracker)
            .await
    }

    async fn finish_export(
        &self,
        rows: Vec<Row>,
        columns: &[String],
        transform: Option<&TransformSpec>,
        output: &Path,
        delimiter: Delimiter,
        tracker: &mut JobTracker,
    ) -> Result<ExportOutcome> {
        tracker.transition(JobState::Transforming);
        let rows = match transform {
            Some(spec) => spec.apply(rows, self.settings.cast_policy)?,
            None => rows,
        };

        tracker.transition(JobState::Writing);
        // With no rows the header still follows the selection, unless it is a wildcard.
        let mut opts = WriteOptions::new(delimiter);
        if rows.is_empty() && !columns.iter().any(|c| c.ends_with('*')) {
            opts = opts.with_headers(columns.to_vec());
        }
        let path = output.to_path_buf();
        let row_count = flatfile::run_blocking(move || flatfile::write(&rows, &path, &opts)).await?;

        record_rows_exported(row_count);
        info!(job_id = %tracker.id(), rows = row_count, path = %output.display(), "Export written");
        Ok(ExportOutcome {
            row_count,
            file_path: output.to_path_buf(),
        })
    }

    async fn import_from_file(&self, job: &ImportJob, tracker: &mut JobTracker) -> Result<ImportOutcome> {
        self.check_transform(job.transform.as_ref())?;
        let mut session = self.connect(&job.connection, tracker).await?;
        let outcome = self.import_with_session(&session, job, tracker).await;
        session.close();
        outcome
    }

    async fn import_with_session(
        &self,
        session: &Session,
        job: &ImportJob,
        tracker: &mut JobTracker,
    ) -> Result<ImportOutcome> {
        tracker.transition(JobState::Reading);
        let mut opts = ReadOptions::new(job.delimiter).with_max_file_size(self.settings.max_file_size);
        if !job.has_header {
            opts = opts.without_header();
        }
        let path = job.input.clone();
        let data = flatfile::run_blocking(move || flatfile::read(&path, &opts)).await?;

        tracker.transition(JobState::Transforming);
        let has_mappings = job.transform.as_ref().is_some_and(|t| !t.mappings.is_empty());
        let rows = match &job.transform {
            Some(spec) => spec.apply(data.rows, self.settings.cast_policy)?,
            None => data.rows,
        };

        let available: Vec<String> = match rows.first() {
            Some(row) => row.field_names().map(str::to_string).collect(),
            None if has_mappings => Vec::new(),
            None => data.schema,
        };
        let columns = if job.columns.is_empty() {
            available.clone()
        } else {
            job.columns.clone()
        };
        if !available.is_empty() {
            let missing: Vec<&str> = columns
                .iter()
                .filter(|c| !available.contains(c))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(Error::Validation(format!(
                    "Columns not present in file: {}",
                    missing.join(", ")
                )));
            }
        }

        tracker.transition(JobState::Writing);
        let batch_size = job.batch_size.unwrap_or(self.settings.batch_size);
        let outcome = self
            .import_batches(session, &job.table, &columns, &rows, batch_size, Some(&*tracker))
            .await?;
        if !outcome.is_complete() {
            tracker.transition(JobState::Failed);
        }
        info!(
            job_id = %tracker.id(),
            table = %job.table,
            inserted = outcome.inserted_count,
            failing_batch = ?outcome.failing_batch_index,
            "Import finished"
        );
        Ok(outcome)
    }
}
