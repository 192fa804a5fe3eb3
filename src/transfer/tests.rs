use super::*;
use crate::domain::{ColumnDef, TableInfo, Value};
use crate::error::ErrorKind;
use crate::executor::{
    ExecutorMode, MemoryConnector, MemoryStore, QueryResult, StoreBackend,
};
use crate::query::{CreateTable, InsertBatch, SelectQuery};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Counts connections, statements and releases, and can fail one insert batch on demand.
#[derive(Default)]
struct Probe {
    connects: AtomicUsize,
    releases: AtomicUsize,
    inserts: AtomicUsize,
    creates: AtomicUsize,
    selects: Mutex<Vec<String>>,
    fail_batch: Option<usize>,
}

struct ProbeBackend {
    inner: Box<dyn StoreBackend>,
    probe: Arc<Probe>,
}

impl Drop for ProbeBackend {
    fn drop(&mut self) {
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreBackend for ProbeBackend {
    fn mode(&self) -> ExecutorMode {
        self.inner.mode()
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn select(&self, query: &SelectQuery) -> Result<QueryResult> {
        self.probe.selects.lock().push(query.to_sql());
        self.inner.select(query).await
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        self.inner.execute_sql(sql).await
    }

    async fn create_table(&self, stmt: &CreateTable) -> Result<()> {
        self.probe.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_table(stmt).await
    }

    async fn insert(&self, batch: &InsertBatch<'_>) -> Result<u64> {
        let index = self.probe.inserts.fetch_add(1, Ordering::SeqCst);
        if self.probe.fail_batch == Some(index) {
            return Err(Error::Query(format!("simulated failure in batch {}", index)));
        }
        self.inner.insert(batch).await
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        self.inner.list_tables().await
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnDef>> {
        self.inner.describe_table(table).await
    }
}

struct ProbeConnector {
    inner: MemoryConnector,
    probe: Arc<Probe>,
}

#[async_trait]
impl Connector for ProbeConnector {
    fn mode(&self) -> ExecutorMode {
        ExecutorMode::Mock
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn StoreBackend>> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.connect(descriptor).await?;
        Ok(Box::new(ProbeBackend {
            inner,
            probe: Arc::clone(&self.probe),
        }))
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    probe: Arc<Probe>,
    engine: TransferEngine,
    dir: TempDir,
}

fn fixture_with(probe: Probe, batch_size: usize) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let probe = Arc::new(probe);
    let connector = ProbeConnector {
        inner: MemoryConnector::new(Arc::clone(&store)),
        probe: Arc::clone(&probe),
    };
    let dir = TempDir::new().unwrap();
    let settings = TransferConfig {
        upload_dir: dir.path().to_path_buf(),
        batch_size,
        ..TransferConfig::default()
    };
    Fixture {
        store,
        probe,
        engine: TransferEngine::new(Arc::new(connector), settings),
        dir,
    }
}

fn fixture() -> Fixture {
    fixture_with(Probe::default(), 1000)
}

fn descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor::new("localhost", 8123, "default").with_token("token")
}

fn cols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn seed_users(store: &MemoryStore) {
    store.seed_table(
        "users",
        vec![ColumnDef::int64("id"), ColumnDef::string("name")],
        vec![
            Row::from_iter([("id", Value::Integer(1)), ("name", Value::from("Ann"))]),
            Row::from_iter([("id", Value::Integer(2)), ("name", Value::from("Bo"))]),
        ],
    );
}

fn export_job(fx: &Fixture, file: &str) -> ExportJob {
    ExportJob {
        connection: descriptor(),
        table: "users".into(),
        columns: cols(&["id", "name"]),
        predicate: None,
        output: fx.dir.path().join(file),
        delimiter: Delimiter::COMMA,
        transform: None,
    }
}

fn import_job(fx: &Fixture, file: &str, table: &str, columns: &[&str]) -> ImportJob {
    ImportJob {
        connection: descriptor(),
        table: table.into(),
        columns: cols(columns),
        input: fx.dir.path().join(file),
        delimiter: Delimiter::COMMA,
        has_header: true,
        transform: None,
        batch_size: None,
    }
}

fn write_numbers(fx: &Fixture, file: &str, count: usize) {
    let mut text = String::from("n,label\n");
    for i in 0..count {
        text.push_str(&format!("{},row{}\n", i, i));
    }
    fs::write(fx.dir.path().join(file), text).unwrap();
}

fn assert_sessions_balanced(probe: &Probe, expected: usize) {
    assert_eq!(probe.connects.load(Ordering::SeqCst), expected);
    assert_eq!(probe.releases.load(Ordering::SeqCst), expected);
}

#[tokio::test]
async fn test_export_writes_header_and_rows_in_order() {
    let fx = fixture();
    seed_users(&fx.store);

    let outcome = fx.engine.run_export_to_file(export_job(&fx, "users.csv")).await.unwrap();
    assert_eq!(outcome.row_count, 2);
    let text = fs::read_to_string(&outcome.file_path).unwrap();
    assert_eq!(text, "id,name\n1,Ann\n2,Bo\n");
    assert_sessions_balanced(&fx.probe, 1);
}

#[tokio::test]
async fn test_export_with_predicate_and_transform() {
    let fx = fixture();
    seed_users(&fx.store);

    let mut job = export_job(&fx, "filtered.tsv");
    job.predicate = Some("id > 1".into());
    job.delimiter = Delimiter::TAB;
    job.transform = Some(TransformSpec::default().with_mapping(
        crate::transform::FieldMapping::derive(
            "name",
            crate::transform::Derivation::Upper { field: "name".into() },
        ),
    ));

    let outcome = fx.engine.run_export_to_file(job).await.unwrap();
    assert_eq!(outcome.row_count, 1);
    let text = fs::read_to_string(&outcome.file_path).unwrap();
    assert_eq!(text, "name\tid\nBO\t2\n");
}

#[tokio::test]
async fn test_export_empty_result_keeps_header() {
    let fx = fixture();
    seed_users(&fx.store);

    let mut job = export_job(&fx, "none.csv");
    job.predicate = Some("id > 100".into());
    let outcome = fx.engine.run_export_to_file(job).await.unwrap();
    assert_eq!(outcome.row_count, 0);
    assert_eq!(fs::read_to_string(&outcome.file_path).unwrap(), "id,name\n");
}

#[tokio::test]
async fn test_export_query_failure_still_closes_session() {
    let fx = fixture();
    let err = fx
        .engine
        .run_export_to_file(export_job(&fx, "missing.csv"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
    assert_sessions_balanced(&fx.probe, 1);
    assert!(!fx.dir.path().join("missing.csv").exists());
}

#[tokio::test]
async fn test_join_export_issues_one_select_with_one_join() {
    let fx = fixture();
    fx.store.seed_table(
        "orders",
        vec![ColumnDef::int64("id"), ColumnDef::int64("customer_id")],
        vec![
            Row::from_iter([("id", Value::Integer(10)), ("customer_id", Value::Integer(1))]),
            Row::from_iter([("id", Value::Integer(11)), ("customer_id", Value::Integer(2))]),
        ],
    );
    fx.store.seed_table(
        "customers",
        vec![ColumnDef::int64("id"), ColumnDef::string("name")],
        vec![
            Row::from_iter([("id", Value::Integer(1)), ("name", Value::from("Ann"))]),
            Row::from_iter([("id", Value::Integer(2)), ("name", Value::from("Bo"))]),
        ],
    );

    let job = JoinExportJob {
        connection: descriptor(),
        join: JoinSpec::new(
            cols(&["orders", "customers"]),
            cols(&["orders.customer_id = customers.id"]),
        ),
        columns: cols(&["orders.id", "customers.name"]),
        predicate: None,
        output: fx.dir.path().join("joined.csv"),
        delimiter: Delimiter::COMMA,
        transform: None,
    };
    let outcome = fx.engine.run_join_export_to_file(job).await.unwrap();
    assert_eq!(outcome.row_count, 2);

    let selects = fx.probe.selects.lock().clone();
    assert_eq!(selects.len(), 1);
    assert_eq!(selects[0].matches(" JOIN ").count(), 1);

    let text = fs::read_to_string(&outcome.file_path).unwrap();
    assert_eq!(text, "orders.id,customers.name\n10,Ann\n11,Bo\n");
}

#[tokio::test]
async fn test_join_export_predicate_mismatch_never_connects() {
    let fx = fixture();
    let job = JoinExportJob {
        connection: descriptor(),
        join: JoinSpec::new(cols(&["a", "b", "c"]), cols(&["a.id = b.id"])),
        columns: cols(&["a.id"]),
        predicate: None,
        output: fx.dir.path().join("x.csv"),
        delimiter: Delimiter::COMMA,
        transform: None,
    };
    let err = fx.engine.run_join_export_to_file(job).await.unwrap_err();
    assert!(err.is_client_error());
    assert_sessions_balanced(&fx.probe, 0);
}

#[tokio::test]
async fn test_import_creates_missing_table_and_inserts_all_batches() {
    let fx = fixture();
    write_numbers(&fx, "numbers.csv", 2500);

    let outcome = fx
        .engine
        .run_import_from_file(import_job(&fx, "numbers.csv", "numbers", &["n", "label"]))
        .await
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.inserted_count, 2500);
    assert_eq!(outcome.batch_count, 3);
    assert_eq!(fx.probe.inserts.load(Ordering::SeqCst), 3);
    assert_eq!(fx.probe.creates.load(Ordering::SeqCst), 1);

    let stored = fx.store.table_rows("numbers").unwrap();
    assert_eq!(stored.len(), 2500);
    assert_eq!(stored[0].get("n"), Some(&Value::from("0")));
    assert_eq!(stored[2499].get("label"), Some(&Value::from("row2499")));
    assert_sessions_balanced(&fx.probe, 1);
}

#[tokio::test]
async fn test_import_batch_count_is_ceiling() {
    for (rows, batch, expected) in [(0usize, 10usize, 0usize), (10, 10, 1), (11, 10, 2), (3, 1, 3)] {
        let fx = fixture_with(Probe::default(), batch);
        write_numbers(&fx, "n.csv", rows);
        let outcome = fx
            .engine
            .run_import_from_file(import_job(&fx, "n.csv", "nums", &["n", "label"]))
            .await
            .unwrap();
        assert_eq!(outcome.batch_count, expected, "rows={} batch={}", rows, batch);
        assert_eq!(outcome.inserted_count, rows as u64);
    }
}

#[tokio::test]
async fn test_import_halts_at_first_failed_batch() {
    let fx = fixture_with(
        Probe {
            fail_batch: Some(1),
            ..Probe::default()
        },
        1000,
    );
    write_numbers(&fx, "numbers.csv", 2500);

    let outcome = fx
        .engine
        .run_import_from_file(import_job(&fx, "numbers.csv", "numbers", &["n", "label"]))
        .await
        .unwrap();
    assert_eq!(outcome.inserted_count, 1000);
    assert_eq!(outcome.failing_batch_index, Some(1));
    assert!(outcome.failure_message.as_deref().unwrap().contains("simulated failure"));
    // The third batch is never attempted.
    assert_eq!(fx.probe.inserts.load(Ordering::SeqCst), 2);
    assert_eq!(fx.store.table_rows("numbers").unwrap().len(), 1000);
    assert_sessions_balanced(&fx.probe, 1);

    match outcome.into_result() {
        Err(Error::ImportBatch {
            batch_index,
            inserted_count,
            ..
        }) => {
            assert_eq!(batch_index, 1);
            assert_eq!(inserted_count, 1000);
        }
        other => panic!("expected ImportBatch error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_import_into_existing_table_skips_create() {
    let fx = fixture();
    seed_users(&fx.store);
    fs::write(fx.dir.path().join("more.csv"), "id,name\n3,Cy\n").unwrap();

    let outcome = fx
        .engine
        .run_import_from_file(import_job(&fx, "more.csv", "users", &["id", "name"]))
        .await
        .unwrap();
    assert_eq!(outcome.inserted_count, 1);
    assert_eq!(fx.probe.creates.load(Ordering::SeqCst), 0);
    assert_eq!(fx.store.table_rows("users").unwrap().len(), 3);
}

#[tokio::test]
async fn test_import_rejects_columns_missing_from_file() {
    let fx = fixture();
    write_numbers(&fx, "numbers.csv", 5);

    let err = fx
        .engine
        .run_import_from_file(import_job(&fx, "numbers.csv", "numbers", &["n", "email"]))
        .await
        .unwrap_err();
    assert!(err.is_client_error());
    assert!(err.to_string().contains("email"));
    assert_eq!(fx.probe.inserts.load(Ordering::SeqCst), 0);
    assert_sessions_balanced(&fx.probe, 1);
}

#[tokio::test]
async fn test_import_missing_file() {
    let fx = fixture();
    let err = fx
        .engine
        .run_import_from_file(import_job(&fx, "ghost.csv", "t", &["a"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileNotFound);
    assert_sessions_balanced(&fx.probe, 1);
}

#[tokio::test]
async fn test_import_with_empty_selection_uses_file_columns() {
    let fx = fixture();
    write_numbers(&fx, "numbers.csv", 3);

    fx.engine
        .run_import_from_file(import_job(&fx, "numbers.csv", "numbers", &[]))
        .await
        .unwrap();
    let described = fx.store.table_rows("numbers").unwrap();
    assert_eq!(described[0].field_names().collect::<Vec<_>>(), vec!["n", "label"]);
}

#[tokio::test]
async fn test_round_trip_reproduces_rows() {
    let fx = fixture();
    seed_users(&fx.store);

    fx.engine.run_export_to_file(export_job(&fx, "rt.csv")).await.unwrap();
    fx.engine
        .run_import_from_file(import_job(&fx, "rt.csv", "users_copy", &["id", "name"]))
        .await
        .unwrap();

    let original: Vec<Vec<String>> = fx
        .store
        .table_rows("users")
        .unwrap()
        .iter()
        .map(|r| r.iter().map(|(_, v)| v.to_display_string()).collect())
        .collect();
    let copy: Vec<Vec<String>> = fx
        .store
        .table_rows("users_copy")
        .unwrap()
        .iter()
        .map(|r| r.iter().map(|(_, v)| v.to_display_string()).collect())
        .collect();
    assert_eq!(original, copy);
}

#[tokio::test]
async fn test_import_direction_on_open_session() {
    let fx = fixture();
    let session = fx.engine.open_session(&descriptor()).await.unwrap();
    let rows: Vec<Row> = (0..5)
        .map(|i| Row::from_iter([("v", Value::Integer(i))]))
        .collect();
    let outcome = fx
        .engine
        .import_direction(&session, "vals", &cols(&["v"]), &rows)
        .await
        .unwrap();
    assert_eq!(outcome.inserted_count, 5);
    assert_eq!(
        fx.store.table_rows("vals").unwrap()[4].get("v"),
        Some(&Value::Integer(4))
    );
}

#[tokio::test]
async fn test_spawned_job_reports_progress() {
    let fx = fixture_with(Probe::default(), 2);
    write_numbers(&fx, "n.csv", 5);

    let mut handle = fx
        .engine
        .spawn(TransferJob::Import(import_job(&fx, "n.csv", "nums", &["n"])));
    let job_id = handle.id();

    let mut states = Vec::new();
    let mut batches = Vec::new();
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::StateChanged { job_id: id, state } => {
                assert_eq!(id, job_id);
                states.push(state);
            }
            JobEvent::BatchInserted { batch_index, .. } => batches.push(batch_index),
            JobEvent::BatchFailed { .. } => panic!("no batch should fail"),
        }
    }

    assert_eq!(
        states,
        vec![
            JobState::Connecting,
            JobState::Reading,
            JobState::Transforming,
            JobState::Writing,
            JobState::Done
        ]
    );
    assert_eq!(batches, vec![0, 1, 2]);

    match handle.join().await.unwrap() {
        JobOutput::Import(outcome) => assert_eq!(outcome.inserted_count, 5),
        other => panic!("unexpected output {:?}", other),
    }
}

#[tokio::test]
async fn test_spawned_job_failure_ends_in_failed_state() {
    let fx = fixture();
    let mut handle = fx.engine.spawn(TransferJob::Export(export_job(&fx, "nothing.csv")));

    let mut last = None;
    while let Some(event) = handle.next_event().await {
        if let JobEvent::StateChanged { state, .. } = event {
            last = Some(state);
        }
    }
    assert_eq!(last, Some(JobState::Failed));
    assert!(handle.join().await.is_err());
}

#[tokio::test]
async fn test_zero_batch_size_rejected() {
    let fx = fixture();
    write_numbers(&fx, "n.csv", 1);
    let mut job = import_job(&fx, "n.csv", "nums", &["n"]);
    job.batch_size = Some(0);
    let err = fx.engine.run_import_from_file(job).await.unwrap_err();
    assert!(err.is_client_error());
}

fn strict_filter_fixture() -> Fixture {
    let mut fx = fixture();
    let connector = ProbeConnector {
        inner: MemoryConnector::new(Arc::clone(&fx.store)),
        probe: Arc::clone(&fx.probe),
    };
    let settings = TransferConfig {
        strict_filters: true,
        ..fx.engine.settings().clone()
    };
    fx.engine = TransferEngine::new(Arc::new(connector), settings);
    fx
}

fn unknown_operator_filter() -> crate::transform::Filter {
    serde_json::from_value(serde_json::json!({"field": "id", "operator": "between", "value": 1})).unwrap()
}

#[tokio::test]
async fn test_unknown_operator_passes_rows_by_default() {
    let fx = fixture();
    seed_users(&fx.store);

    let mut job = export_job(&fx, "all.csv");
    job.transform = Some(TransformSpec::default().with_filter(unknown_operator_filter()));
    let outcome = fx.engine.run_export_to_file(job).await.unwrap();
    assert_eq!(outcome.row_count, 2);
}

#[tokio::test]
async fn test_strict_filters_reject_unknown_operator_before_connecting() {
    let fx = strict_filter_fixture();
    seed_users(&fx.store);

    let mut job = export_job(&fx, "strict.csv");
    job.transform = Some(TransformSpec::default().with_filter(unknown_operator_filter()));
    let err = fx.engine.run_export_to_file(job).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_sessions_balanced(&fx.probe, 0);
    assert!(!fx.dir.path().join("strict.csv").exists());
}

#[tokio::test]
async fn test_unparsable_cast_yields_marker_by_default() {
    let fx = fixture();
    fs::write(fx.dir.path().join("ages.csv"), "name,age\nAnn,30\nBo,unknown\n").unwrap();

    let mut job = import_job(&fx, "ages.csv", "ages", &["name", "age"]);
    job.transform = Some(TransformSpec::default().with_cast("age", crate::transform::CastType::Number));
    let outcome = fx.engine.run_import_from_file(job).await.unwrap();
    assert_eq!(outcome.inserted_count, 2);

    let rows = fx.store.table_rows("ages").unwrap();
    assert_eq!(rows[0].get("age"), Some(&Value::Float(30.0)));
    assert!(matches!(rows[1].get("age"), Some(Value::Float(f)) if f.is_nan()));
}
