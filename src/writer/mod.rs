//! The task-driven writer
//!
//! One [`Writer`] per concurrent export worker. Each writer drains its own
//! task channel in order, turning tasks into files through the external
//! storage handle, and reports completion through callbacks so the
//! dispatcher can track progress without a central coordinator.
//!
//! The writer's database connection is its only mutable, exclusively-owned
//! resource: on a transient chunk failure it is discarded and rebuilt
//! between attempts without invalidating the writer's identity.

pub mod meta;
pub mod namer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ExportConfig;
use crate::connection::{DbConnection, RebuilderRef};
use crate::consistency::can_rebuild_conn;
use crate::error::{ConnectionError, DumpError, Result};
use crate::format::FormatEncoder;
use crate::retry::{sleep_or_cancelled, BackoffStrategy, DumpChunkBackoff};
use crate::storage::{ExternalStorage, InterceptWriter, StorageWriter};
use crate::task::{Task, TableDataSource, TableMetaInfo};

use meta::write_meta_to_file;
use namer::{OutputFileNamer, SubTemplateName};

/// Completion callback invoked with the task that finished.
///
/// Fire-and-forget: a slow callback stalls its writer.
pub type TaskCallback = Arc<dyn Fn(&Task) + Send + Sync>;

/// Shared run counters.
///
/// Stands in for an external metrics sink; the chunk-retry path increments
/// the error counter on every failed attempt.
#[derive(Debug, Default)]
pub struct DumpStats {
    errors: AtomicU64,
    completed_tasks: AtomicU64,
}

impl DumpStats {
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed_task(&self) {
        self.completed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn completed_tasks(&self) -> u64 {
        self.completed_tasks.load(Ordering::Relaxed)
    }
}

/// One export worker.
pub struct Writer {
    id: u64,
    config: Arc<ExportConfig>,
    conn: Option<Box<dyn DbConnection>>,
    storage: Arc<dyn ExternalStorage>,
    encoder: Arc<dyn FormatEncoder>,
    rebuilder: RebuilderRef,
    stats: Arc<DumpStats>,
    received_task_count: usize,
    on_task_done: Option<TaskCallback>,
    on_table_done: Option<TaskCallback>,
}

impl Writer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        config: Arc<ExportConfig>,
        conn: Option<Box<dyn DbConnection>>,
        storage: Arc<dyn ExternalStorage>,
        encoder: Arc<dyn FormatEncoder>,
        rebuilder: RebuilderRef,
        stats: Arc<DumpStats>,
    ) -> Self {
        Self {
            id,
            config,
            conn,
            storage,
            encoder,
            rebuilder,
            stats,
            received_task_count: 0,
            on_task_done: None,
            on_table_done: None,
        }
    }

    /// Register the per-task completion callback.
    pub fn set_on_task_done(&mut self, callback: TaskCallback) {
        self.on_task_done = Some(callback);
    }

    /// Register the table-completion callback, fired when the last chunk of
    /// a table finishes.
    pub fn set_on_table_done(&mut self, callback: TaskCallback) {
        self.on_table_done = Some(callback);
    }

    /// Tasks received so far on this writer's channel.
    pub fn received_task_count(&self) -> usize {
        self.received_task_count
    }

    /// Drain the task channel until it closes, cancellation fires, or a
    /// task fails.
    ///
    /// Cancellation and channel-close are both clean shutdown paths and
    /// return `Ok`; a task error propagates immediately and no further
    /// tasks are drained.
    pub async fn run(
        &mut self,
        mut tasks: mpsc::Receiver<Task>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(writer = self.id, "cancellation received, the writer will exit");
                    return Ok(());
                }
                task = tasks.recv() => {
                    let Some(task) = task else {
                        return Ok(());
                    };
                    self.received_task_count += 1;
                    // The in-flight task races the token too, so a task
                    // blocked on I/O cannot outlive cancellation.
                    let task = tokio::select! {
                        _ = cancel.cancelled() => {
                            warn!(writer = self.id, "cancellation received, abandoning the in-flight task");
                            return Ok(());
                        }
                        handled = self.handle_task(task, cancel) => handled?,
                    };
                    self.stats.record_completed_task();
                    if let Some(callback) = &self.on_task_done {
                        callback(&task);
                    }
                }
            }
        }
    }

    /// Dispatch one task to its writing routine.
    ///
    /// Returns the task back so completion callbacks observe the original
    /// value. Unknown variants are logged and skipped, never an error.
    async fn handle_task(&mut self, task: Task, cancel: &CancellationToken) -> Result<Task> {
        match task {
            Task::DatabaseMeta {
                database,
                create_database_sql,
            } => {
                self.write_database_meta(&database, &create_database_sql).await?;
                Ok(Task::DatabaseMeta {
                    database,
                    create_database_sql,
                })
            }
            Task::TableMeta {
                database,
                table,
                create_table_sql,
            } => {
                self.write_table_meta(&database, &table, &create_table_sql).await?;
                Ok(Task::TableMeta {
                    database,
                    table,
                    create_table_sql,
                })
            }
            Task::ViewMeta {
                database,
                view,
                create_table_sql,
                create_view_sql,
            } => {
                self.write_view_meta(&database, &view, &create_table_sql, &create_view_sql)
                    .await?;
                Ok(Task::ViewMeta {
                    database,
                    view,
                    create_table_sql,
                    create_view_sql,
                })
            }
            Task::TableData {
                meta,
                mut data,
                chunk_index,
                total_chunks,
            } => {
                self.write_table_data(&meta, data.as_mut(), chunk_index, cancel).await?;
                let task = Task::TableData {
                    meta,
                    data,
                    chunk_index,
                    total_chunks,
                };
                if chunk_index + 1 == total_chunks {
                    if let Some(callback) = &self.on_table_done {
                        callback(&task);
                    }
                }
                Ok(task)
            }
            #[allow(unreachable_patterns)]
            other => {
                warn!(writer = self.id, kind = other.kind(), "unsupported writer task type");
                Ok(other)
            }
        }
    }

    async fn write_database_meta(&mut self, database: &str, create_sql: &str) -> Result<()> {
        let namer = OutputFileNamer::for_meta(database, "");
        let base = namer.render(&self.config.output_template, SubTemplateName::Schema);
        write_meta_to_file(
            self.storage.as_ref(),
            &format!("{base}.sql"),
            self.config.compress,
            database,
            create_sql,
        )
        .await
    }

    async fn write_table_meta(&mut self, database: &str, table: &str, create_sql: &str) -> Result<()> {
        let namer = OutputFileNamer::for_meta(database, table);
        let base = namer.render(&self.config.output_template, SubTemplateName::Table);
        write_meta_to_file(
            self.storage.as_ref(),
            &format!("{base}.sql"),
            self.config.compress,
            database,
            create_sql,
        )
        .await
    }

    /// Views produce two files: the table definition then the view
    /// definition, sequentially, aborting on the first failure.
    async fn write_view_meta(
        &mut self,
        database: &str,
        view: &str,
        create_table_sql: &str,
        create_view_sql: &str,
    ) -> Result<()> {
        let namer = OutputFileNamer::for_meta(database, view);
        let table_base = namer.render(&self.config.output_template, SubTemplateName::Table);
        let view_base = namer.render(&self.config.output_template, SubTemplateName::View);
        write_meta_to_file(
            self.storage.as_ref(),
            &format!("{table_base}.sql"),
            self.config.compress,
            database,
            create_table_sql,
        )
        .await?;
        write_meta_to_file(
            self.storage.as_ref(),
            &format!("{view_base}.sql"),
            self.config.compress,
            database,
            create_view_sql,
        )
        .await
    }

    /// Write one table-data chunk, tolerating transient failures by
    /// rebuilding the connection between attempts.
    ///
    /// A retry restarts from file index zero with a fresh namer; the split
    /// loop never resumes mid-chunk.
    async fn write_table_data(
        &mut self,
        meta: &TableMetaInfo,
        data: &mut dyn TableDataSource,
        chunk_index: usize,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut backoff = DumpChunkBackoff::new(can_rebuild_conn(
            self.config.consistency,
            self.config.transactional_consistency,
        ));
        let mut attempt = 0usize;
        let mut last_error: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                return Err(DumpError::Cancelled);
            }
            attempt += 1;
            debug!(
                writer = self.id,
                db = %meta.database,
                table = %meta.table,
                chunk = chunk_index,
                attempt,
                last_error = last_error.as_deref().unwrap_or("none"),
                "dumping table chunk"
            );
            match self.try_write_table_data(meta, data, chunk_index, attempt).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    self.stats.record_error();
                    match backoff.next_backoff(&err) {
                        None => return Err(err),
                        Some(delay) => {
                            last_error = Some(err.to_string());
                            sleep_or_cancelled(cancel, delay).await?;
                        }
                    }
                }
            }
        }
    }

    /// One chunk-write attempt against the writer's current connection.
    async fn try_write_table_data(
        &mut self,
        meta: &TableMetaInfo,
        data: &mut dyn TableDataSource,
        chunk_index: usize,
        attempt: usize,
    ) -> Result<()> {
        if attempt > 1 {
            // A rebuild failure aborts this attempt outright; the rebuild
            // itself is never retried within an attempt.
            let old = self.conn.take();
            self.conn = Some(self.rebuilder.rebuild(old).await?);
        }
        let live = self.conn.as_mut().ok_or(ConnectionError::NotConnected)?;
        let started = data.start(live.as_mut()).await;
        let body = match started {
            Ok(()) => {
                write_chunk_files(
                    &self.config,
                    self.storage.as_ref(),
                    self.encoder.as_ref(),
                    meta,
                    data,
                    chunk_index,
                )
                .await
            }
            Err(e) => Err(e),
        };
        // The source is closed on every exit path, started or not.
        let closed = data.close().await;
        body.and(closed)
    }
}

/// Sum of tasks received across a set of writers.
pub fn count_total_tasks(writers: &[Writer]) -> usize {
    writers.iter().map(|w| w.received_task_count).sum()
}

/// Stream one chunk into one or more physical files.
///
/// The encoder decides how much of the chunk fits per file; this loop only
/// opens streams, observes whether anything was written, and stops on the
/// first spurious (empty) file or when no size bound is configured.
async fn write_chunk_files(
    config: &ExportConfig,
    storage: &dyn ExternalStorage,
    encoder: &dyn FormatEncoder,
    meta: &TableMetaInfo,
    source: &mut dyn TableDataSource,
    chunk_index: usize,
) -> Result<()> {
    let mut namer = OutputFileNamer::new(
        meta,
        chunk_index,
        config.rows_limit.is_some(),
        config.file_size_limit.is_some(),
    );
    let extension = config.file_format.extension();
    let mut file_name = namer.next_name(&config.output_template, extension);
    loop {
        let stream = storage.create(&file_name, config.compress).await?;
        let mut intercept = InterceptWriter::new(stream);
        let encoded = encoder.write_insert(config, meta, source, &mut intercept).await;
        let finished = intercept.finish().await;
        encoded?;
        finished?;

        if !intercept.something_written() {
            // Nothing left to emit: this file is spurious and logically
            // discarded, though the empty file may remain on storage.
            break;
        }
        if config.file_size_limit.is_none() {
            break;
        }
        file_name = namer.next_name(&config.output_template, extension);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::connection::{ConnectionRebuilder, ServerInfo};
    use crate::error::DumpError;
    use crate::format::SqlInsertEncoder;
    use crate::storage::{CompressType, StorageWriter};
    use crate::task::RowValues;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// In-memory storage capturing every created file.
    #[derive(Clone, Default)]
    struct MemStorage {
        files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    }

    impl MemStorage {
        fn file_names(&self) -> Vec<String> {
            self.files.lock().unwrap().keys().cloned().collect()
        }

        fn contents(&self, name: &str) -> String {
            String::from_utf8(self.files.lock().unwrap()[name].clone()).unwrap()
        }
    }

    #[async_trait]
    impl ExternalStorage for MemStorage {
        async fn create(
            &self,
            name: &str,
            compress: CompressType,
        ) -> Result<Box<dyn StorageWriter>> {
            let key = format!("{name}{}", compress.extension());
            self.files.lock().unwrap().insert(key.clone(), Vec::new());
            Ok(Box::new(MemWriter {
                files: Arc::clone(&self.files),
                key,
            }))
        }
    }

    struct MemWriter {
        files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
        key: String,
    }

    #[async_trait]
    impl StorageWriter for MemWriter {
        async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
            self.files
                .lock()
                .unwrap()
                .get_mut(&self.key)
                .unwrap()
                .extend_from_slice(buf);
            Ok(())
        }

        async fn finish(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct MockConn;

    #[async_trait]
    impl DbConnection for MockConn {
        async fn execute(&mut self, _sql: &str) -> Result<()> {
            Ok(())
        }

        async fn ping(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingRebuilder {
        rebuilds: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionRebuilder for CountingRebuilder {
        async fn rebuild(
            &self,
            old: Option<Box<dyn DbConnection>>,
        ) -> Result<Box<dyn DbConnection>> {
            drop(old);
            self.rebuilds.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(MockConn))
        }
    }

    /// Scripted row source; optionally fails its first N starts.
    struct MockSource {
        rows: VecDeque<RowValues>,
        failing_starts: usize,
        closes: Arc<AtomicUsize>,
    }

    impl MockSource {
        fn new(rows: Vec<RowValues>) -> Self {
            Self {
                rows: rows.into(),
                failing_starts: 0,
                closes: Arc::default(),
            }
        }

        fn failing_first_start(mut self) -> Self {
            self.failing_starts = 1;
            self
        }
    }

    #[async_trait]
    impl TableDataSource for MockSource {
        async fn start(&mut self, _conn: &mut dyn DbConnection) -> Result<()> {
            if self.failing_starts > 0 {
                self.failing_starts -= 1;
                return Err(DumpError::Generic("connection reset mid-query".to_string()));
            }
            Ok(())
        }

        async fn next_row(&mut self) -> Result<Option<RowValues>> {
            Ok(self.rows.pop_front())
        }

        async fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Row source whose query never returns, as a stalled server would.
    struct HangingSource;

    #[async_trait]
    impl TableDataSource for HangingSource {
        async fn start(&mut self, _conn: &mut dyn DbConnection) -> Result<()> {
            std::future::pending().await
        }

        async fn next_row(&mut self) -> Result<Option<RowValues>> {
            Ok(None)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn rows(n: usize) -> Vec<RowValues> {
        (0..n).map(|i| vec![Some(i.to_string())]).collect()
    }

    fn export_config(rows_limit: Option<u64>, file_size_limit: Option<u64>) -> ExportConfig {
        let mut config = Config::default();
        config.output.rows = rows_limit;
        config.output.file_size = file_size_limit;
        config
            .into_export(ServerInfo::unknown(), BTreeMap::new())
            .unwrap()
    }

    struct Fixture {
        writer: Writer,
        storage: MemStorage,
        rebuilder: Arc<CountingRebuilder>,
        stats: Arc<DumpStats>,
    }

    fn fixture(config: ExportConfig) -> Fixture {
        let storage = MemStorage::default();
        let rebuilder = Arc::new(CountingRebuilder::default());
        let stats = Arc::new(DumpStats::default());
        let writer = Writer::new(
            1,
            Arc::new(config),
            Some(Box::new(MockConn)),
            Arc::new(storage.clone()),
            Arc::new(SqlInsertEncoder),
            rebuilder.clone(),
            stats.clone(),
        );
        Fixture {
            writer,
            storage,
            rebuilder,
            stats,
        }
    }

    #[tokio::test]
    async fn test_database_meta_written_verbatim_with_preamble() {
        let mut fx = fixture(export_config(None, None));
        let cancel = CancellationToken::new();
        fx.writer
            .handle_task(
                Task::DatabaseMeta {
                    database: "db1".to_string(),
                    create_database_sql: "CREATE DATABASE `db1`;".to_string(),
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(fx.storage.file_names(), vec!["db1-schema-create.sql"]);
        assert_eq!(
            fx.storage.contents("db1-schema-create.sql"),
            "/*!40101 SET NAMES binary*/;\nCREATE DATABASE `db1`;\n"
        );
    }

    #[tokio::test]
    async fn test_view_meta_writes_two_files() {
        let mut fx = fixture(export_config(None, None));
        let cancel = CancellationToken::new();
        fx.writer
            .handle_task(
                Task::ViewMeta {
                    database: "db1".to_string(),
                    view: "v1".to_string(),
                    create_table_sql: "CREATE TABLE `v1` (`a` int);".to_string(),
                    create_view_sql: "CREATE VIEW `v1` AS SELECT 1;".to_string(),
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(
            fx.storage.file_names(),
            vec!["db1.v1-schema-view.sql", "db1.v1-schema.sql"]
        );
        assert!(fx
            .storage
            .contents("db1.v1-schema.sql")
            .contains("CREATE TABLE"));
        assert!(fx
            .storage
            .contents("db1.v1-schema-view.sql")
            .contains("CREATE VIEW"));
    }

    #[tokio::test]
    async fn test_single_chunk_single_file_without_size_bound() {
        let mut fx = fixture(export_config(Some(100), None));
        let cancel = CancellationToken::new();
        let meta = TableMetaInfo::new("db1", "t1");
        let mut source = MockSource::new(rows(3));
        fx.writer
            .write_table_data(&meta, &mut source, 0, &cancel)
            .await
            .unwrap();
        assert_eq!(fx.storage.file_names(), vec!["db1.t1.000000000.sql"]);
        let contents = fx.storage.contents("db1.t1.000000000.sql");
        assert_eq!(contents.matches("INSERT INTO `t1`").count(), 3);
    }

    #[tokio::test]
    async fn test_size_bound_splits_into_multiple_files() {
        // A 1-byte bound forces one row per file; the final empty file stops
        // the split.
        let mut fx = fixture(export_config(None, Some(1)));
        let cancel = CancellationToken::new();
        let meta = TableMetaInfo::new("db1", "t1");
        let mut source = MockSource::new(rows(3));
        fx.writer
            .write_table_data(&meta, &mut source, 5, &cancel)
            .await
            .unwrap();

        // Size-limit-only naming: 9-digit file index, chunk index absent.
        let names = fx.storage.file_names();
        assert_eq!(
            names,
            vec![
                "db1.t1.000000000.sql",
                "db1.t1.000000001.sql",
                "db1.t1.000000002.sql",
                "db1.t1.000000003.sql",
            ]
        );
        // The trailing file observed zero bytes and ended the split.
        assert!(fx.storage.contents("db1.t1.000000003.sql").is_empty());
        for name in &names[..3] {
            assert_eq!(fx.storage.contents(name).matches("INSERT").count(), 1);
        }
    }

    #[tokio::test]
    async fn test_retry_rebuilds_connection_once_and_leaves_one_file_set() {
        let mut fx = fixture(export_config(Some(100), None));
        let cancel = CancellationToken::new();
        let meta = TableMetaInfo::new("db1", "t1");
        let mut source = MockSource::new(rows(2)).failing_first_start();
        let closes = Arc::clone(&source.closes);

        fx.writer
            .write_table_data(&meta, &mut source, 0, &cancel)
            .await
            .unwrap();

        assert_eq!(fx.rebuilder.rebuilds.load(Ordering::Relaxed), 1);
        assert_eq!(fx.stats.errors(), 1);
        // Attempt 1 failed before producing a file; exactly one set remains.
        assert_eq!(fx.storage.file_names(), vec!["db1.t1.000000000.sql"]);
        assert_eq!(
            fx.storage
                .contents("db1.t1.000000000.sql")
                .matches("INSERT")
                .count(),
            2
        );
        // The source was closed after the failed attempt and the good one.
        assert_eq!(closes.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_fails_the_chunk() {
        let mut fx = fixture(export_config(Some(100), None));
        let cancel = CancellationToken::new();
        let meta = TableMetaInfo::new("db1", "t1");
        let mut source = MockSource::new(rows(1));
        source.failing_starts = 10;

        let err = fx
            .writer
            .write_table_data(&meta, &mut source, 0, &cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        // Initial attempt plus three bounded retries.
        assert_eq!(fx.stats.errors(), 4);
        assert_eq!(fx.rebuilder.rebuilds.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_table_done_fires_only_on_last_chunk() {
        let mut fx = fixture(export_config(Some(100), None));
        let table_done = Arc::new(AtomicUsize::new(0));
        let task_done = Arc::new(AtomicUsize::new(0));
        {
            let table_done = Arc::clone(&table_done);
            fx.writer.set_on_table_done(Arc::new(move |_task| {
                table_done.fetch_add(1, Ordering::Relaxed);
            }));
        }
        {
            let task_done = Arc::clone(&task_done);
            fx.writer.set_on_task_done(Arc::new(move |_task| {
                task_done.fetch_add(1, Ordering::Relaxed);
            }));
        }

        let (tx, rx) = mpsc::channel(4);
        for chunk_index in 0..3 {
            tx.send(Task::TableData {
                meta: TableMetaInfo::new("db1", "t1"),
                data: Box::new(MockSource::new(rows(1))),
                chunk_index,
                total_chunks: 3,
            })
            .await
            .unwrap();
        }
        drop(tx);

        let cancel = CancellationToken::new();
        fx.writer.run(rx, &cancel).await.unwrap();

        assert_eq!(table_done.load(Ordering::Relaxed), 1);
        assert_eq!(task_done.load(Ordering::Relaxed), 3);
        assert_eq!(fx.writer.received_task_count(), 3);
        assert_eq!(fx.stats.completed_tasks(), 3);
    }

    #[tokio::test]
    async fn test_run_exits_cleanly_on_cancellation() {
        let mut fx = fixture(export_config(None, None));
        let (_tx, rx) = mpsc::channel::<Task>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Cancellation is a shutdown path, not an error.
        assert!(fx.writer.run(rx, &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_blocked_task() {
        let mut fx = fixture(export_config(Some(100), None));
        let (tx, rx) = mpsc::channel(1);
        tx.send(Task::TableData {
            meta: TableMetaInfo::new("db1", "t1"),
            data: Box::new(HangingSource),
            chunk_index: 0,
            total_chunks: 1,
        })
        .await
        .unwrap();

        let cancel = CancellationToken::new();
        let late_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            late_cancel.cancel();
        });

        // The writer must exit cleanly even though the task's query never
        // completes.
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            fx.writer.run(rx, &cancel),
        )
        .await
        .expect("writer must exit promptly after cancellation");
        assert!(result.is_ok());
        assert_eq!(fx.stats.completed_tasks(), 0);
    }

    #[tokio::test]
    async fn test_run_propagates_task_failure_and_stops() {
        let mut fx = fixture(export_config(Some(100), None));
        // Rebuilds are pointless here; make every attempt fail fast.
        let (tx, rx) = mpsc::channel(4);
        let mut failing = MockSource::new(rows(1));
        failing.failing_starts = 100;
        tx.send(Task::TableData {
            meta: TableMetaInfo::new("db1", "t1"),
            data: Box::new(failing),
            chunk_index: 0,
            total_chunks: 1,
        })
        .await
        .unwrap();
        tx.send(Task::DatabaseMeta {
            database: "db2".to_string(),
            create_database_sql: "CREATE DATABASE `db2`;".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        let cancel = CancellationToken::new();
        assert!(fx.writer.run(rx, &cancel).await.is_err());
        // The second task was never drained.
        assert_eq!(fx.writer.received_task_count(), 1);
        assert!(!fx
            .storage
            .file_names()
            .contains(&"db2-schema-create.sql".to_string()));
    }
}
