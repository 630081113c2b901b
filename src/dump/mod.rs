//! Run orchestration
//!
//! [`Dumper`] owns a full export run: it discovers the schema objects to
//! dump, establishes the configured consistency guarantee, fans tasks out
//! across a set of writers, and tears the guarantee down when the last
//! writer exits. The first failing task cancels the whole run.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::StreamExt;
use sqlx::mysql::MySqlRow;
use sqlx::{Column, MySqlPool, Row, TypeInfo, ValueRef};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ExportConfig;
use crate::connection::{DbConnection, PoolRebuilder, RebuilderRef, SqlxConnection};
use crate::consistency::{self, ConsistencyController};
use crate::error::{DumpError, Result};
use crate::format::{quote_ident, CsvEncoder, FileFormat, FormatEncoder, SqlInsertEncoder};
use crate::storage::{ExternalStorage, LocalStorage};
use crate::task::{RowValues, TableDataSource, TableMetaInfo, Task};
use crate::writer::{count_total_tasks, DumpStats, Writer};

/// One export run over a connected pool.
pub struct Dumper {
    config: Arc<ExportConfig>,
    pool: MySqlPool,
    stats: Arc<DumpStats>,
}

impl Dumper {
    pub fn new(config: ExportConfig, pool: MySqlPool) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            stats: Arc::new(DumpStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<DumpStats> {
        Arc::clone(&self.stats)
    }

    /// Execute the run: consistency setup, task fan-out, teardown.
    ///
    /// The guarantee is released on every exit path; a teardown failure
    /// after a successful run still fails the run.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let controller = {
            // Flush and lock modes hold their guarantee on a dedicated
            // connection, disjoint from every writer's.
            let conn: Option<Box<dyn DbConnection>> =
                if consistency::holds_connection(self.config.consistency) {
                    let pooled = self.pool.acquire().await?;
                    Some(Box::new(SqlxConnection::new(pooled)))
                } else {
                    None
                };
            consistency::resolve(&self.config, conn)?
        };
        self.run_with(controller, cancel).await
    }

    /// Drive the run against a resolved controller. Once setup succeeds,
    /// teardown runs on every exit path, including a failed post-setup ping.
    async fn run_with(
        &self,
        mut controller: Box<dyn ConsistencyController>,
        cancel: CancellationToken,
    ) -> Result<()> {
        controller.setup(&cancel).await?;
        let result = match controller.ping().await {
            Ok(()) => self.dump_all(&cancel).await,
            Err(e) => Err(e),
        };
        let teardown = controller.teardown().await;
        result.and(teardown)
    }

    async fn dump_all(&self, cancel: &CancellationToken) -> Result<()> {
        let tasks = self.build_tasks().await?;
        let task_count = tasks.len();
        info!(tasks = task_count, workers = self.config.workers, "starting dump");

        let storage: Arc<dyn ExternalStorage> =
            Arc::new(LocalStorage::new(&self.config.output_dir));
        let encoder: Arc<dyn FormatEncoder> = match self.config.file_format {
            FileFormat::SqlText => Arc::new(SqlInsertEncoder),
            FileFormat::Csv => Arc::new(CsvEncoder),
        };
        let rebuilder: RebuilderRef = Arc::new(PoolRebuilder::new(self.pool.clone()));

        let mut join_set = JoinSet::new();
        let mut senders = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            let conn = self.pool.acquire().await?;
            let mut writer = Writer::new(
                id as u64,
                Arc::clone(&self.config),
                Some(Box::new(SqlxConnection::new(conn))),
                Arc::clone(&storage),
                Arc::clone(&encoder),
                Arc::clone(&rebuilder),
                Arc::clone(&self.stats),
            );
            writer.set_on_table_done(Arc::new(|task| {
                if let Task::TableData { meta, .. } = task {
                    info!(db = %meta.database, table = %meta.table, "finished dumping table");
                }
            }));
            writer.set_on_task_done(Arc::new(|task| {
                debug!(kind = task.kind(), "task done");
            }));

            let (tx, rx) = mpsc::channel::<Task>(1);
            senders.push(tx);
            let token = cancel.clone();
            join_set.spawn(async move {
                let result = writer.run(rx, &token).await;
                if result.is_err() {
                    // The first failure stops every sibling writer.
                    token.cancel();
                }
                (writer, result)
            });
        }

        // Round-robin dispatch; a closed channel means its writer died and
        // the run token is already cancelled.
        for (i, task) in tasks.into_iter().enumerate() {
            let tx = &senders[i % senders.len()];
            if tx.send(task).await.is_err() {
                warn!("writer channel closed, stopping dispatch");
                break;
            }
        }
        drop(senders);

        let mut writers = Vec::with_capacity(self.config.workers);
        let mut first_error: Option<DumpError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((writer, result)) => {
                    if let Err(e) = result {
                        first_error.get_or_insert(e);
                    }
                    writers.push(writer);
                }
                Err(e) => {
                    first_error.get_or_insert(DumpError::Generic(format!(
                        "writer task panicked: {e}"
                    )));
                }
            }
        }
        info!(
            received = count_total_tasks(&writers),
            completed = self.stats.completed_tasks(),
            errors = self.stats.errors(),
            "dump finished"
        );
        match first_error {
            Some(e) => Err(e),
            None if cancel.is_cancelled() => Err(DumpError::Cancelled),
            None => Ok(()),
        }
    }

    /// Discover every object to dump and order its tasks: database meta
    /// first, then per-table meta and data.
    async fn build_tasks(&self) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for (db, table_names) in &self.config.tables {
            tasks.push(Task::DatabaseMeta {
                database: db.clone(),
                create_database_sql: self.show_create_database(db).await?,
            });
            for table in table_names {
                if self.is_view(db, table).await? {
                    let columns = self.table_columns(db, table).await?;
                    tasks.push(Task::ViewMeta {
                        database: db.clone(),
                        view: table.clone(),
                        create_table_sql: view_stand_in_table_sql(table, &columns),
                        create_view_sql: self.show_create_view(db, table).await?,
                    });
                    continue;
                }
                tasks.push(Task::TableMeta {
                    database: db.clone(),
                    table: table.clone(),
                    create_table_sql: self.show_create_table(db, table).await?,
                });
                let columns = self.table_columns(db, table).await?;
                let column_names = columns.iter().map(|(name, _)| name.clone()).collect();
                let meta = TableMetaInfo::new(db, table).with_columns(column_names);
                tasks.push(Task::TableData {
                    data: Box::new(SqlRowSource::new(self.pool.clone(), db, table)),
                    meta,
                    chunk_index: 0,
                    total_chunks: 1,
                });
            }
        }
        Ok(tasks)
    }

    async fn show_create_database(&self, db: &str) -> Result<String> {
        let sql = format!("SHOW CREATE DATABASE {}", quote_ident(db));
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let create: String = row.try_get(1)?;
        Ok(terminate_statement(create))
    }

    async fn show_create_table(&self, db: &str, table: &str) -> Result<String> {
        let sql = format!(
            "SHOW CREATE TABLE {}.{}",
            quote_ident(db),
            quote_ident(table)
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let create: String = row.try_get(1)?;
        Ok(terminate_statement(create))
    }

    async fn show_create_view(&self, db: &str, view: &str) -> Result<String> {
        let sql = format!("SHOW CREATE VIEW {}.{}", quote_ident(db), quote_ident(view));
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let create: String = row.try_get(1)?;
        Ok(terminate_statement(create))
    }

    async fn is_view(&self, db: &str, table: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT TABLE_TYPE FROM information_schema.tables \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
        )
        .bind(db)
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        let table_type: String = row.try_get(0)?;
        Ok(table_type.eq_ignore_ascii_case("VIEW"))
    }

    /// Column names and type strings, in definition order.
    async fn table_columns(&self, db: &str, table: &str) -> Result<Vec<(String, String)>> {
        let sql = format!(
            "SHOW COLUMNS FROM {}.{}",
            quote_ident(db),
            quote_ident(table)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0)?;
            let type_name: String = row.try_get_unchecked(1)?;
            columns.push((name, type_name));
        }
        Ok(columns)
    }
}

/// Enumerate the tables and views of a database, in server order.
pub async fn list_tables(pool: &MySqlPool, db: &str) -> Result<Vec<String>> {
    let sql = format!("SHOW TABLES FROM {}", quote_ident(db));
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    let mut tables = Vec::with_capacity(rows.len());
    for row in rows {
        tables.push(row.try_get(0)?);
    }
    Ok(tables)
}

/// Stand-in table definition emitted alongside a view, so restoring the
/// view's dependents works before the view itself is created.
fn view_stand_in_table_sql(view: &str, columns: &[(String, String)]) -> String {
    let fields: Vec<String> = columns
        .iter()
        .map(|(name, type_name)| format!("{} {}", quote_ident(name), type_name))
        .collect();
    format!(
        "CREATE TABLE {}({}) ENGINE=MyISAM;",
        quote_ident(view),
        fields.join(",")
    )
}

fn terminate_statement(mut sql: String) -> String {
    if !sql.trim_end().ends_with(';') {
        sql.push(';');
    }
    sql
}

/// Bound on rows in flight between the streaming query and the encoder.
const ROW_CHANNEL_CAPACITY: usize = 256;

/// Row source streaming a full-table `SELECT` through a bounded channel.
///
/// The query runs on its own pooled connection in a background task; rows
/// cross to the encoder through a channel whose capacity bounds memory use
/// regardless of table size. `start` pings the writer's connection first so
/// the chunk-retry path still observes a broken session before any file is
/// created.
pub struct SqlRowSource {
    pool: MySqlPool,
    query: String,
    rows: Option<mpsc::Receiver<Result<RowValues>>>,
    streamer: Option<tokio::task::JoinHandle<()>>,
}

impl SqlRowSource {
    pub fn new(pool: MySqlPool, db: &str, table: &str) -> Self {
        Self {
            pool,
            query: format!("SELECT * FROM {}.{}", quote_ident(db), quote_ident(table)),
            rows: None,
            streamer: None,
        }
    }
}

#[async_trait::async_trait]
impl TableDataSource for SqlRowSource {
    async fn start(&mut self, conn: &mut dyn DbConnection) -> Result<()> {
        conn.ping().await?;
        debug!("streaming rows: {}", self.query);
        let (tx, rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
        let pool = self.pool.clone();
        let query = self.query.clone();
        self.streamer = Some(tokio::spawn(async move {
            let mut stream = sqlx::query(&query).fetch(&pool);
            while let Some(fetched) = stream.next().await {
                let item = fetched
                    .map_err(DumpError::from)
                    .and_then(|row| row_to_values(&row));
                let failed = item.is_err();
                // A dropped receiver means the chunk was abandoned.
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        }));
        self.rows = Some(rx);
        Ok(())
    }

    async fn next_row(&mut self) -> Result<Option<RowValues>> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(None);
        };
        match rows.recv().await {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.rows = None;
        if let Some(streamer) = self.streamer.take() {
            streamer.abort();
        }
        Ok(())
    }
}

/// Render every column of a row to its textual dump form.
fn row_to_values(row: &MySqlRow) -> Result<RowValues> {
    let mut values = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        values.push(column_to_string(row, i)?);
    }
    Ok(values)
}

/// Decode one column by its MySQL type and render it as the text the dump
/// formats expect.
fn column_to_string(row: &MySqlRow, i: usize) -> Result<Option<String>> {
    if row.try_get_raw(i)?.is_null() {
        return Ok(None);
    }
    let type_name = row.column(i).type_info().name().to_uppercase();
    let rendered = match type_name.as_str() {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "BOOLEAN" => {
            row.try_get::<i64, _>(i)?.to_string()
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row.try_get::<u64, _>(i)?.to_string(),
        "FLOAT" => row.try_get::<f32, _>(i)?.to_string(),
        "DOUBLE" => row.try_get::<f64, _>(i)?.to_string(),
        "YEAR" => row.try_get_unchecked::<u64, _>(i)?.to_string(),
        // Wire-encoded as length-prefixed strings despite the numeric type.
        "DECIMAL" => row.try_get_unchecked::<String, _>(i)?,
        "DATE" => row.try_get::<NaiveDate, _>(i)?.format("%Y-%m-%d").to_string(),
        "TIME" => row.try_get::<NaiveTime, _>(i)?.format("%H:%M:%S").to_string(),
        "DATETIME" => row
            .try_get::<NaiveDateTime, _>(i)?
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        "TIMESTAMP" => row
            .try_get::<DateTime<Utc>, _>(i)?
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        "VARCHAR" | "CHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET"
        | "JSON" => row.try_get::<String, _>(i)?,
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => {
            let bytes = row.try_get::<Vec<u8>, _>(i)?;
            String::from_utf8_lossy(&bytes).into_owned()
        }
        _ => row.try_get_unchecked::<String, _>(i)?,
    };
    Ok(Some(rendered))
}
