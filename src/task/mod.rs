//! Export work items
//!
//! A dispatcher pushes [`Task`] values onto one channel per writer; each
//! writer exclusively owns a task for the duration of its handling. The set
//! of variants is closed but deliberately `#[non_exhaustive]`: producers
//! evolve, and an unknown task kind must be skipped, never abort a run.

use async_trait::async_trait;

use crate::connection::DbConnection;
use crate::error::Result;

/// One decoded row: column values in declaration order, `None` for NULL.
pub type RowValues = Vec<Option<String>>;

/// Static description of one table being dumped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetaInfo {
    /// Database (schema) name
    pub database: String,

    /// Table name
    pub table: String,

    /// Column names in declaration order
    pub columns: Vec<String>,
}

impl TableMetaInfo {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            columns: Vec::new(),
        }
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }
}

/// Streaming row source for one table-data chunk.
///
/// The writer starts the source against its (possibly rebuilt) connection
/// and guarantees a `close` on every exit path of an attempt; `close` must
/// therefore be safe to call even after `start` failed partway.
#[async_trait]
pub trait TableDataSource: Send {
    /// Bind the source to a live connection and begin the read.
    async fn start(&mut self, conn: &mut dyn DbConnection) -> Result<()>;

    /// Fetch the next row, or `None` once the chunk is exhausted.
    async fn next_row(&mut self) -> Result<Option<RowValues>>;

    /// Release any server-side resources. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// One unit of export work.
#[non_exhaustive]
pub enum Task {
    /// CREATE DATABASE statement for one schema
    DatabaseMeta {
        database: String,
        create_database_sql: String,
    },

    /// CREATE TABLE statement for one table
    TableMeta {
        database: String,
        table: String,
        create_table_sql: String,
    },

    /// CREATE TABLE + CREATE VIEW statements for one view
    ViewMeta {
        database: String,
        view: String,
        create_table_sql: String,
        create_view_sql: String,
    },

    /// One bounded slice of a table's rows
    TableData {
        meta: TableMetaInfo,
        data: Box<dyn TableDataSource>,
        chunk_index: usize,
        total_chunks: usize,
    },
}

impl Task {
    /// Short variant name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Task::DatabaseMeta { .. } => "database-meta",
            Task::TableMeta { .. } => "table-meta",
            Task::ViewMeta { .. } => "view-meta",
            Task::TableData { .. } => "table-data",
            #[allow(unreachable_patterns)]
            _ => "unknown",
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::DatabaseMeta { database, .. } => {
                f.debug_struct("DatabaseMeta").field("database", database).finish()
            }
            Task::TableMeta { database, table, .. } => f
                .debug_struct("TableMeta")
                .field("database", database)
                .field("table", table)
                .finish(),
            Task::ViewMeta { database, view, .. } => f
                .debug_struct("ViewMeta")
                .field("database", database)
                .field("view", view)
                .finish(),
            Task::TableData {
                meta,
                chunk_index,
                total_chunks,
                ..
            } => f
                .debug_struct("TableData")
                .field("database", &meta.database)
                .field("table", &meta.table)
                .field("chunk_index", chunk_index)
                .field("total_chunks", total_chunks)
                .finish(),
            #[allow(unreachable_patterns)]
            _ => f.write_str("Unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_kind_names() {
        let task = Task::DatabaseMeta {
            database: "db1".to_string(),
            create_database_sql: "CREATE DATABASE db1;".to_string(),
        };
        assert_eq!(task.kind(), "database-meta");

        let task = Task::ViewMeta {
            database: "db1".to_string(),
            view: "v1".to_string(),
            create_table_sql: String::new(),
            create_view_sql: String::new(),
        };
        assert_eq!(task.kind(), "view-meta");
    }

    #[test]
    fn test_table_meta_builder() {
        let meta = TableMetaInfo::new("db1", "t1")
            .with_columns(vec!["id".to_string(), "name".to_string()]);
        assert_eq!(meta.database, "db1");
        assert_eq!(meta.columns.len(), 2);
    }
}
