//! Output file formats
//!
//! [`FormatEncoder`] is the seam between the writer and the byte-producing
//! routine: an encoder consumes rows from a [`TableDataSource`] until the
//! chunk is exhausted or the configured per-file size bound is reached, then
//! returns control to the writer, which decides whether to open another
//! file. [`SqlInsertEncoder`] and [`CsvEncoder`] are the built-in encoders.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ExportConfig;
use crate::error::Result;
use crate::storage::StorageWriter;
use crate::task::{RowValues, TableDataSource, TableMetaInfo};

/// Output file format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileFormat {
    #[serde(rename = "sql")]
    SqlText,

    #[serde(rename = "csv")]
    Csv,
}

impl FileFormat {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::SqlText => "sql",
            FileFormat::Csv => "csv",
        }
    }
}

/// Streams rows from a source into one output file.
#[async_trait]
pub trait FormatEncoder: Send + Sync {
    /// Write rows until the source is exhausted or the per-file size bound
    /// is reached. Returning without error and without draining the source
    /// means the caller should open the next file and call again.
    async fn write_insert(
        &self,
        config: &ExportConfig,
        meta: &TableMetaInfo,
        source: &mut dyn TableDataSource,
        writer: &mut dyn StorageWriter,
    ) -> Result<()>;
}

/// Emits one `INSERT` statement per row.
pub struct SqlInsertEncoder;

#[async_trait]
impl FormatEncoder for SqlInsertEncoder {
    async fn write_insert(
        &self,
        config: &ExportConfig,
        meta: &TableMetaInfo,
        source: &mut dyn TableDataSource,
        writer: &mut dyn StorageWriter,
    ) -> Result<()> {
        let mut written: u64 = 0;
        let table = quote_ident(&meta.table);
        while let Some(row) = source.next_row().await? {
            let values: Vec<String> = row.iter().map(|v| sql_value(v.as_deref())).collect();
            let statement = format!("INSERT INTO {table} VALUES ({});\n", values.join(","));
            writer.write_all(statement.as_bytes()).await?;
            written += statement.len() as u64;
            if config.file_size_limit.is_some_and(|bound| written >= bound) {
                break;
            }
        }
        Ok(())
    }
}

/// Emits comma-separated rows with a header line per file.
pub struct CsvEncoder;

#[async_trait]
impl FormatEncoder for CsvEncoder {
    async fn write_insert(
        &self,
        config: &ExportConfig,
        meta: &TableMetaInfo,
        source: &mut dyn TableDataSource,
        writer: &mut dyn StorageWriter,
    ) -> Result<()> {
        let mut written: u64 = 0;
        let mut wrote_header = false;
        while let Some(row) = source.next_row().await? {
            if !wrote_header && !meta.columns.is_empty() {
                let header = format!("{}\n", meta.columns.join(","));
                writer.write_all(header.as_bytes()).await?;
                written += header.len() as u64;
                wrote_header = true;
            }
            let fields: Vec<String> = row.iter().map(|v| csv_value(v.as_deref())).collect();
            let line = format!("{}\n", fields.join(","));
            writer.write_all(line.as_bytes()).await?;
            written += line.len() as u64;
            if config.file_size_limit.is_some_and(|bound| written >= bound) {
                break;
            }
        }
        Ok(())
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn sql_value(value: Option<&str>) -> String {
    match value {
        None => "NULL".to_string(),
        Some(v) => format!("'{}'", v.replace('\\', "\\\\").replace('\'', "''")),
    }
}

fn csv_value(value: Option<&str>) -> String {
    match value {
        None => "\\N".to_string(),
        Some(v) if v.contains([',', '"', '\n']) => {
            format!("\"{}\"", v.replace('"', "\"\""))
        }
        Some(v) => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extensions() {
        assert_eq!(FileFormat::SqlText.extension(), "sql");
        assert_eq!(FileFormat::Csv.extension(), "csv");
    }

    #[test]
    fn test_sql_value_escaping() {
        assert_eq!(sql_value(None), "NULL");
        assert_eq!(sql_value(Some("it's")), "'it''s'");
        assert_eq!(sql_value(Some("a\\b")), "'a\\\\b'");
    }

    #[test]
    fn test_csv_value_quoting() {
        assert_eq!(csv_value(None), "\\N");
        assert_eq!(csv_value(Some("plain")), "plain");
        assert_eq!(csv_value(Some("a,b")), "\"a,b\"");
        assert_eq!(csv_value(Some("say \"hi\"")), "\"say \"\"hi\"\"\"");
    }
}
