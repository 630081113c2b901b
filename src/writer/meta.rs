//! Meta-file writing
//!
//! A meta file carries exactly one DDL statement: a fixed preamble that
//! disables name-encoding interpretation, then the verbatim SQL. Written as
//! a single unbroken stream, no chunking.

use crate::error::Result;
use crate::storage::{CompressType, ExternalStorage, StorageWriter};
use tracing::debug;

/// Preamble written before every meta statement.
pub const META_PREAMBLE: &str = "/*!40101 SET NAMES binary*/;";

/// Write one meta SQL statement to a single file.
pub async fn write_meta_to_file(
    storage: &dyn ExternalStorage,
    path: &str,
    compress: CompressType,
    target: &str,
    meta_sql: &str,
) -> Result<()> {
    debug!("writing meta for {target} to {path}");
    let mut writer = storage.create(path, compress).await?;
    let result = async {
        writer.write_all(META_PREAMBLE.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.write_all(meta_sql.as_bytes()).await?;
        if !meta_sql.ends_with('\n') {
            writer.write_all(b"\n").await?;
        }
        Ok(())
    }
    .await;
    let finished = writer.finish().await;
    result.and(finished)
}
