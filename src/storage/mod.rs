//! External storage abstraction
//!
//! The writer produces files through an [`ExternalStorage`] handle keyed by
//! path and compression mode; the handle guarantees the returned stream is
//! flushed and closed on release. [`LocalStorage`] is the disk-backed
//! implementation; cloud backends plug in behind the same trait.
//!
//! [`InterceptWriter`] decorates any stream to observe whether a byte was
//! ever written; the chunk-splitting loop uses this to detect the spurious
//! trailing file produced when an encoder has nothing left to emit.

use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::error::{Result, WriteError};

/// Compression applied to an output file.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressType {
    #[default]
    None,
    Gzip,
}

impl CompressType {
    /// Extension suffix appended after the format extension, `""` or `".gz"`.
    pub fn extension(&self) -> &'static str {
        match self {
            CompressType::None => "",
            CompressType::Gzip => ".gz",
        }
    }
}

/// One open output stream.
#[async_trait]
pub trait StorageWriter: Send {
    /// Append bytes to the stream.
    async fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Flush and close the stream. Idempotent.
    async fn finish(&mut self) -> Result<()>;
}

/// Scoped-acquisition file store.
#[async_trait]
pub trait ExternalStorage: Send + Sync {
    /// Open a new file stream for `name`, applying `compress`.
    async fn create(&self, name: &str, compress: CompressType) -> Result<Box<dyn StorageWriter>>;
}

/// Local-disk storage rooted at an output directory.
pub struct LocalStorage {
    base: PathBuf,
}

impl LocalStorage {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl ExternalStorage for LocalStorage {
    async fn create(&self, name: &str, compress: CompressType) -> Result<Box<dyn StorageWriter>> {
        let path = self.base.join(format!("{name}{}", compress.extension()));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(&path).await.map_err(|e| WriteError::CreateFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!("created output file {}", path.display());
        let file = BufWriter::with_capacity(64 * 1024, file);
        let sink = match compress {
            CompressType::None => LocalSink::Plain(file),
            CompressType::Gzip => LocalSink::Gzip {
                encoder: GzEncoder::new(Vec::new(), Compression::fast()),
                file,
            },
        };
        Ok(Box::new(LocalFileWriter { sink: Some(sink) }))
    }
}

enum LocalSink {
    Plain(BufWriter<File>),
    Gzip {
        encoder: GzEncoder<Vec<u8>>,
        file: BufWriter<File>,
    },
}

/// Stream over a local file, optionally gzip-compressed.
///
/// Compressed output is drained from the encoder's buffer after every write
/// so a large chunk never accumulates in memory.
pub struct LocalFileWriter {
    sink: Option<LocalSink>,
}

#[async_trait]
impl StorageWriter for LocalFileWriter {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self.sink.as_mut() {
            Some(LocalSink::Plain(file)) => {
                file.write_all(buf).await?;
            }
            Some(LocalSink::Gzip { encoder, file }) => {
                encoder
                    .write_all(buf)
                    .map_err(|e| WriteError::EncodeFailed(e.to_string()))?;
                let compressed = std::mem::take(encoder.get_mut());
                if !compressed.is_empty() {
                    file.write_all(&compressed).await?;
                }
            }
            None => {
                return Err(WriteError::FinishFailed(
                    "stream already finished".to_string(),
                )
                .into())
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        match self.sink.take() {
            Some(LocalSink::Plain(mut file)) => {
                file.flush().await?;
            }
            Some(LocalSink::Gzip { encoder, mut file }) => {
                let trailer = encoder
                    .finish()
                    .map_err(|e| WriteError::FinishFailed(e.to_string()))?;
                file.write_all(&trailer).await?;
                file.flush().await?;
            }
            None => {}
        }
        Ok(())
    }
}

/// Decorator recording whether any byte reached the underlying stream.
pub struct InterceptWriter {
    inner: Box<dyn StorageWriter>,
    something_written: bool,
}

impl InterceptWriter {
    pub fn new(inner: Box<dyn StorageWriter>) -> Self {
        Self {
            inner,
            something_written: false,
        }
    }

    /// True once a non-empty write went through.
    pub fn something_written(&self) -> bool {
        self.something_written
    }
}

#[async_trait]
impl StorageWriter for InterceptWriter {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if !buf.is_empty() {
            self.something_written = true;
        }
        self.inner.write_all(buf).await
    }

    async fn finish(&mut self) -> Result<()> {
        self.inner.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[tokio::test]
    async fn test_local_storage_plain_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let mut writer = storage
            .create("db1.t1.000000000.sql", CompressType::None)
            .await
            .unwrap();
        writer.write_all(b"INSERT INTO t1 VALUES (1);\n").await.unwrap();
        writer.finish().await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join("db1.t1.000000000.sql")).unwrap();
        assert_eq!(contents, "INSERT INTO t1 VALUES (1);\n");
    }

    #[tokio::test]
    async fn test_local_storage_gzip_appends_extension() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let mut writer = storage
            .create("db1.t1.000000000.sql", CompressType::Gzip)
            .await
            .unwrap();
        writer.write_all(b"INSERT INTO t1 VALUES (1);\n").await.unwrap();
        writer.finish().await.unwrap();

        let raw = std::fs::read(dir.path().join("db1.t1.000000000.sql.gz")).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(raw.as_slice());
        let mut decompressed = String::new();
        decoder.read_to_string(&mut decompressed).unwrap();
        assert_eq!(decompressed, "INSERT INTO t1 VALUES (1);\n");
    }

    #[tokio::test]
    async fn test_finish_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let mut writer = storage.create("f.sql", CompressType::None).await.unwrap();
        writer.finish().await.unwrap();
        writer.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_intercept_writer_observes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        let inner = storage.create("a.sql", CompressType::None).await.unwrap();
        let mut writer = InterceptWriter::new(inner);
        assert!(!writer.something_written());
        writer.write_all(b"").await.unwrap();
        assert!(!writer.something_written());
        writer.write_all(b"x").await.unwrap();
        assert!(writer.something_written());
        writer.finish().await.unwrap();
    }
}
