//! MySQL Logical Dump Library
//!
//! This library provides the core functionality for the sqldump tool. It can
//! be used standalone to embed logical MySQL exports in other applications.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `connection`: MySQL connection management and server detection
//! - `consistency`: Consistency guarantees held for the duration of a run
//! - `dump`: Run orchestration and row sourcing
//! - `error`: Error types and handling
//! - `format`: Output encodings (SQL inserts, CSV)
//! - `retry`: Retry policies with pluggable backoff
//! - `storage`: Output streams with optional compression
//! - `task`: The unit of work handed to writers
//! - `writer`: Concurrent task-driven writers and file naming
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use sqldump::{config::Config, connection, dump::Dumper};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let (pool, server_info) = connection::connect(
//!         &config.connection.uri,
//!         config.connection.max_pool_size,
//!         config.connection.timeout,
//!     )
//!     .await?;
//!
//!     let mut tables = BTreeMap::new();
//!     tables.insert("shop".to_string(), vec!["users".to_string()]);
//!
//!     let export = config.into_export(server_info, tables)?;
//!     Dumper::new(export, pool).run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod connection;
pub mod consistency;
pub mod dump;
pub mod error;
pub mod format;
pub mod retry;
pub mod storage;
pub mod task;
pub mod writer;

// Re-export commonly used types
pub use config::{Config, Consistency, ExportConfig};
pub use connection::{ServerInfo, ServerType};
pub use dump::Dumper;
pub use error::{DumpError, Result};
pub use task::Task;
pub use writer::Writer;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
