//! Error handling for sqldump.
//!
//! This module provides the crate-wide error type and `Result` alias:
//! - Structured error kinds for configuration, connection, consistency and
//!   write failures
//! - Conversions from driver and I/O errors
//! - A dedicated cancellation error so shutdown is distinguishable from
//!   task failure

pub mod kinds;

// Re-export commonly used types
pub use kinds::{ConfigError, ConnectionError, ConsistencyError, DumpError, Result, WriteError};
