use std::{fmt, io};

/// Crate-wide `Result` type using [`DumpError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, DumpError>;

/// Top-level error type for sqldump operations.
///
/// This type wraps more specific error kinds and provides a single
/// error type that can be used throughout the crate.
#[derive(Debug)]
pub enum DumpError {
    /// Configuration errors.
    Config(ConfigError),

    /// Connection-related errors.
    Connection(ConnectionError),

    /// Consistency-guarantee errors.
    Consistency(ConsistencyError),

    /// Output-writing errors.
    Write(WriteError),

    /// I/O errors.
    Io(io::Error),

    /// MySQL driver errors.
    Sqlx(sqlx::Error),

    /// The run-scoped cancellation token fired.
    ///
    /// Returned by retry loops interrupted while sleeping; the writer
    /// task loop itself treats cancellation as a clean shutdown instead.
    Cancelled,

    /// Generic error with a free-form message.
    Generic(String),
}

/// Configuration-specific errors.
///
/// These are fatal at construction time, before any data is read.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },

    /// Unknown consistency option string.
    InvalidConsistency(String),

    /// Invalid output filename template.
    InvalidTemplate(String),
}

/// Connection-specific errors.
#[derive(Debug)]
pub enum ConnectionError {
    /// Failed to establish a connection.
    ConnectionFailed(String),

    /// Connection rebuild failed mid-retry.
    RebuildFailed(String),

    /// The writer's connection slot is empty.
    NotConnected,

    /// Ping command failed.
    PingFailed(String),
}

/// Consistency-controller errors.
#[derive(Debug)]
pub enum ConsistencyError {
    /// The chosen consistency mode cannot be honored by this server type.
    Unsupported { mode: String, server: String },

    /// The controller's dedicated connection was already closed by teardown.
    AlreadyClosed,

    /// A lock statement failed after retries exhausted.
    LockFailed(String),
}

/// Output-writing errors.
#[derive(Debug)]
pub enum WriteError {
    /// Failed to create an output file.
    CreateFailed { path: String, reason: String },

    /// The format encoder failed mid-stream.
    EncodeFailed(String),

    /// Flush/close of an output stream failed.
    FinishFailed(String),
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpError::Config(e) => write!(f, "Configuration error: {e}"),
            DumpError::Connection(e) => write!(f, "Connection error: {e}"),
            DumpError::Consistency(e) => write!(f, "Consistency error: {e}"),
            DumpError::Write(e) => write!(f, "Write error: {e}"),
            DumpError::Io(e) => write!(f, "I/O error: {e}"),
            DumpError::Sqlx(e) => write!(f, "Database error: {e}"),
            DumpError::Cancelled => write!(f, "Operation cancelled"),
            DumpError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
            ConfigError::InvalidConsistency(value) => {
                write!(f, "Invalid consistency option '{value}'")
            }
            ConfigError::InvalidTemplate(msg) => {
                write!(f, "Invalid output filename template: {msg}")
            }
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::ConnectionFailed(msg) => write!(f, "Failed to connect: {msg}"),
            ConnectionError::RebuildFailed(msg) => {
                write!(f, "Failed to rebuild connection: {msg}")
            }
            ConnectionError::NotConnected => write!(f, "No live database connection"),
            ConnectionError::PingFailed(msg) => write!(f, "Ping failed: {msg}"),
        }
    }
}

impl fmt::Display for ConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyError::Unsupported { mode, server } => {
                write!(f, "'{mode}' consistency is not supported for {server}")
            }
            ConsistencyError::AlreadyClosed => {
                write!(f, "consistency connection has already been closed")
            }
            ConsistencyError::LockFailed(msg) => write!(f, "Failed to lock tables: {msg}"),
        }
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::CreateFailed { path, reason } => {
                write!(f, "Failed to create '{path}': {reason}")
            }
            WriteError::EncodeFailed(msg) => write!(f, "Encoding failed: {msg}"),
            WriteError::FinishFailed(msg) => write!(f, "Failed to finish output: {msg}"),
        }
    }
}

impl std::error::Error for DumpError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for ConnectionError {}
impl std::error::Error for ConsistencyError {}
impl std::error::Error for WriteError {}

/* ========================= Conversions to DumpError ========================= */

impl From<io::Error> for DumpError {
    fn from(err: io::Error) -> Self {
        DumpError::Io(err)
    }
}

impl From<sqlx::Error> for DumpError {
    fn from(err: sqlx::Error) -> Self {
        DumpError::Sqlx(err)
    }
}

impl From<ConfigError> for DumpError {
    fn from(err: ConfigError) -> Self {
        DumpError::Config(err)
    }
}

impl From<ConnectionError> for DumpError {
    fn from(err: ConnectionError) -> Self {
        DumpError::Connection(err)
    }
}

impl From<ConsistencyError> for DumpError {
    fn from(err: ConsistencyError) -> Self {
        DumpError::Consistency(err)
    }
}

impl From<WriteError> for DumpError {
    fn from(err: WriteError) -> Self {
        DumpError::Write(err)
    }
}

impl From<String> for DumpError {
    fn from(msg: String) -> Self {
        DumpError::Generic(msg)
    }
}

impl From<&str> for DumpError {
    fn from(msg: &str) -> Self {
        DumpError::Generic(msg.to_owned())
    }
}
