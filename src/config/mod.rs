//! Configuration management for sqldump
//!
//! This module handles loading, parsing, and managing configuration from:
//! - Configuration files (TOML format)
//! - Command-line arguments
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Configuration file
//! 3. Default values
//!
//! The serde-backed [`Config`] mirrors the file layout; the core components
//! consume the resolved [`ExportConfig`], which carries parsed templates and
//! detected server metadata and is shared read-only across writers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::connection::ServerInfo;
use crate::error::{ConfigError, Result};
use crate::format::FileFormat;
use crate::storage::CompressType;
use crate::writer::namer::FileNameTemplate;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Consistency configuration
    #[serde(default)]
    pub consistency: ConsistencyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// MySQL connection URI
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Maximum pool size; must cover one connection per writer plus the
    /// consistency controller's dedicated connection
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
}

/// Output file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving the dump files
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Output file format (sql, csv)
    #[serde(default = "default_file_type")]
    pub file_type: FileFormat,

    /// Compression applied to every output file
    #[serde(default)]
    pub compress: CompressType,

    /// Per-file size bound in bytes; `None` keeps one file per chunk
    #[serde(default)]
    pub file_size: Option<u64>,

    /// Per-chunk row bound; `None` disables row-based chunking
    #[serde(default)]
    pub rows: Option<u64>,

    /// Number of concurrent writers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Filename templates, one sub-template per output kind
    #[serde(default)]
    pub templates: TemplateConfig,
}

/// Named filename sub-templates rendered against `{db}`, `{table}` and
/// `{index}` fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Database-meta file names
    #[serde(default = "default_schema_template")]
    pub schema: String,

    /// Table-meta file names
    #[serde(default = "default_table_template")]
    pub table: String,

    /// View-meta file names
    #[serde(default = "default_view_template")]
    pub view: String,

    /// Data-chunk file names
    #[serde(default = "default_data_template")]
    pub data: String,
}

/// Consistency configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    /// Consistency mode (none, flush, lock, snapshot)
    #[serde(default)]
    pub mode: Consistency,

    /// Refuse connection rebuilds that would break a transactional guarantee
    #[serde(default)]
    pub transactional_consistency: bool,
}

/// Consistency guarantee established before any data is read.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    /// No guarantee; reads may interleave with writes
    #[default]
    None,

    /// `FLUSH TABLES WITH READ LOCK` for the whole run
    Flush,

    /// `LOCK TABLES ... READ` across the dumped tables
    Lock,

    /// Engine-level snapshot read (TiDB only)
    Snapshot,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_uri() -> String {
    "mysql://root@localhost:3306".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_pool_size() -> u32 {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./export")
}

fn default_file_type() -> FileFormat {
    FileFormat::SqlText
}

fn default_workers() -> usize {
    4
}

fn default_schema_template() -> String {
    "{db}-schema-create".to_string()
}

fn default_table_template() -> String {
    "{db}.{table}-schema".to_string()
}

fn default_view_template() -> String {
    "{db}.{table}-schema-view".to_string()
}

fn default_data_template() -> String {
    "{db}.{table}.{index}".to_string()
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            timeout: default_timeout(),
            max_pool_size: default_max_pool_size(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            file_type: default_file_type(),
            compress: CompressType::default(),
            file_size: None,
            rows: None,
            workers: default_workers(),
            templates: TemplateConfig::default(),
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            schema: default_schema_template(),
            table: default_table_template(),
            view: default_view_template(),
            data: default_data_template(),
        }
    }
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            mode: Consistency::None,
            transactional_consistency: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        toml::from_str(&contents)
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sqldump")
            .join("config.toml")
    }

    /// Resolve into the runtime configuration consumed by the core.
    ///
    /// Parses the filename templates and attaches the detected server info
    /// plus the table map produced by the caller. Template errors surface
    /// here, before any writer starts.
    pub fn into_export(
        self,
        server_info: ServerInfo,
        tables: BTreeMap<String, Vec<String>>,
    ) -> Result<ExportConfig> {
        let template = FileNameTemplate::parse(&self.output.templates)?;
        Ok(ExportConfig {
            consistency: self.consistency.mode,
            transactional_consistency: self.consistency.transactional_consistency,
            server_info,
            tables,
            rows_limit: self.output.rows,
            file_size_limit: self.output.file_size,
            file_format: self.output.file_type,
            compress: self.output.compress,
            output_template: template,
            output_dir: self.output.dir,
            workers: self.output.workers.max(1),
        })
    }
}

/// Resolved run configuration, shared read-only across writers.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Consistency mode for the run
    pub consistency: Consistency,

    /// Forbid connection rebuilds under lock/flush guarantees
    pub transactional_consistency: bool,

    /// Detected server metadata
    pub server_info: ServerInfo,

    /// Tables to dump, keyed by database name
    pub tables: BTreeMap<String, Vec<String>>,

    /// Per-chunk row bound; `None` disables row-based chunking
    pub rows_limit: Option<u64>,

    /// Per-file size bound in bytes; `None` keeps one file per chunk
    pub file_size_limit: Option<u64>,

    /// Output file format
    pub file_format: FileFormat,

    /// Compression applied to every output file
    pub compress: CompressType,

    /// Parsed filename template set
    pub output_template: FileNameTemplate,

    /// Directory receiving the dump files
    pub output_dir: PathBuf,

    /// Number of concurrent writers
    pub workers: usize,
}

impl FromStr for Consistency {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Consistency::None),
            "flush" => Ok(Consistency::Flush),
            "lock" => Ok(Consistency::Lock),
            "snapshot" => Ok(Consistency::Snapshot),
            other => Err(ConfigError::InvalidConsistency(other.to_string())),
        }
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Consistency::None => "none",
            Consistency::Flush => "flush",
            Consistency::Lock => "lock",
            Consistency::Snapshot => "snapshot",
        };
        write!(f, "{name}")
    }
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ServerType;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.connection.uri, "mysql://root@localhost:3306");
        assert_eq!(config.output.file_type, FileFormat::SqlText);
        assert_eq!(config.consistency.mode, Consistency::None);
        assert!(config.output.file_size.is_none());
    }

    #[test]
    fn test_consistency_from_str() {
        assert_eq!("flush".parse::<Consistency>().unwrap(), Consistency::Flush);
        assert_eq!("LOCK".parse::<Consistency>().unwrap(), Consistency::Lock);
        assert!("auto-magic".parse::<Consistency>().is_err());
    }

    #[test]
    fn test_parse_toml_sections() {
        let raw = r#"
            [connection]
            uri = "mysql://dumper@db:3306"

            [output]
            file_type = "csv"
            file_size = 67108864
            workers = 2

            [consistency]
            mode = "lock"
            transactional_consistency = true
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.connection.uri, "mysql://dumper@db:3306");
        assert_eq!(config.output.file_type, FileFormat::Csv);
        assert_eq!(config.output.file_size, Some(67_108_864));
        assert_eq!(config.output.workers, 2);
        assert_eq!(config.consistency.mode, Consistency::Lock);
        assert!(config.consistency.transactional_consistency);
    }

    #[test]
    fn test_into_export_parses_templates() {
        let config = Config::default();
        let export = config
            .into_export(ServerInfo::unknown(), BTreeMap::new())
            .unwrap();
        assert_eq!(export.server_info.server_type, ServerType::Unknown);
        assert_eq!(export.workers, 4);
    }

    #[test]
    fn test_into_export_rejects_bad_template() {
        let mut config = Config::default();
        config.output.templates.data = "{db}.{bogus}".to_string();
        let err = config
            .into_export(ServerInfo::unknown(), BTreeMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("template"));
    }
}
