//! Command-line interface for sqldump
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and validation
//! - Merging command-line overrides into the file configuration
//! - Selection of the databases and tables to dump

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{ConfigError, Result};

/// MySQL logical dump tool
#[derive(Parser, Debug)]
#[command(
    name = "sqldump",
    version,
    about = "MySQL logical dump tool written in Rust",
    long_about = "A streaming MySQL logical dump tool with concurrent writers, \
pluggable consistency guarantees, and size-bounded output files."
)]
pub struct CliArgs {
    /// MySQL connection URI
    ///
    /// Format: mysql://[username:password@]host[:port]
    #[arg(value_name = "URI")]
    pub uri: Option<String>,

    /// Databases to dump (every table in each)
    #[arg(short = 'B', long = "database", value_name = "NAME")]
    pub databases: Vec<String>,

    /// Individual tables to dump, as `database.table`
    #[arg(short = 'T', long = "table", value_name = "DB.TABLE")]
    pub tables: Vec<String>,

    /// Output directory
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output file format (sql, csv)
    #[arg(long, value_name = "FORMAT")]
    pub filetype: Option<String>,

    /// Compress every output file with gzip
    #[arg(long)]
    pub compress: bool,

    /// Split data files once they exceed this many bytes
    #[arg(short = 'F', long = "filesize", value_name = "BYTES")]
    pub file_size: Option<u64>,

    /// Rows per chunk
    #[arg(short = 'r', long, value_name = "ROWS")]
    pub rows: Option<u64>,

    /// Number of concurrent writers
    #[arg(short = 't', long = "threads", value_name = "N")]
    pub threads: Option<usize>,

    /// Consistency mode (none, flush, lock, snapshot)
    #[arg(long, value_name = "MODE")]
    pub consistency: Option<String>,

    /// Refuse connection rebuilds that would break the guarantee
    #[arg(long)]
    pub transactional_consistency: bool,

    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose mode (detailed logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Very verbose mode (debug logging)
    #[arg(long = "vv")]
    pub very_verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands for sqldump
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show version information
    Version,

    /// Show the effective configuration
    Config,
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Loaded configuration with CLI overrides applied
    config: Config,
}

impl CliInterface {
    /// Parse arguments and resolve the effective configuration.
    pub fn new() -> Result<Self> {
        let args = CliArgs::parse();
        let config = Self::load_config(&args)?;
        Ok(Self { args, config })
    }

    #[cfg(test)]
    fn from_args(args: CliArgs) -> Result<Self> {
        let config = Self::load_config(&args)?;
        Ok(Self { args, config })
    }

    /// Load configuration from file and merge with arguments.
    ///
    /// An explicitly named config file must exist; the default path is
    /// optional and silently skipped when absent.
    fn load_config(args: &CliArgs) -> Result<Config> {
        let mut config = match &args.config_file {
            Some(path) => Config::from_file(path)?,
            None => {
                let default = Config::default_path();
                if default.exists() {
                    Config::from_file(&default)?
                } else {
                    Config::default()
                }
            }
        };
        Self::apply_args_to_config(&mut config, args)?;
        Ok(config)
    }

    /// Apply CLI arguments on top of the file configuration.
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) -> Result<()> {
        if let Some(uri) = &args.uri {
            config.connection.uri = uri.clone();
        }
        if let Some(dir) = &args.output_dir {
            config.output.dir = dir.clone();
        }
        if let Some(filetype) = &args.filetype {
            config.output.file_type = match filetype.to_lowercase().as_str() {
                "sql" => crate::format::FileFormat::SqlText,
                "csv" => crate::format::FileFormat::Csv,
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: "filetype".to_string(),
                        value: other.to_string(),
                    }
                    .into());
                }
            };
        }
        if args.compress {
            config.output.compress = crate::storage::CompressType::Gzip;
        }
        if let Some(file_size) = args.file_size {
            config.output.file_size = Some(file_size);
        }
        if let Some(rows) = args.rows {
            config.output.rows = Some(rows);
        }
        if let Some(threads) = args.threads {
            config.output.workers = threads;
        }
        if let Some(consistency) = &args.consistency {
            config.consistency.mode = consistency.parse()?;
        }
        if args.transactional_consistency {
            config.consistency.transactional_consistency = true;
        }
        Ok(())
    }

    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.args.config_file.as_deref()
    }

    /// Handle subcommands that complete without connecting.
    ///
    /// Returns `true` when a subcommand was handled and the process should
    /// exit.
    pub fn handle_subcommand(&self) -> Result<bool> {
        match &self.args.command {
            Some(Commands::Version) => {
                println!("sqldump {}", env!("CARGO_PKG_VERSION"));
                Ok(true)
            }
            Some(Commands::Config) => {
                let rendered = toml::to_string_pretty(&self.config)
                    .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
                println!("{rendered}");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The dump selection: explicit `db.table` pairs, else whole databases.
    ///
    /// Returns `(databases, tables)` where `tables` is empty when whole
    /// databases were selected and discovery should enumerate them.
    pub fn selection(&self) -> Result<Selection> {
        if !self.args.tables.is_empty() {
            let mut pairs = Vec::with_capacity(self.args.tables.len());
            for entry in &self.args.tables {
                let Some((db, table)) = entry.split_once('.') else {
                    return Err(ConfigError::InvalidValue {
                        field: "table".to_string(),
                        value: entry.clone(),
                    }
                    .into());
                };
                pairs.push((db.to_string(), table.to_string()));
            }
            return Ok(Selection::Tables(pairs));
        }
        if !self.args.databases.is_empty() {
            return Ok(Selection::Databases(self.args.databases.clone()));
        }
        Err(ConfigError::InvalidValue {
            field: "database".to_string(),
            value: "no databases or tables selected".to_string(),
        }
        .into())
    }
}

/// What the user asked to dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Whole databases; tables are discovered at runtime.
    Databases(Vec<String>),

    /// Explicit `(database, table)` pairs.
    Tables(Vec<(String, String)>),
}
