//! Database connection management
//!
//! This module wraps the MySQL driver behind small traits so the writer and
//! consistency components stay independent of the concrete driver:
//! - [`DbConnection`]: a single live connection (execute + ping)
//! - [`ConnectionRebuilder`]: discard-and-reacquire policy used by the
//!   chunk-retry path
//! - [`ServerInfo`]/[`ServerType`]: server metadata detected from the
//!   version string, driving consistency-mode eligibility

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Executor, MySql, MySqlPool, Row};
use tracing::{debug, info};

use crate::error::{ConnectionError, Result};

/// A single live database connection.
///
/// Exactly one owner at a time; the writer replaces its connection through
/// [`ConnectionRebuilder`] rather than sharing it.
#[async_trait]
pub trait DbConnection: Send {
    /// Execute a statement, discarding any result rows.
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Check that the connection is still alive.
    async fn ping(&mut self) -> Result<()>;
}

/// Rebuilds a broken connection between chunk-write attempts.
///
/// The old connection is consumed so it can be dropped back to the pool (or
/// discarded outright) before a replacement is acquired.
#[async_trait]
pub trait ConnectionRebuilder: Send + Sync {
    async fn rebuild(
        &self,
        old: Option<Box<dyn DbConnection>>,
    ) -> Result<Box<dyn DbConnection>>;
}

/// [`DbConnection`] implementation over a pooled sqlx MySQL connection.
pub struct SqlxConnection {
    conn: PoolConnection<MySql>,
}

impl SqlxConnection {
    pub fn new(conn: PoolConnection<MySql>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DbConnection for SqlxConnection {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        debug!("executing: {sql}");
        (&mut *self.conn).execute(sql).await?;
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.conn
            .ping()
            .await
            .map_err(|e| ConnectionError::PingFailed(e.to_string()).into())
    }
}

/// Pool-backed [`ConnectionRebuilder`]: drops the old connection and
/// acquires a fresh one from the same pool.
pub struct PoolRebuilder {
    pool: MySqlPool,
}

impl PoolRebuilder {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionRebuilder for PoolRebuilder {
    async fn rebuild(
        &self,
        old: Option<Box<dyn DbConnection>>,
    ) -> Result<Box<dyn DbConnection>> {
        drop(old);
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| ConnectionError::RebuildFailed(e.to_string()))?;
        debug!("rebuilt database connection");
        Ok(Box::new(SqlxConnection::new(conn)))
    }
}

/// Shared rebuilder handle injected into writers.
pub type RebuilderRef = Arc<dyn ConnectionRebuilder>;

/// Server flavor detected from the version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerType {
    MySql,
    MariaDb,
    TiDb,
    Unknown,
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerType::MySql => "MySQL",
            ServerType::MariaDb => "MariaDB",
            ServerType::TiDb => "TiDB",
            ServerType::Unknown => "unknown server",
        };
        write!(f, "{name}")
    }
}

/// Server metadata resolved once at startup.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub server_type: ServerType,
    pub version: Option<String>,
}

impl ServerInfo {
    /// Placeholder info for contexts where no server was contacted.
    pub fn unknown() -> Self {
        Self {
            server_type: ServerType::Unknown,
            version: None,
        }
    }

    /// Classify a server from its `VERSION()` string.
    ///
    /// TiDB and MariaDB both embed their name in the version comment, e.g.
    /// `8.0.11-TiDB-v7.5.0` or `10.11.6-MariaDB`.
    pub fn from_version(version: &str) -> Self {
        let lower = version.to_lowercase();
        let server_type = if lower.contains("tidb") {
            ServerType::TiDb
        } else if lower.contains("mariadb") {
            ServerType::MariaDb
        } else {
            ServerType::MySql
        };
        Self {
            server_type,
            version: Some(version.to_string()),
        }
    }
}

/// Connect a pool sized for the run and detect the server flavor.
pub async fn connect(uri: &str, max_pool_size: u32, timeout_secs: u64) -> Result<(MySqlPool, ServerInfo)> {
    let pool = MySqlPoolOptions::new()
        .max_connections(max_pool_size)
        .acquire_timeout(std::time::Duration::from_secs(timeout_secs))
        .connect(uri)
        .await
        .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

    let row = sqlx::query("SELECT VERSION()").fetch_one(&pool).await?;
    let version: String = row.try_get(0)?;
    let info = ServerInfo::from_version(&version);
    info!("connected to {} ({version})", info.server_type);
    Ok((pool, info))
}
