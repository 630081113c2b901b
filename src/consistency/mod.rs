//! Consistency guarantees for the export run
//!
//! A [`ConsistencyController`] is constructed once before any data read,
//! `setup` runs exactly once, and `teardown` runs exactly once at run end,
//! whether the run succeeded or failed. In between, `ping` detects a broken
//! guarantee.
//! Teardown is terminal: pinging a torn-down controller reports an explicit
//! already-closed error, never a silent success.
//!
//! The controller's dedicated connection is disjoint from every writer's
//! connection, so tearing either side down cannot break the other.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Consistency, ExportConfig};
use crate::connection::{DbConnection, ServerType};
use crate::error::{ConnectionError, ConsistencyError, DumpError, Result};
use crate::retry::{sleep_or_cancelled, BackoffStrategy, BlockList, LockTablesBackoff};

const FLUSH_TABLES_SQL: &str = "FLUSH TABLES WITH READ LOCK";
const UNLOCK_TABLES_SQL: &str = "UNLOCK TABLES";

/// Controls the consistency of the exporting progress.
#[async_trait]
pub trait ConsistencyController: Send {
    /// Establish the guarantee. Called exactly once, before any data read.
    async fn setup(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Release the guarantee and close the dedicated connection.
    async fn teardown(&mut self) -> Result<()>;

    /// Verify the guarantee's connection is still alive.
    async fn ping(&mut self) -> Result<()>;
}

/// Select the controller for the configured consistency mode.
///
/// `conn` becomes the controller's dedicated connection; modes that own no
/// connection (`none`, `snapshot`) drop it. Snapshot eligibility is a
/// construction-time check: reaching `setup` with an unsupported server type
/// is a configuration bug, not a runtime condition.
pub fn resolve(
    config: &ExportConfig,
    conn: Option<Box<dyn DbConnection>>,
) -> Result<Box<dyn ConsistencyController>> {
    match config.consistency {
        Consistency::None => Ok(Box::new(ConsistencyNone)),
        Consistency::Snapshot => {
            if config.server_info.server_type != ServerType::TiDb {
                return Err(ConsistencyError::Unsupported {
                    mode: Consistency::Snapshot.to_string(),
                    server: config.server_info.server_type.to_string(),
                }
                .into());
            }
            // The guarantee is the engine-level snapshot read itself; no
            // dedicated connection or statements are needed.
            Ok(Box::new(ConsistencyNone))
        }
        Consistency::Flush => {
            let conn = conn.ok_or(ConnectionError::NotConnected)?;
            Ok(Box::new(ConsistencyFlushTableWithReadLock {
                server_type: config.server_info.server_type,
                conn: Some(conn),
            }))
        }
        Consistency::Lock => {
            let conn = conn.ok_or(ConnectionError::NotConnected)?;
            Ok(Box::new(ConsistencyLockDumpingTables {
                conn: Some(conn),
                all_tables: config.tables.clone(),
            }))
        }
    }
}

/// Whether the mode holds its guarantee on a dedicated connection that the
/// caller must supply to [`resolve`].
pub fn holds_connection(consistency: Consistency) -> bool {
    matches!(consistency, Consistency::Flush | Consistency::Lock)
}

/// Whether a writer may rebuild its data connection mid-chunk without
/// breaking the run's guarantee.
pub fn can_rebuild_conn(consistency: Consistency, transactional_consistency: bool) -> bool {
    match consistency {
        Consistency::Lock | Consistency::Flush => !transactional_consistency,
        Consistency::Snapshot | Consistency::None => true,
    }
}

/// Dumps without any guarantee; all three calls are no-ops.
pub struct ConsistencyNone;

#[async_trait]
impl ConsistencyController for ConsistencyNone {
    async fn setup(&mut self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Holds a global read lock via `FLUSH TABLES WITH READ LOCK`.
pub struct ConsistencyFlushTableWithReadLock {
    server_type: ServerType,
    conn: Option<Box<dyn DbConnection>>,
}

#[async_trait]
impl ConsistencyController for ConsistencyFlushTableWithReadLock {
    async fn setup(&mut self, _cancel: &CancellationToken) -> Result<()> {
        // TiDB's engine cannot honor a global read lock consistently; fail
        // fast instead of silently degrading the guarantee.
        if self.server_type == ServerType::TiDb {
            return Err(ConsistencyError::Unsupported {
                mode: Consistency::Flush.to_string(),
                server: self.server_type.to_string(),
            }
            .into());
        }
        let conn = self.conn.as_mut().ok_or(ConsistencyError::AlreadyClosed)?;
        info!("acquiring global read lock");
        conn.execute(FLUSH_TABLES_SQL).await
    }

    async fn teardown(&mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let result = conn.execute(UNLOCK_TABLES_SQL).await;
        drop(conn);
        result
    }

    async fn ping(&mut self) -> Result<()> {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await,
            None => Err(ConsistencyError::AlreadyClosed.into()),
        }
    }
}

/// Holds table-level read locks across the full set of dumped tables.
pub struct ConsistencyLockDumpingTables {
    conn: Option<Box<dyn DbConnection>>,
    all_tables: BTreeMap<String, Vec<String>>,
}

#[async_trait]
impl ConsistencyController for ConsistencyLockDumpingTables {
    async fn setup(&mut self, cancel: &CancellationToken) -> Result<()> {
        let conn = self.conn.as_mut().ok_or(ConsistencyError::AlreadyClosed)?;
        let block_list: BlockList = Arc::default();
        let mut backoff = LockTablesBackoff::new(Arc::clone(&block_list));
        info!("locking dumped tables for read");
        loop {
            if cancel.is_cancelled() {
                return Err(DumpError::Cancelled);
            }
            let sql = build_lock_tables_sql(&self.all_tables, &block_list);
            debug!("lock statement: {sql}");
            match conn.execute(&sql).await {
                Ok(()) => return Ok(()),
                Err(err) => match backoff.next_backoff(&err) {
                    None => return Err(err),
                    Some(delay) => sleep_or_cancelled(cancel, delay).await?,
                },
            }
        }
    }

    async fn teardown(&mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let result = conn.execute(UNLOCK_TABLES_SQL).await;
        drop(conn);
        result
    }

    async fn ping(&mut self) -> Result<()> {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await,
            None => Err(ConsistencyError::AlreadyClosed.into()),
        }
    }
}

/// Build the `LOCK TABLES` statement over every table not on the block list.
fn build_lock_tables_sql(
    all_tables: &BTreeMap<String, Vec<String>>,
    block_list: &BlockList,
) -> String {
    let blocked = block_list.lock().expect("block list lock poisoned");
    let empty = BTreeSet::new();
    let mut clauses = Vec::new();
    for (db, tables) in all_tables {
        let skip = blocked.get(db).unwrap_or(&empty);
        for table in tables {
            if skip.contains(table) {
                continue;
            }
            clauses.push(format!("{}.{} READ", quote_ident(db), quote_ident(table)));
        }
    }
    format!("LOCK TABLES {}", clauses.join(","))
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
