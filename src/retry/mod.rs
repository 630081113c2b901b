//! Bounded retry policies with pluggable backoff
//!
//! A [`BackoffStrategy`] decides whether a failed attempt is retried and how
//! long to wait first. Callers drive the loop themselves: check the
//! run-scoped token, run the attempt, consult the strategy, then sleep
//! through [`sleep_or_cancelled`]. Strategies own mutable attempt-spanning
//! state; the lock-tables strategy carries the block list that narrows the
//! locked set between attempts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DumpError, Result};

/// Policy deciding whether and how long to wait before the next attempt.
pub trait BackoffStrategy: Send {
    /// Return the delay before the next attempt, or `None` when retries are
    /// exhausted (the last attempt's error is then returned verbatim).
    fn next_backoff(&mut self, err: &DumpError) -> Option<Duration>;
}

/// Sleep for `delay`, observing the run-scoped cancellation token.
///
/// Cancellation while sleeping yields [`DumpError::Cancelled`] rather than
/// the attempt's error, so callers can tell shutdown from failure.
pub async fn sleep_or_cancelled(cancel: &CancellationToken, delay: Duration) -> Result<()> {
    debug!("retrying in {delay:?}");
    tokio::select! {
        _ = cancel.cancelled() => Err(DumpError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

const DUMP_CHUNK_RETRIES: usize = 3;
const DUMP_CHUNK_BASE_DELAY: Duration = Duration::from_millis(50);
const DUMP_CHUNK_MAX_DELAY: Duration = Duration::from_millis(200);

/// Backoff for table-data chunk writes.
///
/// Bounded attempts with exponential delay; refuses any retry when the
/// consistency mode forbids rebuilding the connection, since a retry without
/// a fresh connection would re-run against a broken session.
pub struct DumpChunkBackoff {
    attempts_left: usize,
    delay: Duration,
    can_retry: bool,
}

impl DumpChunkBackoff {
    pub fn new(can_retry: bool) -> Self {
        Self {
            attempts_left: DUMP_CHUNK_RETRIES,
            delay: DUMP_CHUNK_BASE_DELAY,
            can_retry,
        }
    }
}

impl BackoffStrategy for DumpChunkBackoff {
    fn next_backoff(&mut self, _err: &DumpError) -> Option<Duration> {
        if !self.can_retry || self.attempts_left == 0 {
            return None;
        }
        self.attempts_left -= 1;
        let delay = self.delay;
        self.delay = (self.delay * 2).min(DUMP_CHUNK_MAX_DELAY);
        Some(delay)
    }
}

/// Tables excluded from subsequent lock statements, keyed by database.
///
/// Shared between the lock-acquisition loop and its backoff strategy, never
/// ambient state.
pub type BlockList = Arc<Mutex<BTreeMap<String, BTreeSet<String>>>>;

const LOCK_TABLES_RETRIES: usize = 5;
const LOCK_TABLES_DELAY: Duration = Duration::from_millis(10);

/// Backoff for `LOCK TABLES` acquisition.
///
/// When the error names a table that disappeared mid-negotiation, the table
/// joins the block list and the next attempt locks a narrower set instead of
/// re-running the same failing statement. Errors that identify no table are
/// not retried.
pub struct LockTablesBackoff {
    attempts_left: usize,
    block_list: BlockList,
}

impl LockTablesBackoff {
    pub fn new(block_list: BlockList) -> Self {
        Self {
            attempts_left: LOCK_TABLES_RETRIES,
            block_list,
        }
    }
}

impl BackoffStrategy for LockTablesBackoff {
    fn next_backoff(&mut self, err: &DumpError) -> Option<Duration> {
        if self.attempts_left == 0 {
            return None;
        }
        let (db, table) = extract_missing_table(err)?;
        self.attempts_left -= 1;
        debug!("excluding vanished table `{db}`.`{table}` from lock statement");
        self.block_list
            .lock()
            .expect("block list lock poisoned")
            .entry(db)
            .or_default()
            .insert(table);
        Some(LOCK_TABLES_DELAY)
    }
}

/// Pull `db`/`table` out of a "Table 'db.t' doesn't exist" driver error.
fn extract_missing_table(err: &DumpError) -> Option<(String, String)> {
    let text = err.to_string();
    let start = text.find("Table '")? + "Table '".len();
    let rest = &text[start..];
    let end = rest.find('\'')?;
    let qualified = &rest[..end];
    let (db, table) = qualified.split_once('.')?;
    if db.is_empty() || table.is_empty() {
        return None;
    }
    Some((db.to_string(), table.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_completes_without_cancellation() {
        let cancel = CancellationToken::new();
        let result = sleep_or_cancelled(&cancel, Duration::from_millis(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_cancellation() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });
        let result = sleep_or_cancelled(&cancel, Duration::from_secs(60)).await;
        assert!(matches!(result, Err(DumpError::Cancelled)));
    }

    #[test]
    fn test_dump_chunk_backoff_bounded() {
        let mut backoff = DumpChunkBackoff::new(true);
        let err = DumpError::Generic("x".to_string());
        assert_eq!(backoff.next_backoff(&err), Some(Duration::from_millis(50)));
        assert_eq!(backoff.next_backoff(&err), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(&err), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(&err), None);
    }

    #[test]
    fn test_dump_chunk_backoff_rebuild_forbidden() {
        let mut backoff = DumpChunkBackoff::new(false);
        let err = DumpError::Generic("x".to_string());
        assert_eq!(backoff.next_backoff(&err), None);
    }

    #[test]
    fn test_lock_tables_backoff_narrows_block_list() {
        let block_list: BlockList = Arc::default();
        let mut backoff = LockTablesBackoff::new(Arc::clone(&block_list));

        let err = DumpError::Generic("Table 'db1.b' doesn't exist".to_string());
        assert!(backoff.next_backoff(&err).is_some());
        assert!(block_list.lock().unwrap()["db1"].contains("b"));

        // Errors naming no table are not retried.
        let err = DumpError::Generic("deadlock found".to_string());
        assert!(backoff.next_backoff(&err).is_none());
    }

    #[test]
    fn test_extract_missing_table() {
        let err = DumpError::Generic("Table 'mydb.users' doesn't exist".to_string());
        assert_eq!(
            extract_missing_table(&err),
            Some(("mydb".to_string(), "users".to_string()))
        );
        let err = DumpError::Generic("syntax error".to_string());
        assert_eq!(extract_missing_table(&err), None);
    }
}
