//! SQLite-backed completion store shared by worker processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{
    CompletionCounter, CompletionProgress, CompletionStore, ExpectedTotalOutcome, SiblingOutcome,
    TriggerState,
};
use crate::errors::{JobError, JobResult, JobflowError};
use crate::health::HealthCheck;

/// Type alias for the store's connection pool.
pub type StorePool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS completion_counters (
    parent_id       TEXT PRIMARY KEY,
    total_expected  INTEGER NOT NULL,
    completed_count INTEGER NOT NULL DEFAULT 0,
    failed          INTEGER NOT NULL DEFAULT 0,
    trigger_state   TEXT NOT NULL DEFAULT 'pending',
    claimed_at_ms   INTEGER,
    updated_at      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS completion_members (
    parent_id   TEXT NOT NULL,
    member_id   TEXT NOT NULL,
    outcome     TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (parent_id, member_id)
);
";

const COUNTER_COLS: &str = "parent_id, total_expected, completed_count, failed, trigger_state, claimed_at_ms";

/// Durable completion store on SQLite.
///
/// Every increment runs in one `BEGIN IMMEDIATE` transaction: the member row
/// is inserted with `INSERT OR IGNORE` and the counter is bumped with
/// `UPDATE ... RETURNING`, so the post-increment value is read atomically
/// with the write. Blocking calls run on the tokio blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteCompletionStore {
    pool: StorePool,
}

impl SqliteCompletionStore {
    /// Opens (or creates) a store backed by a file.
    ///
    /// Connections use WAL journaling and a busy timeout so concurrent
    /// writers from several processes queue instead of failing.
    ///
    /// # Errors
    ///
    /// Returns [`JobflowError::Store`] if the pool or schema cannot be set up.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JobflowError> {
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")
        });
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| JobflowError::Store(format!("Failed to create connection pool: {e}")))?;
        Self::with_pool(pool)
    }

    /// Opens a private in-memory store with a single connection.
    ///
    /// # Errors
    ///
    /// Returns [`JobflowError::Store`] if the pool or schema cannot be set up.
    pub fn in_memory() -> Result<Self, JobflowError> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())
            .map_err(|e| JobflowError::Store(format!("Failed to create in-memory pool: {e}")))?;
        Self::with_pool(pool)
    }

    /// Wraps an existing pool, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns [`JobflowError::Store`] if the schema cannot be created.
    pub fn with_pool(pool: StorePool) -> Result<Self, JobflowError> {
        let conn = pool
            .get()
            .map_err(|e| JobflowError::Store(format!("Failed to get connection for schema: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| JobflowError::Store(format!("Failed to create schema: {e}")))?;
        debug!("Completion store schema ready");
        Ok(Self { pool })
    }

    async fn with_conn<T, F>(&self, op: F) -> JobResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> JobResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| JobError::external_service(format!("Completion store unavailable: {e}")))?;
            op(&mut conn)
        })
        .await
        .map_err(|e| JobError::unknown(format!("Completion store task failed: {e}")))?
    }
}

fn store_err(e: rusqlite::Error) -> JobError {
    JobError::external_service(format!("Completion store error: {e}"))
}

fn unknown_parent(parent_id: &str) -> JobError {
    JobError::validation(format!("No completion counter for parent {parent_id}"))
        .with_context_entry("parent_id", parent_id)
}

fn read_counter(conn: &Connection, parent_id: &str) -> JobResult<Option<CompletionCounter>> {
    let sql = format!("SELECT {COUNTER_COLS} FROM completion_counters WHERE parent_id = ?1");
    let row = conn
        .query_row(&sql, params![parent_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        })
        .optional()
        .map_err(store_err)?;

    row.map(|(parent_id, total_expected, completed_count, failed, trigger, claimed_at_ms)| {
        let trigger = TriggerState::parse(&trigger).ok_or_else(|| {
            JobError::database(format!("Unrecognized trigger state '{trigger}' for {parent_id}"))
        })?;
        Ok(CompletionCounter {
            parent_id,
            total_expected,
            completed_count,
            failed,
            trigger,
            claimed_at: claimed_at_ms.and_then(DateTime::from_timestamp_millis),
        })
    })
    .transpose()
}

#[async_trait]
impl CompletionStore for SqliteCompletionStore {
    async fn set_expected_total(&self, parent_id: &str, total: u32) -> JobResult<ExpectedTotalOutcome> {
        let parent_id = parent_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(store_err)?;
            let now = Utc::now().to_rfc3339();

            let existing: Option<u32> = tx
                .query_row(
                    "SELECT total_expected FROM completion_counters WHERE parent_id = ?1",
                    params![parent_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(store_err)?;

            let outcome = match existing {
                None => {
                    tx.execute(
                        "INSERT INTO completion_counters (parent_id, total_expected, updated_at)
                         VALUES (?1, ?2, ?3)",
                        params![parent_id, total, now],
                    )
                    .map_err(store_err)?;
                    ExpectedTotalOutcome::Created
                }
                Some(previous) if previous == total => ExpectedTotalOutcome::Unchanged,
                Some(previous) => {
                    tx.execute(
                        "UPDATE completion_counters SET total_expected = ?2, updated_at = ?3
                         WHERE parent_id = ?1",
                        params![parent_id, total, now],
                    )
                    .map_err(store_err)?;
                    ExpectedTotalOutcome::Conflict { previous }
                }
            };

            tx.commit().map_err(store_err)?;
            Ok(outcome)
        })
        .await
    }

    async fn atomic_increment(
        &self,
        parent_id: &str,
        member_id: &str,
        outcome: SiblingOutcome,
    ) -> JobResult<CompletionProgress> {
        let parent_id = parent_id.to_string();
        let member_id = member_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(store_err)?;
            let now = Utc::now().to_rfc3339();

            let current = read_counter(&tx, &parent_id)?.ok_or_else(|| unknown_parent(&parent_id))?;

            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO completion_members (parent_id, member_id, outcome, recorded_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![parent_id, member_id, outcome.as_str(), now],
                )
                .map_err(store_err)?;

            if inserted == 0 {
                tx.commit().map_err(store_err)?;
                return Ok(CompletionProgress {
                    completed_count: current.completed_count,
                    total_expected: current.total_expected,
                    is_last: false,
                    duplicate: true,
                    failed: current.failed,
                });
            }

            let (completed_count, total_expected, failed): (u32, u32, bool) = tx
                .query_row(
                    "UPDATE completion_counters
                     SET completed_count = completed_count + 1,
                         failed = failed OR ?2,
                         updated_at = ?3
                     WHERE parent_id = ?1
                     RETURNING completed_count, total_expected, failed",
                    params![parent_id, outcome == SiblingOutcome::Failed, now],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(store_err)?;

            tx.commit().map_err(store_err)?;
            Ok(CompletionProgress {
                completed_count,
                total_expected,
                is_last: completed_count == total_expected,
                duplicate: false,
                failed,
            })
        })
        .await
    }

    async fn claim_trigger(&self, parent_id: &str, lease: Duration) -> JobResult<bool> {
        let parent_id = parent_id.to_string();
        let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let now = Utc::now();
            let now_ms = now.timestamp_millis();
            let changed = conn
                .execute(
                    "UPDATE completion_counters
                     SET trigger_state = 'claimed', claimed_at_ms = ?2, updated_at = ?3
                     WHERE parent_id = ?1
                       AND completed_count >= total_expected
                       AND (trigger_state = 'pending'
                            OR (trigger_state = 'claimed'
                                AND (claimed_at_ms IS NULL OR claimed_at_ms <= ?4)))",
                    params![parent_id, now_ms, now.to_rfc3339(), now_ms.saturating_sub(lease_ms)],
                )
                .map_err(store_err)?;
            Ok(changed == 1)
        })
        .await
    }

    async fn release_trigger(&self, parent_id: &str) -> JobResult<()> {
        let parent_id = parent_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE completion_counters
                 SET trigger_state = 'pending', claimed_at_ms = NULL, updated_at = ?2
                 WHERE parent_id = ?1 AND trigger_state = 'claimed'",
                params![parent_id, Utc::now().to_rfc3339()],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn mark_fired(&self, parent_id: &str) -> JobResult<()> {
        let parent_id = parent_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE completion_counters
                     SET trigger_state = 'fired', claimed_at_ms = NULL, updated_at = ?2
                     WHERE parent_id = ?1",
                    params![parent_id, Utc::now().to_rfc3339()],
                )
                .map_err(store_err)?;
            if changed == 0 {
                debug!(parent_id = %parent_id, "Counter already archived; nothing to mark fired");
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, parent_id: &str) -> JobResult<Option<CompletionCounter>> {
        let parent_id = parent_id.to_string();
        self.with_conn(move |conn| read_counter(conn, &parent_id)).await
    }

    async fn archive(&self, parent_id: &str) -> JobResult<Option<CompletionCounter>> {
        let parent_id = parent_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(store_err)?;
            let counter = read_counter(&tx, &parent_id)?;
            tx.execute("DELETE FROM completion_members WHERE parent_id = ?1", params![parent_id])
                .map_err(store_err)?;
            tx.execute("DELETE FROM completion_counters WHERE parent_id = ?1", params![parent_id])
                .map_err(store_err)?;
            tx.commit().map_err(store_err)?;
            Ok(counter)
        })
        .await
    }
}

#[async_trait]
impl HealthCheck for SqliteCompletionStore {
    fn name(&self) -> &str {
        "completion_store"
    }

    async fn check(&self) -> anyhow::Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(store_err)?;
            Ok(())
        })
        .await?;
        Ok(())
    }
}
