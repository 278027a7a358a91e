//! SQLite storage for usage records.
//!
//! One table, `usage_records`, keyed by `identity_key`. Writes are upserts
//! that replace the whole row, so re-ingesting a log is a no-op on totals and
//! a re-scan after a pricing change overwrites the old cost.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use costmon_core::paths;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info, warn};

use crate::error::{Result, UsageError, is_database_locked_error};
use crate::identity::IdentityKey;
use crate::models::{CostSource, RecordSource, UsageRecord};

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

/// Retries once `busy_timeout` has already expired.
const DB_LOCK_MAX_RETRIES: u32 = 5;

const DB_LOCK_INITIAL_DELAY_MS: u64 = 50;

const DB_LOCK_MAX_DELAY: Duration = Duration::from_secs(5);

/// How long SQLite itself waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Column list shared by inserts and selects, in [`UsageStore::row_to_record`] order.
const RECORD_COLUMNS: &str = "identity_key, date, provider, model, app, source,
    input_tokens, output_tokens, cache_read_tokens, cache_creation_tokens,
    cost, savings, cache_write_cost, unknown_pricing, cost_source, recorded_at";

impl ToSql for RecordSource {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RecordSource {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        RecordSource::parse(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

impl ToSql for CostSource {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for CostSource {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        CostSource::parse(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

/// Read a `YYYY-MM-DD` text column.
pub(crate) fn date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// SQLite-backed usage store.
pub struct UsageStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl UsageStore {
    /// Open or create the database file at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            paths::ensure_dir(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets a report read while a cron fetch writes
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened usage database");

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open `usage.db` inside a state directory.
    pub fn open_in_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open(dir.as_ref().join(paths::DATABASE_FILE))
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Shared connection handle for [`crate::query::UsageQuery`].
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| UsageError::Query(format!("failed to acquire lock: {e}")))
    }

    /// Run `f`, sleeping and rerunning it while another costmon process
    /// (a cron `fetch` racing a manual `record` or `report`) holds the write
    /// lock past `busy_timeout`.
    fn with_retry<T, F>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut retries = 0;
        loop {
            let err = match f() {
                Ok(value) => {
                    if retries > 0 {
                        debug!(operation, retries, "usage store write went through after waiting");
                    }
                    return Ok(value);
                }
                Err(e) if is_database_locked_error(&e) => e,
                Err(e) => return Err(e),
            };

            if retries == DB_LOCK_MAX_RETRIES {
                return Err(UsageError::DatabaseLocked {
                    retry_count: retries,
                    max_retries: DB_LOCK_MAX_RETRIES,
                    message: err.to_string(),
                });
            }
            let wait = lock_backoff(retries);
            retries += 1;
            warn!(
                operation,
                retry = retries,
                of = DB_LOCK_MAX_RETRIES,
                wait_ms = wait.as_millis() as u64,
                "usage store busy with another costmon run"
            );
            std::thread::sleep(wait);
        }
    }

    /// Create or upgrade the schema.
    fn migrate(&self) -> Result<()> {
        self.with_retry("migrate", || {
            let conn = self
                .conn
                .lock()
                .map_err(|e| UsageError::Migration(format!("failed to acquire lock: {e}")))?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY
                )",
                [],
            )?;

            let current_version: i32 = conn.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )?;

            if current_version > SCHEMA_VERSION {
                return Err(UsageError::Migration(format!(
                    "database schema v{current_version} is newer than supported v{SCHEMA_VERSION}"
                )));
            }
            if current_version < SCHEMA_VERSION {
                info!(
                    current = current_version,
                    target = SCHEMA_VERSION,
                    "running database migrations"
                );
                Self::run_migrations(&conn, current_version)?;
            }
            Ok(())
        })
    }

    fn run_migrations(conn: &Connection, from_version: i32) -> Result<()> {
        if from_version < 1 {
            Self::migration_v1(conn)?;
        }
        Ok(())
    }

    /// Migration to version 1: usage table.
    fn migration_v1(conn: &Connection) -> Result<()> {
        debug!("running migration v1: usage_records");

        conn.execute_batch(
            "BEGIN;
             CREATE TABLE IF NOT EXISTS usage_records (
                identity_key TEXT PRIMARY KEY,
                date TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                app TEXT NOT NULL,
                source TEXT NOT NULL,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cache_read_tokens INTEGER NOT NULL DEFAULT 0,
                cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
                cost REAL NOT NULL DEFAULT 0,
                savings REAL NOT NULL DEFAULT 0,
                cache_write_cost REAL NOT NULL DEFAULT 0,
                unknown_pricing INTEGER NOT NULL DEFAULT 0,
                cost_source TEXT NOT NULL DEFAULT 'computed',
                recorded_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_usage_date ON usage_records(date);
             CREATE INDEX IF NOT EXISTS idx_usage_date_provider ON usage_records(date, provider);
             CREATE INDEX IF NOT EXISTS idx_usage_date_model ON usage_records(date, model);
             INSERT OR IGNORE INTO schema_version (version) VALUES (1);
             COMMIT;",
        )?;

        info!("migration v1 completed");
        Ok(())
    }

    /// Insert or replace one record.
    pub fn upsert(&self, record: &UsageRecord) -> Result<usize> {
        self.upsert_batch(std::slice::from_ref(record))
    }

    /// Insert or replace records in one transaction. Returns rows written.
    pub fn upsert_batch(&self, records: &[UsageRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let count = self.with_retry("upsert_batch", || {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let mut written = 0;
            {
                let mut stmt = tx.prepare_cached(&format!(
                    "INSERT INTO usage_records ({RECORD_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                     ON CONFLICT(identity_key) DO UPDATE SET
                        date = excluded.date,
                        provider = excluded.provider,
                        model = excluded.model,
                        app = excluded.app,
                        source = excluded.source,
                        input_tokens = excluded.input_tokens,
                        output_tokens = excluded.output_tokens,
                        cache_read_tokens = excluded.cache_read_tokens,
                        cache_creation_tokens = excluded.cache_creation_tokens,
                        cost = excluded.cost,
                        savings = excluded.savings,
                        cache_write_cost = excluded.cache_write_cost,
                        unknown_pricing = excluded.unknown_pricing,
                        cost_source = excluded.cost_source,
                        recorded_at = excluded.recorded_at"
                ))?;

                for record in records {
                    written += stmt.execute(params![
                        record.identity_key,
                        record.date.to_string(),
                        record.provider,
                        record.model,
                        record.app,
                        record.source,
                        record.input_tokens,
                        record.output_tokens,
                        record.cache_read_tokens,
                        record.cache_creation_tokens,
                        record.cost,
                        record.savings,
                        record.cache_write_cost,
                        record.unknown_pricing,
                        record.cost_source,
                        record.recorded_at.to_rfc3339(),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(written)
        })?;

        debug!(count, "upserted usage records");
        Ok(count)
    }

    /// Fetch one record by key.
    pub fn get(&self, key: &IdentityKey) -> Result<Option<UsageRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM usage_records WHERE identity_key = ?1"),
                params![key],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Total number of stored rows.
    pub fn record_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM usage_records", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Map a row selected with [`RECORD_COLUMNS`].
    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<UsageRecord> {
        let recorded_at: String = row.get(15)?;
        let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(15, Type::Text, Box::new(e)))?;

        Ok(UsageRecord {
            identity_key: row.get(0)?,
            date: date_column(row, 1)?,
            provider: row.get(2)?,
            model: row.get(3)?,
            app: row.get(4)?,
            source: row.get(5)?,
            input_tokens: row.get(6)?,
            output_tokens: row.get(7)?,
            cache_read_tokens: row.get(8)?,
            cache_creation_tokens: row.get(9)?,
            cost: row.get(10)?,
            savings: row.get(11)?,
            cache_write_cost: row.get(12)?,
            unknown_pricing: row.get(13)?,
            cost_source: row.get(14)?,
            recorded_at,
        })
    }
}

/// Wait before retry number `retry + 1`: doubling from the initial delay, capped.
fn lock_backoff(retry: u32) -> Duration {
    Duration::from_millis(DB_LOCK_INITIAL_DELAY_MS)
        .saturating_mul(1 << retry.min(16))
        .min(DB_LOCK_MAX_DELAY)
}
