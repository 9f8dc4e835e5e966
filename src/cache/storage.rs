//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, Result};

/// How many times `open` tries to take the write lock before giving up.
pub const OPEN_RETRY_ATTEMPTS: u32 = 5;
/// Fixed pause between `open` attempts.
pub const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Raw bytes stored under a key, with the time of the last write.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
  pub value: Vec<u8>,
  pub updated_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Values are opaque bytes; the shape stored under each key is the caller's
/// business.
pub trait CacheStorage: Send + Sync {
  /// Get the value and last-write time for a key.
  fn get(&self, key: &str) -> Result<Option<StoredValue>>;

  /// Write a value and stamp it with the current time.
  fn set(&self, key: &str, value: &[u8]) -> Result<()>;

  /// Overwrite a value but keep its existing timestamp.
  /// Keys that don't exist yet are inserted with the current time.
  fn replace_value(&self, key: &str, value: &[u8]) -> Result<()>;

  /// Remove a key. Missing keys are not an error.
  fn delete(&self, key: &str) -> Result<()>;

  /// Remove every key starting with `prefix`.
  fn delete_prefix(&self, prefix: &str) -> Result<()>;

  /// Remove everything.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &str) -> Result<Option<StoredValue>> {
    Ok(None) // Always miss
  }

  fn set(&self, _key: &str, _value: &[u8]) -> Result<()> {
    Ok(()) // Discard
  }

  fn replace_value(&self, _key: &str, _value: &[u8]) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn delete_prefix(&self, _prefix: &str) -> Result<()> {
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
///
/// The connection is released by `close` or when the storage is dropped,
/// whichever comes first. Any operation after that fails with
/// [`Error::StoreClosed`].
pub struct SqliteStorage {
  path: PathBuf,
  conn: Mutex<Option<Connection>>,
}

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

impl SqliteStorage {
  /// Open the cache database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(Self::default_path())
  }

  /// Open (or create) the cache database at `path`.
  ///
  /// Another process holding the database lock is retried a few times with a
  /// fixed delay before failing with [`Error::StoreUnavailable`].
  pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
    let path = path.into();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let mut attempt = 1;
    loop {
      match Self::try_open(&path) {
        Ok(conn) => {
          return Ok(Self {
            path,
            conn: Mutex::new(Some(conn)),
          })
        }
        Err(e) if is_busy(&e) && attempt < OPEN_RETRY_ATTEMPTS => {
          tracing::debug!(path = %path.display(), attempt, "cache store busy, retrying");
          std::thread::sleep(OPEN_RETRY_DELAY);
          attempt += 1;
        }
        Err(e) if is_busy(&e) => {
          tracing::warn!(path = %path.display(), attempts = attempt, "cache store unavailable");
          return Err(Error::StoreUnavailable {
            path,
            attempts: attempt,
          });
        }
        Err(e) => return Err(Error::Storage(e)),
      }
    }
  }

  /// Connect and run migrations under the write lock.
  fn try_open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    // Contention is handled by the retry loop in `open`, not by SQLite waiting.
    conn.busy_timeout(Duration::ZERO)?;
    conn.execute_batch(&format!("BEGIN IMMEDIATE;{}COMMIT;", CACHE_SCHEMA))?;
    conn.busy_timeout(OPEN_RETRY_DELAY)?;
    Ok(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> PathBuf {
    dirs::cache_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".cache")))
      .unwrap_or_else(std::env::temp_dir)
      .join("scythe")
      .join("cache.db")
  }

  /// Release the database connection. Closing twice is fine.
  pub fn close(&self) -> Result<()> {
    let Some(conn) = self.lock().take() else {
      return Ok(());
    };

    conn.close().map_err(|(_, e)| Error::Storage(e))?;
    tracing::debug!(path = %self.path.display(), "cache store closed");
    Ok(())
  }

  fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
    self.conn.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<R>) -> Result<R> {
    let guard = self.lock();
    let conn = guard.as_ref().ok_or(Error::StoreClosed)?;
    Ok(f(conn)?)
  }
}

impl Drop for SqliteStorage {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      tracing::warn!(error = %e, "failed to close cache store");
    }
  }
}

impl CacheStorage for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<StoredValue>> {
    let row: Option<(Vec<u8>, String)> = self.with_conn(|conn| {
      conn
        .query_row(
          "SELECT value, updated_at FROM cache_entries WHERE key = ?",
          params![key],
          |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
    })?;

    match row {
      Some((value, updated_at)) => Ok(Some(StoredValue {
        value,
        updated_at: parse_timestamp(&updated_at)?,
      })),
      None => Ok(None),
    }
  }

  fn set(&self, key: &str, value: &[u8]) -> Result<()> {
    let now = format_timestamp(Utc::now());
    // Keep the larger stamp so a clock step backwards never rewinds a key.
    self.with_conn(|conn| {
      conn.execute(
        "INSERT INTO cache_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
           value = excluded.value,
           updated_at = MAX(updated_at, excluded.updated_at)",
        params![key, value, now],
      )
    })?;
    Ok(())
  }

  fn replace_value(&self, key: &str, value: &[u8]) -> Result<()> {
    let now = format_timestamp(Utc::now());
    self.with_conn(|conn| {
      conn.execute(
        "INSERT INTO cache_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value, now],
      )
    })?;
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    self.with_conn(|conn| conn.execute("DELETE FROM cache_entries WHERE key = ?", params![key]))?;
    Ok(())
  }

  fn delete_prefix(&self, prefix: &str) -> Result<()> {
    // substr instead of LIKE so '%' and '_' in keys match literally
    self.with_conn(|conn| {
      conn.execute(
        "DELETE FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1",
        params![prefix],
      )
    })?;
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    self.with_conn(|conn| conn.execute("DELETE FROM cache_entries", []))?;
    Ok(())
  }
}

fn is_busy(e: &rusqlite::Error) -> bool {
  matches!(
    e.sqlite_error_code(),
    Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
  )
}

/// Fixed-width RFC 3339 so text order matches time order.
fn format_timestamp(at: DateTime<Utc>) -> String {
  at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| {
      Error::Storage(rusqlite::Error::FromSqlConversionFailure(
        1,
        rusqlite::types::Type::Text,
        Box::new(e),
      ))
    })
}
