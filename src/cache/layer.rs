//! Cache layer that applies a freshness policy on top of a storage backend.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;

use super::storage::CacheStorage;
use super::traits::{CacheResult, Cached};
use crate::error::Result;

/// Cache layer that manages staleness and network fetching.
///
/// Entries older than the time-to-live are deleted when read, so a miss
/// reported here is also a miss in the underlying storage. Without a TTL,
/// entries live until explicitly deleted.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  /// How long before cached data is considered stale
  ttl: Option<Duration>,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend. Entries never expire.
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self {
      storage: Arc::new(storage),
      ttl: None,
    }
  }

  /// Set the time-to-live for cached data.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }

  fn is_stale(&self, updated_at: DateTime<Utc>) -> bool {
    match self.ttl {
      Some(ttl) => Utc::now() - updated_at > ttl,
      None => false,
    }
  }

  /// Get a fresh value, or `None` if it is missing or stale.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    Ok(self.get_entry(key)?.map(|cached| cached.value))
  }

  /// Get a fresh value along with the time it was last fetched.
  pub fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Cached<T>>> {
    let Some(stored) = self.storage.get(key)? else {
      tracing::debug!(key, "cache miss");
      return Ok(None);
    };

    if self.is_stale(stored.updated_at) {
      tracing::debug!(key, updated_at = %stored.updated_at, "evicting stale cache entry");
      self.storage.delete(key)?;
      return Ok(None);
    }

    match serde_json::from_slice(&stored.value) {
      Ok(value) => {
        tracing::debug!(key, "cache hit");
        Ok(Some(Cached {
          value,
          updated_at: stored.updated_at,
        }))
      }
      Err(e) => {
        tracing::warn!(key, error = %e, "dropping unreadable cache entry");
        self.storage.delete(key)?;
        Ok(None)
      }
    }
  }

  /// Store a value and mark it as freshly fetched.
  pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
    self.set_with(key, value, true)
  }

  /// Store a value. With `refresh_timestamp` false the entry keeps the time
  /// of its last real fetch, so a locally corrected value ages out on the
  /// same schedule as the value it was derived from.
  pub fn set_with<T: Serialize + ?Sized>(
    &self,
    key: &str,
    value: &T,
    refresh_timestamp: bool,
  ) -> Result<()> {
    let data = serde_json::to_vec(value)?;
    if refresh_timestamp {
      self.storage.set(key, &data)
    } else {
      self.storage.replace_value(key, &data)
    }
  }

  /// When the key was last written, regardless of staleness.
  pub fn updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
    Ok(self.storage.get(key)?.map(|stored| stored.updated_at))
  }

  pub fn delete(&self, key: &str) -> Result<()> {
    self.storage.delete(key)
  }

  pub fn delete_prefix(&self, prefix: &str) -> Result<()> {
    self.storage.delete_prefix(prefix)
  }

  pub fn clear(&self) -> Result<()> {
    self.storage.clear()
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Check cache - if fresh, return immediately
  /// 2. If stale/missing, fetch from network
  /// 3. Update cache with new data
  ///
  /// Fetch errors are returned as-is and nothing is cached.
  pub async fn fetch<T, F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    if let Some(cached) = self.get_entry::<T>(key)? {
      return Ok(CacheResult::from_cache(cached));
    }

    let data = fetcher().await?;
    self.set(key, &data)?;
    Ok(CacheResult::from_network(data))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{NoopStorage, SqliteStorage};
  use crate::cache::traits::CacheSource;
  use crate::error::Error;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tempfile::TempDir;

  fn temp_store(dir: &TempDir) -> SqliteStorage {
    SqliteStorage::open(dir.path().join("cache.db")).unwrap()
  }

  #[test]
  fn test_get_on_empty_store() {
    let dir = TempDir::new().unwrap();
    let cache = CacheLayer::new(temp_store(&dir));
    assert_eq!(cache.get::<Vec<String>>("projects").unwrap(), None);
  }

  #[test]
  fn test_no_ttl_never_expires() {
    let dir = TempDir::new().unwrap();
    let cache = CacheLayer::new(temp_store(&dir));
    cache.set("projects", &vec!["a", "b"]).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(
      cache.get::<Vec<String>>("projects").unwrap(),
      Some(vec!["a".to_string(), "b".to_string()])
    );
  }

  #[test]
  fn test_stale_read_evicts_from_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");
    let cache = CacheLayer::new(SqliteStorage::open(&path).unwrap())
      .with_ttl(Duration::milliseconds(50));

    cache.set("projects", &vec![1, 2, 3]).unwrap();
    assert_eq!(cache.get::<Vec<u32>>("projects").unwrap(), Some(vec![1, 2, 3]));

    std::thread::sleep(std::time::Duration::from_millis(120));
    assert_eq!(cache.get::<Vec<u32>>("projects").unwrap(), None);

    // The row is gone, not just hidden
    assert_eq!(cache.updated_at("projects").unwrap(), None);
    let probe = SqliteStorage::open(&path).unwrap();
    assert_eq!(probe.get("projects").unwrap(), None);
  }

  #[test]
  fn test_overwrite_without_refreshing_timestamp() {
    let dir = TempDir::new().unwrap();
    let cache = CacheLayer::new(temp_store(&dir)).with_ttl(Duration::minutes(5));

    cache.set("running", &1.5_f64).unwrap();
    let stamp = cache.updated_at("running").unwrap().unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));
    cache.set_with("running", &1.75_f64, false).unwrap();

    assert_eq!(cache.updated_at("running").unwrap(), Some(stamp));
    assert_eq!(cache.get::<f64>("running").unwrap(), Some(1.75));
  }

  #[test]
  fn test_overwrite_without_refresh_still_expires() {
    let dir = TempDir::new().unwrap();
    let cache = CacheLayer::new(temp_store(&dir)).with_ttl(Duration::milliseconds(50));

    cache.set("running", &1).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(30));
    cache.set_with("running", &2, false).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(40));

    assert_eq!(cache.get::<i32>("running").unwrap(), None);
  }

  #[test]
  fn test_set_refreshes_timestamp() {
    let dir = TempDir::new().unwrap();
    let cache = CacheLayer::new(temp_store(&dir));

    cache.set("me", "first").unwrap();
    let first = cache.updated_at("me").unwrap().unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    cache.set("me", "second").unwrap();

    assert!(cache.updated_at("me").unwrap().unwrap() > first);
  }

  #[test]
  fn test_unreadable_entry_is_a_miss() {
    let dir = TempDir::new().unwrap();
    let cache = CacheLayer::new(temp_store(&dir));

    cache.set("me", "not a number").unwrap();
    assert_eq!(cache.get::<u64>("me").unwrap(), None);
    assert_eq!(cache.updated_at("me").unwrap(), None);
  }

  #[test]
  fn test_closed_store_is_an_error_not_a_miss() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(temp_store(&dir));
    storage.close().unwrap();
    let cache = CacheLayer {
      storage: storage.clone(),
      ttl: None,
    };

    assert!(matches!(cache.get::<u64>("me"), Err(Error::StoreClosed)));
  }

  #[tokio::test]
  async fn test_fetch_cold_then_warm() {
    let dir = TempDir::new().unwrap();
    let cache = CacheLayer::new(temp_store(&dir)).with_ttl(Duration::minutes(5));
    let calls = AtomicUsize::new(0);

    let fetcher = || async {
      calls.fetch_add(1, Ordering::SeqCst);
      Ok(vec!["Internal".to_string(), "Client".to_string()])
    };

    let first = cache.fetch("projects", fetcher).await.unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(first.cached_at, None);

    let second = cache
      .fetch("projects", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::<String>::new())
      })
      .await
      .unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert!(second.cached_at.is_some());
    assert_eq!(second.data, vec!["Internal", "Client"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_fetch_error_is_not_cached() {
    let dir = TempDir::new().unwrap();
    let cache = CacheLayer::new(temp_store(&dir));

    let result = cache
      .fetch::<Vec<String>, _, _>("projects", || async { Err(Error::StoreClosed) })
      .await;
    assert!(result.is_err());
    assert_eq!(cache.updated_at("projects").unwrap(), None);
  }

  #[tokio::test]
  async fn test_fetch_with_noop_storage_always_fetches() {
    let cache = CacheLayer::new(NoopStorage);
    for _ in 0..2 {
      let result = cache.fetch("me", || async { Ok(7_u64) }).await.unwrap();
      assert_eq!(result.source, CacheSource::Network);
    }
  }
}
