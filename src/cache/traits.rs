//! Core types for the caching system.

use chrono::{DateTime, Utc};

/// A value read back from the cache together with its last-write time.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
  pub value: T,
  pub updated_at: DateTime<Utc>,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(cached: Cached<T>) -> Self {
    Self {
      data: cached.value,
      source: CacheSource::Cache,
      cached_at: Some(cached.updated_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, within its time-to-live
  Cache,
}
