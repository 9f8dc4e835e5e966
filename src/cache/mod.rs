//! Local response cache.
//!
//! This module provides an API-agnostic caching mechanism that:
//! - Persists opaque values by key in a SQLite file, each stamped with its last write
//! - Treats entries older than a time-to-live as absent and evicts them on read
//! - Lets callers correct a cached value without resetting its freshness

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{NoopStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, Cached};
