//! Cache keys for Harvest requests.

use sha2::{Digest, Sha256};

use super::types::TimeEntryParams;

/// Prefix shared by every time entry list key, so lists can be dropped together.
pub const TIME_ENTRIES_PREFIX: &str = "time_entries:";

/// Query key types for Harvest API calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HarvestQueryKey {
  /// Project assignments of the current user
  Projects,
  /// The current user
  Me,
  /// Snapshot of the running timer (or of there being none)
  Running,
  /// A single time entry
  TimeEntry { id: u64 },
  /// A filtered list of time entries
  TimeEntries { params: TimeEntryParams },
}

impl HarvestQueryKey {
  /// Storage key. Fixed requests use readable names so outside tools can find
  /// them; parameterized lists are keyed by a hash of their query.
  pub fn cache_key(&self) -> String {
    match self {
      Self::Projects => "projects".to_string(),
      Self::Me => "me".to_string(),
      Self::Running => "running".to_string(),
      Self::TimeEntry { id } => format!("time_entry:{}", id),
      Self::TimeEntries { params } => {
        let signature = params
          .to_query()
          .iter()
          .map(|(k, v)| format!("{}={}", k, v))
          .collect::<Vec<_>>()
          .join("&");

        // SHA256 hash for stable, fixed-length keys
        let mut hasher = Sha256::new();
        hasher.update(signature.as_bytes());
        format!("{}{}", TIME_ENTRIES_PREFIX, hex::encode(hasher.finalize()))
      }
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::Projects => "project assignments".to_string(),
      Self::Me => "current user".to_string(),
      Self::Running => "running timer".to_string(),
      Self::TimeEntry { id } => format!("time entry {}", id),
      Self::TimeEntries { params } => {
        let query = params.to_query();
        if query.is_empty() {
          "all time entries".to_string()
        } else {
          let filters: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
          format!("time entries ({})", filters.join(", "))
        }
      }
    }
  }
}
