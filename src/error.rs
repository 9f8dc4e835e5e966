//! Error types for the local state layer and the Harvest session.

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
  #[error("cache store at {} is locked after {attempts} attempts", path.display())]
  StoreUnavailable { path: PathBuf, attempts: u32 },

  #[error("cache store used while closed")]
  StoreClosed,

  #[error("request failed with status {}: {}", status.as_u16(), error_message(body))]
  Request { status: StatusCode, body: String },

  #[error("session expired, please re-authenticate with `scythe auth` ({reason})")]
  RefreshFailure {
    /// Status of the request that triggered the refresh.
    status: StatusCode,
    /// Body of the request that triggered the refresh.
    body: String,
    reason: String,
  },

  #[error("invalid index {index} (stack has {len} entries)")]
  IndexOutOfRange { index: usize, len: usize },

  #[error("no quickstart entry named {name:?}")]
  UnknownQuickstart { name: String },

  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("cache storage error: {0}")]
  Storage(#[from] rusqlite::Error),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("invalid URL: {0}")]
  Url(#[from] url::ParseError),
}

impl Error {
  pub fn is_unauthorized(&self) -> bool {
    matches!(self, Self::Request { status, .. } if *status == StatusCode::UNAUTHORIZED)
  }

  /// Wrap a rejected request whose token refresh failed. Anything other than
  /// a request error is returned unchanged.
  pub fn into_refresh_failure(self, refresh_error: Error) -> Error {
    match self {
      Self::Request { status, body } => Self::RefreshFailure {
        status,
        body,
        reason: refresh_error.to_string(),
      },
      other => other,
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pull the user-facing message out of an API error body.
pub fn error_message(body: &str) -> String {
  serde_json::from_str::<serde_json::Value>(body)
    .ok()
    .and_then(|v| {
      ["message", "error_description", "error"]
        .iter()
        .find_map(|field| v.get(field).and_then(|m| m.as_str()).map(String::from))
    })
    .unwrap_or_else(|| "No error message found in response".to_string())
}
