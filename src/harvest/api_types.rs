//! Serde types matching Harvest API request and response envelopes.
//!
//! Domain types live in `types`; these only exist to get them on and off the wire.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::types::{ProjectAssignment, TimeEntry};

// ============================================================================
// Paginated responses
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiTimeEntriesPage {
  pub time_entries: Vec<TimeEntry>,
  #[serde(default)]
  pub next_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ApiProjectAssignmentsPage {
  pub project_assignments: Vec<ProjectAssignment>,
  #[serde(default)]
  pub next_page: Option<u32>,
}

// ============================================================================
// Request bodies
// ============================================================================

/// Body for creating a time entry. Harvest starts a timer when no hours are given.
#[derive(Debug, Clone, Serialize)]
pub struct NewTimeEntry {
  pub project_id: u64,
  pub task_id: u64,
  pub spent_date: NaiveDate,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TimeEntryUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub project_id: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub task_id: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub hours: Option<f64>,
}

// ============================================================================
// Token refresh
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiRefreshRequest<'a> {
  pub refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ApiRefreshResponse {
  pub access_token: String,
  /// Some refresh servers rotate the refresh token, others don't
  #[serde(default)]
  pub refresh_token: Option<String>,
}
