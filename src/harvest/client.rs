use crate::error::Result;

use super::api_types::{
  ApiProjectAssignmentsPage, ApiTimeEntriesPage, NewTimeEntry, TimeEntryUpdate,
};
use super::session::{ApiRequest, Session};
use super::types::{ProjectAssignment, TimeEntry, TimeEntryParams, User};

/// Harvest API client wrapper
#[derive(Clone)]
pub struct HarvestClient {
  session: Session,
}

impl HarvestClient {
  pub fn new(session: Session) -> Self {
    Self { session }
  }

  /// Get the authenticated user
  pub async fn me(&self) -> Result<User> {
    self.session.send_json(&ApiRequest::get("users/me")).await
  }

  /// Get every project assignment of the current user
  pub async fn project_assignments(&self) -> Result<Vec<ProjectAssignment>> {
    let mut all_assignments = Vec::new();
    let mut page = 1u32;

    loop {
      let request = ApiRequest::get("users/me/project_assignments")
        .query(vec![("page".to_string(), page.to_string())]);
      let response: ApiProjectAssignmentsPage = self.session.send_json(&request).await?;

      all_assignments.extend(response.project_assignments);

      match response.next_page {
        Some(next) if next > page => page = next,
        _ => break,
      }
    }

    Ok(all_assignments)
  }

  /// List every time entry matching the filters, following pagination
  pub async fn time_entries(&self, params: &TimeEntryParams) -> Result<Vec<TimeEntry>> {
    let mut all_entries = Vec::new();
    let mut page = 1u32;

    loop {
      let request = ApiRequest::get("time_entries")
        .query(params.to_query())
        .query(vec![("page".to_string(), page.to_string())]);
      let response: ApiTimeEntriesPage = self.session.send_json(&request).await?;

      all_entries.extend(response.time_entries);

      match response.next_page {
        Some(next) if next > page => page = next,
        _ => break,
      }
    }

    Ok(all_entries)
  }

  /// Get a single time entry by id
  pub async fn time_entry(&self, id: u64) -> Result<TimeEntry> {
    self
      .session
      .send_json(&ApiRequest::get(format!("time_entries/{}", id)))
      .await
  }

  /// Get the running time entry, if there is one
  pub async fn running_time_entry(&self) -> Result<Option<TimeEntry>> {
    let entries = self.time_entries(&TimeEntryParams::running()).await?;
    Ok(entries.into_iter().next())
  }

  /// Create a time entry, which starts it as a timer
  pub async fn create_time_entry(&self, entry: &NewTimeEntry) -> Result<TimeEntry> {
    let request = ApiRequest::post("time_entries").json(entry)?;
    self.session.send_json(&request).await
  }

  pub async fn update_time_entry(&self, id: u64, update: &TimeEntryUpdate) -> Result<TimeEntry> {
    let request = ApiRequest::patch(format!("time_entries/{}", id)).json(update)?;
    self.session.send_json(&request).await
  }

  /// Restart a stopped time entry
  pub async fn restart_time_entry(&self, id: u64) -> Result<TimeEntry> {
    self
      .session
      .send_json(&ApiRequest::patch(format!("time_entries/{}/restart", id)))
      .await
  }

  /// Stop a running time entry
  pub async fn stop_time_entry(&self, id: u64) -> Result<TimeEntry> {
    self
      .session
      .send_json(&ApiRequest::patch(format!("time_entries/{}/stop", id)))
      .await
  }

  pub async fn delete_time_entry(&self, id: u64) -> Result<()> {
    self
      .session
      .send_empty(&ApiRequest::delete(format!("time_entries/{}", id)))
      .await
  }
}
