use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::stack::StackEntry;

/// Id and display name of a project or task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
  pub id: u64,
  pub name: String,
}

/// A tracked time entry (a "timer" while it is running)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
  pub id: u64,
  pub spent_date: NaiveDate,
  pub hours: f64,
  pub notes: Option<String>,
  pub is_running: bool,
  pub project: Reference,
  pub task: Reference,
}

impl TimeEntry {
  pub fn seconds(&self) -> f64 {
    self.hours * 60.0 * 60.0
  }
}

impl From<&TimeEntry> for StackEntry {
  fn from(entry: &TimeEntry) -> Self {
    StackEntry {
      id: entry.id,
      project: entry.project.name.clone(),
      task: entry.task.name.clone(),
      notes: entry.notes.clone(),
      time: entry.seconds(),
    }
  }
}

/// A task the user may log time against within a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
  pub id: u64,
  pub task: Reference,
}

/// A project the current user is assigned to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectAssignment {
  pub id: u64,
  pub is_active: bool,
  pub project: Reference,
  #[serde(default)]
  pub task_assignments: Vec<TaskAssignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: u64,
  pub first_name: String,
  pub last_name: String,
  pub email: String,
}

/// Filters for listing time entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TimeEntryParams {
  pub is_running: Option<bool>,
  pub from: Option<NaiveDate>,
  pub to: Option<NaiveDate>,
  pub project_id: Option<u64>,
}

impl TimeEntryParams {
  pub fn running() -> Self {
    Self {
      is_running: Some(true),
      ..Self::default()
    }
  }

  /// Entries spent on a single day
  pub fn on(date: NaiveDate) -> Self {
    Self {
      from: Some(date),
      to: Some(date),
      ..Self::default()
    }
  }

  /// Query string pairs, in a fixed order
  pub fn to_query(&self) -> Vec<(String, String)> {
    let mut query = Vec::new();
    if let Some(is_running) = self.is_running {
      query.push(("is_running".to_string(), is_running.to_string()));
    }
    if let Some(from) = self.from {
      query.push(("from".to_string(), from.format("%Y-%m-%d").to_string()));
    }
    if let Some(to) = self.to {
      query.push(("to".to_string(), to.format("%Y-%m-%d").to_string()));
    }
    if let Some(project_id) = self.project_id {
      query.push(("project_id".to_string(), project_id.to_string()));
    }
    query
  }
}
