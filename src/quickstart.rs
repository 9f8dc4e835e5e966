//! Named timer templates.
//!
//! The file is a JSON object mapping a name to
//! `{project, task, notes, exec}`. Starting a template creates a timer like
//! `scythe start` would, then optionally runs its shell command.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::harvest::api_types::NewTimeEntry;
use crate::stack::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickstartEntry {
  pub project: u64,
  pub task: u64,
  #[serde(default)]
  pub notes: Option<String>,
  /// Shell command to run once the timer is created
  #[serde(default)]
  pub exec: Option<String>,
}

impl QuickstartEntry {
  /// Body for creating the timer. `notes` replaces the template's notes.
  pub fn to_new_entry(&self, spent_date: NaiveDate, notes: Option<String>) -> NewTimeEntry {
    NewTimeEntry {
      project_id: self.project,
      task_id: self.task,
      spent_date,
      notes: notes.or_else(|| self.notes.clone()),
    }
  }
}

#[derive(Debug)]
pub struct Quickstarts {
  path: PathBuf,
  entries: BTreeMap<String, QuickstartEntry>,
}

impl Quickstarts {
  pub fn open_default() -> Result<Self> {
    Self::load(Self::default_path())
  }

  /// Load templates from `path`. A missing or empty file has none.
  pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
    let path = path.into();
    let entries = match fs::read_to_string(&path) {
      Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
      Ok(contents) => serde_json::from_str(&contents)?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
      Err(e) => return Err(e.into()),
    };

    Ok(Self { path, entries })
  }

  pub fn default_path() -> PathBuf {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .unwrap_or_else(std::env::temp_dir)
      .join("scythe")
      .join("quickstart.json")
  }

  pub fn get(&self, name: &str) -> Result<&QuickstartEntry> {
    self.entries.get(name).ok_or_else(|| Error::UnknownQuickstart {
      name: name.to_string(),
    })
  }

  /// Add or replace a template, returning the one it replaced.
  pub fn insert(&mut self, name: impl Into<String>, entry: QuickstartEntry) -> Option<QuickstartEntry> {
    self.entries.insert(name.into(), entry)
  }

  pub fn remove(&mut self, name: &str) -> Result<QuickstartEntry> {
    self.entries.remove(name).ok_or_else(|| Error::UnknownQuickstart {
      name: name.to_string(),
    })
  }

  /// Templates sorted by name.
  pub fn iter(&self) -> impl Iterator<Item = (&String, &QuickstartEntry)> {
    self.entries.iter()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn save(&self) -> Result<()> {
    write_atomic(&self.path, &serde_json::to_vec(&self.entries)?)?;
    tracing::debug!(path = %self.path.display(), len = self.entries.len(), "saved quickstart entries");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn template(notes: Option<&str>) -> QuickstartEntry {
    QuickstartEntry {
      project: 10,
      task: 20,
      notes: notes.map(String::from),
      exec: None,
    }
  }

  #[test]
  fn test_missing_file_has_no_entries() {
    let dir = TempDir::new().unwrap();
    let quickstarts = Quickstarts::load(dir.path().join("quickstart.json")).unwrap();
    assert!(quickstarts.is_empty());
  }

  #[test]
  fn test_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("quickstart.json");

    let mut quickstarts = Quickstarts::load(&path).unwrap();
    quickstarts.insert("standup", template(Some("Daily standup")));
    quickstarts.insert(
      "review",
      QuickstartEntry {
        exec: Some("open https://example.com".to_string()),
        ..template(None)
      },
    );
    quickstarts.save().unwrap();

    let reloaded = Quickstarts::load(&path).unwrap();
    let names: Vec<&String> = reloaded.iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["review", "standup"]);
    assert_eq!(reloaded.get("standup").unwrap(), &template(Some("Daily standup")));
  }

  #[test]
  fn test_reads_minimal_entries() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("quickstart.json");
    fs::write(&path, r#"{"support": {"project": 1, "task": 2}}"#).unwrap();

    let quickstarts = Quickstarts::load(&path).unwrap();
    let entry = quickstarts.get("support").unwrap();
    assert_eq!(entry.notes, None);
    assert_eq!(entry.exec, None);
  }

  #[test]
  fn test_unknown_name() {
    let dir = TempDir::new().unwrap();
    let mut quickstarts = Quickstarts::load(dir.path().join("quickstart.json")).unwrap();

    assert!(matches!(quickstarts.get("nope"), Err(Error::UnknownQuickstart { .. })));
    assert!(matches!(quickstarts.remove("nope"), Err(Error::UnknownQuickstart { .. })));
  }

  #[test]
  fn test_insert_replaces() {
    let dir = TempDir::new().unwrap();
    let mut quickstarts = Quickstarts::load(dir.path().join("quickstart.json")).unwrap();

    assert_eq!(quickstarts.insert("standup", template(None)), None);
    assert_eq!(
      quickstarts.insert("standup", template(Some("new"))),
      Some(template(None))
    );
    assert_eq!(quickstarts.remove("standup").unwrap(), template(Some("new")));
    assert!(quickstarts.is_empty());
  }

  #[test]
  fn test_notes_override() {
    let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let entry = template(Some("Daily standup"));

    assert_eq!(entry.to_new_entry(date, None).notes.as_deref(), Some("Daily standup"));
    assert_eq!(
      entry.to_new_entry(date, Some("Sprint planning".to_string())).notes.as_deref(),
      Some("Sprint planning")
    );
    assert_eq!(entry.to_new_entry(date, None).project_id, 10);
  }
}
