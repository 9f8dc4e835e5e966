//! Recently started timers, most recent first.
//!
//! Every time a timer is created or restarted it is pushed onto the stack so
//! it can be resumed later without asking the server what it was. The stack
//! is a JSON array on disk that status-bar integrations read directly, so the
//! field names of [`StackEntry`] are part of the file format.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DEFAULT_MAX_SIZE: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackEntry {
  /// Time entry id, unique within the stack
  pub id: u64,
  pub project: String,
  pub task: String,
  pub notes: Option<String>,
  /// Tracked seconds when the entry was pushed
  pub time: f64,
}

/// Bounded, deduplicated, move-to-front list of recent timers.
///
/// Mutations happen in memory. `save` writes the file; dropping a stack with
/// unsaved changes saves it as well, so pushes made before an early return
/// are not lost.
#[derive(Debug)]
pub struct TimerStack {
  path: PathBuf,
  max_size: usize,
  entries: VecDeque<StackEntry>,
  dirty: bool,
}

impl TimerStack {
  /// Load the stack at the default location.
  pub fn open_default(max_size: usize) -> Result<Self> {
    Self::load(Self::default_path(), max_size)
  }

  /// Load the stack from `path`. A missing or empty file is an empty stack.
  pub fn load(path: impl Into<PathBuf>, max_size: usize) -> Result<Self> {
    let path = path.into();
    let entries: VecDeque<StackEntry> = match fs::read_to_string(&path) {
      Ok(contents) if contents.trim().is_empty() => VecDeque::new(),
      Ok(contents) => serde_json::from_str(&contents)?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
      Err(e) => return Err(e.into()),
    };

    // Files written by other tools may repeat an id; the first one is the most recent
    let loaded = entries.len();
    let mut seen = HashSet::new();
    let entries: VecDeque<StackEntry> = entries.into_iter().filter(|e| seen.insert(e.id)).collect();

    let mut stack = Self {
      path,
      max_size: max_size.max(1),
      dirty: entries.len() != loaded,
      entries,
    };
    if stack.entries.len() > stack.max_size {
      stack.entries.truncate(stack.max_size);
      stack.dirty = true;
    }

    tracing::debug!(path = %stack.path.display(), len = stack.len(), "loaded timer stack");
    Ok(stack)
  }

  pub fn default_path() -> PathBuf {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .unwrap_or_else(std::env::temp_dir)
      .join("scythe")
      .join("stack.json")
  }

  #[cfg(test)]
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Put an entry on top. An entry with the same id moves to the top
  /// instead of being duplicated; a full stack drops its oldest entry.
  pub fn push(&mut self, entry: StackEntry) {
    if let Some(idx) = self.position(entry.id) {
      self.entries.remove(idx);
    }

    if self.entries.len() >= self.max_size {
      self.entries.pop_back();
    }

    self.entries.push_front(entry);
    self.dirty = true;
  }

  /// Remove and return the entry at `index`.
  pub fn pop(&mut self, index: usize) -> Result<StackEntry> {
    let len = self.entries.len();
    let entry = self
      .entries
      .remove(index)
      .ok_or(Error::IndexOutOfRange { index, len })?;
    self.dirty = true;
    Ok(entry)
  }

  /// Remove an entry equal to `entry`, if present.
  #[allow(dead_code)]
  pub fn remove(&mut self, entry: &StackEntry) {
    if let Some(idx) = self.entries.iter().position(|e| e == entry) {
      self.entries.remove(idx);
      self.dirty = true;
    }
  }

  /// Remove the entry for a time entry id, if present.
  pub fn remove_id(&mut self, id: u64) -> Option<StackEntry> {
    let idx = self.position(id)?;
    let entry = self.entries.remove(idx)?;
    self.dirty = true;
    Some(entry)
  }

  pub fn clear(&mut self) {
    if !self.entries.is_empty() {
      self.entries.clear();
      self.dirty = true;
    }
  }

  pub fn get(&self, index: usize) -> Result<&StackEntry> {
    self.entries.get(index).ok_or(Error::IndexOutOfRange {
      index,
      len: self.entries.len(),
    })
  }

  pub fn position(&self, id: u64) -> Option<usize> {
    self.entries.iter().position(|e| e.id == id)
  }

  /// Entries from most to least recent.
  pub fn iter(&self) -> impl Iterator<Item = &StackEntry> {
    self.entries.iter()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Whether there are changes not yet written to disk.
  #[cfg(test)]
  pub fn is_dirty(&self) -> bool {
    self.dirty
  }

  /// Write the whole stack to disk.
  pub fn save(&mut self) -> Result<()> {
    write_atomic(&self.path, &serde_json::to_vec(&self.entries)?)?;

    self.dirty = false;
    tracing::debug!(path = %self.path.display(), len = self.len(), "saved timer stack");
    Ok(())
  }
}

/// Replace the file at `path` so readers never see a partial write.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }

  // Write atomically via temp file
  let temp_path = path.with_extension("json.tmp");
  let mut file = fs::File::create(&temp_path)?;
  file.write_all(contents)?;
  file.sync_all()?;
  fs::rename(&temp_path, path)?;
  Ok(())
}

impl Drop for TimerStack {
  fn drop(&mut self) {
    if self.dirty {
      if let Err(e) = self.save() {
        tracing::warn!(path = %self.path.display(), error = %e, "failed to save timer stack");
      }
    }
  }
}
