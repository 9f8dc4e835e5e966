//! Cached Harvest client that wraps HarvestClient with transparent caching.
//!
//! Shapes stored per key:
//! - `projects`: `Vec<ProjectAssignment>`
//! - `me`: `User`
//! - `running`: `RunningSnapshot` (a snapshot with no timer is a valid hit)
//! - `time_entry:<id>`: `TimeEntry`
//! - `time_entries:<hash>`: `Vec<TimeEntry>`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheLayer, CacheResult, CacheSource, Cached};
use crate::error::Result;
use crate::stack::{StackEntry, TimerStack};

use super::api_types::{NewTimeEntry, TimeEntryUpdate};
use super::cache::{HarvestQueryKey, TIME_ENTRIES_PREFIX};
use super::client::HarvestClient;
use super::types::{ProjectAssignment, TimeEntry, TimeEntryParams, User};

/// What the server said about the running timer, and when that was last
/// brought up to date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningSnapshot {
  pub timer: Option<TimeEntry>,
  /// When `timer.hours` was last correct. Moves forward on local
  /// extrapolation, unlike the cache entry's own timestamp.
  pub observed_at: DateTime<Utc>,
}

impl RunningSnapshot {
  pub fn new(timer: Option<TimeEntry>) -> Self {
    Self {
      timer,
      observed_at: Utc::now(),
    }
  }

  /// Move a running timer's hours forward to `now`.
  pub fn advanced_to(&self, now: DateTime<Utc>) -> Self {
    let mut timer = self.timer.clone();
    if let Some(entry) = timer.as_mut().filter(|t| t.is_running) {
      let elapsed = (now - self.observed_at).num_milliseconds().max(0) as f64;
      entry.hours += elapsed / 3_600_000.0;
    }

    Self {
      timer,
      observed_at: now,
    }
  }
}

/// Harvest client with transparent caching support.
///
/// This wraps the underlying HarvestClient and provides the same API, but
/// serves reads from the cache while they are fresh and keeps the cache and
/// the timer stack in step with every mutation.
#[derive(Clone)]
pub struct CachedHarvestClient {
  inner: HarvestClient,
  cache: CacheLayer,
}

impl CachedHarvestClient {
  pub fn new(inner: HarvestClient, cache: CacheLayer) -> Self {
    Self { inner, cache }
  }

  pub fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  /// Get the current user's project assignments with caching.
  pub async fn projects(&self) -> Result<Vec<ProjectAssignment>> {
    let key = HarvestQueryKey::Projects;
    let result = self
      .cache
      .fetch(&key.cache_key(), || self.inner.project_assignments())
      .await?;

    log_result(&key, &result);
    Ok(result.data)
  }

  /// Refetch project assignments and store them, fresh or not.
  pub async fn sync_projects(&self) -> Result<Vec<ProjectAssignment>> {
    let key = HarvestQueryKey::Projects;
    let assignments = self.inner.project_assignments().await?;
    self.cache.set(&key.cache_key(), &assignments)?;
    tracing::debug!("synced {}", key.description());
    Ok(assignments)
  }

  /// Get the current user with caching.
  pub async fn me(&self) -> Result<User> {
    let key = HarvestQueryKey::Me;
    let result = self
      .cache
      .fetch(&key.cache_key(), || self.inner.me())
      .await?;

    log_result(&key, &result);
    Ok(result.data)
  }

  /// List time entries with caching.
  pub async fn time_entries(&self, params: &TimeEntryParams) -> Result<Vec<TimeEntry>> {
    let key = HarvestQueryKey::TimeEntries {
      params: params.clone(),
    };
    let result = self
      .cache
      .fetch(&key.cache_key(), || self.inner.time_entries(params))
      .await?;

    log_result(&key, &result);
    Ok(result.data)
  }

  /// Get a single time entry with caching.
  pub async fn time_entry(&self, id: u64) -> Result<TimeEntry> {
    let key = HarvestQueryKey::TimeEntry { id };
    let result = self
      .cache
      .fetch(&key.cache_key(), || self.inner.time_entry(id))
      .await?;

    log_result(&key, &result);
    Ok(result.data)
  }

  /// The running timer as last fetched.
  pub async fn running_timer(&self) -> Result<Option<TimeEntry>> {
    Ok(self.running_snapshot().await?.value.timer)
  }

  /// The running timer snapshot and the time of its last real fetch.
  pub async fn running_snapshot(&self) -> Result<Cached<RunningSnapshot>> {
    let key = HarvestQueryKey::Running;
    if let Some(cached) = self.cache.get_entry::<RunningSnapshot>(&key.cache_key())? {
      tracing::debug!(updated_at = %cached.updated_at, "using cached data for {}", key.description());
      return Ok(cached);
    }

    let snapshot = RunningSnapshot::new(self.inner.running_time_entry().await?);
    self.cache.set(&key.cache_key(), &snapshot)?;
    tracing::debug!("fetched {}", key.description());

    Ok(Cached {
      updated_at: snapshot.observed_at,
      value: snapshot,
    })
  }

  /// The running timer with its hours advanced to now.
  ///
  /// Between fetches the cached hours are moved forward locally. The
  /// corrected snapshot is written back without refreshing the entry's
  /// timestamp, so it still expires relative to the last real fetch.
  pub async fn running_timer_live(&self) -> Result<Option<TimeEntry>> {
    let cached = self.running_snapshot().await?;
    if cached.value.timer.as_ref().map_or(true, |t| !t.is_running) {
      return Ok(cached.value.timer);
    }

    let advanced = cached.value.advanced_to(Utc::now());
    self
      .cache
      .set_with(&HarvestQueryKey::Running.cache_key(), &advanced, false)?;
    Ok(advanced.timer)
  }

  /// Create a time entry, which starts it as a timer, and push it onto the stack.
  pub async fn create_timer(
    &self,
    entry: &NewTimeEntry,
    stack: &mut TimerStack,
  ) -> Result<TimeEntry> {
    let created = self.inner.create_time_entry(entry).await?;
    tracing::info!(id = created.id, "created time entry");

    self.remember(&created)?;
    if created.is_running {
      self.set_running(Some(created.clone()))?;
    }
    stack.push(StackEntry::from(&created));

    Ok(created)
  }

  /// Restart a time entry and move it to the top of the stack.
  pub async fn restart_timer(&self, id: u64, stack: &mut TimerStack) -> Result<TimeEntry> {
    let restarted = self.inner.restart_time_entry(id).await?;
    tracing::info!(id, "restarted time entry");

    self.remember(&restarted)?;
    self.set_running(Some(restarted.clone()))?;
    stack.push(StackEntry::from(&restarted));

    Ok(restarted)
  }

  pub async fn stop_timer(&self, id: u64) -> Result<TimeEntry> {
    let stopped = self.inner.stop_time_entry(id).await?;
    tracing::info!(id, "stopped time entry");

    self.remember(&stopped)?;
    self.set_running(None)?;

    Ok(stopped)
  }

  pub async fn update_timer(&self, id: u64, update: &TimeEntryUpdate) -> Result<TimeEntry> {
    let updated = self.inner.update_time_entry(id, update).await?;

    self.remember(&updated)?;
    if updated.is_running {
      self.set_running(Some(updated.clone()))?;
    }

    Ok(updated)
  }

  /// Delete a time entry and forget it locally.
  pub async fn delete_timer(&self, id: u64, stack: &mut TimerStack) -> Result<()> {
    self.inner.delete_time_entry(id).await?;
    tracing::info!(id, "deleted time entry");

    self.cache.delete(&HarvestQueryKey::TimeEntry { id }.cache_key())?;
    self.cache.delete_prefix(TIME_ENTRIES_PREFIX)?;

    let running_key = HarvestQueryKey::Running.cache_key();
    let was_running = self
      .cache
      .get::<RunningSnapshot>(&running_key)?
      .and_then(|snapshot| snapshot.timer)
      .is_some_and(|timer| timer.id == id);
    if was_running {
      self.set_running(None)?;
    }

    stack.remove_id(id);
    Ok(())
  }

  /// Drop every cached response.
  pub fn clear_cache(&self) -> Result<()> {
    self.cache.clear()
  }

  /// Store a fresh entry under its own key and drop the lists it may belong to.
  fn remember(&self, entry: &TimeEntry) -> Result<()> {
    self
      .cache
      .set(&HarvestQueryKey::TimeEntry { id: entry.id }.cache_key(), entry)?;
    self.cache.delete_prefix(TIME_ENTRIES_PREFIX)
  }

  fn set_running(&self, timer: Option<TimeEntry>) -> Result<()> {
    self.cache.set(
      &HarvestQueryKey::Running.cache_key(),
      &RunningSnapshot::new(timer),
    )
  }
}

fn log_result<T>(key: &HarvestQueryKey, result: &CacheResult<T>) {
  match (result.source, result.cached_at) {
    (CacheSource::Cache, Some(updated_at)) => {
      tracing::debug!(%updated_at, "using cached data for {}", key.description())
    }
    _ => tracing::debug!("fetched {}", key.description()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::harvest::client::tests::{create_test_client, time_entry_json};
  use chrono::{Duration, NaiveDate};
  use serde_json::json;
  use tempfile::TempDir;
  use wiremock::matchers::{method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  // Fields drop in order, so the stack is saved before the directory goes away
  struct Fixture {
    client: CachedHarvestClient,
    stack: TimerStack,
    _dir: TempDir,
  }

  fn fixture(server: &MockServer) -> Fixture {
    let dir = TempDir::new().unwrap();
    let storage = SqliteStorage::open(dir.path().join("cache.db")).unwrap();
    let cache = CacheLayer::new(storage).with_ttl(Duration::minutes(5));
    let stack = TimerStack::load(dir.path().join("stack.json"), 30).unwrap();

    Fixture {
      client: CachedHarvestClient::new(create_test_client(server), cache),
      stack,
      _dir: dir,
    }
  }

  fn new_entry() -> NewTimeEntry {
    NewTimeEntry {
      project_id: 10,
      task_id: 20,
      spent_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
      notes: Some("Writing tests".to_string()),
    }
  }

  #[tokio::test]
  async fn test_projects_fetched_once_within_ttl() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/users/me/project_assignments"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "project_assignments": [{
          "id": 1,
          "is_active": true,
          "project": { "id": 10, "name": "Scythe" },
          "task_assignments": []
        }],
        "next_page": null
      })))
      .expect(1)
      .mount(&server)
      .await;

    let f = fixture(&server);
    assert_eq!(f.client.cache().get::<Vec<ProjectAssignment>>("projects").unwrap(), None);

    let first = f.client.projects().await.unwrap();
    let second = f.client.projects().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second[0].project.name, "Scythe");
  }

  #[tokio::test]
  async fn test_sync_projects_bypasses_fresh_entry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/users/me/project_assignments"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "project_assignments": [{
          "id": 1,
          "is_active": true,
          "project": { "id": 10, "name": "Scythe" }
        }],
        "next_page": null
      })))
      .expect(2)
      .mount(&server)
      .await;

    let f = fixture(&server);
    f.client.projects().await.unwrap();
    let first = f.client.cache().updated_at("projects").unwrap().unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let synced = f.client.sync_projects().await.unwrap();
    assert_eq!(synced[0].project.name, "Scythe");
    assert!(f.client.cache().updated_at("projects").unwrap().unwrap() > first);

    // Served from cache after the sync
    assert_eq!(f.client.projects().await.unwrap(), synced);
  }

  #[tokio::test]
  async fn test_no_running_timer_is_cached() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/time_entries"))
      .and(query_param("is_running", "true"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "time_entries": [] })))
      .expect(1)
      .mount(&server)
      .await;

    let f = fixture(&server);
    assert_eq!(f.client.running_timer().await.unwrap(), None);
    assert_eq!(f.client.running_timer().await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_create_timer_pushes_and_caches_running() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
      .and(path("/time_entries"))
      .respond_with(ResponseTemplate::new(201).set_body_json(time_entry_json(99, true)))
      .expect(1)
      .mount(&server)
      .await;

    let mut f = fixture(&server);
    let created = f.client.create_timer(&new_entry(), &mut f.stack).await.unwrap();

    assert_eq!(f.stack.get(0).unwrap().id, 99);
    assert_eq!(f.stack.get(0).unwrap().project, "Scythe");

    // Served from cache: there is no GET mock to answer it
    let running = f.client.running_timer().await.unwrap();
    assert_eq!(running, Some(created.clone()));
    assert_eq!(f.client.time_entry(99).await.unwrap(), created);
  }

  #[tokio::test]
  async fn test_restart_moves_to_front() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
      .and(path("/time_entries/1/restart"))
      .respond_with(ResponseTemplate::new(200).set_body_json(time_entry_json(1, true)))
      .expect(1)
      .mount(&server)
      .await;

    let mut f = fixture(&server);
    for id in [1, 2] {
      f.stack.push(StackEntry {
        id,
        project: "Scythe".to_string(),
        task: "Programming".to_string(),
        notes: None,
        time: 0.0,
      });
    }

    f.client.restart_timer(1, &mut f.stack).await.unwrap();

    let ids: Vec<u64> = f.stack.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(f.stack.get(0).unwrap().time, 4500.0);
  }

  #[tokio::test]
  async fn test_stop_clears_running() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
      .and(path("/time_entries/5/stop"))
      .respond_with(ResponseTemplate::new(200).set_body_json(time_entry_json(5, false)))
      .expect(1)
      .mount(&server)
      .await;

    let f = fixture(&server);
    f.client
      .cache()
      .set(
        "running",
        &RunningSnapshot::new(Some(serde_json::from_value(time_entry_json(5, true)).unwrap())),
      )
      .unwrap();

    f.client.stop_timer(5).await.unwrap();
    assert_eq!(f.client.running_timer().await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_delete_forgets_timer() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
      .and(path("/time_entries"))
      .respond_with(ResponseTemplate::new(201).set_body_json(time_entry_json(8, true)))
      .mount(&server)
      .await;

    Mock::given(method("DELETE"))
      .and(path("/time_entries/8"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    let mut f = fixture(&server);
    f.client.create_timer(&new_entry(), &mut f.stack).await.unwrap();
    f.client.delete_timer(8, &mut f.stack).await.unwrap();

    assert!(f.stack.is_empty());
    assert_eq!(f.client.running_timer().await.unwrap(), None);
    assert_eq!(f.client.cache().get::<TimeEntry>("time_entry:8").unwrap(), None);
  }

  #[tokio::test]
  async fn test_mutation_drops_cached_lists() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/time_entries"))
      .and(query_param("from", "2024-03-01"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "time_entries": [] })))
      .expect(2)
      .mount(&server)
      .await;

    Mock::given(method("PATCH"))
      .and(path("/time_entries/5/stop"))
      .respond_with(ResponseTemplate::new(200).set_body_json(time_entry_json(5, false)))
      .mount(&server)
      .await;

    let f = fixture(&server);
    let params = TimeEntryParams::on(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

    f.client.time_entries(&params).await.unwrap();
    f.client.time_entries(&params).await.unwrap();
    f.client.stop_timer(5).await.unwrap();
    f.client.time_entries(&params).await.unwrap();
  }

  #[tokio::test]
  async fn test_live_running_timer_keeps_fetch_time() {
    let server = MockServer::start().await;
    let f = fixture(&server);

    let mut entry: TimeEntry = serde_json::from_value(time_entry_json(3, true)).unwrap();
    entry.hours = 1.0;
    let snapshot = RunningSnapshot {
      timer: Some(entry),
      observed_at: Utc::now() - Duration::minutes(30),
    };
    f.client.cache().set("running", &snapshot).unwrap();
    let fetched_at = f.client.cache().updated_at("running").unwrap();

    let live = f.client.running_timer_live().await.unwrap().unwrap();
    assert!((live.hours - 1.5).abs() < 0.01);

    assert_eq!(f.client.cache().updated_at("running").unwrap(), fetched_at);
    let stored: RunningSnapshot = f.client.cache().get("running").unwrap().unwrap();
    assert!((stored.timer.unwrap().hours - 1.5).abs() < 0.01);
  }

  #[test]
  fn test_advance_ignores_stopped_timer() {
    let mut entry: TimeEntry = serde_json::from_value(time_entry_json(3, false)).unwrap();
    entry.hours = 2.0;
    let snapshot = RunningSnapshot {
      timer: Some(entry),
      observed_at: Utc::now() - Duration::hours(1),
    };

    let advanced = snapshot.advanced_to(Utc::now());
    assert_eq!(advanced.timer.unwrap().hours, 2.0);
  }
}
