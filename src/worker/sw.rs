//! The offline worker state machine.
//!
//! ```text
//! Parsed ──install──▶ Installing ──▶ Installed ──activate──▶ Activating ──▶ Activated
//!                          │
//!                          └──(any resource fails)──▶ Redundant
//! ```
//!
//! Only an activated worker intercepts fetches. Interception is cache-first:
//! a stored response is returned without touching the network.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::WorkerConfig;

use super::network::Network;
use super::request::{FetchRequest, ResponseType, StoredResponse};
use super::storage::CacheStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Install failed; this worker never serves.
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Activated => "activated",
      Self::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// Resolved worker settings.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub cache_name: String,
  /// Stores named `<cache_prefix>-<version>` belong to this application
  pub cache_prefix: String,
  pub scope: Url,
  pub precache: Vec<Url>,
  pub allowed_hosts: Vec<String>,
  pub offline_url: Url,
  pub notification_icon: String,
}

impl WorkerSettings {
  pub fn from_config(config: &WorkerConfig) -> Result<Self> {
    let scope = Url::parse(&config.scope)
      .map_err(|e| eyre!("Invalid worker scope {}: {}", config.scope, e))?;
    let resolve = |raw: &str| {
      scope
        .join(raw)
        .map_err(|e| eyre!("Invalid worker resource {}: {}", raw, e))
    };

    Ok(Self {
      cache_name: config.cache_name(),
      cache_prefix: config.cache_prefix.clone(),
      precache: config
        .precache
        .iter()
        .map(|raw| resolve(raw))
        .collect::<Result<_>>()?,
      allowed_hosts: config.allowed_hosts.clone(),
      offline_url: resolve(&config.offline_url)?,
      notification_icon: config.notification_icon.clone(),
      scope,
    })
  }
}

impl WorkerSettings {
  /// Version tag of one of this application's stores.
  fn version_of<'a>(&self, store: &'a str) -> Option<&'a str> {
    store
      .strip_prefix(self.cache_prefix.as_str())
      .and_then(|rest| rest.strip_prefix('-'))
  }

  /// Order `store` against this worker's own version.
  fn compare_store(&self, store: &str) -> Option<Ordering> {
    let own = self.version_of(&self.cache_name)?;
    let other = self.version_of(store)?;
    Some(version_key(other).cmp(&version_key(own)))
  }
}

/// Numeric parts of a version tag, so `v10` sorts after `v9`; ties fall back
/// to the text.
fn version_key(version: &str) -> (Vec<u64>, &str) {
  let numbers = version
    .split(|c: char| !c.is_ascii_digit())
    .filter_map(|part| part.parse().ok())
    .collect();
  (numbers, version)
}

/// How an intercepted request was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// Not intercepted; the caller performs the request itself.
  Passthrough,
  Cache(StoredResponse),
  Network(StoredResponse),
  /// Network failed for a navigation; the offline page is served.
  Offline(StoredResponse),
}

impl FetchOutcome {
  pub fn response(&self) -> Option<&StoredResponse> {
    match self {
      Self::Passthrough => None,
      Self::Cache(r) | Self::Network(r) | Self::Offline(r) => Some(r),
    }
  }
}

/// Application action run for a background sync tag.
pub trait SyncTask: Send + Sync {
  fn run(&self) -> BoxFuture<'static, Result<()>>;
}

impl<F, Fut> SyncTask for F
where
  F: Fn() -> Fut + Send + Sync,
  Fut: Future<Output = Result<()>> + Send + 'static,
{
  fn run(&self) -> BoxFuture<'static, Result<()>> {
    self().boxed()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  Completed,
  /// The task failed; the failure was logged and is not retried here.
  Failed,
  /// No task is registered for the tag.
  Ignored,
}

/// Push message payload; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
  pub title: String,
  pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationData {
  pub date_of_arrival: DateTime<Utc>,
  pub primary_key: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
}

/// Platform notification surface.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
  fn close(&self, notification: &Notification) -> Result<()>;
  fn open_window(&self, url: &Url) -> Result<()>;
}

pub struct OfflineWorker<S: CacheStorage, N: Network> {
  settings: WorkerSettings,
  storage: Arc<S>,
  network: Arc<N>,
  notifier: Arc<dyn Notifier>,
  sync_tasks: HashMap<String, Arc<dyn SyncTask>>,
  state: Mutex<WorkerState>,
}

impl<S: CacheStorage, N: Network> OfflineWorker<S, N> {
  pub fn new(
    settings: WorkerSettings,
    storage: Arc<S>,
    network: Arc<N>,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    Self {
      settings,
      storage,
      network,
      notifier,
      sync_tasks: HashMap::new(),
      state: Mutex::new(WorkerState::Parsed),
    }
  }

  /// Register the action run for a background sync tag.
  pub fn with_sync_task(mut self, tag: impl Into<String>, task: impl SyncTask + 'static) -> Self {
    self.sync_tasks.insert(tag.into(), Arc::new(task));
    self
  }

  pub fn settings(&self) -> &WorkerSettings {
    &self.settings
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, state: WorkerState) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    info!(cache = %self.settings.cache_name, %state, "worker state changed");
  }

  /// Move from `from` to `to`, failing if the worker is elsewhere.
  fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if *state != from {
      return Err(eyre!("Worker is {}, expected {}", *state, from));
    }
    *state = to;
    drop(state);
    info!(cache = %self.settings.cache_name, state = %to, "worker state changed");
    Ok(())
  }

  /// Recover the state a previous run left in storage.
  ///
  /// This version's store next to an older version's means it was installed
  /// but not activated; otherwise it is active. Stores outside the cache
  /// prefix and newer pending versions do not count.
  pub fn resume(&self) -> Result<WorkerState> {
    let state = self.state();
    if state != WorkerState::Parsed {
      return Ok(state);
    }

    let names = self.storage.keys()?;
    if !names.contains(&self.settings.cache_name) {
      return Ok(state);
    }
    let older_present = names
      .iter()
      .any(|name| self.settings.compare_store(name) == Some(Ordering::Less));
    let resumed = if older_present {
      WorkerState::Installed
    } else {
      WorkerState::Activated
    };
    self.set_state(resumed);
    Ok(resumed)
  }

  /// Fetch and store every precache resource, all or nothing.
  pub async fn install(&self) -> Result<()> {
    self.transition(WorkerState::Parsed, WorkerState::Installing)?;

    match self.prime().await {
      Ok(count) => {
        info!(cache = %self.settings.cache_name, count, "precache primed");
        self.set_state(WorkerState::Installed);
        Ok(())
      }
      Err(e) => {
        warn!(cache = %self.settings.cache_name, "install failed: {:#}", e);
        self.set_state(WorkerState::Redundant);
        Err(e)
      }
    }
  }

  async fn prime(&self) -> Result<usize> {
    let fetches = self.settings.precache.iter().map(|url| {
      let request = FetchRequest::get(url.clone());
      let network = Arc::clone(&self.network);
      async move {
        let response = network.fetch(&request).await?;
        if !response.is_ok() {
          return Err(eyre!("Precache of {} answered {}", request.url, response.status));
        }
        Ok::<_, color_eyre::Report>((request, response))
      }
    });

    let entries = future::try_join_all(fetches).await?;
    self.storage.put_all(&self.settings.cache_name, &entries)?;
    Ok(entries.len())
  }

  /// Delete every store but this version's. Returns the deleted names.
  ///
  /// Refuses while a newer version's store is present.
  pub fn activate(&self) -> Result<Vec<String>> {
    let names = self.storage.keys()?;
    if let Some(newer) = names
      .iter()
      .find(|name| self.settings.compare_store(name) == Some(Ordering::Greater))
    {
      return Err(eyre!(
        "Refusing to activate {}: newer version {} is present",
        self.settings.cache_name,
        newer
      ));
    }
    self.transition(WorkerState::Installed, WorkerState::Activating)?;

    let mut deleted = Vec::new();
    for name in names {
      if name != self.settings.cache_name {
        info!(cache = %name, "deleting old cache");
        self.storage.delete(&name)?;
        deleted.push(name);
      }
    }
    self.storage.open(&self.settings.cache_name)?;

    self.set_state(WorkerState::Activated);
    Ok(deleted)
  }

  /// Same origin as the scope, or an allow-listed host.
  pub fn intercepts(&self, url: &Url) -> bool {
    if url.origin() == self.settings.scope.origin() {
      return true;
    }
    url
      .host_str()
      .map(|host| self.settings.allowed_hosts.iter().any(|h| h == host))
      .unwrap_or(false)
  }

  /// Answer a request cache-first.
  pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<FetchOutcome> {
    if self.state() != WorkerState::Activated
      || request.method != reqwest::Method::GET
      || !self.intercepts(&request.url)
    {
      return Ok(FetchOutcome::Passthrough);
    }

    if let Some(cached) = self
      .storage
      .match_request(&self.settings.cache_name, request)?
    {
      debug!(%request, "served from cache");
      return Ok(FetchOutcome::Cache(cached));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.status == 200 && response.response_type == ResponseType::Basic {
          // A failed store must not fail the response
          if let Err(e) = self
            .storage
            .put(&self.settings.cache_name, request, &response)
          {
            warn!(%request, "failed to cache response: {:#}", e);
          }
        }
        Ok(FetchOutcome::Network(response))
      }
      Err(e) if request.is_navigation() => {
        let offline = FetchRequest::get(self.settings.offline_url.clone());
        match self
          .storage
          .match_request(&self.settings.cache_name, &offline)?
        {
          Some(page) => {
            info!(%request, "network failed, serving offline page");
            Ok(FetchOutcome::Offline(page))
          }
          None => Err(e),
        }
      }
      Err(e) => Err(e),
    }
  }

  /// Run the task registered for `tag`. Failures are logged, not returned.
  pub async fn handle_sync(&self, tag: &str) -> SyncOutcome {
    let Some(task) = self.sync_tasks.get(tag) else {
      debug!(tag, "no sync task registered");
      return SyncOutcome::Ignored;
    };

    info!(tag, "background sync");
    match task.run().await {
      Ok(()) => SyncOutcome::Completed,
      Err(e) => {
        warn!(tag, "background sync failed: {:#}", e);
        SyncOutcome::Failed
      }
    }
  }

  /// Show a notification for a push message. Messages without data are ignored.
  pub fn handle_push(&self, data: Option<&[u8]>) -> Result<Option<Notification>> {
    let Some(data) = data else {
      return Ok(None);
    };

    let payload: PushPayload =
      serde_json::from_slice(data).map_err(|e| eyre!("Invalid push payload: {}", e))?;

    let notification = Notification {
      title: payload.title,
      body: payload.body,
      icon: self.settings.notification_icon.clone(),
      badge: self.settings.notification_icon.clone(),
      vibrate: vec![100, 50, 100],
      data: NotificationData {
        date_of_arrival: Utc::now(),
        primary_key: 1,
      },
    };

    self.notifier.show(&notification)?;
    Ok(Some(notification))
  }

  /// Close the clicked notification and open the application root.
  pub fn handle_notification_click(&self, notification: &Notification) -> Result<()> {
    self.notifier.close(notification)?;
    let root = self
      .settings
      .scope
      .join("/")
      .map_err(|e| eyre!("Invalid application root: {}", e))?;
    self.notifier.open_window(&root)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::worker::request::Destination;
  use crate::worker::storage::MemoryCacheStorage;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  #[derive(Default)]
  struct FakeNetwork {
    responses: Mutex<HashMap<String, StoredResponse>>,
    calls: AtomicUsize,
    offline: AtomicBool,
  }

  impl FakeNetwork {
    fn serve(&self, url: &Url, status: u16, kind: ResponseType, body: &str) {
      self.responses.lock().unwrap().insert(
        url.to_string(),
        StoredResponse::new(url.clone(), status, kind, body),
      );
    }
  }

  impl Network for FakeNetwork {
    fn fetch(&self, request: &FetchRequest) -> BoxFuture<'static, Result<StoredResponse>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let result = if self.offline.load(Ordering::SeqCst) {
        Err(eyre!("network unreachable"))
      } else {
        self
          .responses
          .lock()
          .unwrap()
          .get(request.url.as_str())
          .cloned()
          .ok_or_else(|| eyre!("connection refused: {}", request.url))
      };
      async move { result }.boxed()
    }
  }

  #[derive(Default)]
  struct RecordingNotifier {
    events: Mutex<Vec<String>>,
  }

  impl Notifier for RecordingNotifier {
    fn show(&self, notification: &Notification) -> Result<()> {
      self.events.lock().unwrap().push(format!("show {}", notification.title));
      Ok(())
    }

    fn close(&self, notification: &Notification) -> Result<()> {
      self.events.lock().unwrap().push(format!("close {}", notification.title));
      Ok(())
    }

    fn open_window(&self, url: &Url) -> Result<()> {
      self.events.lock().unwrap().push(format!("open {}", url));
      Ok(())
    }
  }

  fn url(s: &str) -> Url {
    Url::parse("http://localhost:3000/").unwrap().join(s).unwrap()
  }

  fn settings(version: &str) -> WorkerSettings {
    let config = WorkerConfig {
      version: version.to_string(),
      precache: vec![
        "/".to_string(),
        "/offline.html".to_string(),
        "https://cdnjs.cloudflare.com/ajax/libs/tailwindcss/2.2.19/tailwind.min.css".to_string(),
      ],
      ..WorkerConfig::default()
    };
    WorkerSettings::from_config(&config).unwrap()
  }

  type TestWorker = OfflineWorker<MemoryCacheStorage, FakeNetwork>;

  struct Harness {
    storage: Arc<MemoryCacheStorage>,
    network: Arc<FakeNetwork>,
    notifier: Arc<RecordingNotifier>,
  }

  impl Harness {
    fn new() -> Self {
      let network = Arc::new(FakeNetwork::default());
      network.serve(&url("/"), 200, ResponseType::Basic, "<html>app</html>");
      network.serve(&url("/offline.html"), 200, ResponseType::Basic, "<html>offline</html>");
      network.serve(
        &Url::parse("https://cdnjs.cloudflare.com/ajax/libs/tailwindcss/2.2.19/tailwind.min.css")
          .unwrap(),
        200,
        ResponseType::Cors,
        "/* tailwind */",
      );
      Self {
        storage: Arc::new(MemoryCacheStorage::new()),
        network,
        notifier: Arc::new(RecordingNotifier::default()),
      }
    }

    fn worker(&self, version: &str) -> TestWorker {
      OfflineWorker::new(
        settings(version),
        Arc::clone(&self.storage),
        Arc::clone(&self.network),
        self.notifier.clone(),
      )
    }

    async fn active_worker(&self, version: &str) -> TestWorker {
      let worker = self.worker(version);
      worker.install().await.unwrap();
      worker.activate().unwrap();
      worker
    }

    fn calls(&self) -> usize {
      self.network.calls.load(Ordering::SeqCst)
    }
  }

  #[tokio::test]
  async fn test_install_primes_every_resource() {
    let h = Harness::new();
    let worker = h.worker("v1");
    worker.install().await.unwrap();

    assert_eq!(worker.state(), WorkerState::Installed);
    assert_eq!(h.storage.entries("daily-quote-v1").unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let h = Harness::new();
    h.active_worker("v1").await;
    h.network.serve(&url("/offline.html"), 404, ResponseType::Basic, "");

    let worker = h.worker("v2");
    assert!(worker.install().await.is_err());
    assert_eq!(worker.state(), WorkerState::Redundant);
    assert!(!h.storage.has("daily-quote-v2").unwrap());
    assert!(worker.activate().is_err());
    // The previous version keeps serving
    assert_eq!(h.storage.entries("daily-quote-v1").unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_activation_removes_previous_versions() {
    let h = Harness::new();
    h.active_worker("v1").await;
    h.storage.open("unrelated-cache").unwrap();

    let worker = h.worker("v2");
    worker.install().await.unwrap();
    // Installed but not active: v1 is still there
    assert!(h.storage.has("daily-quote-v1").unwrap());

    let mut deleted = worker.activate().unwrap();
    deleted.sort();
    assert_eq!(deleted, vec!["daily-quote-v1", "unrelated-cache"]);
    assert_eq!(h.storage.keys().unwrap(), vec!["daily-quote-v2"]);
  }

  #[tokio::test]
  async fn test_cache_first_makes_no_network_call() {
    let h = Harness::new();
    let worker = h.active_worker("v1").await;
    let before = h.calls();

    for path in ["/", "/#quotes"] {
      let outcome = worker.handle_fetch(&FetchRequest::navigate(url(path))).await.unwrap();
      match outcome {
        FetchOutcome::Cache(response) => assert_eq!(response.body, b"<html>app</html>"),
        other => panic!("expected cache hit for {}, got {:?}", path, other),
      }
    }
    assert_eq!(h.calls(), before);
  }

  #[tokio::test]
  async fn test_not_intercepted_until_activated() {
    let h = Harness::new();
    let worker = h.worker("v1");
    worker.install().await.unwrap();

    let outcome = worker.handle_fetch(&FetchRequest::get(url("/"))).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Passthrough);
  }

  #[tokio::test]
  async fn test_passthrough_for_non_get_and_foreign_hosts() {
    let h = Harness::new();
    let worker = h.active_worker("v1").await;
    let before = h.calls();

    let post = FetchRequest::get(url("/")).with_method(reqwest::Method::POST);
    assert_eq!(worker.handle_fetch(&post).await.unwrap(), FetchOutcome::Passthrough);

    let api = FetchRequest::get(Url::parse("http://localhost:8000/api/quotes/").unwrap());
    assert_eq!(worker.handle_fetch(&api).await.unwrap(), FetchOutcome::Passthrough);

    let lookalike = FetchRequest::get(Url::parse("https://evil.example/fonts.googleapis.com").unwrap());
    assert_eq!(
      worker.handle_fetch(&lookalike).await.unwrap(),
      FetchOutcome::Passthrough
    );
    assert_eq!(h.calls(), before);

    assert!(worker.intercepts(&Url::parse("https://flagicons.lipis.dev/flags/4x3/de.svg").unwrap()));
  }

  #[tokio::test]
  async fn test_only_basic_200_responses_are_stored() {
    let h = Harness::new();
    let worker = h.active_worker("v1").await;

    let quote = url("/quote.json");
    h.network.serve(&quote, 200, ResponseType::Basic, "{}");
    let missing = url("/missing.png");
    h.network.serve(&missing, 404, ResponseType::Basic, "");
    let flag = Url::parse("https://flagicons.lipis.dev/flags/4x3/de.svg").unwrap();
    h.network.serve(&flag, 200, ResponseType::Cors, "<svg/>");

    for target in [&quote, &missing, &flag] {
      let outcome = worker
        .handle_fetch(&FetchRequest::get(target.clone()))
        .await
        .unwrap();
      assert!(matches!(outcome, FetchOutcome::Network(_)));
    }

    let cached = |u: &Url| {
      h.storage
        .match_request("daily-quote-v1", &FetchRequest::get(u.clone()))
        .unwrap()
        .is_some()
    };
    assert!(cached(&quote));
    assert!(!cached(&missing));
    assert!(!cached(&flag));

    // Second request is answered from the cache
    let before = h.calls();
    let again = worker.handle_fetch(&FetchRequest::get(quote.clone())).await.unwrap();
    assert!(matches!(again, FetchOutcome::Cache(_)));
    assert_eq!(h.calls(), before);
  }

  #[tokio::test]
  async fn test_offline_navigation_falls_back_to_offline_page() {
    let h = Harness::new();
    let worker = h.active_worker("v1").await;
    h.network.offline.store(true, Ordering::SeqCst);

    let page = FetchRequest::navigate(url("/quotes/today"));
    match worker.handle_fetch(&page).await.unwrap() {
      FetchOutcome::Offline(response) => assert_eq!(response.body, b"<html>offline</html>"),
      other => panic!("expected offline page, got {:?}", other),
    }

    let document = FetchRequest::get(url("/about")).with_destination(Destination::Document);
    assert!(matches!(
      worker.handle_fetch(&document).await.unwrap(),
      FetchOutcome::Offline(_)
    ));

    let image = FetchRequest::get(url("/flag.png")).with_destination(Destination::Image);
    let err = worker.handle_fetch(&image).await.unwrap_err();
    assert!(err.to_string().contains("network unreachable"));
  }

  #[tokio::test]
  async fn test_sync_failures_are_logged_not_returned() {
    let h = Harness::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let counted = runs.clone();
    let worker = h
      .worker("v1")
      .with_sync_task("quote-sync", move || {
        let counted = counted.clone();
        async move {
          counted.fetch_add(1, Ordering::SeqCst);
          Ok::<_, color_eyre::Report>(())
        }
      })
      .with_sync_task("broken-sync", || async {
        Err::<(), _>(eyre!("backend unavailable"))
      });

    assert_eq!(worker.handle_sync("quote-sync").await, SyncOutcome::Completed);
    assert_eq!(worker.handle_sync("broken-sync").await, SyncOutcome::Failed);
    assert_eq!(worker.handle_sync("other").await, SyncOutcome::Ignored);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_push_shows_notification() {
    let h = Harness::new();
    let worker = h.worker("v1");

    let payload = br#"{"title": "Quote of the day", "body": "Carpe diem.", "tag": "ignored"}"#;
    let notification = worker
      .handle_push(Some(payload.as_slice()))
      .unwrap()
      .unwrap();

    assert_eq!(notification.title, "Quote of the day");
    assert_eq!(notification.icon, "/daily_quote.png");
    assert_eq!(notification.badge, "/daily_quote.png");
    assert_eq!(notification.vibrate, vec![100, 50, 100]);
    assert_eq!(notification.data.primary_key, 1);
    assert_eq!(
      h.notifier.events.lock().unwrap().as_slice(),
      &["show Quote of the day".to_string()]
    );

    assert_eq!(worker.handle_push(None).unwrap(), None);
    assert!(worker.handle_push(Some(b"not json".as_slice())).is_err());
    assert!(worker.handle_push(Some(br#"{"title": "x"}"#.as_slice())).is_err());
  }

  #[test]
  fn test_notification_click_opens_root() {
    let h = Harness::new();
    let worker = h.worker("v1");
    let notification = worker
      .handle_push(Some(br#"{"title": "Hi", "body": "There"}"#.as_slice()))
      .unwrap()
      .unwrap();

    worker.handle_notification_click(&notification).unwrap();
    assert_eq!(
      h.notifier.events.lock().unwrap().as_slice(),
      &[
        "show Hi".to_string(),
        "close Hi".to_string(),
        "open http://localhost:3000/".to_string(),
      ]
    );
  }

  #[tokio::test]
  async fn test_resume_from_storage() {
    let h = Harness::new();
    assert_eq!(h.worker("v1").resume().unwrap(), WorkerState::Parsed);

    h.active_worker("v1").await;
    assert_eq!(h.worker("v1").resume().unwrap(), WorkerState::Activated);

    h.worker("v2").install().await.unwrap();
    // v2 waits next to the active v1 until activated
    let waiting = h.worker("v2");
    assert_eq!(waiting.resume().unwrap(), WorkerState::Installed);
    waiting.activate().unwrap();
    assert_eq!(h.storage.keys().unwrap(), vec!["daily-quote-v2"]);

    // Stores of other applications do not make an active worker pending
    h.storage.open("unrelated-cache").unwrap();
    assert_eq!(h.worker("v2").resume().unwrap(), WorkerState::Activated);
  }

  #[tokio::test]
  async fn test_older_version_never_activates_over_newer() {
    let h = Harness::new();
    h.active_worker("v9").await;
    h.worker("v10").install().await.unwrap();

    // v9 stays active while v10 waits
    assert_eq!(h.worker("v9").resume().unwrap(), WorkerState::Activated);

    let stale = h.worker("v2");
    stale.install().await.unwrap();
    assert!(stale.activate().is_err());
    assert_eq!(stale.state(), WorkerState::Installed);
    assert!(h.storage.has("daily-quote-v10").unwrap());

    let newest = h.worker("v10");
    assert_eq!(newest.resume().unwrap(), WorkerState::Installed);
    let mut deleted = newest.activate().unwrap();
    deleted.sort();
    assert_eq!(deleted, vec!["daily-quote-v2", "daily-quote-v9"]);
  }
}
