//! The query cache: one entry per key, shared by every reader.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::key::{KeyFilter, QueryKey};
use super::mutation::CacheEffects;
use super::options::{QueryClientConfig, QueryOptions, RetryPolicy};
use super::state::{QueryState, QueryStatus};

/// Type-erased cached value.
pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

/// Outcome of one fetch, cloned to every waiter.
type FetchResult = Result<AnyValue, String>;

type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// A factory producing one fetch attempt.
pub(crate) type ErasedFetcher =
  Arc<dyn Fn() -> BoxFuture<'static, Result<AnyValue>> + Send + Sync>;

/// A query: its key, options and the fetch function producing its value.
pub struct QueryDef<T> {
  pub key: QueryKey,
  pub options: QueryOptions,
  fetcher: ErasedFetcher,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> QueryDef<T> {
  pub fn new<F, Fut>(key: QueryKey, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let fetcher: ErasedFetcher = Arc::new(move || {
      let fut = fetcher();
      async move { fut.await.map(|value| Arc::new(value) as AnyValue) }.boxed()
    });

    Self {
      key,
      options: QueryOptions::default(),
      fetcher,
      _marker: PhantomData,
    }
  }

  pub fn with_options(mut self, options: QueryOptions) -> Self {
    self.options = options;
    self
  }
}

impl<T> Clone for QueryDef<T> {
  fn clone(&self) -> Self {
    Self {
      key: self.key.clone(),
      options: self.options.clone(),
      fetcher: Arc::clone(&self.fetcher),
      _marker: PhantomData,
    }
  }
}

struct InFlight {
  generation: u64,
  future: SharedFetch,
}

struct Entry {
  data: Option<AnyValue>,
  status: QueryStatus,
  error: Option<String>,
  updated_at: Option<DateTime<Utc>>,
  fetched_at: Option<Instant>,
  error_updated_at: Option<DateTime<Utc>>,
  invalidated: bool,
  in_flight: Option<InFlight>,
  /// Incremented for every fetch; only the current generation may settle
  generation: u64,
  /// Enabled observers currently mounted
  observers: usize,
  /// Last registered fetch function, used for background refetches
  fetcher: Option<(ErasedFetcher, RetryPolicy)>,
  poller: Option<Poller>,
}

/// Interval refetch shared by every polling observer of one entry.
///
/// The period is that of the first polling observer to mount.
struct Poller {
  observers: usize,
  task: JoinHandle<()>,
}

impl Drop for Entry {
  fn drop(&mut self) {
    if let Some(poller) = self.poller.take() {
      poller.task.abort();
    }
  }
}

impl Entry {
  fn new() -> Self {
    Self {
      data: None,
      status: QueryStatus::Idle,
      error: None,
      updated_at: None,
      fetched_at: None,
      error_updated_at: None,
      invalidated: false,
      in_flight: None,
      generation: 0,
      observers: 0,
      fetcher: None,
      poller: None,
    }
  }

  fn is_stale(&self, stale_time: Duration) -> bool {
    if self.invalidated {
      return true;
    }
    self
      .fetched_at
      .map(|t| t.elapsed() >= stale_time)
      .unwrap_or(true)
  }

  fn snapshot<T: Send + Sync + 'static>(&self, key: &QueryKey) -> QueryState<T> {
    let data = self
      .data
      .clone()
      .and_then(|value| match value.downcast::<T>() {
        Ok(typed) => Some(typed),
        Err(_) => {
          warn!(key = %key, "cached value has an unexpected type");
          None
        }
      });

    QueryState {
      data,
      status: self.status,
      error: self.error.clone(),
      updated_at: self.updated_at,
      error_updated_at: self.error_updated_at,
      is_fetching: self.in_flight.is_some(),
      is_invalidated: self.invalidated,
    }
  }
}

struct Inner {
  entries: Mutex<HashMap<QueryKey, Entry>>,
  events: broadcast::Sender<QueryKey>,
  config: QueryClientConfig,
}

/// Cache of server reads keyed by [`QueryKey`].
///
/// Cloning is cheap and every clone shares the same entries. Build one per
/// application session and [`clear`](Self::clear) it on logout; tests build
/// their own isolated instances.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

impl Default for QueryClient {
  fn default() -> Self {
    Self::new(QueryClientConfig::default())
  }
}

impl QueryClient {
  pub fn new(config: QueryClientConfig) -> Self {
    let (events, _) = broadcast::channel(256);
    Self {
      inner: Arc::new(Inner {
        entries: Mutex::new(HashMap::new()),
        events,
        config,
      }),
    }
  }

  pub fn config(&self) -> &QueryClientConfig {
    &self.inner.config
  }

  /// Receive the key of every entry that changes.
  pub fn subscribe(&self) -> broadcast::Receiver<QueryKey> {
    self.inner.events.subscribe()
  }

  /// Read through the cache.
  ///
  /// Joins an in-flight fetch for the same key, returns a fresh cached value
  /// directly, and otherwise fetches. Failures end up in the returned state,
  /// never as a panic or an `Err`.
  pub async fn query<T: Send + Sync + 'static>(&self, def: &QueryDef<T>) -> QueryState<T> {
    let pending = {
      let mut entries = self.entries();
      let entry = self.register(&mut entries, def);

      if !def.options.enabled {
        return entry.snapshot(&def.key);
      }

      if let Some(in_flight) = &entry.in_flight {
        debug!(key = %def.key, generation = in_flight.generation, "joining in-flight fetch");
        Some((in_flight.generation, in_flight.future.clone()))
      } else if entry.data.is_some() && !entry.is_stale(self.stale_time_for(&def.options)) {
        debug!(key = %def.key, "cache hit");
        None
      } else {
        self.start_fetch(&def.key, entry)
      }
    };

    if let Some((generation, future)) = pending {
      self.await_fetch(&def.key, generation, future).await;
    }

    self
      .get_query_state(&def.key)
      .unwrap_or_else(QueryState::idle)
  }

  /// Like [`query`](Self::query), but surfaces a failed or disabled read as an error.
  pub async fn fetch_query<T: Send + Sync + 'static>(&self, def: &QueryDef<T>) -> Result<Arc<T>> {
    let state = self.query(def).await;
    if let Some(error) = state.error {
      return Err(eyre!("Failed to load {}: {}", def.key, error));
    }
    state
      .data
      .ok_or_else(|| eyre!("No data for {} (query disabled)", def.key))
  }

  /// Start a new fetch even when one is in flight; the older one is discarded.
  pub async fn refetch<T: Send + Sync + 'static>(&self, def: &QueryDef<T>) -> QueryState<T> {
    let pending = {
      let mut entries = self.entries();
      let entry = self.register(&mut entries, def);
      self.start_fetch(&def.key, entry)
    };

    if let Some((generation, future)) = pending {
      self.await_fetch(&def.key, generation, future).await;
    }

    self
      .get_query_state(&def.key)
      .unwrap_or_else(QueryState::idle)
  }

  pub fn get_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
    self.get_query_state::<T>(key).and_then(|state| state.data)
  }

  pub fn get_query_state<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<QueryState<T>> {
    self.entries().get(key).map(|entry| entry.snapshot(key))
  }

  /// Write a known value directly into an entry, marking it fresh.
  pub fn set_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey, value: T) {
    self.write(key, Arc::new(value));
  }

  pub(crate) fn write(&self, key: &QueryKey, value: AnyValue) {
    {
      let mut entries = self.entries();
      let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
      // A fetch started before the write must not overwrite it
      if entry.in_flight.take().is_some() {
        entry.generation += 1;
        debug!(key = %key, generation = entry.generation, "write supersedes in-flight fetch");
      }
      entry.data = Some(value);
      entry.status = QueryStatus::Success;
      entry.error = None;
      entry.updated_at = Some(Utc::now());
      entry.fetched_at = Some(Instant::now());
      entry.invalidated = false;
    }
    debug!(key = %key, "cache entry written");
    self.notify(key);
  }

  /// Mark matching entries stale.
  ///
  /// Entries with a mounted observer or a fetch in flight are refetched right
  /// away, superseding any older fetch. Others refetch on their next read.
  /// Returns the number of matched entries.
  pub fn invalidate_queries(&self, filter: &KeyFilter) -> usize {
    let mut touched = Vec::new();
    {
      let mut entries = self.entries();
      for (key, entry) in entries.iter_mut().filter(|(key, _)| filter.matches(key)) {
        entry.invalidated = true;
        if entry.observers > 0 || entry.in_flight.is_some() {
          self.start_fetch(key, entry);
        }
        touched.push(key.clone());
      }
    }

    debug!(?filter, count = touched.len(), "invalidated queries");
    for key in &touched {
      self.notify(key);
    }
    touched.len()
  }

  /// Apply the side effects a mutation declared: direct writes first, then
  /// invalidations.
  pub fn apply(&self, effects: &CacheEffects) {
    for (key, value) in effects.writes() {
      self.write(key, Arc::clone(value));
    }
    for filter in effects.invalidations() {
      self.invalidate_queries(filter);
    }
  }

  /// Drop matching entries. Results of their in-flight fetches are discarded.
  pub fn remove_queries(&self, filter: &KeyFilter) -> usize {
    let removed: Vec<QueryKey> = {
      let mut entries = self.entries();
      let keys: Vec<QueryKey> = entries
        .keys()
        .filter(|key| filter.matches(key))
        .cloned()
        .collect();
      for key in &keys {
        entries.remove(key);
      }
      keys
    };

    for key in &removed {
      self.notify(key);
    }
    removed.len()
  }

  /// Drop every entry.
  pub fn clear(&self) {
    let count = self.remove_queries(&KeyFilter::All);
    debug!(count, "query cache cleared");
  }

  /// Number of entries currently fetching.
  pub fn fetching_count(&self) -> usize {
    self
      .entries()
      .values()
      .filter(|entry| entry.in_flight.is_some())
      .count()
  }

  /// Register an observer; fetches when the entry has no value or a stale one.
  pub(crate) fn mount<T: Send + Sync + 'static>(&self, def: &QueryDef<T>) {
    let mut entries = self.entries();
    let entry = self.register(&mut entries, def);
    if !def.options.enabled {
      return;
    }

    entry.observers += 1;
    if let Some(period) = def.options.refetch_interval {
      if let Some(poller) = entry.poller.as_mut() {
        poller.observers += 1;
      } else {
        entry.poller = Some(Poller {
          observers: 1,
          task: self.spawn_poller(&def.key, period),
        });
      }
    }

    if entry.in_flight.is_none()
      && (entry.data.is_none() || entry.is_stale(self.stale_time_for(&def.options)))
    {
      self.start_fetch(&def.key, entry);
    }
  }

  pub(crate) fn unmount(&self, key: &QueryKey, options: &QueryOptions) {
    if !options.enabled {
      return;
    }
    let mut entries = self.entries();
    let Some(entry) = entries.get_mut(key) else {
      return;
    };

    entry.observers = entry.observers.saturating_sub(1);
    if options.refetch_interval.is_none() {
      return;
    }
    let idle = entry
      .poller
      .as_mut()
      .map(|poller| {
        poller.observers = poller.observers.saturating_sub(1);
        poller.observers == 0
      })
      .unwrap_or(false);
    if idle {
      if let Some(poller) = entry.poller.take() {
        debug!(key = %key, "interval refetch stopped");
        poller.task.abort();
      }
    }
  }

  fn spawn_poller(&self, key: &QueryKey, period: Duration) -> JoinHandle<()> {
    let client = self.clone();
    let key = key.clone();
    debug!(key = %key, ?period, "interval refetch started");

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        client.poll(&key);
      }
    })
  }

  /// Interval tick: fetch unless one is already in flight.
  fn poll(&self, key: &QueryKey) {
    let mut entries = self.entries();
    if let Some(entry) = entries.get_mut(key) {
      if entry.in_flight.is_none() {
        debug!(key = %key, "interval refetch");
        self.start_fetch(key, entry);
      }
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
    self
      .inner
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn notify(&self, key: &QueryKey) {
    // No receivers is fine
    let _ = self.inner.events.send(key.clone());
  }

  fn stale_time_for(&self, options: &QueryOptions) -> Duration {
    options.stale_time.unwrap_or(self.inner.config.stale_time)
  }

  /// Get or create the entry and remember the latest fetch function for it.
  fn register<'a, T: Send + Sync + 'static>(
    &self,
    entries: &'a mut HashMap<QueryKey, Entry>,
    def: &QueryDef<T>,
  ) -> &'a mut Entry {
    let retry = def.options.retry.unwrap_or(self.inner.config.retry);
    let entry = entries.entry(def.key.clone()).or_insert_with(Entry::new);
    entry.fetcher = Some((Arc::clone(&def.fetcher), retry));
    entry
  }

  /// Start a fetch for an entry, superseding whatever is in flight.
  ///
  /// A driver task applies the result even when nobody awaits it.
  fn start_fetch(&self, key: &QueryKey, entry: &mut Entry) -> Option<(u64, SharedFetch)> {
    let (fetcher, retry) = entry.fetcher.clone()?;

    entry.generation += 1;
    let generation = entry.generation;
    let future = run_fetch(key.clone(), fetcher, retry).boxed().shared();

    if entry.in_flight.is_some() {
      debug!(key = %key, generation, "superseding in-flight fetch");
    }
    entry.in_flight = Some(InFlight {
      generation,
      future: future.clone(),
    });
    if entry.data.is_none() {
      entry.status = QueryStatus::Loading;
    }

    let client = self.clone();
    let driver = future.clone();
    let driver_key = key.clone();
    tokio::spawn(async move {
      let result = driver.await;
      client.settle(&driver_key, generation, result);
    });

    debug!(key = %key, generation, "fetch started");
    self.notify(key);
    Some((generation, future))
  }

  /// Await a fetch; if it was superseded, follow the newer one.
  async fn await_fetch(&self, key: &QueryKey, mut generation: u64, mut future: SharedFetch) {
    loop {
      let result = future.await;
      if self.settle(key, generation, result) {
        return;
      }

      let newer = self
        .entries()
        .get(key)
        .and_then(|entry| entry.in_flight.as_ref())
        .filter(|in_flight| in_flight.generation > generation)
        .map(|in_flight| (in_flight.generation, in_flight.future.clone()));

      match newer {
        Some((next_generation, next_future)) => {
          generation = next_generation;
          future = next_future;
        }
        None => return,
      }
    }
  }

  /// Apply a fetch result if it belongs to the current generation.
  ///
  /// Returns false when the result was discarded (superseded, already
  /// applied, or the entry was removed).
  fn settle(&self, key: &QueryKey, generation: u64, result: FetchResult) -> bool {
    {
      let mut entries = self.entries();
      let Some(entry) = entries.get_mut(key) else {
        return false;
      };
      match &entry.in_flight {
        Some(in_flight) if in_flight.generation == generation => {}
        Some(_) => {
          debug!(key = %key, generation, "discarding superseded fetch result");
          return false;
        }
        None => return false,
      }

      entry.in_flight = None;
      match result {
        Ok(value) => {
          entry.data = Some(value);
          entry.status = QueryStatus::Success;
          entry.error = None;
          entry.updated_at = Some(Utc::now());
          entry.fetched_at = Some(Instant::now());
          entry.invalidated = false;
        }
        Err(error) => {
          entry.status = QueryStatus::Error;
          entry.error = Some(error);
          entry.error_updated_at = Some(Utc::now());
        }
      }
    }

    self.notify(key);
    true
  }
}

/// One fetch including its retries.
async fn run_fetch(key: QueryKey, fetcher: ErasedFetcher, retry: RetryPolicy) -> FetchResult {
  let mut attempt = 0;
  loop {
    match fetcher().await {
      Ok(value) => return Ok(value),
      Err(e) if attempt < retry.max_retries => {
        let delay = retry.delay_for(attempt);
        attempt += 1;
        warn!(key = %key, attempt, ?delay, "fetch failed, retrying: {:#}", e);
        tokio::time::sleep(delay).await;
      }
      Err(e) => {
        warn!(key = %key, "fetch failed: {:#}", e);
        return Err(format!("{:#}", e));
      }
    }
  }
}
