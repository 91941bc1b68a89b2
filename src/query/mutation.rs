//! One-shot writes with declared cache side effects.

use color_eyre::{eyre::WrapErr, Result};
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::client::{AnyValue, QueryClient};
use super::key::{KeyFilter, QueryKey};

/// Cache side effects of a successful mutation.
///
/// Direct writes are applied before invalidations.
#[derive(Clone, Default)]
pub struct CacheEffects {
  writes: Vec<(QueryKey, AnyValue)>,
  invalidations: Vec<KeyFilter>,
}

impl CacheEffects {
  pub fn new() -> Self {
    Self::default()
  }

  /// Mark matching entries stale and refetch the mounted ones.
  pub fn invalidate(mut self, filter: impl Into<KeyFilter>) -> Self {
    self.invalidations.push(filter.into());
    self
  }

  /// Write a known value straight into an entry.
  pub fn set<T: Send + Sync + 'static>(mut self, key: QueryKey, value: T) -> Self {
    self.writes.push((key, Arc::new(value)));
    self
  }

  pub fn invalidations(&self) -> &[KeyFilter] {
    &self.invalidations
  }

  pub(crate) fn writes(&self) -> impl Iterator<Item = (&QueryKey, &AnyValue)> {
    self.writes.iter().map(|(key, value)| (key, value))
  }

  pub fn written_keys(&self) -> impl Iterator<Item = &QueryKey> {
    self.writes.iter().map(|(key, _)| key)
  }

  /// The value written to `key`, if any and of type `T`.
  pub fn written<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
    self
      .writes
      .iter()
      .find(|(k, _)| k == key)
      .and_then(|(_, value)| Arc::clone(value).downcast::<T>().ok())
  }

  pub fn is_empty(&self) -> bool {
    self.writes.is_empty() && self.invalidations.is_empty()
  }
}

impl fmt::Debug for CacheEffects {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEffects")
      .field("writes", &self.written_keys().collect::<Vec<_>>())
      .field("invalidations", &self.invalidations)
      .finish()
  }
}

type MutateFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O>> + Send + Sync>;
type EffectsFn<O> = Arc<dyn Fn(&O) -> CacheEffects + Send + Sync>;

/// A write operation bound to a cache.
///
/// On success the declared [`CacheEffects`] are applied before
/// [`mutate`](Self::mutate) returns, so dependent queries are already
/// refetching (or marked stale) when the caller resumes. On failure nothing
/// is touched.
pub struct Mutation<I, O> {
  name: &'static str,
  client: QueryClient,
  mutate_fn: MutateFn<I, O>,
  on_success: Option<EffectsFn<O>>,
  pending: Arc<AtomicUsize>,
}

impl<I: Send + 'static, O: Send + 'static> Mutation<I, O> {
  pub fn new<F, Fut>(client: &QueryClient, name: &'static str, mutate_fn: F) -> Self
  where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
  {
    Self {
      name,
      client: client.clone(),
      mutate_fn: Arc::new(move |input| mutate_fn(input).boxed()),
      on_success: None,
      pending: Arc::new(AtomicUsize::new(0)),
    }
  }

  /// Declare the cache effects of a successful run.
  pub fn on_success<E>(mut self, effects: E) -> Self
  where
    E: Fn(&O) -> CacheEffects + Send + Sync + 'static,
  {
    self.on_success = Some(Arc::new(effects));
    self
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  /// True while at least one run is in flight.
  pub fn is_pending(&self) -> bool {
    self.pending.load(Ordering::SeqCst) > 0
  }

  pub async fn mutate(&self, input: I) -> Result<O> {
    let _pending = PendingGuard::enter(&self.pending);

    let output = (self.mutate_fn)(input)
      .await
      .wrap_err_with(|| format!("{} failed", self.name))?;

    if let Some(on_success) = &self.on_success {
      let effects = on_success(&output);
      debug!(mutation = self.name, ?effects, "applying cache effects");
      self.client.apply(&effects);
    }

    info!(mutation = self.name, "mutation succeeded");
    Ok(output)
  }
}

impl<I, O> Clone for Mutation<I, O> {
  fn clone(&self) -> Self {
    Self {
      name: self.name,
      client: self.client.clone(),
      mutate_fn: Arc::clone(&self.mutate_fn),
      on_success: self.on_success.clone(),
      pending: Arc::clone(&self.pending),
    }
  }
}

struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
  fn enter(counter: &Arc<AtomicUsize>) -> Self {
    counter.fetch_add(1, Ordering::SeqCst);
    Self(Arc::clone(counter))
  }
}

impl Drop for PendingGuard {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query::client::QueryDef;
  use crate::query::key::{Params, Resource};
  use crate::query::options::QueryOptions;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::AtomicU32;
  use std::time::Duration;
  use tokio::sync::oneshot;

  const QUOTES: Resource = Resource::new("quotes");
  const QUOTE: Resource = Resource::new("quote");

  fn list_key() -> QueryKey {
    QueryKey::new(QUOTES, Params::new().with("limit", 50i64))
  }

  fn list_def(counter: Arc<AtomicU32>) -> QueryDef<u32> {
    QueryDef::new(list_key(), move || {
      let counter = counter.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
      }
    })
    .with_options(QueryOptions::default().stale_time(Duration::from_secs(600)))
  }

  fn create_mutation(client: &QueryClient) -> Mutation<String, u32> {
    Mutation::new(client, "create quote", |text: String| async move {
      Ok(text.len() as u32)
    })
    .on_success(|_| CacheEffects::new().invalidate(QUOTES))
  }

  #[tokio::test(start_paused = true)]
  async fn test_mounted_query_is_refetching_when_mutate_returns() {
    let client = QueryClient::default();
    let counter = Arc::new(AtomicU32::new(0));
    let mut observer = client.observe(list_def(counter.clone()));
    observer.settled().await;

    create_mutation(&client)
      .mutate("Be yourself".to_string())
      .await
      .unwrap();

    let state = client.get_query_state::<u32>(&list_key()).unwrap();
    assert!(state.is_fetching);
    assert!(state.is_invalidated);

    let after = observer.settled().await;
    assert_eq!(after.data(), Some(&2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_unmounted_query_refetches_on_next_read() {
    let client = QueryClient::default();
    let counter = Arc::new(AtomicU32::new(0));
    let def = list_def(counter.clone());
    client.query(&def).await;

    create_mutation(&client)
      .mutate("Stay hungry".to_string())
      .await
      .unwrap();

    let state = client.query(&def).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(state.data(), Some(&2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_mutation_applies_nothing() {
    let client = QueryClient::default();
    let counter = Arc::new(AtomicU32::new(0));
    client.query(&list_def(counter.clone())).await;

    let mutation: Mutation<String, u32> =
      Mutation::new(&client, "create quote", |_text: String| async {
        Err(eyre!("422 Unprocessable Entity"))
      })
      .on_success(|_| CacheEffects::new().invalidate(QUOTES));

    let err = mutation.mutate(String::new()).await.unwrap_err();
    assert!(format!("{:#}", err).contains("422"));

    let state = client.get_query_state::<u32>(&list_key()).unwrap();
    assert!(!state.is_invalidated);
    assert!(!state.is_fetching);
    assert!(!mutation.is_pending());
  }

  #[tokio::test]
  async fn test_direct_write_visible_on_return() {
    let client = QueryClient::default();
    let mutation = Mutation::new(&client, "update quote", |id: i64| async move {
      Ok((id, "updated".to_string()))
    })
    .on_success(|(id, text): &(i64, String)| {
      CacheEffects::new()
        .invalidate(QUOTES)
        .set(QueryKey::new(QUOTE, Params::new().with("id", *id)), text.clone())
    });

    mutation.mutate(7).await.unwrap();

    let key = QueryKey::new(QUOTE, Params::new().with("id", 7i64));
    let data = client.get_query_data::<String>(&key).unwrap();
    assert_eq!(data.as_str(), "updated");
  }

  #[tokio::test(start_paused = true)]
  async fn test_direct_write_wins_over_slower_earlier_fetch() {
    let client = QueryClient::default();
    let key = QueryKey::new(QUOTE, Params::new().with("id", 7i64));
    let def = QueryDef::new(key.clone(), || async {
      tokio::time::sleep(Duration::from_millis(100)).await;
      Ok("old".to_string())
    });
    let mut observer = client.observe(def);
    assert!(observer.result().is_fetching);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let written_key = key.clone();
    let mutation = Mutation::new(&client, "update quote", |text: String| async move { Ok(text) })
      .on_success(move |text: &String| CacheEffects::new().set(written_key.clone(), text.clone()));
    mutation.mutate("new".to_string()).await.unwrap();

    let written = observer.settled().await;
    assert_eq!(written.data().map(String::as_str), Some("new"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let data = client.get_query_data::<String>(&key).unwrap();
    assert_eq!(data.as_str(), "new");
    assert!(!observer.result().is_fetching);
  }

  #[tokio::test]
  async fn test_pending_while_in_flight() {
    let client = QueryClient::default();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

    let mutation = Mutation::new(&client, "backup file", move |_: ()| {
      let release_rx = release_rx.clone();
      async move {
        if let Some(rx) = release_rx.lock().await.take() {
          let _ = rx.await;
        }
        Ok(())
      }
    });

    let running = {
      let mutation = mutation.clone();
      tokio::spawn(async move { mutation.mutate(()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(mutation.is_pending());

    release_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
    assert!(!mutation.is_pending());
  }

  #[test]
  fn test_effects_accessors() {
    let key = QueryKey::new(QUOTE, Params::new().with("id", 1i64));
    let effects = CacheEffects::new()
      .set(key.clone(), 5u32)
      .invalidate(QUOTES);

    assert_eq!(effects.written::<u32>(&key).as_deref(), Some(&5));
    assert!(effects.written::<String>(&key).is_none());
    assert_eq!(effects.invalidations(), &[KeyFilter::from(QUOTES)]);
    assert!(!effects.is_empty());
    assert!(CacheEffects::new().is_empty());
  }
}
