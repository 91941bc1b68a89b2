//! Mounted consumers of a query.

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use super::client::{QueryClient, QueryDef};
use super::key::QueryKey;
use super::state::{QueryResult, QueryState, QueryStatus};

/// A consumer bound to one query at a time.
///
/// While alive it keeps its entry "mounted": invalidations refetch it right
/// away and a configured `refetch_interval` polls it. Switching to another
/// key (e.g. turning a page) keeps the previous value visible when the query
/// asks for placeholder data.
pub struct QueryObserver<T: Send + Sync + 'static> {
  client: QueryClient,
  def: QueryDef<T>,
  previous: Option<Arc<T>>,
  events: broadcast::Receiver<QueryKey>,
}

impl QueryClient {
  /// Mount an observer for a query, fetching if needed.
  pub fn observe<T: Send + Sync + 'static>(&self, def: QueryDef<T>) -> QueryObserver<T> {
    // Subscribe first so the completion of the mount fetch is not missed
    let events = self.subscribe();
    self.mount(&def);

    QueryObserver {
      client: self.clone(),
      def,
      previous: None,
      events,
    }
  }
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
  pub fn key(&self) -> &QueryKey {
    &self.def.key
  }

  /// Current view of the observed query.
  pub fn result(&self) -> QueryResult<T> {
    let state = self
      .client
      .get_query_state::<T>(&self.def.key)
      .unwrap_or_else(QueryState::idle);

    if state.data.is_none() && state.status != QueryStatus::Error && self.def.options.placeholder_data
    {
      if let Some(previous) = &self.previous {
        return QueryResult::placeholder(Arc::clone(previous), state.is_fetching);
      }
    }

    QueryResult::from_state(state)
  }

  /// Observe a different query, e.g. the same resource with new parameters.
  ///
  /// Results arriving later for the old key only update the old entry; this
  /// observer reports the new key from now on.
  pub fn set_query(&mut self, def: QueryDef<T>) {
    if def.key == self.def.key {
      let remount = def.options.enabled != self.def.options.enabled
        || def.options.refetch_interval != self.def.options.refetch_interval;
      if remount {
        self.client.unmount(&self.def.key, &self.def.options);
        self.client.mount(&def);
      }
      self.def = def;
      return;
    }

    if let Some(data) = self.client.get_query_data::<T>(&self.def.key) {
      self.previous = Some(data);
    }

    debug!(from = %self.def.key, to = %def.key, "observer switching query");
    self.client.unmount(&self.def.key, &self.def.options);
    self.def = def;
    self.client.mount(&self.def);
  }

  /// Wait until the observed entry changes, then return the new view.
  pub async fn changed(&mut self) -> QueryResult<T> {
    loop {
      match self.events.recv().await {
        Ok(key) if key == self.def.key => return self.result(),
        Ok(_) => continue,
        Err(RecvError::Lagged(skipped)) => {
          debug!(key = %self.def.key, skipped, "observer lagged behind cache events");
          return self.result();
        }
        Err(RecvError::Closed) => return self.result(),
      }
    }
  }

  /// Wait until no fetch is in flight for the observed entry.
  pub async fn settled(&mut self) -> QueryResult<T> {
    loop {
      let result = self.result();
      if !result.is_fetching {
        return result;
      }
      self.changed().await;
    }
  }

  /// Fetch again now, superseding any in-flight fetch.
  pub async fn refetch(&self) -> QueryResult<T> {
    self.client.refetch(&self.def).await;
    self.result()
  }
}

impl<T: Send + Sync + 'static> Drop for QueryObserver<T> {
  fn drop(&mut self) {
    self.client.unmount(&self.def.key, &self.def.options);
  }
}
