//! Entry status and the snapshots handed out to readers.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Fetch status of a query entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Never fetched
  Idle,
  /// First fetch in flight, no value yet
  Loading,
  /// Last fetch succeeded
  Success,
  /// Last fetch failed after its retries
  Error,
}

/// Snapshot of one cache entry.
///
/// A refetch does not move a successful entry back to `Loading`: the previous
/// value stays visible with `is_fetching` set.
#[derive(Debug)]
pub struct QueryState<T> {
  pub data: Option<Arc<T>>,
  pub status: QueryStatus,
  pub error: Option<String>,
  /// Time of the last successful fetch or direct write
  pub updated_at: Option<DateTime<Utc>>,
  pub error_updated_at: Option<DateTime<Utc>>,
  pub is_fetching: bool,
  /// Marked stale by an invalidation and not refreshed since
  pub is_invalidated: bool,
}

impl<T> QueryState<T> {
  pub fn idle() -> Self {
    Self {
      data: None,
      status: QueryStatus::Idle,
      error: None,
      updated_at: None,
      error_updated_at: None,
      is_fetching: false,
      is_invalidated: false,
    }
  }

  pub fn is_loading(&self) -> bool {
    self.data.is_none() && self.is_fetching
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }
}

// Manual impl: `T` itself does not need to be Clone behind the Arc.
impl<T> Clone for QueryState<T> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      status: self.status,
      error: self.error.clone(),
      updated_at: self.updated_at,
      error_updated_at: self.error_updated_at,
      is_fetching: self.is_fetching,
      is_invalidated: self.is_invalidated,
    }
  }
}

/// What a mounted consumer sees.
///
/// Differs from [`QueryState`] when placeholder data is shown: while a new key
/// loads, the last value of the previous key is reported as a success.
#[derive(Debug)]
pub struct QueryResult<T> {
  pub data: Option<Arc<T>>,
  pub status: QueryStatus,
  pub error: Option<String>,
  pub is_loading: bool,
  pub is_fetching: bool,
  pub is_placeholder_data: bool,
  pub updated_at: Option<DateTime<Utc>>,
}

impl<T> QueryResult<T> {
  pub(crate) fn from_state(state: QueryState<T>) -> Self {
    Self {
      is_loading: state.is_loading(),
      data: state.data,
      status: state.status,
      error: state.error,
      is_fetching: state.is_fetching,
      is_placeholder_data: false,
      updated_at: state.updated_at,
    }
  }

  pub(crate) fn placeholder(data: Arc<T>, is_fetching: bool) -> Self {
    Self {
      data: Some(data),
      status: QueryStatus::Success,
      error: None,
      is_loading: false,
      is_fetching,
      is_placeholder_data: true,
      updated_at: None,
    }
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }
}

impl<T> Clone for QueryResult<T> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      status: self.status,
      error: self.error.clone(),
      is_loading: self.is_loading,
      is_fetching: self.is_fetching,
      is_placeholder_data: self.is_placeholder_data,
      updated_at: self.updated_at,
    }
  }
}
