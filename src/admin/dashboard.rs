//! Dashboard summary combined from four independent queries.

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::api::types::{FileList, QuoteStats, SentimentStats, SystemHealth};
use crate::query::{QueryClient, QueryDef, QueryKey, QueryObserver};

use super::hooks::AdminQueries;
use super::keys;

pub const UNKNOWN_STATUS: &str = "unknown";

/// Summary figures; each missing constituent falls back to zero or `unknown`.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardStats {
  pub total_quotes: u64,
  pub total_files: usize,
  pub languages: u64,
  pub authors: u64,
  pub categories: u64,
  pub sentiment_analyzed: u64,
  pub system_status: String,
  pub cpu_usage: f64,
  pub memory_usage: f64,
  pub disk_usage: f64,
}

impl Default for DashboardStats {
  fn default() -> Self {
    Self::from_parts(None, None, None, None)
  }
}

impl DashboardStats {
  pub fn from_parts(
    quotes: Option<&QuoteStats>,
    sentiment: Option<&SentimentStats>,
    health: Option<&SystemHealth>,
    files: Option<&FileList>,
  ) -> Self {
    let system_status = health
      .map(|h| h.status.as_str())
      .filter(|status| !status.is_empty())
      .unwrap_or(UNKNOWN_STATUS)
      .to_string();

    Self {
      total_quotes: quotes.map(|q| q.total_quotes).unwrap_or(0),
      total_files: files.map(|f| f.files.len()).unwrap_or(0),
      languages: quotes.map(|q| q.languages).unwrap_or(0),
      authors: quotes.map(|q| q.authors).unwrap_or(0),
      categories: quotes.map(|q| q.categories).unwrap_or(0),
      sentiment_analyzed: sentiment.map(|s| s.total_analyzed).unwrap_or(0),
      system_status,
      cpu_usage: health.map(|h| h.cpu_usage).unwrap_or(0.0),
      memory_usage: health.map(|h| h.memory_usage).unwrap_or(0.0),
      disk_usage: health.map(|h| h.disk_usage).unwrap_or(0.0),
    }
  }

  /// Build from whatever the cache currently holds.
  pub fn read(client: &QueryClient) -> Self {
    Self::from_parts(
      client.get_query_data::<QuoteStats>(&keys::quote_stats()).as_deref(),
      client.get_query_data::<SentimentStats>(&keys::sentiment_stats()).as_deref(),
      client.get_query_data::<SystemHealth>(&keys::system_health()).as_deref(),
      client.get_query_data::<FileList>(&keys::quote_files()).as_deref(),
    )
  }
}

/// The queries a dashboard summary is derived from.
pub struct DashboardQueries {
  pub quote_stats: QueryDef<QuoteStats>,
  pub sentiment_stats: QueryDef<SentimentStats>,
  pub system_health: QueryDef<SystemHealth>,
  pub quote_files: QueryDef<FileList>,
}

impl AdminQueries {
  pub fn dashboard_queries(&self) -> DashboardQueries {
    DashboardQueries {
      quote_stats: self.quote_stats(),
      sentiment_stats: self.sentiment_stats(),
      system_health: self.system_health(),
      quote_files: self.quote_files(),
    }
  }

  /// Mount the dashboard constituents.
  pub fn watch_dashboard(&self) -> DashboardWatcher {
    DashboardWatcher::new(self.client(), self.dashboard_queries())
  }
}

/// Keeps the constituents mounted and recomputes the summary on change.
pub struct DashboardWatcher {
  quote_stats: QueryObserver<QuoteStats>,
  sentiment_stats: QueryObserver<SentimentStats>,
  system_health: QueryObserver<SystemHealth>,
  quote_files: QueryObserver<FileList>,
  events: broadcast::Receiver<QueryKey>,
}

impl DashboardWatcher {
  pub fn new(client: &QueryClient, queries: DashboardQueries) -> Self {
    let events = client.subscribe();
    Self {
      quote_stats: client.observe(queries.quote_stats),
      sentiment_stats: client.observe(queries.sentiment_stats),
      system_health: client.observe(queries.system_health),
      quote_files: client.observe(queries.quote_files),
      events,
    }
  }

  pub fn stats(&self) -> DashboardStats {
    DashboardStats::from_parts(
      self.quote_stats.result().data(),
      self.sentiment_stats.result().data(),
      self.system_health.result().data(),
      self.quote_files.result().data(),
    )
  }

  /// True while any constituent is fetching.
  pub fn is_fetching(&self) -> bool {
    self.quote_stats.result().is_fetching
      || self.sentiment_stats.result().is_fetching
      || self.system_health.result().is_fetching
      || self.quote_files.result().is_fetching
  }

  /// Errors of failed constituents, by key.
  pub fn errors(&self) -> Vec<(QueryKey, String)> {
    let mut errors = Vec::new();
    let mut push = |key: &QueryKey, error: Option<String>| {
      if let Some(error) = error {
        errors.push((key.clone(), error));
      }
    };
    push(self.quote_stats.key(), self.quote_stats.result().error);
    push(self.sentiment_stats.key(), self.sentiment_stats.result().error);
    push(self.system_health.key(), self.system_health.result().error);
    push(self.quote_files.key(), self.quote_files.result().error);
    errors
  }

  /// Wait until any constituent changes, then return the new summary.
  pub async fn changed(&mut self) -> DashboardStats {
    loop {
      match self.events.recv().await {
        Ok(key) if self.watches(&key) => return self.stats(),
        Ok(_) => continue,
        Err(RecvError::Lagged(skipped)) => {
          debug!(skipped, "dashboard lagged behind cache events");
          return self.stats();
        }
        Err(RecvError::Closed) => return self.stats(),
      }
    }
  }

  /// Wait until no constituent is fetching.
  pub async fn settled(&mut self) -> DashboardStats {
    while self.is_fetching() {
      self.changed().await;
    }
    self.stats()
  }

  fn watches(&self, key: &QueryKey) -> bool {
    key == self.quote_stats.key()
      || key == self.sentiment_stats.key()
      || key == self.system_health.key()
      || key == self.quote_files.key()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::QuoteFile;
  use crate::query::{KeyFilter, QueryOptions};
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU64, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  fn stats(total: u64) -> QuoteStats {
    QuoteStats {
      total_quotes: total,
      languages: 4,
      authors: 120,
      categories: 7,
    }
  }

  fn health(status: &str) -> SystemHealth {
    SystemHealth {
      status: status.to_string(),
      cpu_usage: 12.5,
      ..SystemHealth::default()
    }
  }

  #[test]
  fn test_missing_constituents_use_defaults() {
    let empty = DashboardStats::default();
    assert_eq!(empty.total_quotes, 0);
    assert_eq!(empty.total_files, 0);
    assert_eq!(empty.system_status, "unknown");

    let partial = DashboardStats::from_parts(Some(&stats(500)), None, None, None);
    assert_eq!(partial.total_quotes, 500);
    assert_eq!(partial.authors, 120);
    assert_eq!(partial.sentiment_analyzed, 0);
    assert_eq!(partial.system_status, "unknown");
  }

  #[test]
  fn test_empty_status_reads_as_unknown() {
    let summary = DashboardStats::from_parts(None, None, Some(&health("")), None);
    assert_eq!(summary.system_status, "unknown");
    assert_eq!(summary.cpu_usage, 12.5);
  }

  #[test]
  fn test_read_from_cache() {
    let client = QueryClient::default();
    client.set_query_data(&keys::quote_stats(), stats(10));
    client.set_query_data(
      &keys::quote_files(),
      FileList {
        files: vec![QuoteFile {
          filename: "quotes_en.txt".to_string(),
          path: "/data/quotes_en.txt".to_string(),
          size: 2048,
          modified: "2024-01-01T00:00:00".to_string(),
          lines: 10,
        }],
      },
    );

    let summary = DashboardStats::read(&client);
    assert_eq!(summary.total_quotes, 10);
    assert_eq!(summary.total_files, 1);
    assert_eq!(summary.system_status, "unknown");
  }

  fn fake_queries(total: Arc<AtomicU64>) -> DashboardQueries {
    DashboardQueries {
      quote_stats: QueryDef::new(keys::quote_stats(), move || {
        let total = total.clone();
        async move {
          tokio::time::sleep(Duration::from_millis(10)).await;
          Ok(stats(total.load(Ordering::SeqCst)))
        }
      }),
      sentiment_stats: QueryDef::new(keys::sentiment_stats(), || async {
        Err(eyre!("503 Service Unavailable"))
      })
      .with_options(QueryOptions::default().no_retry()),
      system_health: QueryDef::new(keys::system_health(), || async { Ok(health("healthy")) }),
      quote_files: QueryDef::new(keys::quote_files(), || async { Ok(FileList::default()) }),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_watcher_degrades_failed_constituent() {
    let client = QueryClient::default();
    let total = Arc::new(AtomicU64::new(100));
    let mut watcher = DashboardWatcher::new(&client, fake_queries(total));

    let summary = watcher.settled().await;
    assert_eq!(summary.total_quotes, 100);
    assert_eq!(summary.sentiment_analyzed, 0);
    assert_eq!(summary.system_status, "healthy");

    let errors = watcher.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, keys::sentiment_stats());
  }

  #[tokio::test(start_paused = true)]
  async fn test_watcher_recomputes_when_a_constituent_changes() {
    let client = QueryClient::default();
    let total = Arc::new(AtomicU64::new(100));
    let mut watcher = DashboardWatcher::new(&client, fake_queries(total.clone()));
    watcher.settled().await;

    total.store(101, Ordering::SeqCst);
    client.invalidate_queries(&KeyFilter::from(keys::QUOTE_STATS));

    let summary = watcher.settled().await;
    assert_eq!(summary.total_quotes, 101);
  }
}
