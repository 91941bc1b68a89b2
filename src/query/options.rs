//! Per-query and per-client options.

use std::time::Duration;

/// Automatic retry of failed fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl RetryPolicy {
  pub const fn never() -> Self {
    Self {
      max_retries: 0,
      base_delay: Duration::ZERO,
      max_delay: Duration::ZERO,
    }
  }

  /// Exponential backoff: `min(base * 2^attempt, max)`.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    self
      .base_delay
      .checked_mul(factor)
      .unwrap_or(self.max_delay)
      .min(self.max_delay)
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
    }
  }
}

/// Client-wide defaults.
#[derive(Debug, Clone)]
pub struct QueryClientConfig {
  pub retry: RetryPolicy,
  /// How long a successful value counts as fresh
  pub stale_time: Duration,
}

impl Default for QueryClientConfig {
  fn default() -> Self {
    Self {
      retry: RetryPolicy::default(),
      stale_time: Duration::ZERO,
    }
  }
}

/// Options recognized by a query.
#[derive(Debug, Clone)]
pub struct QueryOptions {
  /// When false no fetch is attempted, whatever the entry's staleness
  pub enabled: bool,
  /// `None` uses the client default
  pub retry: Option<RetryPolicy>,
  /// Fixed refetch period while at least one observer is mounted
  pub refetch_interval: Option<Duration>,
  /// Keep showing the previous key's value while a new key loads
  pub placeholder_data: bool,
  /// `None` uses the client default
  pub stale_time: Option<Duration>,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      enabled: true,
      retry: None,
      refetch_interval: None,
      placeholder_data: false,
      stale_time: None,
    }
  }
}

impl QueryOptions {
  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn no_retry(mut self) -> Self {
    self.retry = Some(RetryPolicy::never());
    self
  }

  pub fn retry(mut self, policy: RetryPolicy) -> Self {
    self.retry = Some(policy);
    self
  }

  pub fn refetch_interval(mut self, period: Duration) -> Self {
    self.refetch_interval = Some(period);
    self
  }

  pub fn keep_previous_data(mut self) -> Self {
    self.placeholder_data = true;
    self
  }

  pub fn stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_doubles_and_caps() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_for(0), Duration::from_secs(1));
    assert_eq!(policy.delay_for(1), Duration::from_secs(2));
    assert_eq!(policy.delay_for(4), Duration::from_secs(16));
    assert_eq!(policy.delay_for(5), Duration::from_secs(30));
    assert_eq!(policy.delay_for(40), Duration::from_secs(30));
  }

  #[test]
  fn test_builder() {
    let options = QueryOptions::default()
      .no_retry()
      .refetch_interval(Duration::from_secs(2))
      .keep_previous_data();
    assert!(options.enabled);
    assert_eq!(options.retry, Some(RetryPolicy::never()));
    assert_eq!(options.refetch_interval, Some(Duration::from_secs(2)));
    assert!(options.placeholder_data);
  }
}
