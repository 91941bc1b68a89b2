//! Every read and write of the admin dashboard, bound to one cache.

use std::path::PathBuf;
use std::time::Duration;

use crate::api::client::ApiClient;
use crate::api::types::{
  AnalysisRequest, BackupResult, FileContent, FileList, ImportResult, LoginResponse, NewQuote,
  ProcessStatus, Quote, QuoteList, QuoteListParams, QuotePatch, QuoteStats,
  SentimentDistribution, SentimentJob, SentimentStats, SystemHealth, SystemLogs, SystemMetrics,
  User,
};
use crate::query::{Mutation, QueryClient, QueryDef, QueryOptions};

use super::{keys, policy};

pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const PROCESSES_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const JOB_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub const DEFAULT_LOG_LEVEL: &str = "INFO";
pub const DEFAULT_LOG_LIMIT: u32 = 100;
pub const DEFAULT_METRICS_HOURS: u32 = 24;

/// Query definitions and mutations of the dashboard.
#[derive(Clone)]
pub struct AdminQueries {
  client: QueryClient,
  api: ApiClient,
}

impl AdminQueries {
  pub fn new(client: QueryClient, api: ApiClient) -> Self {
    Self { client, api }
  }

  pub fn client(&self) -> &QueryClient {
    &self.client
  }

  pub fn api(&self) -> &ApiClient {
    &self.api
  }

  // ==========================================================================
  // Queries
  // ==========================================================================

  /// The logged-in user. Never retried so an expired session shows at once.
  pub fn current_user(&self) -> QueryDef<User> {
    let api = self.api.clone();
    QueryDef::new(keys::current_user(), move || {
      let api = api.clone();
      async move { api.current_user().await }
    })
    .with_options(QueryOptions::default().no_retry())
  }

  /// A page of quotes; the previous page stays visible while the next loads.
  pub fn quotes(&self, params: QuoteListParams) -> QueryDef<QuoteList> {
    let api = self.api.clone();
    let key = keys::quotes(&params);
    QueryDef::new(key, move || {
      let api = api.clone();
      let params = params.clone();
      async move { api.list_quotes(&params).await }
    })
    .with_options(QueryOptions::default().keep_previous_data())
  }

  /// A single quote; id 0 means "none selected".
  pub fn quote(&self, id: i64) -> QueryDef<Quote> {
    let api = self.api.clone();
    QueryDef::new(keys::quote(id), move || {
      let api = api.clone();
      async move { api.get_quote(id).await }
    })
    .with_options(QueryOptions::default().enabled(id != 0))
  }

  pub fn quote_stats(&self) -> QueryDef<QuoteStats> {
    let api = self.api.clone();
    QueryDef::new(keys::quote_stats(), move || {
      let api = api.clone();
      async move { api.quote_stats().await }
    })
  }

  pub fn quote_files(&self) -> QueryDef<FileList> {
    let api = self.api.clone();
    QueryDef::new(keys::quote_files(), move || {
      let api = api.clone();
      async move { api.list_files().await }
    })
  }

  pub fn file_content(&self, filename: &str) -> QueryDef<FileContent> {
    let api = self.api.clone();
    let name = filename.to_string();
    QueryDef::new(keys::file_content(filename), move || {
      let api = api.clone();
      let name = name.clone();
      async move { api.file_content(&name).await }
    })
    .with_options(QueryOptions::default().enabled(!filename.is_empty()))
  }

  pub fn sentiment_stats(&self) -> QueryDef<SentimentStats> {
    let api = self.api.clone();
    QueryDef::new(keys::sentiment_stats(), move || {
      let api = api.clone();
      async move { api.sentiment_stats().await }
    })
  }

  pub fn sentiment_distribution(
    &self,
    language: Option<String>,
    author: Option<String>,
  ) -> QueryDef<SentimentDistribution> {
    let api = self.api.clone();
    let key = keys::sentiment_distribution(language.as_deref(), author.as_deref());
    QueryDef::new(key, move || {
      let api = api.clone();
      let language = language.clone();
      let author = author.clone();
      async move {
        api
          .sentiment_distribution(language.as_deref(), author.as_deref())
          .await
      }
    })
  }

  /// Progress of an analysis job, polled every 2s while observed.
  pub fn sentiment_job(&self, job_id: &str) -> QueryDef<SentimentJob> {
    let api = self.api.clone();
    let id = job_id.to_string();
    QueryDef::new(keys::sentiment_job(job_id), move || {
      let api = api.clone();
      let id = id.clone();
      async move { api.job_status(&id).await }
    })
    .with_options(
      QueryOptions::default()
        .enabled(!job_id.is_empty())
        .refetch_interval(JOB_POLL_INTERVAL),
    )
  }

  pub fn system_health(&self) -> QueryDef<SystemHealth> {
    let api = self.api.clone();
    QueryDef::new(keys::system_health(), move || {
      let api = api.clone();
      async move { api.system_health().await }
    })
    .with_options(QueryOptions::default().refetch_interval(HEALTH_POLL_INTERVAL))
  }

  pub fn system_processes(&self) -> QueryDef<Vec<ProcessStatus>> {
    let api = self.api.clone();
    QueryDef::new(keys::system_processes(), move || {
      let api = api.clone();
      async move { api.system_processes().await }
    })
    .with_options(QueryOptions::default().refetch_interval(PROCESSES_POLL_INTERVAL))
  }

  pub fn system_logs(&self, level: &str, limit: u32) -> QueryDef<SystemLogs> {
    let api = self.api.clone();
    let level_owned = level.to_string();
    QueryDef::new(keys::system_logs(level, limit), move || {
      let api = api.clone();
      let level = level_owned.clone();
      async move { api.system_logs(&level, limit).await }
    })
  }

  pub fn system_metrics(&self, hours: u32) -> QueryDef<SystemMetrics> {
    let api = self.api.clone();
    QueryDef::new(keys::system_metrics(hours), move || {
      let api = api.clone();
      async move { api.system_metrics(hours).await }
    })
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  /// Log in with `(username, password)`; the token is installed before the
  /// cache effects run.
  pub fn login(&self) -> Mutation<(String, String), LoginResponse> {
    let api = self.api.clone();
    Mutation::new(&self.client, "login", move |(username, password): (String, String)| {
      let api = api.clone();
      async move {
        let response = api.login(&username, &password).await?;
        api.set_token(response.access_token.clone());
        Ok(response)
      }
    })
    .on_success(|response: &LoginResponse| policy::login(&response.user))
  }

  pub fn create_quote(&self) -> Mutation<NewQuote, Quote> {
    let api = self.api.clone();
    Mutation::new(&self.client, "create quote", move |quote: NewQuote| {
      let api = api.clone();
      async move { api.create_quote(&quote).await }
    })
    .on_success(|_| policy::create_quote())
  }

  pub fn update_quote(&self) -> Mutation<(i64, QuotePatch), Quote> {
    let api = self.api.clone();
    Mutation::new(&self.client, "update quote", move |(id, patch): (i64, QuotePatch)| {
      let api = api.clone();
      async move { api.update_quote(id, &patch).await }
    })
    .on_success(policy::update_quote)
  }

  pub fn delete_quote(&self) -> Mutation<i64, ()> {
    let api = self.api.clone();
    Mutation::new(&self.client, "delete quote", move |id: i64| {
      let api = api.clone();
      async move { api.delete_quote(id).await }
    })
    .on_success(|_| policy::delete_quote())
  }

  /// Import a quotes file as `(path, language)`.
  pub fn import_quotes(&self) -> Mutation<(PathBuf, String), ImportResult> {
    let api = self.api.clone();
    Mutation::new(
      &self.client,
      "import quotes",
      move |(path, language): (PathBuf, String)| {
        let api = api.clone();
        async move { api.import_quotes(&path, &language).await }
      },
    )
    .on_success(|_| policy::import_quotes())
  }

  pub fn backup_file(&self) -> Mutation<String, BackupResult> {
    let api = self.api.clone();
    Mutation::new(&self.client, "backup file", move |filename: String| {
      let api = api.clone();
      async move { api.backup_file(&filename).await }
    })
    .on_success(|_| policy::backup_file())
  }

  pub fn start_analysis(&self) -> Mutation<AnalysisRequest, SentimentJob> {
    let api = self.api.clone();
    Mutation::new(&self.client, "start sentiment analysis", move |request: AnalysisRequest| {
      let api = api.clone();
      async move { api.start_analysis(&request).await }
    })
    .on_success(|_| policy::start_analysis())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ApiConfig;
  use crate::query::{QueryStatus, RetryPolicy};

  /// Queries under test never reach this address.
  fn queries() -> AdminQueries {
    let api = ApiClient::new(&ApiConfig {
      url: "http://127.0.0.1:9/api".to_string(),
      username: None,
      timeout_secs: 1,
    })
    .unwrap();
    AdminQueries::new(QueryClient::default(), api)
  }

  #[test]
  fn test_query_options() {
    let q = queries();

    assert_eq!(q.current_user().options.retry, Some(RetryPolicy::never()));
    assert!(q.quotes(QuoteListParams::page(1, 50)).options.placeholder_data);
    assert_eq!(
      q.system_health().options.refetch_interval,
      Some(Duration::from_secs(30))
    );
    assert_eq!(
      q.system_processes().options.refetch_interval,
      Some(Duration::from_secs(60))
    );

    let job = q.sentiment_job("job-1");
    assert!(job.options.enabled);
    assert_eq!(job.options.refetch_interval, Some(Duration::from_secs(2)));
    assert_eq!(job.key, keys::sentiment_job("job-1"));
  }

  #[test]
  fn test_queries_gated_on_missing_parameter() {
    let q = queries();
    assert!(!q.quote(0).options.enabled);
    assert!(q.quote(3).options.enabled);
    assert!(!q.file_content("").options.enabled);
    assert!(q.file_content("quotes_en.txt").options.enabled);
    assert!(!q.sentiment_job("").options.enabled);
  }

  #[tokio::test]
  async fn test_disabled_query_never_fetches() {
    let q = queries();
    let state = q.client().query(&q.quote(0)).await;
    assert_eq!(state.status, QueryStatus::Idle);
    assert!(!state.is_fetching);
    assert_eq!(q.client().fetching_count(), 0);
  }

  #[test]
  fn test_default_parameters() {
    let q = queries();
    assert_eq!(
      q.system_logs(DEFAULT_LOG_LEVEL, DEFAULT_LOG_LIMIT).key.to_string(),
      r#"system-logs{level="INFO",limit=100}"#
    );
    assert_eq!(
      q.system_metrics(DEFAULT_METRICS_HOURS).key.to_string(),
      "system-metrics{hours=24}"
    );
  }

  #[test]
  fn test_mutation_names() {
    let q = queries();
    assert_eq!(q.login().name(), "login");
    assert_eq!(q.create_quote().name(), "create quote");
    assert_eq!(q.update_quote().name(), "update quote");
    assert_eq!(q.delete_quote().name(), "delete quote");
    assert_eq!(q.import_quotes().name(), "import quotes");
    assert_eq!(q.backup_file().name(), "backup file");
    assert_eq!(q.start_analysis().name(), "start sentiment analysis");
  }
}
