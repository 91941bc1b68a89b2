use color_eyre::{eyre::eyre, Result};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiConfig;

use super::types::{
  ApiLoginResponse, ApiQuotesResponse, AnalysisRequest, BackupResult, FileContent, FileList,
  ImportResult, LoginResponse, NewQuote, ProcessStatus, Quote, QuoteList, QuoteListParams,
  QuotePatch, QuoteStats, SentimentDistribution, SentimentJob, SentimentStats, SystemHealth,
  SystemLogs, SystemMetrics, User,
};

/// Token stored by a development login; never sent to the backend.
pub const DEV_TOKEN: &str = "mock_token";

/// HTTP client for the Daily Quote backend.
///
/// Carries the session's bearer token. A 401 from any endpoint drops it.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: base_url(&config.url)?,
      token: Arc::new(RwLock::new(None)),
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  pub fn token(&self) -> Option<String> {
    self
      .token
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn set_token(&self, token: impl Into<String>) {
    *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
  }

  pub fn clear_token(&self) {
    *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
  }

  fn url(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Invalid API path {}: {}", path, e))
  }

  /// Attach the bearer token unless none is set or it is the dev placeholder.
  fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
    match self.token() {
      Some(token) if token != DEV_TOKEN => request.bearer_auth(token),
      _ => request,
    }
  }

  async fn send(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response> {
    let response = self
      .authorize(request)
      .send()
      .await
      .map_err(|e| eyre!("Failed to {}: {}", what, e))?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
      warn!("backend answered 401, dropping session token");
      self.clear_token();
    }
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(eyre!("Failed to {}: {} {}", what, status, body.trim()));
    }

    debug!(%status, "{}", what);
    Ok(response)
  }

  async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
    self
      .send(request, what)
      .await?
      .json::<T>()
      .await
      .map_err(|e| eyre!("Failed to parse response to {}: {}", what, e))
  }

  async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
    let request = self.http.get(self.url(path)?);
    self.send_json(request, what).await
  }

  // ==========================================================================
  // Auth
  // ==========================================================================

  /// Log in with form-encoded credentials.
  pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
    let request = self
      .http
      .post(self.url("auth/login")?)
      .form(&[("username", username), ("password", password)]);

    let response: ApiLoginResponse = self.send_json(request, "log in").await?;
    Ok(response.into())
  }

  pub async fn current_user(&self) -> Result<User> {
    self.get("auth/me", "get current user").await
  }

  pub async fn logout(&self) -> Result<()> {
    let request = self.http.post(self.url("auth/logout")?);
    self.send(request, "log out").await?;
    Ok(())
  }

  // ==========================================================================
  // Quotes
  // ==========================================================================

  pub async fn list_quotes(&self, params: &QuoteListParams) -> Result<QuoteList> {
    let request = self.http.get(self.url("quotes/")?).query(params);
    let response: ApiQuotesResponse = self.send_json(request, "list quotes").await?;
    Ok(response.into())
  }

  pub async fn get_quote(&self, id: i64) -> Result<Quote> {
    self
      .get(&format!("quotes/{}", id), &format!("get quote {}", id))
      .await
  }

  pub async fn create_quote(&self, quote: &NewQuote) -> Result<Quote> {
    let request = self.http.post(self.url("quotes")?).json(quote);
    self.send_json(request, "create quote").await
  }

  pub async fn update_quote(&self, id: i64, patch: &QuotePatch) -> Result<Quote> {
    let request = self
      .http
      .put(self.url(&format!("quotes/{}", id))?)
      .json(patch);
    self
      .send_json(request, &format!("update quote {}", id))
      .await
  }

  pub async fn delete_quote(&self, id: i64) -> Result<()> {
    let request = self.http.delete(self.url(&format!("quotes/{}", id))?);
    self.send(request, &format!("delete quote {}", id)).await?;
    Ok(())
  }

  pub async fn quote_stats(&self) -> Result<QuoteStats> {
    self.get("quotes/stats", "get quote stats").await
  }

  /// Upload a quotes file for import.
  pub async fn import_quotes(&self, path: &Path, language: &str) -> Result<ImportResult> {
    let bytes = tokio::fs::read(path)
      .await
      .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
    let file_name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "quotes.txt".to_string());

    let form = reqwest::multipart::Form::new()
      .part(
        "file",
        reqwest::multipart::Part::bytes(bytes).file_name(file_name),
      )
      .text("language", language.to_string());

    let request = self.http.post(self.url("quotes/import")?).multipart(form);
    self.send_json(request, "import quotes").await
  }

  // ==========================================================================
  // Files
  // ==========================================================================

  pub async fn list_files(&self) -> Result<FileList> {
    self.get("files", "list quote files").await
  }

  pub async fn file_content(&self, filename: &str) -> Result<FileContent> {
    self
      .get(&format!("files/{}", filename), &format!("read file {}", filename))
      .await
  }

  pub async fn backup_file(&self, filename: &str) -> Result<BackupResult> {
    let request = self
      .http
      .post(self.url(&format!("files/{}/backup", filename))?);
    self
      .send_json(request, &format!("back up file {}", filename))
      .await
  }

  // ==========================================================================
  // Sentiment
  // ==========================================================================

  pub async fn sentiment_stats(&self) -> Result<SentimentStats> {
    self.get("sentiment/stats", "get sentiment stats").await
  }

  pub async fn start_analysis(&self, request: &AnalysisRequest) -> Result<SentimentJob> {
    let force = if request.force_reanalyze { "true" } else { "false" };
    let http_request = self.http.post(self.url("sentiment/analyze")?).query(&[
      ("language", request.language.as_str()),
      ("force_reanalyze", force),
    ]);
    self
      .send_json(http_request, "start sentiment analysis")
      .await
  }

  pub async fn job_status(&self, job_id: &str) -> Result<SentimentJob> {
    self
      .get(
        &format!("sentiment/jobs/{}", job_id),
        &format!("get job {}", job_id),
      )
      .await
  }

  pub async fn sentiment_distribution(
    &self,
    language: Option<&str>,
    author: Option<&str>,
  ) -> Result<SentimentDistribution> {
    let mut query = Vec::new();
    if let Some(language) = language {
      query.push(("language", language));
    }
    if let Some(author) = author {
      query.push(("author", author));
    }
    let request = self
      .http
      .get(self.url("sentiment/distribution")?)
      .query(&query);
    self
      .send_json(request, "get sentiment distribution")
      .await
  }

  // ==========================================================================
  // System
  // ==========================================================================

  pub async fn system_health(&self) -> Result<SystemHealth> {
    self.get("system/health", "get system health").await
  }

  pub async fn system_processes(&self) -> Result<Vec<ProcessStatus>> {
    self.get("system/processes", "get system processes").await
  }

  pub async fn system_logs(&self, level: &str, limit: u32) -> Result<SystemLogs> {
    let request = self
      .http
      .get(self.url("system/logs")?)
      .query(&[("level", level.to_string()), ("limit", limit.to_string())]);
    self.send_json(request, "get system logs").await
  }

  pub async fn system_metrics(&self, hours: u32) -> Result<SystemMetrics> {
    let request = self
      .http
      .get(self.url("system/metrics")?)
      .query(&[("hours", hours)]);
    self.send_json(request, "get system metrics").await
  }
}

/// Parse the configured base URL so relative endpoint paths join below it.
fn base_url(raw: &str) -> Result<Url> {
  let mut url = Url::parse(raw).map_err(|e| eyre!("Invalid API url {}: {}", raw, e))?;
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  Ok(url)
}
