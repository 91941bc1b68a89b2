//! Types exchanged with the Daily Quote backend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Admin,
  Editor,
  Viewer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: i64,
  pub username: String,
  pub email: String,
  pub role: Role,
  pub is_active: bool,
  pub created_at: String,
  #[serde(default)]
  pub last_login: Option<String>,
}

/// Login result with the token flattened out of the backend's `token` object.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginResponse {
  pub access_token: String,
  pub user: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
  pub id: i64,
  pub text: String,
  pub author: String,
  pub language: String,
  #[serde(default)]
  pub category: Option<String>,
  pub created_at: String,
  pub updated_at: String,
}

/// Fields of a quote to be created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewQuote {
  pub text: String,
  pub author: String,
  pub language: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
}

/// Partial update of a quote; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuotePatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub text: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub author: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub language: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
}

/// Filters and paging of the quotes list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuoteListParams {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub skip: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub limit: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub search: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub language: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
}

impl QuoteListParams {
  /// Parameters for a 1-based page of `limit` quotes.
  pub fn page(page: u32, limit: u32) -> Self {
    Self {
      skip: Some(page.saturating_sub(1).saturating_mul(limit)),
      limit: Some(limit),
      ..Self::default()
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteList {
  pub quotes: Vec<Quote>,
  pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteStats {
  #[serde(default)]
  pub total_quotes: u64,
  #[serde(default)]
  pub languages: u64,
  #[serde(default)]
  pub authors: u64,
  #[serde(default)]
  pub categories: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
  pub imported: u64,
  pub duplicates: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteFile {
  pub filename: String,
  pub path: String,
  pub size: u64,
  pub modified: String,
  pub lines: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileList {
  #[serde(default)]
  pub files: Vec<QuoteFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContent {
  pub filename: String,
  pub quote_count: u64,
  pub quotes: Vec<String>,
  pub total_lines: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupResult {
  pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentShare {
  pub positive: f64,
  pub negative: f64,
  pub neutral: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentStats {
  #[serde(default)]
  pub total_analyzed: u64,
  #[serde(default)]
  pub positive_count: u64,
  #[serde(default)]
  pub negative_count: u64,
  #[serde(default)]
  pub neutral_count: u64,
  #[serde(default)]
  pub average_compound: f64,
  #[serde(default)]
  pub distribution: SentimentShare,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentDistribution {
  pub distribution: BTreeMap<String, f64>,
  pub total: u64,
  pub counts: BTreeMap<String, u64>,
}

/// Background sentiment analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentJob {
  pub job_id: String,
  pub status: String,
  pub progress: f64,
  pub message: String,
}

impl SentimentJob {
  pub fn is_finished(&self) -> bool {
    matches!(self.status.as_str(), "completed" | "failed")
  }
}

/// Start request for a sentiment analysis job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
  pub language: String,
  pub force_reanalyze: bool,
}

impl Default for AnalysisRequest {
  fn default() -> Self {
    Self {
      language: "en".to_string(),
      force_reanalyze: false,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
  #[serde(default)]
  pub status: String,
  #[serde(default)]
  pub uptime: String,
  #[serde(default)]
  pub cpu_usage: f64,
  #[serde(default)]
  pub memory_usage: f64,
  #[serde(default)]
  pub disk_usage: f64,
  #[serde(default)]
  pub database_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
  pub name: String,
  pub status: String,
  pub last_run: String,
  pub next_run: String,
  pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
  pub timestamp: String,
  pub level: String,
  pub message: String,
  pub module: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemLogs {
  pub logs: Vec<LogEntry>,
  pub total: u64,
  pub level_filter: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
  pub timestamp: String,
  pub cpu_usage: f64,
  pub memory_usage: f64,
  pub disk_usage: f64,
  pub api_requests: u64,
  pub response_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
  pub start: String,
  pub end: String,
  pub hours: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
  pub metrics: Vec<MetricSample>,
  pub summary: BTreeMap<String, f64>,
  pub time_range: TimeRange,
}

// ============================================================================
// Raw response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct ApiToken {
  pub access_token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiLoginResponse {
  pub user: User,
  pub token: ApiToken,
}

impl From<ApiLoginResponse> for LoginResponse {
  fn from(response: ApiLoginResponse) -> Self {
    Self {
      access_token: response.token.access_token,
      user: response.user,
    }
  }
}

/// The quotes endpoint answers either with a bare array or a wrapped object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ApiQuotesResponse {
  List(Vec<Quote>),
  Wrapped {
    #[serde(default)]
    quotes: Vec<Quote>,
  },
}

impl From<ApiQuotesResponse> for QuoteList {
  fn from(response: ApiQuotesResponse) -> Self {
    let quotes = match response {
      ApiQuotesResponse::List(quotes) => quotes,
      ApiQuotesResponse::Wrapped { quotes } => quotes,
    };
    Self {
      total: quotes.len(),
      quotes,
    }
  }
}
