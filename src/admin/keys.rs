//! Query keys of the admin dashboard.

use crate::api::types::QuoteListParams;
use crate::query::{Params, QueryKey, Resource};

pub const CURRENT_USER: Resource = Resource::new("current-user");
pub const QUOTES: Resource = Resource::new("quotes");
pub const QUOTE: Resource = Resource::new("quote");
pub const QUOTE_STATS: Resource = Resource::new("quote-stats");
pub const QUOTE_FILES: Resource = Resource::new("quote-files");
pub const FILE_CONTENT: Resource = Resource::new("file-content");
pub const SENTIMENT_STATS: Resource = Resource::new("sentiment-stats");
pub const SENTIMENT_DISTRIBUTION: Resource = Resource::new("sentiment-distribution");
pub const SENTIMENT_JOB: Resource = Resource::new("sentiment-job");
pub const SYSTEM_HEALTH: Resource = Resource::new("system-health");
pub const SYSTEM_PROCESSES: Resource = Resource::new("system-processes");
pub const SYSTEM_LOGS: Resource = Resource::new("system-logs");
pub const SYSTEM_METRICS: Resource = Resource::new("system-metrics");

pub fn current_user() -> QueryKey {
  QueryKey::resource_only(CURRENT_USER)
}

pub fn quotes(params: &QuoteListParams) -> QueryKey {
  QueryKey::new(
    QUOTES,
    Params::new()
      .with_opt("skip", params.skip)
      .with_opt("limit", params.limit)
      .with_opt("search", params.search.clone())
      .with_opt("language", params.language.clone())
      .with_opt("category", params.category.clone()),
  )
}

pub fn quote(id: i64) -> QueryKey {
  QueryKey::new(QUOTE, Params::new().with("id", id))
}

pub fn quote_stats() -> QueryKey {
  QueryKey::resource_only(QUOTE_STATS)
}

pub fn quote_files() -> QueryKey {
  QueryKey::resource_only(QUOTE_FILES)
}

pub fn file_content(filename: &str) -> QueryKey {
  QueryKey::new(FILE_CONTENT, Params::new().with("filename", filename))
}

pub fn sentiment_stats() -> QueryKey {
  QueryKey::resource_only(SENTIMENT_STATS)
}

pub fn sentiment_distribution(language: Option<&str>, author: Option<&str>) -> QueryKey {
  QueryKey::new(
    SENTIMENT_DISTRIBUTION,
    Params::new()
      .with_opt("language", language)
      .with_opt("author", author),
  )
}

pub fn sentiment_job(job_id: &str) -> QueryKey {
  QueryKey::new(SENTIMENT_JOB, Params::new().with("job_id", job_id))
}

pub fn system_health() -> QueryKey {
  QueryKey::resource_only(SYSTEM_HEALTH)
}

pub fn system_processes() -> QueryKey {
  QueryKey::resource_only(SYSTEM_PROCESSES)
}

pub fn system_logs(level: &str, limit: u32) -> QueryKey {
  QueryKey::new(
    SYSTEM_LOGS,
    Params::new().with("level", level).with("limit", limit),
  )
}

pub fn system_metrics(hours: u32) -> QueryKey {
  QueryKey::new(SYSTEM_METRICS, Params::new().with("hours", hours))
}
