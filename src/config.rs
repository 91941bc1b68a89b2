use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::query::{QueryClientConfig, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub queries: QueriesConfig,
  #[serde(default)]
  pub worker: WorkerConfig,
  /// Accept `admin`/`admin` locally when the backend rejects a login.
  /// Development only; never enable against a real deployment.
  #[serde(default)]
  pub dev_mock_auth: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the backend API, e.g. `http://localhost:8000/api`
  pub url: String,
  /// Default login name
  pub username: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueriesConfig {
  pub retries: u32,
  pub retry_base_ms: u64,
  pub retry_max_ms: u64,
  pub stale_time_ms: u64,
}

impl Default for QueriesConfig {
  fn default() -> Self {
    let retry = RetryPolicy::default();
    Self {
      retries: retry.max_retries,
      retry_base_ms: retry.base_delay.as_millis() as u64,
      retry_max_ms: retry.max_delay.as_millis() as u64,
      stale_time_ms: 0,
    }
  }
}

impl QueriesConfig {
  pub fn client_config(&self) -> QueryClientConfig {
    QueryClientConfig {
      retry: RetryPolicy {
        max_retries: self.retries,
        base_delay: Duration::from_millis(self.retry_base_ms),
        max_delay: Duration::from_millis(self.retry_max_ms),
      },
      stale_time: Duration::from_millis(self.stale_time_ms),
    }
  }
}

/// Offline worker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Cache store names are `<cache_prefix>-<version>`
  pub cache_prefix: String,
  pub version: String,
  /// Origin the worker serves, e.g. `http://localhost:3000/`
  pub scope: String,
  /// Resources primed at install, absolute or relative to `scope`
  pub precache: Vec<String>,
  /// Third-party hosts intercepted besides the scope origin
  pub allowed_hosts: Vec<String>,
  pub offline_url: String,
  pub sync_tags: Vec<String>,
  /// Icon shown with push notifications
  pub notification_icon: String,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      cache_prefix: "daily-quote".to_string(),
      version: "v1".to_string(),
      scope: "http://localhost:3000/".to_string(),
      precache: [
        "/",
        "/index.html",
        "/daily_quote.png",
        "https://cdnjs.cloudflare.com/ajax/libs/tailwindcss/2.2.19/tailwind.min.css",
        "https://cdnjs.cloudflare.com/ajax/libs/html2canvas/1.3.2/html2canvas.min.js",
        "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600&family=Playfair+Display:wght@400;500;600;700&display=swap",
        "https://flagicons.lipis.dev/flags/4x3/us.svg",
        "https://flagicons.lipis.dev/flags/4x3/es.svg",
        "https://flagicons.lipis.dev/flags/4x3/br.svg",
        "https://flagicons.lipis.dev/flags/4x3/it.svg",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      allowed_hosts: vec![
        "cdnjs.cloudflare.com".to_string(),
        "fonts.googleapis.com".to_string(),
        "flagicons.lipis.dev".to_string(),
      ],
      offline_url: "/offline.html".to_string(),
      sync_tags: vec!["quote-sync".to_string()],
      notification_icon: "/daily_quote.png".to_string(),
    }
  }
}

impl WorkerConfig {
  pub fn cache_name(&self) -> String {
    format!("{}-{}", self.cache_prefix, self.version)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./dq-admin.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/dq-admin/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/dq-admin/config.yaml\n\
                 with at least:\n  api:\n    url: http://localhost:8000/api"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("dq-admin.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("dq-admin").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the login password from environment variables.
  ///
  /// Checks DQ_ADMIN_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("DQ_ADMIN_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set DQ_ADMIN_PASSWORD environment variable."))
  }

  /// A pre-issued API token, if provided through DQ_ADMIN_TOKEN.
  pub fn get_token() -> Option<String> {
    std::env::var("DQ_ADMIN_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }

  /// Directory for the session token, the offline cache database and logs.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("dq-admin"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("api:\n  url: http://localhost:8000/api\n").unwrap();

    assert_eq!(config.api.url, "http://localhost:8000/api");
    assert_eq!(config.api.timeout_secs, 30);
    assert!(!config.dev_mock_auth);
    assert_eq!(config.worker.cache_name(), "daily-quote-v1");
    assert_eq!(config.worker.offline_url, "/offline.html");
    assert_eq!(config.worker.precache.len(), 10);

    let client = config.queries.client_config();
    assert_eq!(client.retry, RetryPolicy::default());
    assert_eq!(client.stale_time, Duration::ZERO);
  }

  #[test]
  fn test_overrides() {
    let yaml = r#"
api:
  url: https://quotes.example.com/api
  username: editor
dev_mock_auth: true
queries:
  retries: 0
worker:
  version: v2
  allowed_hosts: [cdn.example.com]
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.api.username.as_deref(), Some("editor"));
    assert!(config.dev_mock_auth);
    assert_eq!(config.queries.retries, 0);
    assert_eq!(config.queries.retry_base_ms, 1000);
    assert_eq!(config.worker.cache_name(), "daily-quote-v2");
    assert_eq!(config.worker.allowed_hosts, vec!["cdn.example.com"]);
    assert_eq!(config.worker.sync_tags, vec!["quote-sync"]);
  }

  #[test]
  fn test_missing_api_section_is_an_error() {
    assert!(Config::from_yaml("dev_mock_auth: true\n").is_err());
  }
}
