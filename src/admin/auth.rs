//! Login session: token handling around the `current-user` query.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::client::DEV_TOKEN;
use crate::api::types::{Role, User};

use super::hooks::AdminQueries;
use super::keys;

const MOCK_USERNAME: &str = "admin";
const MOCK_PASSWORD: &str = "admin";

/// An authenticated (or not yet authenticated) session.
///
/// The token lives in the API client and is persisted to `token_path` so the
/// next run can resume.
pub struct Session {
  queries: AdminQueries,
  token_path: PathBuf,
  dev_mock_auth: bool,
}

impl Session {
  pub fn new(queries: AdminQueries, token_path: impl Into<PathBuf>, dev_mock_auth: bool) -> Self {
    Self {
      queries,
      token_path: token_path.into(),
      dev_mock_auth,
    }
  }

  pub fn queries(&self) -> &AdminQueries {
    &self.queries
  }

  /// Install a token from `token` or the token file. Returns whether one was found.
  pub fn restore(&self, token: Option<String>) -> Result<bool> {
    let token = match token {
      Some(token) => Some(token),
      None => read_token(&self.token_path)?,
    };

    match token {
      Some(token) => {
        self.queries.api().set_token(token);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  pub fn is_authenticated(&self) -> bool {
    self.queries.api().token().is_some()
  }

  /// Log in and persist the token.
  ///
  /// With `dev_mock_auth` enabled, a rejected `admin`/`admin` login falls back
  /// to a local mock user.
  pub async fn login(&self, username: &str, password: &str) -> Result<User> {
    let result = self
      .queries
      .login()
      .mutate((username.to_string(), password.to_string()))
      .await;

    match result {
      Ok(response) => {
        write_token(&self.token_path, &response.access_token)?;
        info!(user = %response.user.username, "logged in");
        Ok(response.user)
      }
      Err(e) if self.dev_mock_auth && username == MOCK_USERNAME && password == MOCK_PASSWORD => {
        warn!("login failed ({:#}), using development mock user", e);
        let user = mock_user();
        self.queries.api().set_token(DEV_TOKEN);
        write_token(&self.token_path, DEV_TOKEN)?;
        self
          .queries
          .client()
          .set_query_data(&keys::current_user(), user.clone());
        Ok(user)
      }
      Err(e) => Err(e),
    }
  }

  /// The logged-in user. A failed check drops the session token.
  pub async fn current_user(&self) -> Result<Arc<User>> {
    match self.queries.api().token() {
      None => return Err(eyre!("Not logged in. Run `dq-admin login` first.")),
      Some(token) if token == DEV_TOKEN => {
        let cached = self
          .queries
          .client()
          .get_query_data::<User>(&keys::current_user());
        return Ok(cached.unwrap_or_else(|| Arc::new(mock_user())));
      }
      Some(_) => {}
    }

    let result = self
      .queries
      .client()
      .fetch_query(&self.queries.current_user())
      .await;

    if result.is_err() {
      warn!("session check failed, dropping token");
      self.queries.api().clear_token();
      remove_token(&self.token_path)?;
    }
    result
  }

  /// End the session: tell the backend, forget the token, clear the cache.
  pub async fn logout(&self) -> Result<()> {
    let api = self.queries.api();
    if matches!(api.token(), Some(token) if token != DEV_TOKEN) {
      if let Err(e) = api.logout().await {
        warn!("backend logout failed: {:#}", e);
      }
    }

    api.clear_token();
    remove_token(&self.token_path)?;
    self.queries.client().clear();
    info!("logged out");
    Ok(())
  }
}

fn mock_user() -> User {
  User {
    id: 1,
    username: MOCK_USERNAME.to_string(),
    email: "admin@example.com".to_string(),
    role: Role::Admin,
    is_active: true,
    created_at: Utc::now().to_rfc3339(),
    last_login: None,
  }
}

fn read_token(path: &Path) -> Result<Option<String>> {
  if !path.exists() {
    return Ok(None);
  }
  let token = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read token file {}: {}", path.display(), e))?;
  let token = token.trim();
  Ok((!token.is_empty()).then(|| token.to_string()))
}

fn write_token(path: &Path, token: &str) -> Result<()> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)
      .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
  }
  std::fs::write(path, token)
    .map_err(|e| eyre!("Failed to write token file {}: {}", path.display(), e))
}

fn remove_token(path: &Path) -> Result<()> {
  match std::fs::remove_file(path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(eyre!("Failed to remove token file {}: {}", path.display(), e)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::client::tests::unauthorized_backend;
  use crate::api::client::ApiClient;
  use crate::config::ApiConfig;
  use crate::query::QueryClient;

  fn token_path(name: &str) -> PathBuf {
    std::env::temp_dir()
      .join(format!("dq-admin-test-{}", std::process::id()))
      .join(name)
  }

  /// Session against a backend that refuses connections.
  fn new_session(name: &str, dev_mock_auth: bool) -> Session {
    let api = ApiClient::new(&ApiConfig {
      url: "http://127.0.0.1:9/api".to_string(),
      username: None,
      timeout_secs: 1,
    })
    .unwrap();
    let queries = AdminQueries::new(QueryClient::default(), api);
    Session::new(queries, token_path(name), dev_mock_auth)
  }

  #[tokio::test]
  async fn test_failed_login_without_mock_auth() {
    let session = new_session("no-mock", false);
    assert!(session.login("admin", "admin").await.is_err());
    assert!(!session.is_authenticated());
  }

  #[tokio::test]
  async fn test_mock_login_only_for_mock_credentials() {
    let session = new_session("mock", true);
    assert!(session.login("admin", "wrong").await.is_err());

    let user = session.login("admin", "admin").await.unwrap();
    assert_eq!(user.role, Role::Admin);
    assert_eq!(session.queries().api().token().as_deref(), Some(DEV_TOKEN));
    assert_eq!(session.current_user().await.unwrap().username, "admin");

    let restored = new_session("mock", true);
    assert!(restored.restore(None).unwrap());
    assert_eq!(restored.queries().api().token().as_deref(), Some(DEV_TOKEN));

    session.logout().await.unwrap();
  }

  #[tokio::test]
  async fn test_logout_clears_token_and_cache() {
    let session = new_session("logout", false);
    session.queries().api().set_token(DEV_TOKEN);
    write_token(&session.token_path, DEV_TOKEN).unwrap();
    session
      .queries()
      .client()
      .set_query_data(&keys::quote_stats(), 3u32);

    session.logout().await.unwrap();

    assert!(!session.is_authenticated());
    assert!(!session.token_path.exists());
    assert!(session
      .queries()
      .client()
      .get_query_data::<u32>(&keys::quote_stats())
      .is_none());
    assert!(session.current_user().await.is_err());
  }

  #[test]
  fn test_explicit_token_wins_over_file() {
    let session = new_session("explicit", false);
    assert!(session.restore(Some("env-token".to_string())).unwrap());
    assert_eq!(session.queries().api().token().as_deref(), Some("env-token"));
  }

  #[tokio::test]
  async fn test_rejected_session_check_drops_token_file() {
    let api = ApiClient::new(&ApiConfig {
      url: unauthorized_backend().await,
      username: None,
      timeout_secs: 5,
    })
    .unwrap();
    let session = Session::new(
      AdminQueries::new(QueryClient::default(), api),
      token_path("rejected"),
      false,
    );
    write_token(&session.token_path, "expired").unwrap();
    assert!(session.restore(None).unwrap());

    assert!(session.current_user().await.is_err());
    assert!(!session.is_authenticated());
    assert!(!session.token_path.exists());
  }
}
