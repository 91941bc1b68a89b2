//! Named cache stores of the offline worker, with in-memory and SQLite backends.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use url::Url;

use super::request::{FetchRequest, StoredResponse};

/// Summary of one stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
  pub url: String,
  pub status: u16,
  pub size: usize,
}

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores, each mapping a GET request
/// identity to a response snapshot. Every operation is atomic on its own;
/// two concurrent puts for the same request simply leave one of them.
pub trait CacheStorage: Send + Sync {
  /// Create a store if it does not exist yet.
  fn open(&self, store: &str) -> Result<()>;

  /// Names of all stores.
  fn keys(&self) -> Result<Vec<String>>;

  fn has(&self, store: &str) -> Result<bool> {
    Ok(self.keys()?.iter().any(|name| name == store))
  }

  /// Delete a store and everything in it. Returns whether it existed.
  fn delete(&self, store: &str) -> Result<bool>;

  /// Exact match of a request in one store.
  fn match_request(&self, store: &str, request: &FetchRequest) -> Result<Option<StoredResponse>>;

  /// Store one response. Non-GET requests and non-2xx responses are rejected.
  fn put(&self, store: &str, request: &FetchRequest, response: &StoredResponse) -> Result<()>;

  /// Store several responses, all or none.
  fn put_all(&self, store: &str, entries: &[(FetchRequest, StoredResponse)]) -> Result<()>;

  /// Entries of one store, ordered by URL.
  fn entries(&self, store: &str) -> Result<Vec<StoredEntry>>;
}

fn check_storable(request: &FetchRequest, response: &StoredResponse) -> Result<()> {
  if request.method != Method::GET {
    return Err(eyre!("Refusing to cache {}: only GET requests are cached", request));
  }
  if !response.is_ok() {
    return Err(eyre!(
      "Refusing to cache {}: status {} is not successful",
      request,
      response.status
    ));
  }
  Ok(())
}

// ============================================================================
// In-memory
// ============================================================================

type Store = BTreeMap<String, StoredResponse>;

/// Storage kept in process memory.
#[derive(Default)]
pub struct MemoryCacheStorage {
  stores: Mutex<BTreeMap<String, Store>>,
}

impl MemoryCacheStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn stores(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Store>>> {
    self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryCacheStorage {
  fn open(&self, store: &str) -> Result<()> {
    self.stores()?.entry(store.to_string()).or_default();
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.stores()?.keys().cloned().collect())
  }

  fn delete(&self, store: &str) -> Result<bool> {
    Ok(self.stores()?.remove(store).is_some())
  }

  fn match_request(&self, store: &str, request: &FetchRequest) -> Result<Option<StoredResponse>> {
    if request.method != Method::GET {
      return Ok(None);
    }
    Ok(
      self
        .stores()?
        .get(store)
        .and_then(|s| s.get(&request.request_hash()))
        .cloned(),
    )
  }

  fn put(&self, store: &str, request: &FetchRequest, response: &StoredResponse) -> Result<()> {
    check_storable(request, response)?;
    self
      .stores()?
      .entry(store.to_string())
      .or_default()
      .insert(request.request_hash(), response.clone());
    Ok(())
  }

  fn put_all(&self, store: &str, entries: &[(FetchRequest, StoredResponse)]) -> Result<()> {
    for (request, response) in entries {
      check_storable(request, response)?;
    }
    let mut stores = self.stores()?;
    let target = stores.entry(store.to_string()).or_default();
    for (request, response) in entries {
      target.insert(request.request_hash(), response.clone());
    }
    Ok(())
  }

  fn entries(&self, store: &str) -> Result<Vec<StoredEntry>> {
    let stores = self.stores()?;
    let mut entries: Vec<StoredEntry> = stores
      .get(store)
      .map(|s| {
        s.values()
          .map(|response| StoredEntry {
            url: response.url.to_string(),
            status: response.status,
            size: response.body.len(),
          })
          .collect()
      })
      .unwrap_or_default();
    entries.sort_by(|a, b| a.url.cmp(&b.url));
    Ok(entries)
  }
}

// ============================================================================
// SQLite
// ============================================================================

/// SQLite-based cache storage implementation.
pub struct SqliteCacheStorage {
  conn: Mutex<Connection>,
}

impl SqliteCacheStorage {
  /// Open (or create) the database at `path`.
  pub fn open_path(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cached_responses (
    store TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    response_type TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (store, request_hash)
);
"#;

fn insert_response(
  conn: &Connection,
  store: &str,
  request: &FetchRequest,
  response: &StoredResponse,
  stored_at: DateTime<Utc>,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
      params![store],
    )
    .map_err(|e| eyre!("Failed to create cache store {}: {}", store, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cached_responses
         (store, request_hash, url, status, response_type, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        store,
        request.request_hash(),
        response.url.as_str(),
        response.status,
        response.response_type.as_str(),
        headers,
        response.body,
        stored_at.to_rfc3339(),
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", request, e))?;

  Ok(())
}

impl CacheStorage for SqliteCacheStorage {
  fn open(&self, store: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![store],
      )
      .map_err(|e| eyre!("Failed to create cache store {}: {}", store, e))?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, store: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cached_responses WHERE store = ?", params![store])
      .map_err(|e| eyre!("Failed to delete cached responses: {}", e))?;
    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", store, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(removed > 0)
  }

  fn match_request(&self, store: &str, request: &FetchRequest) -> Result<Option<StoredResponse>> {
    if request.method != Method::GET {
      return Ok(None);
    }

    let conn = self.conn()?;
    let row = conn
      .query_row(
        "SELECT url, status, response_type, headers, body FROM cached_responses
         WHERE store = ? AND request_hash = ?",
        params![store, request.request_hash()],
        |row| {
          Ok((
            row.get::<_, String>(0)?,
            row.get::<_, u16>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Vec<u8>>(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", request, e))?;

    let Some((url, status, response_type, headers, body)) = row else {
      return Ok(None);
    };

    Ok(Some(StoredResponse {
      url: Url::parse(&url).map_err(|e| eyre!("Corrupt cached url {}: {}", url, e))?,
      status,
      response_type: response_type.parse()?,
      headers: serde_json::from_str(&headers)
        .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?,
      body,
    }))
  }

  fn put(&self, store: &str, request: &FetchRequest, response: &StoredResponse) -> Result<()> {
    check_storable(request, response)?;
    let conn = self.conn()?;
    insert_response(&conn, store, request, response, Utc::now())
  }

  fn put_all(&self, store: &str, entries: &[(FetchRequest, StoredResponse)]) -> Result<()> {
    for (request, response) in entries {
      check_storable(request, response)?;
    }

    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let stored_at = Utc::now();
    for (request, response) in entries {
      insert_response(&tx, store, request, response, stored_at)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn entries(&self, store: &str) -> Result<Vec<StoredEntry>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT url, status, length(body) FROM cached_responses
         WHERE store = ? ORDER BY url",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let entries = stmt
      .query_map(params![store], |row| {
        Ok(StoredEntry {
          url: row.get(0)?,
          status: row.get(1)?,
          size: row.get::<_, i64>(2)? as usize,
        })
      })
      .map_err(|e| eyre!("Failed to list cached responses: {}", e))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read cached response: {}", e))?;

    Ok(entries)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::worker::request::ResponseType;

  fn request(path: &str) -> FetchRequest {
    FetchRequest::get(Url::parse("http://localhost:3000/").unwrap().join(path).unwrap())
  }

  fn response(request: &FetchRequest, status: u16, body: &str) -> StoredResponse {
    StoredResponse::new(request.url.clone(), status, ResponseType::Basic, body)
      .with_header("content-type", "text/html")
  }

  fn backends() -> Vec<(&'static str, Box<dyn CacheStorage>)> {
    vec![
      (
        "memory",
        Box::new(MemoryCacheStorage::new()) as Box<dyn CacheStorage>,
      ),
      (
        "sqlite",
        Box::new(SqliteCacheStorage::open_in_memory().unwrap()) as Box<dyn CacheStorage>,
      ),
    ]
  }

  #[test]
  fn test_put_and_match() {
    for (name, storage) in backends() {
      let index = request("/index.html");
      storage.put("daily-quote-v1", &index, &response(&index, 200, "<html>")).unwrap();

      let hit = storage.match_request("daily-quote-v1", &index).unwrap();
      assert_eq!(hit, Some(response(&index, 200, "<html>")), "{}", name);
      assert_eq!(
        storage.match_request("daily-quote-v2", &index).unwrap(),
        None,
        "{}",
        name
      );
      assert_eq!(
        storage.match_request("daily-quote-v1", &request("/other")).unwrap(),
        None,
        "{}",
        name
      );
    }
  }

  #[test]
  fn test_rejects_non_get_and_unsuccessful() {
    for (name, storage) in backends() {
      let post = request("/api/quotes").with_method(Method::POST);
      assert!(storage.put("s", &post, &response(&post, 200, "")).is_err(), "{}", name);

      let missing = request("/missing");
      assert!(storage.put("s", &missing, &response(&missing, 404, "")).is_err(), "{}", name);
      assert!(storage.entries("s").unwrap().is_empty(), "{}", name);
    }
  }

  #[test]
  fn test_put_all_is_all_or_nothing() {
    for (name, storage) in backends() {
      let ok = request("/");
      let bad = request("/gone.css");
      let result = storage.put_all(
        "daily-quote-v1",
        &[(ok.clone(), response(&ok, 200, "")), (bad.clone(), response(&bad, 500, ""))],
      );
      assert!(result.is_err(), "{}", name);
      assert_eq!(storage.match_request("daily-quote-v1", &ok).unwrap(), None, "{}", name);
    }
  }

  #[test]
  fn test_keys_and_delete() {
    for (name, storage) in backends() {
      storage.open("daily-quote-v1").unwrap();
      let index = request("/");
      storage.put("daily-quote-v2", &index, &response(&index, 200, "v2")).unwrap();

      let mut keys = storage.keys().unwrap();
      keys.sort();
      assert_eq!(keys, vec!["daily-quote-v1", "daily-quote-v2"], "{}", name);
      assert!(storage.has("daily-quote-v2").unwrap(), "{}", name);

      assert!(storage.delete("daily-quote-v1").unwrap(), "{}", name);
      assert!(!storage.delete("daily-quote-v1").unwrap(), "{}", name);
      assert_eq!(storage.keys().unwrap(), vec!["daily-quote-v2"], "{}", name);
    }
  }

  #[test]
  fn test_duplicate_put_keeps_one_entry() {
    for (name, storage) in backends() {
      let logo = request("/daily_quote.png");
      storage.put("s", &logo, &response(&logo, 200, "a")).unwrap();
      storage.put("s", &logo, &response(&logo, 200, "bb")).unwrap();

      let entries = storage.entries("s").unwrap();
      assert_eq!(entries.len(), 1, "{}", name);
      assert_eq!(entries[0].size, 2, "{}", name);
    }
  }
}
