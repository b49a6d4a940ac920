//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::CachedResponse;
use crate::net::{RequestKey, ResponseType};

/// Trait for cache storage backends.
///
/// A backend holds any number of named namespaces; each maps a request
/// identity to one response snapshot. Writing to an unknown namespace
/// creates it.
pub trait CacheStorage: Send + Sync {
  /// Store one response, replacing any previous entry for the same key.
  fn put(&self, namespace: &str, key: &RequestKey, response: &CachedResponse) -> Result<()>;

  /// Store every entry in a single transaction. Either all entries are
  /// written or none are, and the namespace is not created on failure.
  fn put_all(&self, namespace: &str, entries: &[(RequestKey, CachedResponse)]) -> Result<()>;

  /// Look up an entry in one namespace.
  fn lookup(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Names of all existing namespaces.
  fn namespaces(&self) -> Result<Vec<String>>;

  /// Delete a namespace and all its entries. Returns whether it existed.
  fn delete_namespace(&self, namespace: &str) -> Result<bool>;

  /// Number of entries in a namespace.
  fn entry_count(&self, namespace: &str) -> Result<usize>;

  /// Record `namespace` as the one the active worker serves from.
  fn set_active(&self, namespace: &str) -> Result<()>;

  /// Namespace recorded by the last successful activation.
  fn active(&self) -> Result<Option<String>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory cache. Contents vanish on drop.
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

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_namespaces (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (namespace, request identity)
CREATE TABLE IF NOT EXISTS cached_responses (
    namespace TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    response_type TEXT NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (namespace, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_cached_responses_namespace
    ON cached_responses(namespace);

-- Single row: namespace of the last successful activation
CREATE TABLE IF NOT EXISTS active_namespace (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    name TEXT NOT NULL,
    activated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

fn insert_entry(
  conn: &Connection,
  namespace: &str,
  key: &RequestKey,
  response: &CachedResponse,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
  let response_type = serde_json::to_string(&response.response_type)
    .map_err(|e| eyre!("Failed to serialize response type: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO cache_namespaces (name) VALUES (?)",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to create cache namespace {}: {}", namespace, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cached_responses
         (namespace, request_hash, method, url, status, headers, body, response_type, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        namespace,
        key.cache_hash(),
        key.method.as_str(),
        key.url,
        response.status,
        headers,
        response.body,
        response_type,
        format_datetime(response.cached_at),
      ],
    )
    .map_err(|e| eyre!("Failed to store cached response for {}: {}", key.url, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn put(&self, namespace: &str, key: &RequestKey, response: &CachedResponse) -> Result<()> {
    let conn = self.lock()?;
    insert_entry(&conn, namespace, key, response)
  }

  fn put_all(&self, namespace: &str, entries: &[(RequestKey, CachedResponse)]) -> Result<()> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, response) in entries {
      // Dropping `tx` on error rolls the whole batch back
      insert_entry(&tx, namespace, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn lookup(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, response_type, cached_at FROM cached_responses
         WHERE namespace = ? AND request_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String, String)> = stmt
      .query_row(params![namespace, key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key.url, e))?;

    match row {
      Some((status, headers, body, response_type, cached_at)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        let response_type: ResponseType = serde_json::from_str(&response_type)
          .map_err(|e| eyre!("Failed to deserialize response type: {}", e))?;

        Ok(Some(CachedResponse {
          status,
          headers,
          body,
          response_type,
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_namespaces ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache namespace: {}", e))?;

    Ok(names)
  }

  fn delete_namespace(&self, namespace: &str) -> Result<bool> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cached_responses WHERE namespace = ?",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", namespace, e))?;

    let deleted = tx
      .execute(
        "DELETE FROM cache_namespaces WHERE name = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete cache namespace {}: {}", namespace, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  fn entry_count(&self, namespace: &str) -> Result<usize> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cached_responses WHERE namespace = ?",
        params![namespace],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", namespace, e))?;

    Ok(count as usize)
  }

  fn set_active(&self, namespace: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO active_namespace (id, name) VALUES (1, ?)",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to record active namespace {}: {}", namespace, e))?;

    Ok(())
  }

  fn active(&self) -> Result<Option<String>> {
    let conn = self.lock()?;

    conn
      .query_row("SELECT name FROM active_namespace WHERE id = 1", [], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read active namespace: {}", e))
  }
}

fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
