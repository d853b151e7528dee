//! SQLite cache store implementation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::http::{CacheEntry, Response};

use super::traits::{CacheStore, EntryKey, Namespace};

/// SQLite-based cache store.
///
/// All calls go through `spawn_blocking` so a slow disk never stalls the
/// runtime thread that is interleaving requests.
pub struct SqliteStore {
  conn: Arc<Mutex<Connection>>,
  quota_bytes: Option<u64>,
}

impl SqliteStore {
  /// Open the store at `path`, or at the default location when `None`.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  /// Limit the total body bytes held across all namespaces.
  pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
    self.quota_bytes = quota_bytes;
    self
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
      quota_bytes: None,
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-cache").join("cache.db"))
  }

  /// Run `f` against the connection on the blocking pool.
  async fn with_conn<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut conn = conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
      f(&mut conn)
    })
    .await
    .map_err(|e| eyre!("Cache storage task failed: {}", e))?
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS namespaces (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (namespace, request key); replaced whole on every put
CREATE TABLE IF NOT EXISTS entries (
    namespace TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (namespace, request_key),
    FOREIGN KEY (namespace) REFERENCES namespaces(name) ON DELETE CASCADE
);
"#;

#[async_trait]
impl CacheStore for SqliteStore {
  async fn open(&self, namespace: &Namespace) -> Result<Namespace> {
    let name = namespace.as_str().to_string();
    self
      .with_conn(move |conn| {
        conn
          .execute(
            "INSERT OR IGNORE INTO namespaces (name) VALUES (?)",
            params![name],
          )
          .map_err(|e| eyre!("Failed to open namespace {}: {}", name, e))?;
        Ok(())
      })
      .await?;

    Ok(namespace.clone())
  }

  async fn put(&self, namespace: &Namespace, key: &EntryKey, entry: CacheEntry) -> Result<()> {
    let name = namespace.as_str().to_string();
    let request_key = key.as_str().to_string();
    let quota = self.quota_bytes;

    self
      .with_conn(move |conn| {
        let headers = serde_json::to_string(&entry.response.headers)
          .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
        let size = entry.size();

        let tx = conn
          .transaction()
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

        let exists: bool = tx
          .query_row(
            "SELECT EXISTS(SELECT 1 FROM namespaces WHERE name = ?)",
            params![name],
            |row| row.get(0),
          )
          .map_err(|e| eyre!("Failed to look up namespace: {}", e))?;
        if !exists {
          return Err(eyre!("Namespace {} does not exist", name));
        }

        if let Some(quota) = quota {
          let used: i64 = tx
            .query_row(
              "SELECT COALESCE(SUM(length(body)), 0) FROM entries",
              [],
              |row| row.get(0),
            )
            .map_err(|e| eyre!("Failed to compute storage usage: {}", e))?;
          let replaced: i64 = tx
            .query_row(
              "SELECT COALESCE(SUM(length(body)), 0) FROM entries
               WHERE namespace = ? AND request_key = ?",
              params![name, request_key],
              |row| row.get(0),
            )
            .map_err(|e| eyre!("Failed to compute storage usage: {}", e))?;

          if (used - replaced) as u64 + size > quota {
            return Err(eyre!(
              "Storage quota exceeded: writing {} bytes for {} (quota {} bytes)",
              size,
              request_key,
              quota
            ));
          }
        }

        tx.execute(
          "INSERT OR REPLACE INTO entries (namespace, request_key, status, headers, body, cached_at)
           VALUES (?, ?, ?, ?, ?, ?)",
          params![
            name,
            request_key,
            entry.response.status,
            headers,
            &entry.response.body[..],
            entry.cached_at.to_rfc3339(),
          ],
        )
        .map_err(|e| eyre!("Failed to store entry {}: {}", request_key, e))?;

        tx.commit()
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

        Ok(())
      })
      .await
  }

  async fn get(&self, namespace: &Namespace, key: &EntryKey) -> Result<Option<CacheEntry>> {
    let name = namespace.as_str().to_string();
    let request_key = key.as_str().to_string();

    self
      .with_conn(move |conn| {
        let row: Option<(u16, String, Vec<u8>, String)> = conn
          .query_row(
            "SELECT status, headers, body, cached_at FROM entries
             WHERE namespace = ? AND request_key = ?",
            params![name, request_key],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
          )
          .optional()
          .map_err(|e| eyre!("Failed to read entry {}: {}", request_key, e))?;

        match row {
          Some((status, headers, body, cached_at)) => {
            let headers = serde_json::from_str(&headers)
              .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", request_key, e))?;
            Ok(Some(CacheEntry {
              response: Response::new(status, headers, body),
              cached_at: parse_datetime(&cached_at)?,
            }))
          }
          None => Ok(None),
        }
      })
      .await
  }

  async fn list_namespaces(&self) -> Result<BTreeSet<Namespace>> {
    self
      .with_conn(|conn| {
        let mut stmt = conn
          .prepare("SELECT name FROM namespaces")
          .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

        let names = stmt
          .query_map([], |row| row.get::<_, String>(0))
          .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(|e| eyre!("Failed to list namespaces: {}", e))?;

        Ok(names.into_iter().map(Namespace::new).collect())
      })
      .await
  }

  async fn delete(&self, namespace: &Namespace) -> Result<()> {
    let name = namespace.as_str().to_string();
    self
      .with_conn(move |conn| {
        conn
          .execute("DELETE FROM namespaces WHERE name = ?", params![name])
          .map_err(|e| eyre!("Failed to delete namespace {}: {}", name, e))?;
        Ok(())
      })
      .await
  }
}

/// Parse an RFC 3339 timestamp as written by `put`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
