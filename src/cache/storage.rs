//! SQLite-backed cache storage.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{CacheStorage, CachedResponse};
use crate::http::{CacheKey, Request, Response};

/// SQLite-based cache storage implementation.
///
/// Buckets survive process restarts, which is what lets a revived worker
/// serve static assets cached by an earlier run.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at `path`, or at the default location when `None`.
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

    Self::with_connection(conn)
  }

  /// Open a throwaway database that lives only as long as this value.
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

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("limoney-sw").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named buckets, one per generation tag
CREATE TABLE IF NOT EXISTS cache_buckets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses (serialized JSON), keyed by request digest
CREATE TABLE IF NOT EXISTS cache_entries (
    bucket_id INTEGER NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    response BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket_id, request_key),
    FOREIGN KEY (bucket_id) REFERENCES cache_buckets(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_bucket ON cache_entries(bucket_id);
"#;

/// Insert the bucket if missing and return its row id.
fn ensure_bucket(conn: &Connection, bucket: &str) -> Result<i64> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_buckets (name) VALUES (?)",
      params![bucket],
    )
    .map_err(|e| eyre!("Failed to open cache bucket {}: {}", bucket, e))?;

  conn
    .query_row(
      "SELECT id FROM cache_buckets WHERE name = ?",
      params![bucket],
      |row| row.get(0),
    )
    .map_err(|e| eyre!("Failed to look up cache bucket {}: {}", bucket, e))
}

impl CacheStorage for SqliteStorage {
  fn open(&self, bucket: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    ensure_bucket(&conn, bucket)?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_buckets ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache buckets: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache bucket name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, bucket: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Entries go with the bucket through ON DELETE CASCADE
    let removed = conn
      .execute("DELETE FROM cache_buckets WHERE name = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete cache bucket {}: {}", bucket, e))?;

    Ok(removed > 0)
  }

  fn match_request(&self, bucket: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let key = request.cache_key();

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT ce.response, ce.cached_at FROM cache_entries ce
         INNER JOIN cache_buckets cb ON cb.id = ce.bucket_id
         WHERE cb.name = ? AND ce.request_key = ?",
        params![bucket, key.digest()],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to match {} in {}: {}", key.url, bucket, e))?;

    match row {
      Some((data, cached_at_str)) => {
        let response: Response = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cached response: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedResponse {
          response,
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, bucket: &str, request: &Request, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let key = request.cache_key();
    let data =
      serde_json::to_vec(response).map_err(|e| eyre!("Failed to serialize response: {}", e))?;

    let bucket_id = ensure_bucket(&conn, bucket)?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (bucket_id, request_key, method, url, response, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![bucket_id, key.digest(), key.method, key.url, data],
      )
      .map_err(|e| eyre!("Failed to store {} in {}: {}", key.url, bucket, e))?;

    Ok(())
  }

  fn entries(&self, bucket: &str) -> Result<Vec<CacheKey>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT ce.method, ce.url FROM cache_entries ce
         INNER JOIN cache_buckets cb ON cb.id = ce.bucket_id
         WHERE cb.name = ?
         ORDER BY ce.url",
      )
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let keys = stmt
      .query_map(params![bucket], |row| {
        Ok(CacheKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", bucket, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    Ok(keys)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
