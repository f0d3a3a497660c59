//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::http::{CacheKey, Request, Response};

/// A response read back from a bucket.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Buckets are named key-value stores shared by every worker version. Each
/// call is atomic on its own; callers never need to lock across calls.
pub trait CacheStorage: Send + Sync {
  /// Open a bucket, creating it if it does not exist yet.
  fn open(&self, bucket: &str) -> Result<()>;

  /// Names of all existing buckets, in creation order.
  fn keys(&self) -> Result<Vec<String>>;

  /// Check whether a bucket exists.
  fn has(&self, bucket: &str) -> Result<bool> {
    Ok(self.keys()?.iter().any(|k| k == bucket))
  }

  /// Delete a bucket and all its entries. Returns false if it did not exist.
  fn delete(&self, bucket: &str) -> Result<bool>;

  /// Look up the stored response for a request.
  fn match_request(&self, bucket: &str, request: &Request) -> Result<Option<CachedResponse>>;

  /// Store a response under the request's key, replacing any previous entry.
  /// Creates the bucket if needed.
  fn put(&self, bucket: &str, request: &Request, response: &Response) -> Result<()>;

  /// Keys of all entries in a bucket.
  fn entries(&self, bucket: &str) -> Result<Vec<CacheKey>>;
}

/// Result from a fetch, including where the response came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, revalidating: bool) -> Self {
    Self {
      data,
      source: if revalidating {
        CacheSource::CacheRevalidating
      } else {
        CacheSource::Cache
      },
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Served from the bucket with no network round-trip
  Cache,
  /// Served from the bucket while a background refresh runs
  CacheRevalidating,
}
