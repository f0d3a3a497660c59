//! In-memory cache storage.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::traits::{CacheStorage, CachedResponse};
use crate::http::{CacheKey, Request, Response};

type Bucket = BTreeMap<CacheKey, CachedResponse>;

/// Storage that keeps every bucket in process memory.
///
/// Buckets are kept in a `Vec` so `keys()` reports creation order.
#[derive(Default)]
pub struct MemoryStorage {
  buckets: Mutex<Vec<(String, Bucket)>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn open(&self, bucket: &str) -> Result<()> {
    let mut buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if !buckets.iter().any(|(name, _)| name == bucket) {
      buckets.push((bucket.to_string(), Bucket::new()));
    }
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(buckets.iter().map(|(name, _)| name.clone()).collect())
  }

  fn delete(&self, bucket: &str) -> Result<bool> {
    let mut buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = buckets.len();
    buckets.retain(|(name, _)| name != bucket);
    Ok(buckets.len() != before)
  }

  fn match_request(&self, bucket: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let key = request.cache_key();
    Ok(
      buckets
        .iter()
        .find(|(name, _)| name == bucket)
        .and_then(|(_, entries)| entries.get(&key).cloned()),
    )
  }

  fn put(&self, bucket: &str, request: &Request, response: &Response) -> Result<()> {
    let mut buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let idx = match buckets.iter().position(|(name, _)| name == bucket) {
      Some(idx) => idx,
      None => {
        buckets.push((bucket.to_string(), Bucket::new()));
        buckets.len() - 1
      }
    };

    buckets[idx].1.insert(
      request.cache_key(),
      CachedResponse {
        response: response.clone(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn entries(&self, bucket: &str) -> Result<Vec<CacheKey>> {
    let buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      buckets
        .iter()
        .find(|(name, _)| name == bucket)
        .map(|(_, entries)| entries.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }
}
