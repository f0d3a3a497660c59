//! Cache layer that orchestrates the static-asset strategies over one bucket.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::traits::{CacheResult, CacheStorage};
use crate::http::{Request, Response};

/// Strategies bound to the bucket of the current generation tag.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  bucket: String,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  /// Create a new cache layer over `bucket` in the given storage backend.
  pub fn new(storage: Arc<S>, bucket: impl Into<String>) -> Self {
    Self {
      storage,
      bucket: bucket.into(),
    }
  }

  pub fn bucket(&self) -> &str {
    &self.bucket
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Cache-first with fill.
  ///
  /// 1. Check the bucket - on a hit, return it without calling `fetcher`
  /// 2. On a miss, fetch from network (errors propagate)
  /// 3. Store a copy when the response is 2xx, then return the network response
  ///
  /// Only a network failure is an error here. A failed store is logged and the
  /// network response is still returned.
  ///
  /// A hit is never refreshed; see [`Self::stale_while_revalidate`] for that.
  pub async fn cache_first<F, Fut>(
    &self,
    request: &Request,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    if let Some(cached) = self.storage.match_request(&self.bucket, request)? {
      debug!(bucket = %self.bucket, url = %request.url, "cache hit");
      return Ok(CacheResult::from_cache(
        cached.response,
        cached.cached_at,
        false,
      ));
    }

    debug!(bucket = %self.bucket, url = %request.url, "cache miss");
    let response = fetcher().await?;
    self.fill(request, &response);
    Ok(CacheResult::from_network(response))
  }

  /// Serve a hit immediately and refresh the entry in a background task.
  ///
  /// Misses behave like [`Self::cache_first`]. Background refresh failures are
  /// logged and leave the existing entry in place. Must be called from within
  /// a tokio runtime.
  pub async fn stale_while_revalidate<F, Fut>(
    &self,
    request: &Request,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>> + Send + 'static,
  {
    match self.storage.match_request(&self.bucket, request)? {
      Some(cached) => {
        debug!(bucket = %self.bucket, url = %request.url, "cache hit, revalidating");
        let refresh = fetcher();
        let storage = Arc::clone(&self.storage);
        let bucket = self.bucket.clone();
        let request = request.clone();
        tokio::spawn(async move {
          match refresh.await {
            Ok(response) if response.ok() => {
              if let Err(e) = storage.put(&bucket, &request, &response) {
                warn!(bucket = %bucket, url = %request.url, "failed to store revalidated response: {}", e);
              }
            }
            Ok(response) => {
              debug!(url = %request.url, status = response.status, "revalidation returned non-2xx, keeping entry");
            }
            Err(e) => {
              warn!(url = %request.url, "revalidation failed: {}", e);
            }
          }
        });
        Ok(CacheResult::from_cache(
          cached.response,
          cached.cached_at,
          true,
        ))
      }
      None => {
        let response = fetcher().await?;
        self.fill(request, &response);
        Ok(CacheResult::from_network(response))
      }
    }
  }

  fn fill(&self, request: &Request, response: &Response) {
    if !response.ok() {
      debug!(url = %request.url, status = response.status, "not caching non-2xx response");
      return;
    }
    if let Err(e) = self.storage.put(&self.bucket, request, response) {
      warn!(bucket = %self.bucket, url = %request.url, "failed to store response: {}", e);
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      bucket: self.bucket.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStorage};
  use crate::testing::{eventually, FlakyStorage};
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;
  use tokio::sync::oneshot;
  use url::Url;

  fn request() -> Request {
    Request::get(Url::parse("http://localhost:5001/static/a.css").unwrap())
  }

  fn layer() -> CacheLayer<MemoryStorage> {
    CacheLayer::new(Arc::new(MemoryStorage::new()), "limoney-v3")
  }

  #[tokio::test]
  async fn test_miss_fetches_and_fills() {
    let layer = layer();
    let req = request();
    let network = Response::new(200, &req.url, "body{}");

    let expected = network.clone();
    let result = layer
      .cache_first(&req, || async move { Ok(expected) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, network);
    let stored = layer
      .storage()
      .match_request("limoney-v3", &req)
      .unwrap()
      .unwrap();
    assert_eq!(stored.response, network);
  }

  #[tokio::test]
  async fn test_hit_skips_fetcher() {
    let layer = layer();
    let req = request();
    let cached = Response::new(200, &req.url, "cached");
    layer.storage().put("limoney-v3", &req, &cached).unwrap();

    let calls = AtomicU32::new(0);
    let result = layer
      .cache_first(&req, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(eyre!("network should not be used")) }
      })
      .await
      .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data, cached);
  }

  #[tokio::test]
  async fn test_non_ok_is_returned_but_not_stored() {
    let layer = layer();
    let req = request();
    let url = req.url.clone();

    let result = layer
      .cache_first(&req, || async move { Ok(Response::new(404, &url, "missing")) })
      .await
      .unwrap();

    assert_eq!(result.data.status, 404);
    assert!(layer.storage().entries("limoney-v3").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failed_store_still_returns_network_response() {
    let storage = Arc::new(FlakyStorage::new());
    storage.fail_put(true);
    let layer = CacheLayer::new(Arc::clone(&storage), "limoney-v3");
    let req = request();
    let url = req.url.clone();

    let result = layer
      .cache_first(&req, || async move { Ok(Response::new(200, &url, "body{}")) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.status, 200);
    assert_eq!(result.data.body, b"body{}");
    assert!(storage.entries("limoney-v3").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_miss_network_error_propagates() {
    let layer = layer();
    let result = layer
      .cache_first(&request(), || async { Err(eyre!("offline")) })
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_refreshes_in_background() {
    let layer = layer();
    let req = request();
    layer
      .storage()
      .put("limoney-v3", &req, &Response::new(200, &req.url, "old"))
      .unwrap();

    let url = req.url.clone();
    let result = layer
      .stale_while_revalidate(&req, || async move { Ok(Response::new(200, &url, "new")) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::CacheRevalidating);
    assert_eq!(result.data.body, b"old");

    eventually(Duration::from_secs(2), || {
      layer
        .storage()
        .match_request("limoney-v3", &req)
        .unwrap()
        .is_some_and(|c| c.response.body == b"new")
    })
    .await;
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_keeps_entry_on_failure() {
    let layer = layer();
    let req = request();
    layer
      .storage()
      .put("limoney-v3", &req, &Response::new(200, &req.url, "old"))
      .unwrap();

    let (attempted, refresh_ran) = oneshot::channel();
    layer
      .stale_while_revalidate(&req, move || async move {
        let _ = attempted.send(());
        Err(eyre!("offline"))
      })
      .await
      .unwrap();

    // Nothing writes the entry once the refresh has failed
    tokio::time::timeout(Duration::from_secs(2), refresh_ran)
      .await
      .unwrap()
      .unwrap();
    tokio::task::yield_now().await;
    let stored = layer
      .storage()
      .match_request("limoney-v3", &req)
      .unwrap()
      .unwrap();
    assert_eq!(stored.response.body, b"old");
  }
}
