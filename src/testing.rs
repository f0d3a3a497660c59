//! Fakes shared by unit tests.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::cache::{CacheStorage, CachedResponse, MemoryStorage};
use crate::clients::ClientRegistry;
use crate::config::{CacheConfig, StaticStrategy};
use crate::http::{CacheKey, Request, Response};
use crate::network::Network;
use crate::worker::{ServiceWorker, WorkerConfig};

pub const ORIGIN: &str = "http://localhost:5001";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

enum Route {
  Serve(u16, Vec<u8>),
  Fail,
}

/// Network that answers from a fixed route table and counts every call.
/// Unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct StubNetwork {
  routes: Mutex<HashMap<String, Route>>,
  calls: Mutex<Vec<String>>,
  total: AtomicUsize,
}

impl StubNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn serve(&self, path: &str, status: u16, body: &str) -> &Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Route::Serve(status, body.as_bytes().to_vec()));
    self
  }

  pub fn fail(&self, path: &str) -> &Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Route::Fail);
    self
  }

  pub fn calls(&self) -> usize {
    self.total.load(Ordering::SeqCst)
  }

  pub fn calls_for(&self, path: &str) -> usize {
    let target = url(path).to_string();
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|u| **u == target)
      .count()
  }
}

impl Network for StubNetwork {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
    async move {
      self.total.fetch_add(1, Ordering::SeqCst);
      let key = request.url.to_string();
      self.calls.lock().unwrap().push(key.clone());
      match self.routes.lock().unwrap().get(&key) {
        Some(Route::Serve(status, body)) => Ok(Response::new(*status, &request.url, body.clone())),
        Some(Route::Fail) => Err(eyre!("network error fetching {}", key)),
        None => Err(eyre!("connection refused: {}", key)),
      }
    }
    .boxed()
  }
}

/// Memory storage with switchable failures: `delete` of chosen bucket names,
/// `keys` and `put`.
#[derive(Default)]
pub struct FlakyStorage {
  inner: MemoryStorage,
  undeletable: Vec<String>,
  keys_fail: AtomicBool,
  put_fail: AtomicBool,
}

impl FlakyStorage {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn failing_delete(names: &[&str]) -> Self {
    Self {
      undeletable: names.iter().map(|s| s.to_string()).collect(),
      ..Self::default()
    }
  }

  pub fn fail_keys(&self, fail: bool) {
    self.keys_fail.store(fail, Ordering::SeqCst);
  }

  pub fn fail_put(&self, fail: bool) {
    self.put_fail.store(fail, Ordering::SeqCst);
  }
}

impl CacheStorage for FlakyStorage {
  fn open(&self, bucket: &str) -> Result<()> {
    self.inner.open(bucket)
  }

  fn keys(&self) -> Result<Vec<String>> {
    if self.keys_fail.load(Ordering::SeqCst) {
      return Err(eyre!("storage unavailable"));
    }
    self.inner.keys()
  }

  fn delete(&self, bucket: &str) -> Result<bool> {
    if self.undeletable.iter().any(|b| b == bucket) {
      return Err(eyre!("storage refused to delete {}", bucket));
    }
    self.inner.delete(bucket)
  }

  fn match_request(&self, bucket: &str, request: &Request) -> Result<Option<CachedResponse>> {
    self.inner.match_request(bucket, request)
  }

  fn put(&self, bucket: &str, request: &Request, response: &Response) -> Result<()> {
    if self.put_fail.load(Ordering::SeqCst) {
      return Err(eyre!("disk full"));
    }
    self.inner.put(bucket, request, response)
  }

  fn entries(&self, bucket: &str) -> Result<Vec<CacheKey>> {
    self.inner.entries(bucket)
  }
}

/// Wait until `cond` holds, failing the test if it does not within `limit`.
pub async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) {
  let waited = tokio::time::timeout(limit, async {
    while !cond() {
      tokio::task::yield_now().await;
    }
  })
  .await;
  assert!(waited.is_ok(), "condition not met within {:?}", limit);
}

pub fn worker_config(tag: &str, assets: &[&str], strategy: StaticStrategy) -> WorkerConfig {
  WorkerConfig {
    origin: Url::parse(ORIGIN).unwrap(),
    cache: CacheConfig {
      generation_tag: tag.to_string(),
      static_prefix: "/static/".to_string(),
      static_assets: assets.iter().map(|s| s.to_string()).collect(),
      strategy,
    },
  }
}

pub type TestWorker<S = MemoryStorage> = ServiceWorker<S, StubNetwork, ClientRegistry>;

/// Build a worker over shared fakes.
pub fn worker<S: CacheStorage + 'static>(
  tag: &str,
  assets: &[&str],
  storage: &Arc<S>,
  network: &Arc<StubNetwork>,
  clients: &Arc<ClientRegistry>,
) -> TestWorker<S> {
  ServiceWorker::new(
    worker_config(tag, assets, StaticStrategy::CacheFirst),
    Arc::clone(storage),
    Arc::clone(network),
    Arc::clone(clients),
  )
}
