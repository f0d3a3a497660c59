//! The cache controller: install, activate and fetch handlers for one worker version.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheResult, CacheStorage};
use crate::clients::Clients;
use crate::config::{CacheConfig, Config, StaticStrategy};
use crate::http::{Request, Response};
use crate::network::Network;
use crate::router::{PassReason, RequestClass, Router};

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub u64);

impl WorkerId {
  fn next() -> Self {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    Self(COUNTER.fetch_add(1, Ordering::Relaxed))
  }
}

impl fmt::Display for WorkerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "sw-{}", self.0)
  }
}

/// Lifecycle state of a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
  /// Created, install not started
  #[default]
  Parsed,
  Installing,
  /// Installed, waiting to be activated
  Installed,
  Activating,
  /// Active and controlling pages
  Activated,
  /// Replaced, terminated, or install failed
  Redundant,
}

/// Immutable settings shared by all handlers of one worker version.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub origin: Url,
  pub cache: CacheConfig,
}

impl WorkerConfig {
  pub fn from_config(config: &Config) -> Result<Self> {
    config.validate()?;
    Ok(Self {
      origin: config.origin_url()?,
      cache: config.cache.clone(),
    })
  }

  pub fn generation_tag(&self) -> &str {
    &self.cache.generation_tag
  }
}

/// Outcome of the install handler.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
  /// Asset paths stored in the bucket
  pub cached: Vec<String>,
  /// Asset paths that could not be fetched or stored, with the reason
  pub failed: Vec<(String, String)>,
}

impl InstallReport {
  pub fn is_complete(&self) -> bool {
    self.failed.is_empty()
  }
}

/// Outcome of the activate handler.
#[derive(Debug, Clone, Default)]
pub struct ActivateReport {
  /// Stale buckets removed
  pub deleted: Vec<String>,
  /// Stale buckets whose deletion failed, with the reason
  pub failed: Vec<(String, String)>,
  /// Number of pages now controlled by this worker
  pub claimed: usize,
}

/// What the fetch handler did with a request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Not intercepted; the host performs its default network handling
  Passthrough(PassReason),
  /// Intercepted and answered
  Respond(CacheResult<Response>),
}

impl FetchOutcome {
  pub fn response(&self) -> Option<&Response> {
    match self {
      FetchOutcome::Respond(result) => Some(&result.data),
      FetchOutcome::Passthrough(_) => None,
    }
  }

  pub fn is_passthrough(&self) -> bool {
    matches!(self, FetchOutcome::Passthrough(_))
  }
}

/// One version of the cache controller.
///
/// Storage, network and clients are shared with other versions; the
/// generation tag in `config` is the only thing that tells versions apart.
pub struct ServiceWorker<S: CacheStorage, N: Network, C: Clients> {
  id: WorkerId,
  config: Arc<WorkerConfig>,
  router: Router,
  cache: CacheLayer<S>,
  network: Arc<N>,
  clients: Arc<C>,
  state: Mutex<WorkerState>,
  skip_waiting: AtomicBool,
}

impl<S, N, C> ServiceWorker<S, N, C>
where
  S: CacheStorage + 'static,
  N: Network,
  C: Clients,
{
  pub fn new(config: WorkerConfig, storage: Arc<S>, network: Arc<N>, clients: Arc<C>) -> Self {
    let router = Router::new(&config.origin, &config.cache.static_prefix);
    let cache = CacheLayer::new(storage, config.cache.generation_tag.clone());
    Self {
      id: WorkerId::next(),
      config: Arc::new(config),
      router,
      cache,
      network,
      clients,
      state: Mutex::new(WorkerState::Parsed),
      skip_waiting: AtomicBool::new(false),
    }
  }

  /// Restart a worker that was activated in an earlier run and then
  /// terminated for idleness. Install and activate are not repeated.
  pub fn revive(config: WorkerConfig, storage: Arc<S>, network: Arc<N>, clients: Arc<C>) -> Self {
    let worker = Self::new(config, storage, network, clients);
    worker.set_state(WorkerState::Activated);
    worker
  }

  pub fn id(&self) -> WorkerId {
    self.id
  }

  pub fn config(&self) -> &WorkerConfig {
    &self.config
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, state: WorkerState) {
    let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
    debug!(worker = %self.id, from = ?*current, to = ?state, "state change");
    *current = state;
  }

  /// Move to `to` if the current state is `from`.
  fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
    let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
    if *current != from {
      return Err(eyre!(
        "Worker {} cannot move to {:?} from {:?}",
        self.id,
        to,
        *current
      ));
    }
    debug!(worker = %self.id, from = ?from, to = ?to, "state change");
    *current = to;
    Ok(())
  }

  /// Whether install asked to be promoted without waiting for old clients to close.
  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  /// Install handler.
  ///
  /// Requests immediate promotion, opens the bucket for the generation tag
  /// and pre-caches the static asset list. Assets that fail to fetch are
  /// logged and reported but do not fail the install. Failing to open the
  /// bucket does, and leaves the worker redundant.
  pub async fn install(&self) -> Result<InstallReport> {
    self.transition(WorkerState::Parsed, WorkerState::Installing)?;
    self.skip_waiting.store(true, Ordering::SeqCst);

    let bucket = self.cache.bucket();
    info!(worker = %self.id, bucket, "installing");

    if let Err(e) = self.cache.storage().open(bucket) {
      self.set_state(WorkerState::Redundant);
      return Err(eyre!("Failed to open cache bucket {}: {}", bucket, e));
    }

    let fetches = self
      .config
      .cache
      .static_assets
      .iter()
      .map(|asset| self.precache(asset));
    let results = join_all(fetches).await;

    let mut report = InstallReport::default();
    for (asset, result) in self.config.cache.static_assets.iter().zip(results) {
      match result {
        Ok(()) => report.cached.push(asset.clone()),
        Err(e) => {
          warn!(worker = %self.id, bucket, asset = %asset, "failed to pre-cache asset: {}", e);
          report.failed.push((asset.clone(), e.to_string()));
        }
      }
    }

    self.set_state(WorkerState::Installed);
    info!(
      worker = %self.id,
      bucket,
      cached = report.cached.len(),
      failed = report.failed.len(),
      "installed"
    );
    Ok(report)
  }

  async fn precache(&self, asset: &str) -> Result<()> {
    let url = self
      .config
      .origin
      .join(asset)
      .map_err(|e| eyre!("Invalid asset path {}: {}", asset, e))?;
    let request = Request::get(url);

    let response = self.network.fetch(&request).await?;
    if !response.ok() {
      return Err(eyre!("{} returned status {}", request.url, response.status));
    }
    self
      .cache
      .storage()
      .put(self.cache.bucket(), &request, &response)
  }

  /// Activate handler.
  ///
  /// Deletes every bucket whose name differs from the generation tag, then
  /// claims all open pages. One failed deletion does not stop the others.
  /// Returns only after every deletion has settled.
  pub async fn activate(&self) -> Result<ActivateReport> {
    self.transition(WorkerState::Installed, WorkerState::Activating)?;

    let storage = self.cache.storage();
    let current = self.cache.bucket();

    let keys = match storage.keys() {
      Ok(keys) => keys,
      Err(e) => {
        self.set_state(WorkerState::Installed);
        return Err(eyre!("Failed to list cache buckets: {}", e));
      }
    };

    let mut report = ActivateReport::default();
    for key in keys.into_iter().filter(|k| k != current) {
      info!(worker = %self.id, bucket = %key, "deleting old cache");
      match storage.delete(&key) {
        Ok(true) => report.deleted.push(key),
        // Already gone, e.g. removed by another tab's worker
        Ok(false) => {}
        Err(e) => {
          warn!(worker = %self.id, bucket = %key, "failed to delete old cache: {}", e);
          report.failed.push((key, e.to_string()));
        }
      }
    }

    if let Err(e) = storage.open(current) {
      self.set_state(WorkerState::Installed);
      return Err(eyre!("Failed to open cache bucket {}: {}", current, e));
    }

    self.set_state(WorkerState::Activated);

    report.claimed = match self.clients.claim(self.id) {
      Ok(n) => n,
      Err(e) => {
        warn!(worker = %self.id, "failed to claim clients: {}", e);
        0
      }
    };

    info!(
      worker = %self.id,
      bucket = current,
      deleted = report.deleted.len(),
      claimed = report.claimed,
      "activated"
    );
    Ok(report)
  }

  /// Fetch handler.
  ///
  /// Non-GET, cross-origin, and requests reaching a worker that is not
  /// active are passed through untouched. Navigations and non-static
  /// requests go to the network only. Static assets use the configured
  /// static strategy.
  pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome> {
    if self.state() != WorkerState::Activated {
      return Ok(FetchOutcome::Passthrough(PassReason::Inactive));
    }

    let class = self.router.classify(request);
    debug!(worker = %self.id, url = %request.url, class = ?class, "fetch");

    match class {
      RequestClass::Passthrough(reason) => Ok(FetchOutcome::Passthrough(reason)),
      RequestClass::Navigation | RequestClass::Dynamic => {
        let response = self.network.fetch(request).await?;
        Ok(FetchOutcome::Respond(CacheResult::from_network(response)))
      }
      RequestClass::Static => {
        let result = match self.config.cache.strategy {
          StaticStrategy::CacheFirst => {
            self
              .cache
              .cache_first(request, || self.network.fetch(request))
              .await?
          }
          StaticStrategy::StaleWhileRevalidate => {
            let network = Arc::clone(&self.network);
            let owned = request.clone();
            self
              .cache
              .stale_while_revalidate(request, move || async move {
                network.fetch(&owned).await
              })
              .await?
          }
        };
        Ok(FetchOutcome::Respond(result))
      }
    }
  }

  /// Stop handling events; the worker becomes redundant.
  pub fn terminate(&self) {
    info!(worker = %self.id, "terminated");
    self.set_state(WorkerState::Redundant);
  }
}
