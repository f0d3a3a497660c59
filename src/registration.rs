//! Version handoff between worker instances for one scope.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::http::Request;
use crate::network::Network;
use crate::router::PassReason;
use crate::worker::{ActivateReport, FetchOutcome, InstallReport, ServiceWorker};

/// Outcome of installing a new worker version.
#[derive(Debug, Clone)]
pub struct UpdateReport {
  pub install: InstallReport,
  /// Present when the new version was promoted straight away
  pub activate: Option<ActivateReport>,
}

/// Tracks the installing, waiting and active workers of a scope.
///
/// A new version installs while the previous one keeps serving. Only one
/// worker is ever active.
pub struct Registration<S: CacheStorage, N: Network, C: Clients> {
  scope: Url,
  installing: Option<Arc<ServiceWorker<S, N, C>>>,
  waiting: Option<Arc<ServiceWorker<S, N, C>>>,
  active: Option<Arc<ServiceWorker<S, N, C>>>,
}

impl<S, N, C> Registration<S, N, C>
where
  S: CacheStorage + 'static,
  N: Network,
  C: Clients,
{
  pub fn new(scope: Url) -> Self {
    Self {
      scope,
      installing: None,
      waiting: None,
      active: None,
    }
  }

  pub fn scope(&self) -> &Url {
    &self.scope
  }

  pub fn installing(&self) -> Option<&Arc<ServiceWorker<S, N, C>>> {
    self.installing.as_ref()
  }

  pub fn waiting(&self) -> Option<&Arc<ServiceWorker<S, N, C>>> {
    self.waiting.as_ref()
  }

  pub fn active(&self) -> Option<&Arc<ServiceWorker<S, N, C>>> {
    self.active.as_ref()
  }

  /// Install `worker` as the next version.
  ///
  /// It is promoted immediately when it asked to skip waiting or when no
  /// version is active yet; otherwise it stays waiting until [`Self::promote`].
  pub async fn update(&mut self, worker: ServiceWorker<S, N, C>) -> Result<UpdateReport> {
    let worker = Arc::new(worker);
    self.installing = Some(Arc::clone(&worker));

    let install = worker.install().await;
    self.installing = None;
    let install = install?;

    if let Some(previous) = self.waiting.replace(Arc::clone(&worker)) {
      previous.terminate();
    }

    let activate = if worker.skip_waiting_requested() || self.active.is_none() {
      self.promote().await?
    } else {
      None
    };

    Ok(UpdateReport { install, activate })
  }

  /// Activate the waiting worker, then retire the current active one.
  /// Returns `None` when nothing is waiting.
  ///
  /// If activation fails the current worker keeps serving and the new one
  /// stays waiting, so a later `promote` can retry.
  pub async fn promote(&mut self) -> Result<Option<ActivateReport>> {
    let Some(next) = self.waiting.take() else {
      return Ok(None);
    };

    match next.activate().await {
      Ok(report) => {
        if let Some(previous) = self.active.replace(Arc::clone(&next)) {
          info!(
            scope = %self.scope,
            from = %previous.id(),
            to = %next.id(),
            "replaced active worker"
          );
          previous.terminate();
        }
        Ok(Some(report))
      }
      Err(e) => {
        warn!(scope = %self.scope, worker = %next.id(), "activation failed, keeping current worker: {}", e);
        self.waiting = Some(next);
        Err(e)
      }
    }
  }

  /// Route a request to the active worker, if any.
  pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome> {
    match &self.active {
      Some(worker) => worker.handle_fetch(request).await,
      None => Ok(FetchOutcome::Passthrough(PassReason::Inactive)),
    }
  }
}
