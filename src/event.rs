use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::http::Request;
use crate::network::Network;
use crate::worker::{ActivateReport, FetchOutcome, InstallReport, ServiceWorker};

/// Lifecycle and fetch events delivered by the host.
///
/// Every event carries a reply channel. The host must not consider the event
/// processed until the reply arrives: that is when the handler has settled.
#[derive(Debug)]
pub enum WorkerEvent {
  Install {
    reply: oneshot::Sender<Result<InstallReport>>,
  },
  Activate {
    reply: oneshot::Sender<Result<ActivateReport>>,
  },
  Fetch(FetchEvent),
}

/// A request intercepted from a controlled page.
#[derive(Debug)]
pub struct FetchEvent {
  pub request: Request,
  respond_with: oneshot::Sender<Result<FetchOutcome>>,
}

/// Event loop that feeds events to one worker.
///
/// Install and activate run one at a time, in arrival order. Each fetch
/// event is handled on its own task so slow network calls do not hold up
/// other requests.
pub struct EventLoop;

impl EventLoop {
  /// Spawn the loop and return the handle used to deliver events.
  pub fn spawn<S, N, C>(worker: Arc<ServiceWorker<S, N, C>>) -> WorkerHandle
  where
    S: CacheStorage + 'static,
    N: Network,
    C: Clients + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        match event {
          WorkerEvent::Install { reply } => {
            let result = worker.install().await;
            let _ = reply.send(result);
          }
          WorkerEvent::Activate { reply } => {
            let result = worker.activate().await;
            let _ = reply.send(result);
          }
          WorkerEvent::Fetch(event) => {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
              let result = worker.handle_fetch(&event.request).await;
              // The page may have gone away; nobody to answer
              if event.respond_with.send(result).is_err() {
                debug!(url = %event.request.url, "fetch event dropped before response");
              }
            });
          }
        }
      }
      debug!(worker = %worker.id(), "event loop stopped");
    });

    WorkerHandle { tx }
  }
}

/// Sends events to a running [`EventLoop`] and waits for them to settle.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHandle {
  pub async fn install(&self) -> Result<InstallReport> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::Install { reply })?;
    rx.await
      .map_err(|_| eyre!("Worker dropped the install event"))?
  }

  pub async fn activate(&self) -> Result<ActivateReport> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::Activate { reply })?;
    rx.await
      .map_err(|_| eyre!("Worker dropped the activate event"))?
  }

  pub async fn fetch(&self, request: Request) -> Result<FetchOutcome> {
    let (respond_with, rx) = oneshot::channel();
    self.send(WorkerEvent::Fetch(FetchEvent {
      request,
      respond_with,
    }))?;
    rx.await
      .map_err(|_| eyre!("Worker dropped the fetch event"))?
  }

  fn send(&self, event: WorkerEvent) -> Result<()> {
    self
      .tx
      .send(event)
      .map_err(|_| eyre!("Worker event loop is not running"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStorage};
  use crate::clients::ClientRegistry;
  use crate::testing::{self, url, StubNetwork};
  use crate::worker::WorkerState;

  #[tokio::test]
  async fn test_lifecycle_through_events() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(StubNetwork::new());
    let clients = Arc::new(ClientRegistry::new());
    network.serve("/static/a.css", 200, "body{}");
    storage.open("limoney-v2").unwrap();

    let worker = Arc::new(testing::worker(
      "limoney-v3",
      &["/static/a.css"],
      &storage,
      &network,
      &clients,
    ));
    let handle = EventLoop::spawn(Arc::clone(&worker));

    handle.install().await.unwrap();
    let report = handle.activate().await.unwrap();
    assert_eq!(report.deleted, vec!["limoney-v2"]);
    assert_eq!(worker.state(), WorkerState::Activated);

    let outcome = handle.fetch(Request::get(url("/static/a.css"))).await.unwrap();
    match outcome {
      FetchOutcome::Respond(result) => assert_eq!(result.source, CacheSource::Cache),
      other => panic!("expected a response, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_concurrent_fetch_events() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(StubNetwork::new());
    let clients = Arc::new(ClientRegistry::new());
    network.serve("/api/a", 200, "a").serve("/api/b", 200, "b");

    let worker = Arc::new(testing::worker("limoney-v3", &[], &storage, &network, &clients));
    let handle = EventLoop::spawn(worker);
    handle.install().await.unwrap();
    handle.activate().await.unwrap();

    let (a, b) = tokio::join!(
      handle.fetch(Request::get(url("/api/a"))),
      handle.fetch(Request::get(url("/api/b")))
    );
    assert_eq!(a.unwrap().response().unwrap().body, b"a");
    assert_eq!(b.unwrap().response().unwrap().body, b"b");
  }

  #[tokio::test]
  async fn test_handler_errors_are_delivered() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(StubNetwork::new());
    let clients = Arc::new(ClientRegistry::new());
    let worker = Arc::new(testing::worker("limoney-v3", &[], &storage, &network, &clients));
    let handle = EventLoop::spawn(worker);

    // Activate before install is rejected by the worker, not the loop
    assert!(handle.activate().await.is_err());
    assert!(handle.install().await.is_ok());
  }
}
