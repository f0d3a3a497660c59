//! Pages (clients) a worker may control.

use color_eyre::{eyre::eyre, Result};
use std::sync::Mutex;
use url::Url;

use crate::worker::WorkerId;

/// An open page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
  pub id: String,
  pub url: Url,
  /// Worker currently handling this page's requests
  pub controller: Option<WorkerId>,
}

/// Access to the open pages of this origin.
pub trait Clients: Send + Sync {
  /// All currently open pages.
  fn match_all(&self) -> Result<Vec<Client>>;

  /// Make `worker` the controller of every open page. Returns the number of pages.
  fn claim(&self, worker: WorkerId) -> Result<usize>;
}

/// In-process list of open pages.
#[derive(Default)]
pub struct ClientRegistry {
  clients: Mutex<Vec<Client>>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a newly opened page, initially uncontrolled.
  pub fn open(&self, id: &str, url: Url) -> Result<()> {
    let mut clients = self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    clients.retain(|c| c.id != id);
    clients.push(Client {
      id: id.to_string(),
      url,
      controller: None,
    });
    Ok(())
  }

  /// Forget a closed page.
  pub fn close(&self, id: &str) -> Result<Option<Client>> {
    let mut clients = self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let pos = clients.iter().position(|c| c.id == id);
    Ok(pos.map(|i| clients.remove(i)))
  }
}

impl Clients for ClientRegistry {
  fn match_all(&self) -> Result<Vec<Client>> {
    let clients = self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(clients.clone())
  }

  fn claim(&self, worker: WorkerId) -> Result<usize> {
    let mut clients = self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    for client in clients.iter_mut() {
      client.controller = Some(worker);
    }
    Ok(clients.len())
  }
}
