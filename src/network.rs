//! Network access used on cache misses and for network-only routes.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;

use crate::http::{Request, Response};

/// A single network attempt for a request. No retries.
pub trait Network: Send + Sync + 'static {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>>;
}

/// Network backed by a reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }

  async fn send(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let resp = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = resp.status().as_u16();
    let url = resp.url().to_string();
    let headers = resp
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();
    let body = resp
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
      url,
    })
  }
}

impl Network for HttpNetwork {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
    self.send(request).boxed()
  }
}
