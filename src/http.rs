//! Request and response types seen by the cache controller.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// How the page issued the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level document load
  Navigate,
  SameOrigin,
  #[default]
  NoCors,
  Cors,
}

/// What the requested resource will be used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestDestination {
  /// fetch() / XHR calls have no destination
  #[default]
  Empty,
  Document,
  Style,
  Script,
  Image,
  Font,
  Manifest,
  Audio,
  Video,
  Worker,
}

impl RequestDestination {
  /// Parse the lowercase names used by the Fetch standard (`"style"`, `"image"`, ...).
  pub fn parse(s: &str) -> Result<Self> {
    let dest = match s.to_ascii_lowercase().as_str() {
      "" | "empty" => Self::Empty,
      "document" => Self::Document,
      "style" => Self::Style,
      "script" => Self::Script,
      "image" => Self::Image,
      "font" => Self::Font,
      "manifest" => Self::Manifest,
      "audio" => Self::Audio,
      "video" => Self::Video,
      "worker" => Self::Worker,
      other => return Err(eyre!("Unknown request destination: {}", other)),
    };
    Ok(dest)
  }
}

/// An outgoing request from a controlled page.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub destination: RequestDestination,
  pub headers: Vec<(String, String)>,
}

impl Request {
  /// A plain GET with no destination, like a `fetch()` call.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::default(),
      destination: RequestDestination::default(),
      headers: Vec::new(),
    }
  }

  /// A top-level document navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      destination: RequestDestination::Document,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_destination(mut self, destination: RequestDestination) -> Self {
    self.destination = destination;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Key under which this request is stored in a bucket.
  pub fn cache_key(&self) -> CacheKey {
    CacheKey::new(&self.method, &self.url)
  }
}

/// Identity of a stored entry: method plus URL without its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
  pub method: String,
  pub url: String,
}

impl CacheKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_string(),
      url: url.to_string(),
    }
  }

  /// Stable hex digest used as the primary key in persistent storage.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response produced by the network or read back from a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  /// Final URL after redirects
  pub url: String,
}

impl Response {
  pub fn new(status: u16, url: &Url, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
      url: url.to_string(),
    }
  }

  /// True for 2xx statuses.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}
