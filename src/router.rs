//! Per-request routing decisions for the fetch handler.

use reqwest::Method;
use url::{Origin, Url};

use crate::http::{Request, RequestDestination};

/// Why a request is left to default browser handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
  /// Only GET is ever cached
  Method,
  /// Third-party resources are outside this worker's authority
  CrossOrigin,
  /// The worker is not the active controller (not yet activated, or redundant)
  Inactive,
}

/// Strategy chosen for a request. First matching rule wins, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Not intercepted
  Passthrough(PassReason),
  /// Top-level document load, network-only
  Navigation,
  /// Static asset, cache-first with fill
  Static,
  /// API/data calls, network-only and never stored
  Dynamic,
}

/// Matches requests against the worker's origin and static prefix.
#[derive(Debug, Clone)]
pub struct Router {
  origin: Origin,
  static_prefix: String,
}

impl Router {
  pub fn new(origin: &Url, static_prefix: &str) -> Self {
    Self {
      origin: origin.origin(),
      static_prefix: static_prefix.to_string(),
    }
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    if request.method != Method::GET {
      return RequestClass::Passthrough(PassReason::Method);
    }
    if request.url.origin() != self.origin {
      return RequestClass::Passthrough(PassReason::CrossOrigin);
    }
    if request.is_navigation() {
      return RequestClass::Navigation;
    }
    if self.is_static(request) {
      RequestClass::Static
    } else {
      RequestClass::Dynamic
    }
  }

  fn is_static(&self, request: &Request) -> bool {
    request.url.path().starts_with(&self.static_prefix)
      || matches!(
        request.destination,
        RequestDestination::Style
          | RequestDestination::Script
          | RequestDestination::Image
          | RequestDestination::Font
      )
  }
}
