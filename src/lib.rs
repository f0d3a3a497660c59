//! Offline asset cache controller for the Limoney web app.
//!
//! Models a browser service worker: an install handler pre-caches static
//! assets into a bucket named by the generation tag, an activate handler
//! purges buckets from older tags and claims open pages, and a fetch handler
//! routes each request to pass-through, network-only, or cache-first.

pub mod cache;
pub mod clients;
pub mod config;
pub mod event;
pub mod http;
pub mod network;
pub mod registration;
pub mod router;
pub mod worker;

#[cfg(test)]
mod testing;
