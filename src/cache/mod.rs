//! Generation-tagged cache buckets for offline asset serving.
//!
//! This module provides:
//! - The `CacheStorage` trait: named buckets of request → response entries
//! - In-memory and SQLite storage backends
//! - `CacheLayer`, which runs the static-asset strategies over one bucket

mod layer;
mod memory;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use memory::MemoryStorage;
pub use storage::SqliteStorage;
pub use traits::{CacheResult, CacheSource, CacheStorage, CachedResponse};
