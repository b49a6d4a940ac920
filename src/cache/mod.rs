//! Versioned response cache for offline support.
//!
//! This module provides:
//! - Named cache namespaces mapping a request identity to a response snapshot
//! - Network-first and cache-first strategies over the current namespace
//! - Fire-and-forget cache writes that never delay the response path

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, Fetched};
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::CachedResponse;
