//! Durable queue of mutations that could not be delivered live.
//!
//! Every operation stands alone: the SQLite backend opens its own
//! connection per call and holds nothing between calls, so a failed call
//! never leaves a half-applied change behind.

mod store;
mod types;

pub use store::SqliteQueue;
pub use types::{NewMutation, QueuedMutation};

use async_trait::async_trait;
use color_eyre::Result;

/// Storage for queued mutations.
#[async_trait]
pub trait QueueStore: Send + Sync {
  /// Persist a new record and return its freshly assigned id.
  async fn enqueue(&self, mutation: NewMutation) -> Result<i64>;

  /// All records, ascending by `enqueued_at` (ties broken by id).
  async fn list_all(&self) -> Result<Vec<QueuedMutation>>;

  /// Delete one record. Removing an unknown id is not an error.
  async fn remove(&self, id: i64) -> Result<()>;
}
