//! Replay of queued mutations once connectivity returns.

mod coordinator;
mod scheduler;

pub use coordinator::{ReplayReport, SyncCoordinator};
pub use scheduler::{SqliteScheduler, SyncScheduler};
