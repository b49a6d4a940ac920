//! Offline request interception for the hunting-permit web app.
//!
//! Answers outgoing requests from a versioned SQLite response cache when the
//! network is unavailable, and queues failed mutations for replay once
//! connectivity returns.

pub mod cache;
pub mod config;
pub mod engine;
pub mod host;
pub mod lifecycle;
pub mod net;
pub mod queue;
pub mod router;
pub mod sync;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use engine::Engine;
pub use host::{ClientMessage, Host, WorkerState};
