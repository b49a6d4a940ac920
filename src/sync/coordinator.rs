use color_eyre::Result;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::scheduler::SyncScheduler;
use crate::host::ClientMessage;
use crate::net::Network;
use crate::queue::{QueueStore, QueuedMutation};

/// Outcome of one drain of the mutation queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
  /// Records found in the queue
  pub attempted: usize,
  /// Records delivered and removed
  pub replayed: usize,
  /// Records left queued for the next trigger
  pub failed: usize,
}

/// Drains the mutation queue against the live network.
///
/// Triggered by the deferred sync event carrying `tag`, or by a page
/// announcing that connectivity is back. Both run the same replay.
pub struct SyncCoordinator {
  queue: Arc<dyn QueueStore>,
  network: Arc<dyn Network>,
  scheduler: Arc<dyn SyncScheduler>,
  tag: String,
}

impl SyncCoordinator {
  pub fn new(
    queue: Arc<dyn QueueStore>,
    network: Arc<dyn Network>,
    scheduler: Arc<dyn SyncScheduler>,
    tag: impl Into<String>,
  ) -> Self {
    Self {
      queue,
      network,
      scheduler,
      tag: tag.into(),
    }
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  /// Replay every queued mutation concurrently.
  ///
  /// Fails only when the queue cannot be listed. Individual delivery
  /// failures are logged and leave the record queued.
  pub async fn replay(&self) -> Result<ReplayReport> {
    let pending = self.queue.list_all().await?;
    if pending.is_empty() {
      debug!("Mutation queue empty, nothing to replay");
      return Ok(ReplayReport::default());
    }

    let attempts = pending.iter().map(|mutation| self.replay_one(mutation));
    let results = join_all(attempts).await;

    let replayed = results.iter().filter(|delivered| **delivered).count();
    let report = ReplayReport {
      attempted: pending.len(),
      replayed,
      failed: pending.len() - replayed,
    };

    info!(
      attempted = report.attempted,
      replayed = report.replayed,
      failed = report.failed,
      "Mutation replay finished"
    );
    Ok(report)
  }

  /// Deliver one record; returns whether it was delivered and removed.
  async fn replay_one(&self, mutation: &QueuedMutation) -> bool {
    let request = mutation.to_request();

    match self.network.fetch(&request).await {
      Ok(response) if response.ok() => match self.queue.remove(mutation.id).await {
        Ok(()) => {
          debug!(id = mutation.id, url = %mutation.url, "Replayed queued mutation");
          true
        }
        Err(e) => {
          warn!(id = mutation.id, error = %e, "Replayed mutation but failed to remove it");
          false
        }
      },
      Ok(response) => {
        warn!(
          id = mutation.id,
          url = %mutation.url,
          status = response.status,
          "Replay rejected by server, keeping mutation queued"
        );
        false
      }
      Err(e) => {
        warn!(id = mutation.id, url = %mutation.url, error = %e, "Replay failed, keeping mutation queued");
        false
      }
    }
  }

  /// Handle a deferred sync event. Events for other tags are ignored.
  pub async fn handle_sync(&self, tag: &str) -> Result<()> {
    if tag != self.tag {
      debug!(tag, "Ignoring sync event for unknown tag");
      return Ok(());
    }
    self.replay().await.map(|_| ())
  }

  /// Handle a message from a controlled page.
  pub async fn handle_message(&self, message: &ClientMessage) -> Result<()> {
    match message {
      ClientMessage::OnlineStatusChange { online: true } => {
        info!("Connectivity restored, replaying queued mutations");
        self.replay().await.map(|_| ())
      }
      ClientMessage::OnlineStatusChange { online: false } => {
        debug!("Connectivity lost");
        Ok(())
      }
      ClientMessage::Unknown => {
        debug!("Ignoring unknown client message");
        Ok(())
      }
    }
  }

  /// Ask the platform to run a replay later. If registration is not
  /// possible, replay right away instead.
  pub async fn request_sync(&self) -> Result<()> {
    match self.scheduler.register(&self.tag).await {
      Ok(()) => {
        debug!(tag = %self.tag, "Deferred sync registered");
        Ok(())
      }
      Err(e) => {
        warn!(error = %e, "Deferred sync unavailable, replaying now");
        self.replay().await.map(|_| ())
      }
    }
  }
}
