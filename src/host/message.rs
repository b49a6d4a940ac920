use serde::{Deserialize, Serialize};

/// Message posted to the engine by a controlled page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Connectivity changed; `online: true` triggers a queue replay
  OnlineStatusChange { online: bool },
  /// Any message type the engine does not understand
  #[serde(other)]
  Unknown,
}
