use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::net::{Credentials, Method, Request};

/// A mutation waiting to be enqueued (no id assigned yet)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMutation {
  pub url: String,
  pub method: Method,
  pub headers: Vec<(String, String)>,
  pub body: String,
  /// Milliseconds since the Unix epoch
  pub enqueued_at: i64,
}

impl NewMutation {
  /// Snapshot a request that failed to reach the network.
  pub fn from_request(request: &Request) -> Self {
    Self {
      url: request.url.clone(),
      method: request.method,
      headers: request.headers.clone(),
      body: request.body.clone().unwrap_or_default(),
      enqueued_at: Utc::now().timestamp_millis(),
    }
  }
}

/// A persisted mutation awaiting replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMutation {
  pub id: i64,
  pub url: String,
  pub method: Method,
  pub headers: Vec<(String, String)>,
  pub body: String,
  pub enqueued_at: i64,
}

impl QueuedMutation {
  pub fn from_new(id: i64, mutation: NewMutation) -> Self {
    Self {
      id,
      url: mutation.url,
      method: mutation.method,
      headers: mutation.headers,
      body: mutation.body,
      enqueued_at: mutation.enqueued_at,
    }
  }

  /// Rebuild the live request to replay. Bodiless verbs drop the body and
  /// credentials are always sent.
  pub fn to_request(&self) -> Request {
    let mut request = Request::new(self.method, self.url.clone())
      .with_credentials(Credentials::Include);
    request.headers = self.headers.clone();
    if !self.method.is_bodiless() {
      request.body = Some(self.body.clone());
    }
    request
  }
}
