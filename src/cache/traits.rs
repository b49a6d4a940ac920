//! Core types for the response cache.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::net::{RequestKey, Response, ResponseSource, ResponseType};

/// Snapshot of a response as it was when written to the cache.
///
/// There is no freshness metadata: an entry that exists is usable offline.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  /// Clone a live response into a cacheable snapshot.
  pub fn snapshot(response: &Response) -> Self {
    Self {
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      response_type: response.response_type,
      cached_at: Utc::now(),
    }
  }

  /// Rebuild a response to hand back to the page.
  pub fn into_response(self, source: ResponseSource) -> Response {
    Response {
      status: self.status,
      headers: self.headers,
      body: self.body,
      response_type: self.response_type,
      source,
    }
  }
}

impl RequestKey {
  /// Stable, fixed-length storage key for this request identity.
  pub fn cache_hash(&self) -> String {
    let input = format!("{} {}", self.method, self.url);

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}
