//! Cache layer that orchestrates caching strategies with network fetching.

use color_eyre::Report;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::CachedResponse;
use crate::net::{Network, Request, RequestKey, Response, ResponseSource, ResponseType, SERVED_FROM_HEADER};

/// Result of running a request through one of the caching strategies.
#[derive(Debug)]
pub enum Fetched {
  /// Live response from the network
  Live(Response),
  /// Served from the current namespace
  Cached(Response),
  /// Neither the network nor the cache could answer
  Unavailable(Report),
}

/// Cache layer bound to the current cache namespace.
///
/// Writes triggered by live responses are fire-and-forget: they run on the
/// blocking pool while the response is already on its way back, and
/// concurrent writes to the same key resolve as last write wins.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  namespace: String,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  pub fn new(storage: Arc<S>, namespace: impl Into<String>) -> Self {
    Self {
      storage,
      namespace: namespace.into(),
    }
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Look up an entry in the current namespace. Storage errors count as a miss.
  pub fn lookup(&self, key: &RequestKey) -> Option<CachedResponse> {
    match self.storage.lookup(&self.namespace, key) {
      Ok(found) => found,
      Err(e) => {
        warn!(url = %key.url, error = %e, "Cache lookup failed, treating as miss");
        None
      }
    }
  }

  /// Write a response snapshot without waiting for the write to land.
  pub fn store_in_background(&self, key: RequestKey, response: &Response) -> JoinHandle<()> {
    let storage = Arc::clone(&self.storage);
    let namespace = self.namespace.clone();
    let snapshot = CachedResponse::snapshot(response);

    tokio::task::spawn_blocking(move || {
      if let Err(e) = storage.put(&namespace, &key, &snapshot) {
        warn!(url = %key.url, error = %e, "Background cache write failed");
      }
    })
  }

  /// Network-first strategy.
  ///
  /// 1. Try the network; cache successful GET responses and return them
  /// 2. On network failure, serve the cached entry tagged as cache-origin
  /// 3. Otherwise report the request as unavailable
  pub async fn network_first<N: Network + ?Sized>(&self, network: &N, request: &Request) -> Fetched {
    match network.fetch(request).await {
      Ok(response) => {
        if let Some(key) = request.cache_key() {
          if response.ok() {
            self.store_in_background(key, &response);
          }
        }
        Fetched::Live(response)
      }
      Err(error) => {
        debug!(url = %request.url, error = %error, "Network failed, falling back to cache");

        let cached = request.cache_key().and_then(|key| self.lookup(&key));
        match cached {
          Some(entry) => Fetched::Cached(
            entry
              .into_response(ResponseSource::Cache)
              .with_header(SERVED_FROM_HEADER, "cache"),
          ),
          None => Fetched::Unavailable(error),
        }
      }
    }
  }

  /// Cache-first strategy.
  ///
  /// 1. Serve any cached entry directly, with no network call
  /// 2. On a miss, fetch from the network; cache same-origin 200 responses
  /// 3. On network failure, report the request as unavailable
  pub async fn cache_first<N: Network + ?Sized>(&self, network: &N, request: &Request) -> Fetched {
    let key = request.cache_key();

    if let Some(entry) = key.as_ref().and_then(|k| self.lookup(k)) {
      return Fetched::Cached(entry.into_response(ResponseSource::Cache));
    }

    match network.fetch(request).await {
      Ok(response) => {
        if let Some(key) = key {
          if response.status == 200 && response.response_type == ResponseType::Basic {
            self.store_in_background(key, &response);
          }
        }
        Fetched::Live(response)
      }
      Err(error) => Fetched::Unavailable(error),
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      namespace: self.namespace.clone(),
    }
  }
}
