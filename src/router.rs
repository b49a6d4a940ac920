//! Request routing: picks a caching strategy per request and substitutes
//! offline responses when neither network nor cache can answer.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheLayer, CacheStorage, Fetched};
use crate::config::Config;
use crate::net::{Network, Request, RequestKey, Response, ResponseSource};
use crate::queue::{NewMutation, QueueStore};

/// Caching strategy applied to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Data API requests: live first, cache as fallback
  NetworkFirst,
  /// Everything else: cache first, live on a miss
  CacheFirst,
}

/// Response handed back to the page, plus the id of the mutation queued
/// while producing it, if any.
#[derive(Debug)]
pub struct Routed {
  pub response: Response,
  pub queued: Option<i64>,
}

pub struct Router<S: CacheStorage> {
  config: Arc<Config>,
  cache: CacheLayer<S>,
  network: Arc<dyn Network>,
  queue: Arc<dyn QueueStore>,
}

impl<S: CacheStorage + 'static> Router<S> {
  pub fn new(
    config: Arc<Config>,
    cache: CacheLayer<S>,
    network: Arc<dyn Network>,
    queue: Arc<dyn QueueStore>,
  ) -> Self {
    Self {
      config,
      cache,
      network,
      queue,
    }
  }

  pub fn classify(&self, request: &Request) -> Strategy {
    if self.config.is_api_path(&request.path()) {
      Strategy::NetworkFirst
    } else {
      Strategy::CacheFirst
    }
  }

  /// Answer one intercepted request.
  ///
  /// Network failures never surface as errors. The only error is a failure
  /// to persist a mutation that could not be delivered.
  pub async fn handle(&self, request: Request) -> Result<Routed> {
    let strategy = self.classify(&request);
    debug!(url = %request.url, method = %request.method, ?strategy, "Routing request");

    match strategy {
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::CacheFirst => {
        let response = match self.cache.cache_first(self.network.as_ref(), &request).await {
          Fetched::Live(response) | Fetched::Cached(response) => response,
          Fetched::Unavailable(error) => {
            debug!(url = %request.url, error = %error, "Static request unavailable");
            self.fallback(&request)
          }
        };
        Ok(Routed {
          response,
          queued: None,
        })
      }
    }
  }

  async fn network_first(&self, request: Request) -> Result<Routed> {
    let (response, live_failed) = match self.cache.network_first(self.network.as_ref(), &request).await {
      Fetched::Live(response) => (response, false),
      Fetched::Cached(response) => (response, true),
      Fetched::Unavailable(error) => {
        debug!(url = %request.url, error = %error, "Dynamic request unavailable");
        (self.fallback(&request), true)
      }
    };

    let queued = if live_failed && request.method.is_mutating() {
      let id = self.queue.enqueue(NewMutation::from_request(&request)).await?;
      debug!(id, url = %request.url, method = %request.method, "Queued mutation for replay");
      Some(id)
    } else {
      None
    };

    Ok(Routed { response, queued })
  }

  /// Offline page for navigations, plain-text 503 for everything else.
  fn fallback(&self, request: &Request) -> Response {
    if request.is_navigation() {
      match self.config.offline_url() {
        Ok(url) => {
          if let Some(entry) = self.cache.lookup(&RequestKey::get(url)) {
            return entry.into_response(ResponseSource::OfflineFallback);
          }
          warn!("Offline page missing from cache");
        }
        Err(e) => warn!(error = %e, "Could not resolve offline page"),
      }
    }
    Response::service_unavailable()
  }
}
