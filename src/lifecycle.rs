//! Install-time precaching and activation-time cache cleanup.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheLayer, CacheStorage, CachedResponse};
use crate::config::Config;
use crate::host::HostControl;
use crate::net::{Network, Request, RequestKey};

pub struct LifecycleManager<S: CacheStorage> {
  config: Arc<Config>,
  cache: CacheLayer<S>,
  network: Arc<dyn Network>,
}

impl<S: CacheStorage + 'static> LifecycleManager<S> {
  pub fn new(config: Arc<Config>, cache: CacheLayer<S>, network: Arc<dyn Network>) -> Self {
    Self {
      config,
      cache,
      network,
    }
  }

  async fn precache_one(&self, url: String) -> Result<(RequestKey, CachedResponse)> {
    let response = self
      .network
      .fetch(&Request::get(url.clone()))
      .await
      .map_err(|e| eyre!("Failed to precache {}: {}", url, e))?;

    if !response.ok() {
      return Err(eyre!("Failed to precache {}: status {}", url, response.status));
    }

    debug!(url = %url, bytes = response.body.len(), "Precached");
    Ok((RequestKey::get(url), CachedResponse::snapshot(&response)))
  }

  /// Fetch the whole precache manifest into the current namespace.
  ///
  /// All fetches must succeed before anything is written; the write is a
  /// single transaction. On success the new worker skips waiting. Returns
  /// the number of cached entries.
  pub async fn install(&self, control: &HostControl) -> Result<usize> {
    let urls = self
      .config
      .precache
      .iter()
      .map(|path| self.config.resolve(path))
      .collect::<Result<Vec<_>>>()?;

    let entries = try_join_all(urls.into_iter().map(|url| self.precache_one(url))).await?;

    let storage = Arc::clone(self.cache.storage());
    let namespace = self.cache.namespace().to_string();
    let count = entries.len();
    tokio::task::spawn_blocking(move || storage.put_all(&namespace, &entries))
      .await
      .map_err(|e| eyre!("Precache write task panicked: {}", e))??;

    info!(namespace = %self.cache.namespace(), entries = count, "Precache complete");
    control.skip_waiting();
    Ok(count)
  }

  /// Delete every namespace except the current one, record it as active,
  /// then claim open pages. Returns the deleted namespace names.
  pub async fn activate(&self, control: &HostControl) -> Result<Vec<String>> {
    let current = self.cache.namespace();
    let mut deleted = Vec::new();

    for name in self.cache.storage().namespaces()? {
      if name != current {
        self.cache.storage().delete_namespace(&name)?;
        info!(namespace = %name, "Deleted stale cache namespace");
        deleted.push(name);
      }
    }

    self.cache.storage().set_active(current)?;
    control.claim();
    Ok(deleted)
  }
}
