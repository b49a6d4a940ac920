//! Wires the router, lifecycle manager and sync coordinator onto a host.

use color_eyre::Result;
use futures::FutureExt;
use std::sync::Arc;
use tracing::warn;

use crate::cache::{CacheLayer, CacheStorage};
use crate::config::Config;
use crate::host::{Host, LifecyclePhase};
use crate::lifecycle::LifecycleManager;
use crate::net::{Network, Request};
use crate::queue::QueueStore;
use crate::router::Router;
use crate::sync::{SyncCoordinator, SyncScheduler};

pub struct Engine<S: CacheStorage> {
  router: Arc<Router<S>>,
  lifecycle: Arc<LifecycleManager<S>>,
  sync: Arc<SyncCoordinator>,
}

impl<S: CacheStorage + 'static> Engine<S> {
  pub fn new(
    config: Arc<Config>,
    storage: Arc<S>,
    network: Arc<dyn Network>,
    queue: Arc<dyn QueueStore>,
    scheduler: Arc<dyn SyncScheduler>,
  ) -> Self {
    let cache = CacheLayer::new(storage, config.cache_name.clone());

    let router = Router::new(
      Arc::clone(&config),
      cache.clone(),
      Arc::clone(&network),
      Arc::clone(&queue),
    );
    let lifecycle = LifecycleManager::new(Arc::clone(&config), cache, Arc::clone(&network));
    let sync = SyncCoordinator::new(queue, network, scheduler, config.sync_tag.clone());

    Self {
      router: Arc::new(router),
      lifecycle: Arc::new(lifecycle),
      sync: Arc::new(sync),
    }
  }

  /// Register every engine handler on `host`.
  pub fn bind(&self, host: &mut Host) {
    let router = Arc::clone(&self.router);
    let sync = Arc::clone(&self.sync);
    host.intercept(is_http, move |request| {
      let router = Arc::clone(&router);
      let sync = Arc::clone(&sync);
      async move {
        let routed = router.handle(request).await?;
        if routed.queued.is_some() {
          if let Err(e) = sync.request_sync().await {
            warn!(error = %e, "Failed to schedule replay of queued mutation");
          }
        }
        Ok(routed.response)
      }
      .boxed()
    });

    let lifecycle = Arc::clone(&self.lifecycle);
    host.on_lifecycle(LifecyclePhase::Install, move |control| {
      let lifecycle = Arc::clone(&lifecycle);
      async move { lifecycle.install(&control).await.map(|_| ()) }.boxed()
    });

    let lifecycle = Arc::clone(&self.lifecycle);
    host.on_lifecycle(LifecyclePhase::Activate, move |control| {
      let lifecycle = Arc::clone(&lifecycle);
      async move { lifecycle.activate(&control).await.map(|_| ()) }.boxed()
    });

    let sync = Arc::clone(&self.sync);
    host.on_message(move |message| {
      let sync = Arc::clone(&sync);
      async move {
        if let Err(e) = sync.handle_message(&message).await {
          warn!(error = %e, "Replay after connectivity change failed");
        }
      }
      .boxed()
    });

    let sync = Arc::clone(&self.sync);
    host.on_sync(move |tag| {
      let sync = Arc::clone(&sync);
      async move { sync.handle_sync(&tag).await }.boxed()
    });
  }
}

/// Configuration for a later run that resumes the active worker.
///
/// The active namespace differs from `config.cache_name` when an upgrade
/// failed to install; the previous worker then keeps serving from its own
/// namespace. Returns `None` when no worker was ever activated.
pub fn resume_config<S: CacheStorage + ?Sized>(config: &Config, storage: &S) -> Result<Option<Config>> {
  let Some(active) = storage.active()? else {
    return Ok(None);
  };

  if active != config.cache_name {
    warn!(
      active = %active,
      configured = %config.cache_name,
      "Configured cache is not installed, serving from the active one"
    );
  }

  Ok(Some(Config {
    cache_name: active,
    ..config.clone()
  }))
}

fn is_http(request: &Request) -> bool {
  request.url.starts_with("http://") || request.url.starts_with("https://")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::host::{ClientMessage, WorkerState};
  use crate::net::{Method, RequestKey, Response, ResponseSource, SERVED_FROM_HEADER};
  use crate::testing::{wait_for_entry, MemoryQueue, MockNetwork, MockScheduler};

  struct Harness {
    host: Host,
    network: Arc<MockNetwork>,
    queue: Arc<MemoryQueue>,
    scheduler: Arc<MockScheduler>,
    storage: Arc<SqliteStorage>,
    config: Arc<Config>,
  }

  fn harness(precache: &[&str], network: MockNetwork) -> Harness {
    let config = Arc::new(Config {
      precache: precache.iter().map(|p| p.to_string()).collect(),
      ..Config::default()
    });
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(network);
    let queue = Arc::new(MemoryQueue::new());
    let scheduler = Arc::new(MockScheduler::new());

    let engine = Engine::new(
      Arc::clone(&config),
      Arc::clone(&storage),
      network.clone(),
      queue.clone(),
      scheduler.clone(),
    );
    let mut host = Host::new();
    engine.bind(&mut host);

    Harness {
      host,
      network,
      queue,
      scheduler,
      storage,
      config,
    }
  }

  fn site() -> MockNetwork {
    MockNetwork::new()
      .respond("http://localhost:3000/", Response::new(200, "<html>home</html>"))
      .respond("http://localhost:3000/offline.html", Response::new(200, "<html>offline</html>"))
  }

  #[tokio::test]
  async fn test_install_and_activate_populate_current_cache() {
    let mut h = harness(&["/", "/offline.html"], site());

    assert_eq!(h.host.start().await.unwrap(), WorkerState::Activated);
    assert!(h.host.controls_clients());
    assert_eq!(h.storage.entry_count(&h.config.cache_name).unwrap(), 2);
    assert!(h
      .storage
      .lookup(&h.config.cache_name, &RequestKey::get("http://localhost:3000/offline.html"))
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_failed_precache_leaves_nothing_behind() {
    let network = MockNetwork::new()
      .respond("http://localhost:3000/", Response::new(200, "home"))
      .fail("http://localhost:3000/offline.html");
    let mut h = harness(&["/", "/offline.html"], network);

    assert!(h.host.start().await.is_err());
    assert_eq!(h.host.state(), WorkerState::Redundant);
    assert_eq!(h.storage.entry_count(&h.config.cache_name).unwrap(), 0);
    assert!(h.host.fetch(Request::get("http://localhost:3000/")).await.is_none());
  }

  #[tokio::test]
  async fn test_offline_read_after_online_read() {
    let url = "http://localhost:3000/api/hunters";
    let mut h = harness(&[], MockNetwork::new().respond(url, Response::new(200, r#"[{"id":1}]"#)));
    h.host.start().await.unwrap();

    let live = h.host.fetch(Request::get(url)).await.unwrap().unwrap();
    assert_eq!(live.source, ResponseSource::Network);

    let cache = CacheLayer::new(Arc::clone(&h.storage), h.config.cache_name.clone());
    wait_for_entry(&cache, &RequestKey::get(url)).await.unwrap();

    h.network.set_offline(true);
    let cached = h.host.fetch(Request::get(url)).await.unwrap().unwrap();
    assert_eq!(cached.source, ResponseSource::Cache);
    assert_eq!(cached.header(SERVED_FROM_HEADER), Some("cache"));
    assert_eq!(cached.body, br#"[{"id":1}]"#);
  }

  #[tokio::test]
  async fn test_offline_post_queued_then_replayed_by_sync_event() {
    let url = "http://localhost:3000/api/taxes";
    let mut h = harness(&[], MockNetwork::new().respond(url, Response::new(201, "{}")));
    h.host.start().await.unwrap();

    h.network.set_offline(true);
    let request = Request::new(Method::Post, url)
      .with_header("content-type", "application/json")
      .with_body(r#"{"permit":"P-77","amount":40}"#);
    let response = h.host.fetch(request).await.unwrap().unwrap();

    assert_eq!(response.status, 503);
    assert_eq!(h.queue.len(), 1);
    assert_eq!(h.scheduler.registered(), vec!["sync-mutations".to_string()]);

    h.network.set_offline(false);
    h.host.fire_sync("sync-mutations").await.unwrap();

    assert_eq!(h.queue.len(), 0);
    let calls = h.network.calls_to(url);
    // One failed live attempt, one replay
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].body.as_deref(), Some(r#"{"permit":"P-77","amount":40}"#));
    assert_eq!(
      calls[1].headers,
      vec![("content-type".to_string(), "application/json".to_string())]
    );
  }

  #[tokio::test]
  async fn test_online_message_replays_queue() {
    let url = "http://localhost:3000/api/permits/5";
    let mut h = harness(&[], MockNetwork::new().respond(url, Response::new(200, "")));
    h.host.start().await.unwrap();

    h.network.set_offline(true);
    h.host
      .fetch(Request::new(Method::Delete, url))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(h.queue.len(), 1);

    h.network.set_offline(false);
    h.host
      .post_message(ClientMessage::OnlineStatusChange { online: true })
      .await;
    assert_eq!(h.queue.len(), 0);
  }

  #[tokio::test]
  async fn test_non_http_requests_are_not_intercepted() {
    let mut h = harness(&[], MockNetwork::new());
    h.host.start().await.unwrap();

    let request = Request::get("chrome-extension://abc/script.js");
    assert!(h.host.fetch(request).await.is_none());
  }

  #[test]
  fn test_resume_config_without_activation() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(resume_config(&Config::default(), &storage).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_failed_upgrade_keeps_serving_previous_namespace() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let v1 = Config {
      precache: vec!["/".to_string(), "/offline.html".to_string()],
      ..Config::default()
    };

    let mut host = Host::new();
    Engine::new(
      Arc::new(v1.clone()),
      Arc::clone(&storage),
      Arc::new(site()),
      Arc::new(MemoryQueue::new()),
      Arc::new(MockScheduler::new()),
    )
    .bind(&mut host);
    host.start().await.unwrap();

    let v2 = Config {
      cache_name: "permits-cache-v2".to_string(),
      ..v1
    };
    let offline = Arc::new(MockNetwork::offline());
    let mut upgrade = Host::new();
    Engine::new(
      Arc::new(v2.clone()),
      Arc::clone(&storage),
      offline.clone(),
      Arc::new(MemoryQueue::new()),
      Arc::new(MockScheduler::new()),
    )
    .bind(&mut upgrade);
    assert!(upgrade.start().await.is_err());

    let resumed = resume_config(&v2, storage.as_ref()).unwrap().unwrap();
    assert_eq!(resumed.cache_name, "permits-cache-v1");

    let queue = Arc::new(MemoryQueue::new());
    let mut host = Host::new();
    Engine::new(
      Arc::new(resumed),
      Arc::clone(&storage),
      offline.clone(),
      queue.clone(),
      Arc::new(MockScheduler::new()),
    )
    .bind(&mut host);
    host.resume().unwrap();

    let page = host
      .fetch(Request::navigate("http://localhost:3000/permits/1"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(page.source, ResponseSource::OfflineFallback);
    assert_eq!(page.text(), "<html>offline</html>");

    let write = host
      .fetch(Request::new(Method::Post, "http://localhost:3000/api/permits").with_body("{}"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(write.status, 503);
    assert_eq!(queue.len(), 1);
  }
}
