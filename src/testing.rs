//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::{CacheLayer, CacheStorage, CachedResponse};
use crate::net::{Network, Request, RequestKey, Response};
use crate::queue::{NewMutation, QueueStore, QueuedMutation};
use crate::sync::SyncScheduler;

// ============================================================================
// Mock Network
// ============================================================================

/// Network with canned per-URL responses.
///
/// Unknown URLs answer 404. URLs marked with `fail` and every URL while
/// offline reject as a transport failure. Every call is recorded.
pub struct MockNetwork {
  routes: HashMap<String, Response>,
  failing: HashSet<String>,
  offline: AtomicBool,
  calls: Mutex<Vec<Request>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self {
      routes: HashMap::new(),
      failing: HashSet::new(),
      offline: AtomicBool::new(false),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn offline() -> Self {
    let network = Self::new();
    network.set_offline(true);
    network
  }

  pub fn respond(mut self, url: &str, response: Response) -> Self {
    self.routes.insert(url.to_string(), response);
    self
  }

  pub fn fail(mut self, url: &str) -> Self {
    self.failing.insert(url.to_string());
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, url: &str) -> Vec<Request> {
    self.calls().into_iter().filter(|r| r.url == url).collect()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.lock().unwrap().push(request.clone());

    if self.offline.load(Ordering::SeqCst) || self.failing.contains(&request.url) {
      return Err(eyre!("network unreachable: {}", request.url));
    }

    Ok(
      self
        .routes
        .get(&request.url)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "not found")),
    )
  }
}

// ============================================================================
// In-memory Queue
// ============================================================================

/// Queue fake. Keeps records newest-first internally so ordering bugs in
/// callers relying on insertion order show up.
pub struct MemoryQueue {
  records: Mutex<Vec<QueuedMutation>>,
  next_id: AtomicI64,
  fail_all: AtomicBool,
  fail_removals: AtomicBool,
}

impl MemoryQueue {
  pub fn new() -> Self {
    Self {
      records: Mutex::new(Vec::new()),
      next_id: AtomicI64::new(1),
      fail_all: AtomicBool::new(false),
      fail_removals: AtomicBool::new(false),
    }
  }

  pub fn fail_all(&self, fail: bool) {
    self.fail_all.store(fail, Ordering::SeqCst);
  }

  pub fn fail_removals(&self, fail: bool) {
    self.fail_removals.store(fail, Ordering::SeqCst);
  }

  pub fn len(&self) -> usize {
    self.records.lock().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn check(&self) -> Result<()> {
    if self.fail_all.load(Ordering::SeqCst) {
      return Err(eyre!("queue storage unavailable"));
    }
    Ok(())
  }
}

#[async_trait]
impl QueueStore for MemoryQueue {
  async fn enqueue(&self, mutation: NewMutation) -> Result<i64> {
    self.check()?;
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    self
      .records
      .lock()
      .unwrap()
      .insert(0, QueuedMutation::from_new(id, mutation));
    Ok(id)
  }

  async fn list_all(&self) -> Result<Vec<QueuedMutation>> {
    self.check()?;
    let mut records = self.records.lock().unwrap().clone();
    records.sort_by_key(|m| (m.enqueued_at, m.id));
    Ok(records)
  }

  async fn remove(&self, id: i64) -> Result<()> {
    self.check()?;
    if self.fail_removals.load(Ordering::SeqCst) {
      return Err(eyre!("remove failed"));
    }
    self.records.lock().unwrap().retain(|m| m.id != id);
    Ok(())
  }
}

// ============================================================================
// Mock Scheduler
// ============================================================================

pub struct MockScheduler {
  registered: Mutex<Vec<String>>,
  unsupported: AtomicBool,
}

impl MockScheduler {
  pub fn new() -> Self {
    Self {
      registered: Mutex::new(Vec::new()),
      unsupported: AtomicBool::new(false),
    }
  }

  pub fn set_unsupported(&self, unsupported: bool) {
    self.unsupported.store(unsupported, Ordering::SeqCst);
  }

  pub fn registered(&self) -> Vec<String> {
    self.registered.lock().unwrap().clone()
  }
}

#[async_trait]
impl SyncScheduler for MockScheduler {
  async fn register(&self, tag: &str) -> Result<()> {
    if self.unsupported.load(Ordering::SeqCst) {
      return Err(eyre!("background sync not supported"));
    }
    let mut registered = self.registered.lock().unwrap();
    if !registered.iter().any(|t| t == tag) {
      registered.push(tag.to_string());
    }
    Ok(())
  }
}

/// Wait for a background cache write to land.
pub async fn wait_for_entry<S: CacheStorage + 'static>(
  cache: &CacheLayer<S>,
  key: &RequestKey,
) -> Option<CachedResponse> {
  for _ in 0..50 {
    if let Some(entry) = cache.lookup(key) {
      return Some(entry);
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  None
}

#[tokio::test]
async fn test_memory_queue_lists_by_enqueue_time() {
  let queue = MemoryQueue::new();
  for at in [30, 10, 20] {
    queue
      .enqueue(NewMutation {
        url: format!("http://localhost/api/{}", at),
        method: crate::net::Method::Post,
        headers: Vec::new(),
        body: String::new(),
        enqueued_at: at,
      })
      .await
      .unwrap();
  }

  let order: Vec<i64> = queue
    .list_all()
    .await
    .unwrap()
    .iter()
    .map(|m| m.enqueued_at)
    .collect();
  assert_eq!(order, vec![10, 20, 30]);
}
