//! In-process interception host.
//!
//! Stands in for the platform that delivers lifecycle phases, outgoing
//! requests, page messages and deferred sync events to the engine. Handlers
//! are registered up front and dispatched by the `install`, `activate`,
//! `fetch`, `post_message` and `fire_sync` entry points.

mod message;

pub use message::ClientMessage;

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::net::{Request, Response};

type FetchPredicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;
type FetchHandler = Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Response>> + Send + Sync>;
type LifecycleHandler = Arc<dyn Fn(HostControl) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type MessageHandler = Arc<dyn Fn(ClientMessage) -> BoxFuture<'static, ()> + Send + Sync>;
type SyncHandler = Arc<dyn Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Lifecycle phase a handler is registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
  Install,
  Activate,
}

/// State of the worker hosted by this host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  /// Installed and waiting to activate
  Installed,
  Activating,
  Activated,
  /// Failed to install or activate; never serves requests
  Redundant,
}

/// Handle passed to lifecycle handlers.
#[derive(Debug, Clone, Default)]
pub struct HostControl {
  skip_waiting: Arc<AtomicBool>,
  claimed: Arc<AtomicBool>,
}

impl HostControl {
  /// Activate as soon as install finishes instead of waiting.
  pub fn skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::SeqCst);
  }

  /// Take control of every already-open page without a reload.
  pub fn claim(&self) {
    self.claimed.store(true, Ordering::SeqCst);
  }

  pub fn is_skipping_waiting(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  pub fn is_claimed(&self) -> bool {
    self.claimed.load(Ordering::SeqCst)
  }
}

pub struct Host {
  state: WorkerState,
  control: HostControl,
  interceptors: Vec<(FetchPredicate, FetchHandler)>,
  lifecycle: Vec<(LifecyclePhase, LifecycleHandler)>,
  message_handlers: Vec<MessageHandler>,
  sync_handlers: Vec<SyncHandler>,
}

impl Default for Host {
  fn default() -> Self {
    Self::new()
  }
}

impl Host {
  pub fn new() -> Self {
    Self {
      state: WorkerState::Parsed,
      control: HostControl::default(),
      interceptors: Vec::new(),
      lifecycle: Vec::new(),
      message_handlers: Vec::new(),
      sync_handlers: Vec::new(),
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Whether the active worker has claimed the open pages.
  pub fn controls_clients(&self) -> bool {
    self.state == WorkerState::Activated && self.control.is_claimed()
  }

  /// Answer every request matching `predicate` with `handler`.
  pub fn intercept<P, H>(&mut self, predicate: P, handler: H)
  where
    P: Fn(&Request) -> bool + Send + Sync + 'static,
    H: Fn(Request) -> BoxFuture<'static, Result<Response>> + Send + Sync + 'static,
  {
    self
      .interceptors
      .push((Arc::new(predicate), Arc::new(handler)));
  }

  pub fn on_lifecycle<H>(&mut self, phase: LifecyclePhase, handler: H)
  where
    H: Fn(HostControl) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
  {
    self.lifecycle.push((phase, Arc::new(handler)));
  }

  pub fn on_message<H>(&mut self, handler: H)
  where
    H: Fn(ClientMessage) -> BoxFuture<'static, ()> + Send + Sync + 'static,
  {
    self.message_handlers.push(Arc::new(handler));
  }

  pub fn on_sync<H>(&mut self, handler: H)
  where
    H: Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
  {
    self.sync_handlers.push(Arc::new(handler));
  }

  async fn run_phase(&self, phase: LifecyclePhase) -> Result<()> {
    for (_, handler) in self.lifecycle.iter().filter(|(p, _)| *p == phase) {
      handler(self.control.clone()).await?;
    }
    Ok(())
  }

  /// Run the install phase. On failure the worker becomes redundant and
  /// whatever was serving before keeps serving.
  pub async fn install(&mut self) -> Result<()> {
    if self.state != WorkerState::Parsed {
      return Err(eyre!("Cannot install a worker in state {:?}", self.state));
    }

    self.state = WorkerState::Installing;
    match self.run_phase(LifecyclePhase::Install).await {
      Ok(()) => {
        self.state = WorkerState::Installed;
        info!("Worker installed");
        Ok(())
      }
      Err(e) => {
        self.state = WorkerState::Redundant;
        warn!(error = %e, "Install failed, worker is redundant");
        Err(e)
      }
    }
  }

  /// Run the activate phase on an installed worker.
  pub async fn activate(&mut self) -> Result<()> {
    if self.state != WorkerState::Installed {
      return Err(eyre!("Cannot activate a worker in state {:?}", self.state));
    }

    self.state = WorkerState::Activating;
    match self.run_phase(LifecyclePhase::Activate).await {
      Ok(()) => {
        self.state = WorkerState::Activated;
        info!(claimed = self.control.is_claimed(), "Worker activated");
        Ok(())
      }
      Err(e) => {
        self.state = WorkerState::Redundant;
        warn!(error = %e, "Activation failed, worker is redundant");
        Err(e)
      }
    }
  }

  /// Install, then activate right away if the install handlers asked to
  /// skip waiting. Returns the resulting state.
  pub async fn start(&mut self) -> Result<WorkerState> {
    self.install().await?;
    if self.control.is_skipping_waiting() {
      self.activate().await?;
    } else {
      debug!("Worker installed and waiting");
    }
    Ok(self.state)
  }

  /// Adopt a worker that an earlier process already installed and
  /// activated. No lifecycle handlers run.
  pub fn resume(&mut self) -> Result<()> {
    if self.state != WorkerState::Parsed {
      return Err(eyre!("Cannot resume a worker in state {:?}", self.state));
    }
    self.control.claim();
    self.state = WorkerState::Activated;
    debug!("Resumed previously activated worker");
    Ok(())
  }

  /// Dispatch a request to the first matching interceptor.
  ///
  /// Returns `None` when no active worker handles the request; the caller
  /// then goes to the network itself.
  pub async fn fetch(&self, request: Request) -> Option<Result<Response>> {
    if self.state != WorkerState::Activated {
      return None;
    }

    let (_, handler) = self
      .interceptors
      .iter()
      .find(|(predicate, _)| predicate(&request))?;
    Some(handler(request).await)
  }

  /// Deliver a page message to every message handler.
  pub async fn post_message(&self, message: ClientMessage) {
    for handler in &self.message_handlers {
      handler(message.clone()).await;
    }
  }

  /// Fire a deferred sync event. Fails if any handler fails, so the
  /// platform may fire it again later.
  pub async fn fire_sync(&self, tag: &str) -> Result<()> {
    for handler in &self.sync_handlers {
      handler(tag.to_string()).await?;
    }
    Ok(())
  }
}
