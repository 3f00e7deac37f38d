//! The registration container: which worker controls the shell, which one
//! is waiting, and the message channel between the page and the workers.

use std::sync::{
  Arc,
  atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::{
  Result,
  cache::CacheStorage,
  network::Network,
  request::FetchRequest,
  response::FetchResponse,
  worker::{FetchOutcome, ServiceWorker, WorkerConfig},
};

/// Messages the page may post to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  /// Activate the waiting worker now.
  SkipWaiting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
  Installing { worker: u64 },
  /// Installed while another worker controls the shell.
  Waiting { worker: u64 },
  Activated { worker: u64, evicted: Vec<String> },
  ControllerChange { worker: u64 },
  Redundant { worker: u64 },
}

struct Slots<N> {
  installing: Option<Arc<ServiceWorker<N>>>,
  waiting:    Option<Arc<ServiceWorker<N>>>,
  active:     Option<Arc<ServiceWorker<N>>>,
}

pub struct Registration<N> {
  caches:  CacheStorage,
  network: Arc<N>,
  slots:   Mutex<Slots<N>>,
  events:  broadcast::Sender<LifecycleEvent>,
  next_id: AtomicU64,
}

impl<N: Network> Registration<N> {
  pub fn new(caches: CacheStorage, network: Arc<N>) -> Self {
    let (events, _) = broadcast::channel(64);
    Self {
      caches,
      network,
      slots: Mutex::new(Slots { installing: None, waiting: None, active: None }),
      events,
      next_id: AtomicU64::new(1),
    }
  }

  pub fn caches(&self) -> &CacheStorage { &self.caches }

  pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
    self.events.subscribe()
  }

  pub fn controller(&self) -> Option<Arc<ServiceWorker<N>>> {
    self.slots.lock().active.clone()
  }

  pub fn waiting(&self) -> Option<Arc<ServiceWorker<N>>> {
    self.slots.lock().waiting.clone()
  }

  pub fn installing(&self) -> Option<Arc<ServiceWorker<N>>> {
    self.slots.lock().installing.clone()
  }

  fn emit(&self, event: LifecycleEvent) {
    // No subscribers is fine.
    let _ = self.events.send(event);
  }

  /// Install a new worker generation. With no controller it activates and
  /// claims the shell at once; otherwise it waits for
  /// [`WorkerMessage::SkipWaiting`], replacing any older waiting worker.
  pub async fn register(
    &self,
    config: WorkerConfig,
  ) -> Result<Arc<ServiceWorker<N>>> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let worker = Arc::new(ServiceWorker::new(
      id,
      Arc::new(config),
      self.caches.clone(),
      self.network.clone(),
    ));
    self.slots.lock().installing = Some(worker.clone());
    self.emit(LifecycleEvent::Installing { worker: id });

    let installed = worker.install().await;

    let mut events = Vec::new();
    {
      let mut slots = self.slots.lock();
      if slots.installing.as_ref().is_some_and(|w| w.id() == id) {
        slots.installing = None;
      }
      if let Err(e) = installed {
        drop(slots);
        self.emit(LifecycleEvent::Redundant { worker: id });
        return Err(e);
      }

      if slots.active.is_none() {
        let evicted = worker.activate()?;
        slots.active = Some(worker.clone());
        events.push(LifecycleEvent::Activated { worker: id, evicted });
        events.push(LifecycleEvent::ControllerChange { worker: id });
      } else {
        if let Some(stale) = slots.waiting.replace(worker.clone()) {
          stale.make_redundant();
          events.push(LifecycleEvent::Redundant { worker: stale.id() });
        }
        events.push(LifecycleEvent::Waiting { worker: id });
      }
    }
    let claimed = matches!(events.last(), Some(LifecycleEvent::ControllerChange { .. }));
    for event in events {
      self.emit(event);
    }
    if claimed {
      worker.warm_assets().await;
    }
    Ok(worker)
  }

  /// Deliver a message from the page. Returns whether it changed anything.
  pub async fn post_message(&self, message: WorkerMessage) -> Result<bool> {
    match message {
      WorkerMessage::SkipWaiting => {
        let mut events = Vec::new();
        let promoted = {
          let mut slots = self.slots.lock();
          let Some(next) = slots.waiting.take() else {
            tracing::debug!("skip waiting with no waiting worker");
            return Ok(false);
          };
          let evicted = match next.activate() {
            Ok(evicted) => evicted,
            Err(e) => {
              slots.waiting = Some(next);
              return Err(e);
            }
          };
          if let Some(old) = slots.active.replace(next.clone()) {
            old.make_redundant();
            events.push(LifecycleEvent::Redundant { worker: old.id() });
          }
          events.push(LifecycleEvent::Activated { worker: next.id(), evicted });
          events.push(LifecycleEvent::ControllerChange { worker: next.id() });
          next
        };
        for event in events {
          self.emit(event);
        }
        promoted.warm_assets().await;
        Ok(true)
      }
    }
  }

  /// Route a page request through the controlling worker, or straight to
  /// the network when nothing controls the shell or the worker passes.
  pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    if let Some(worker) = self.controller()
      && let FetchOutcome::Respond(response) = worker.handle_fetch(request).await
    {
      return Ok(response);
    }
    self.network.fetch(request).await
  }

  /// Spawn the worker side of the message channel.
  pub fn spawn_message_loop(self: &Arc<Self>) -> mpsc::Sender<WorkerMessage> {
    let (tx, mut rx) = mpsc::channel(16);
    let this = Arc::clone(self);
    tokio::spawn(async move {
      while let Some(message) = rx.recv().await {
        match this.post_message(message).await {
          Ok(changed) => tracing::debug!(?message, changed, "worker message"),
          Err(e) => tracing::warn!(?message, error = %e, "worker message failed"),
        }
      }
    });
    tx
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{testing::FakeNetwork, worker::WorkerState};

  fn config(version: &str) -> WorkerConfig {
    WorkerConfig {
      origin:        "http://lumina.test".parse().unwrap(),
      cache_version: version.into(),
      core_assets:   vec!["/".into()],
      assets_prefix: "/assets/".into(),
      offline_page:  Some("/index.html".into()),
    }
  }

  fn registration(net: &FakeNetwork) -> Registration<FakeNetwork> {
    Registration::new(CacheStorage::new(), Arc::new(net.clone()))
  }

  fn drain(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
  }

  #[test]
  fn skip_waiting_wire_format() {
    let json = serde_json::to_string(&WorkerMessage::SkipWaiting).unwrap();
    assert_eq!(json, r#"{"type":"SKIP_WAITING"}"#);
    let parsed: WorkerMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, WorkerMessage::SkipWaiting);
    assert!(serde_json::from_str::<WorkerMessage>(r#"{"type":"CLAIM"}"#).is_err());
  }

  #[tokio::test]
  async fn first_worker_claims_immediately() {
    let reg = registration(&FakeNetwork::shell());
    let mut rx = reg.subscribe();
    let sw = reg.register(config("v1")).await.unwrap();

    assert_eq!(sw.state(), WorkerState::Active);
    assert_eq!(reg.controller().map(|w| w.id()), Some(sw.id()));
    assert_eq!(drain(&mut rx), [
      LifecycleEvent::Installing { worker: 1 },
      LifecycleEvent::Activated { worker: 1, evicted: vec![] },
      LifecycleEvent::ControllerChange { worker: 1 },
    ]);
  }

  #[tokio::test]
  async fn second_worker_waits_until_skip_waiting() {
    let reg = registration(&FakeNetwork::shell());
    let first = reg.register(config("v1")).await.unwrap();
    let mut rx = reg.subscribe();
    let second = reg.register(config("v2")).await.unwrap();

    assert_eq!(second.state(), WorkerState::Waiting);
    assert_eq!(reg.controller().map(|w| w.id()), Some(first.id()));
    assert_eq!(reg.caches().keys(), ["v1", "v2"]);

    assert!(reg.post_message(WorkerMessage::SkipWaiting).await.unwrap());
    assert_eq!(second.state(), WorkerState::Active);
    assert_eq!(first.state(), WorkerState::Redundant);
    assert_eq!(reg.caches().keys(), ["v2"]);
    assert!(reg.waiting().is_none());

    assert_eq!(drain(&mut rx), [
      LifecycleEvent::Installing { worker: 2 },
      LifecycleEvent::Waiting { worker: 2 },
      LifecycleEvent::Redundant { worker: 1 },
      LifecycleEvent::Activated { worker: 2, evicted: vec!["v1".into()] },
      LifecycleEvent::ControllerChange { worker: 2 },
    ]);

    assert!(!reg.post_message(WorkerMessage::SkipWaiting).await.unwrap());
  }

  #[tokio::test]
  async fn newer_waiting_worker_replaces_older() {
    let reg = registration(&FakeNetwork::shell());
    reg.register(config("v1")).await.unwrap();
    let stale = reg.register(config("v2")).await.unwrap();
    let fresh = reg.register(config("v3")).await.unwrap();
    assert_eq!(stale.state(), WorkerState::Redundant);
    assert_eq!(reg.waiting().map(|w| w.id()), Some(fresh.id()));
  }

  #[tokio::test]
  async fn failed_install_leaves_controller_alone() {
    let net = FakeNetwork::shell();
    let reg = registration(&net);
    let first = reg.register(config("v1")).await.unwrap();
    net.set_online(false);
    assert!(reg.register(config("v2")).await.is_err());
    assert!(reg.waiting().is_none());
    assert!(reg.installing().is_none());
    assert_eq!(reg.controller().map(|w| w.id()), Some(first.id()));
    assert_eq!(reg.caches().keys(), ["v1"]);
  }

  #[tokio::test]
  async fn uncontrolled_fetch_goes_to_network() {
    let net = FakeNetwork::shell();
    let reg = registration(&net);
    let req = FetchRequest::get("http://lumina.test/assets/app.js").unwrap();
    assert!(reg.fetch(&req).await.unwrap().is_ok());
    net.set_online(false);
    assert!(reg.fetch(&req).await.is_err());
  }

  #[tokio::test]
  async fn message_loop_delivers_skip_waiting() {
    let reg = Arc::new(registration(&FakeNetwork::shell()));
    reg.register(config("v1")).await.unwrap();
    let second = reg.register(config("v2")).await.unwrap();
    let mut rx = reg.subscribe();

    let tx = reg.spawn_message_loop();
    tx.send(WorkerMessage::SkipWaiting).await.unwrap();
    loop {
      if let LifecycleEvent::ControllerChange { worker } = rx.recv().await.unwrap() {
        assert_eq!(worker, second.id());
        break;
      }
    }
    assert_eq!(second.state(), WorkerState::Active);
  }
}
