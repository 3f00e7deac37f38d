//! Page-side update hand-off.
//!
//! When a new worker is waiting behind the current controller, listeners are
//! told once. [`UpdateCoordinator::apply_update`] asks the waiting worker to
//! skip waiting, and the first controller change afterwards triggers exactly
//! one reload.

use std::sync::{
  Arc, Weak,
  atomic::{AtomicBool, AtomicU64, Ordering},
};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::{
  Error, Result,
  registration::{LifecycleEvent, WorkerMessage},
};

/// Reloads the page. Called at most once per coordinator.
pub trait Reloader: Send + Sync + 'static {
  fn reload(&self);
}

type Listener = Arc<dyn Fn(u64) + Send + Sync>;

struct Inner {
  listeners:     Mutex<Vec<(u64, Listener)>>,
  next_listener: AtomicU64,
  /// The worker an "update ready" signal was raised for.
  waiting:       Mutex<Option<u64>>,
  controlled:    AtomicBool,
  reloaded:      AtomicBool,
  messages:      mpsc::Sender<WorkerMessage>,
  reloader:      Arc<dyn Reloader>,
}

#[derive(Clone)]
pub struct UpdateCoordinator {
  inner: Arc<Inner>,
}

/// Keeps a listener registered; dropping it unsubscribes.
#[must_use = "the listener is removed when the subscription is dropped"]
pub struct Subscription {
  id:    u64,
  inner: Weak<Inner>,
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(inner) = self.inner.upgrade() {
      inner.listeners.lock().retain(|(id, _)| *id != self.id);
    }
  }
}

impl UpdateCoordinator {
  /// `controlled` says whether the page already had a controller when it
  /// loaded.
  pub fn new(
    messages: mpsc::Sender<WorkerMessage>,
    reloader: Arc<dyn Reloader>,
    controlled: bool,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        listeners: Mutex::new(Vec::new()),
        next_listener: AtomicU64::new(0),
        waiting: Mutex::new(None),
        controlled: AtomicBool::new(controlled),
        reloaded: AtomicBool::new(false),
        messages,
        reloader,
      }),
    }
  }

  pub fn on_update_ready(
    &self,
    listener: impl Fn(u64) + Send + Sync + 'static,
  ) -> Subscription {
    let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
    let listener: Listener = Arc::new(listener);
    self.inner.listeners.lock().push((id, listener));
    Subscription { id, inner: Arc::downgrade(&self.inner) }
  }

  /// The waiting worker an update is ready for, if any.
  pub fn update_ready(&self) -> Option<u64> { *self.inner.waiting.lock() }

  pub fn is_controlled(&self) -> bool {
    self.inner.controlled.load(Ordering::SeqCst)
  }

  pub fn has_reloaded(&self) -> bool { self.inner.reloaded.load(Ordering::SeqCst) }

  /// A worker finished installing behind the current controller. Listeners
  /// hear about each waiting worker once.
  pub fn worker_waiting(&self, worker: u64) {
    {
      let mut waiting = self.inner.waiting.lock();
      if *waiting == Some(worker) {
        return;
      }
      *waiting = Some(worker);
    }
    tracing::info!(worker, "update ready");
    let listeners: Vec<Listener> = self
      .inner
      .listeners
      .lock()
      .iter()
      .map(|(_, l)| Arc::clone(l))
      .collect();
    for listener in listeners {
      listener(worker);
    }
  }

  /// Tell the waiting worker to take over.
  pub async fn apply_update(&self) -> Result<()> {
    let Some(worker) = self.update_ready() else {
      return Err(Error::InvalidState("no update is waiting".into()));
    };
    tracing::info!(worker, "applying update");
    self
      .inner
      .messages
      .send(WorkerMessage::SkipWaiting)
      .await
      .map_err(|_| Error::InvalidState("worker message channel closed".into()))
  }

  /// A new worker took control. Reloads once, and only if the page was
  /// controlled before; returns whether it reloaded.
  pub fn controller_changed(&self) -> bool {
    *self.inner.waiting.lock() = None;
    let was_controlled = self.inner.controlled.swap(true, Ordering::SeqCst);
    if !was_controlled {
      tracing::debug!("first controller claimed the page");
      return false;
    }
    if self.inner.reloaded.swap(true, Ordering::SeqCst) {
      tracing::debug!("ignoring repeated controller change");
      return false;
    }
    tracing::info!("controller changed, reloading");
    self.inner.reloader.reload();
    true
  }

  /// Follow a registration's lifecycle events until the channel closes.
  pub async fn run(self, mut events: broadcast::Receiver<LifecycleEvent>) {
    loop {
      match events.recv().await {
        Ok(LifecycleEvent::Waiting { worker }) => self.worker_waiting(worker),
        Ok(LifecycleEvent::ControllerChange { .. }) => {
          self.controller_changed();
        }
        Ok(_) => {}
        Err(broadcast::error::RecvError::Lagged(n)) => {
          tracing::warn!(skipped = n, "lifecycle events lagged");
        }
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;

  use super::*;

  #[derive(Default)]
  struct CountingReloader(AtomicUsize);

  impl Reloader for CountingReloader {
    fn reload(&self) { self.0.fetch_add(1, Ordering::SeqCst); }
  }

  fn coordinator(
    controlled: bool,
  ) -> (UpdateCoordinator, Arc<CountingReloader>, mpsc::Receiver<WorkerMessage>) {
    let reloader = Arc::new(CountingReloader::default());
    let (tx, rx) = mpsc::channel(4);
    (UpdateCoordinator::new(tx, reloader.clone(), controlled), reloader, rx)
  }

  #[test]
  fn two_controller_changes_reload_once() {
    let (coord, reloader, _rx) = coordinator(true);
    assert!(coord.controller_changed());
    assert!(!coord.controller_changed());
    assert_eq!(reloader.0.load(Ordering::SeqCst), 1);
    assert!(coord.has_reloaded());
  }

  #[test]
  fn first_claim_does_not_reload() {
    let (coord, reloader, _rx) = coordinator(false);
    assert!(!coord.controller_changed());
    assert!(coord.is_controlled());
    assert!(coord.controller_changed());
    assert_eq!(reloader.0.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn update_ready_fires_once_per_waiting_worker() {
    let (coord, _, _rx) = coordinator(true);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sub = coord.on_update_ready(move |w| sink.lock().push(w));

    coord.worker_waiting(2);
    coord.worker_waiting(2);
    coord.worker_waiting(3);
    assert_eq!(*seen.lock(), [2, 3]);
    assert_eq!(coord.update_ready(), Some(3));

    drop(sub);
    coord.worker_waiting(4);
    assert_eq!(*seen.lock(), [2, 3]);
  }

  #[tokio::test]
  async fn apply_update_posts_skip_waiting() {
    let (coord, _, mut rx) = coordinator(true);
    assert!(matches!(coord.apply_update().await, Err(Error::InvalidState(_))));

    coord.worker_waiting(2);
    coord.apply_update().await.unwrap();
    assert_eq!(rx.recv().await, Some(WorkerMessage::SkipWaiting));

    coord.controller_changed();
    assert_eq!(coord.update_ready(), None);
  }

  #[tokio::test]
  async fn follows_registration_events() {
    let (coord, reloader, _rx) = coordinator(true);
    let (tx, rx) = broadcast::channel(8);
    let task = tokio::spawn(coord.clone().run(rx));

    tx.send(LifecycleEvent::Waiting { worker: 2 }).unwrap();
    tx.send(LifecycleEvent::ControllerChange { worker: 2 }).unwrap();
    tx.send(LifecycleEvent::ControllerChange { worker: 2 }).unwrap();
    drop(tx);
    task.await.unwrap();

    assert_eq!(reloader.0.load(Ordering::SeqCst), 1);
    assert_eq!(coord.update_ready(), None);
  }
}
