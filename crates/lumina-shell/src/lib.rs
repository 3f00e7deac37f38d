//! Offline app-shell layer for Lumina.
//!
//! A [`ServiceWorker`] generation precaches the shell into a versioned
//! cache and answers fetches from it; the [`Registration`] decides which
//! generation controls the shell; the [`UpdateCoordinator`] hands control
//! to a new generation with a single reload. [`router`] serves it all over
//! axum, routing every request through the controlling worker.

pub mod cache;
pub mod error;
pub mod network;
pub mod registration;
pub mod request;
pub mod response;
pub mod update;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use registration::{LifecycleEvent, Registration, WorkerMessage};
pub use update::{Reloader, UpdateCoordinator};
pub use worker::{ServiceWorker, WorkerConfig, WorkerState};

use std::{
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
};

use axum::{
  Json, Router,
  extract::State,
  http::{HeaderMap, Method, StatusCode, Uri, header},
  response::{IntoResponse, Response},
  routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use cache::CacheStorage;
use network::{DirOrigin, HttpOrigin, Network, Upstream};
use request::{FetchRequest, Origin, RequestMode};

// ─── Configuration ────────────────────────────────────────────────────────────

/// The shell server's settings, deserialised from the `[shell]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
  pub host:          String,
  pub port:          u16,
  /// Public origin pages are loaded from, e.g. `http://localhost:4173`.
  pub origin:        String,
  pub cache_version: String,
  pub core_assets:   Vec<String>,
  pub assets_prefix: String,
  pub offline_page:  Option<String>,
  /// Built shell to serve. Ignored when `upstream` is set.
  pub static_dir:    Option<PathBuf>,
  /// Base URL of a server to proxy instead of a directory.
  pub upstream:      Option<String>,
}

impl Default for ShellConfig {
  fn default() -> Self {
    Self {
      host:          "127.0.0.1".into(),
      port:          4173,
      origin:        "http://localhost:4173".into(),
      cache_version: "lumina-cache-v2".into(),
      core_assets:   [
        "/",
        "/index.html",
        "/manifest.webmanifest",
        "/icons/icon-192.png",
        "/icons/icon-512.png",
      ]
      .map(String::from)
      .to_vec(),
      assets_prefix: "/assets/".into(),
      offline_page:  Some("/index.html".into()),
      static_dir:    None,
      upstream:      None,
    }
  }
}

impl ShellConfig {
  pub fn worker_config(&self, cache_version: &str) -> Result<WorkerConfig> {
    Ok(WorkerConfig {
      origin:        self.origin.parse()?,
      cache_version: cache_version.to_owned(),
      core_assets:   self.core_assets.clone(),
      assets_prefix: self.assets_prefix.clone(),
      offline_page:  self.offline_page.clone(),
    })
  }

  /// The configured origin network: the upstream server if set, otherwise
  /// the static directory (`dist` by default).
  pub fn upstream(&self) -> Result<Upstream> {
    if let Some(base) = &self.upstream {
      return Ok(Upstream::Http(HttpOrigin::new(base.as_str())?));
    }
    let dir = self.static_dir.clone().unwrap_or_else(|| PathBuf::from("dist"));
    Ok(Upstream::Dir(DirOrigin::new(dir)))
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Counts reloads requested by the coordinator.
#[derive(Debug, Default)]
pub struct ReloadSignal(AtomicU64);

impl ReloadSignal {
  pub fn count(&self) -> u64 { self.0.load(Ordering::SeqCst) }
}

impl Reloader for ReloadSignal {
  fn reload(&self) {
    let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::info!(reloads = n, "shell reload requested");
  }
}

/// Shared state threaded through all axum handlers.
pub struct ShellState<N> {
  pub config:       Arc<ShellConfig>,
  pub registration: Arc<Registration<N>>,
  pub coordinator:  UpdateCoordinator,
  pub messages:     mpsc::Sender<WorkerMessage>,
  pub reloads:      Arc<ReloadSignal>,
  origin:           Origin,
}

impl<N> Clone for ShellState<N> {
  fn clone(&self) -> Self {
    Self {
      config:       self.config.clone(),
      registration: self.registration.clone(),
      coordinator:  self.coordinator.clone(),
      messages:     self.messages.clone(),
      reloads:      self.reloads.clone(),
      origin:       self.origin.clone(),
    }
  }
}

impl<N: Network> ShellState<N> {
  /// Wire the registration, message loop and coordinator together and
  /// install the configured worker. A failed install leaves the shell
  /// running uncontrolled.
  pub async fn start(config: ShellConfig, network: N) -> Result<Self> {
    let origin: Origin = config.origin.parse()?;
    let first = config.worker_config(&config.cache_version)?;

    let registration =
      Arc::new(Registration::new(CacheStorage::new(), Arc::new(network)));
    let messages = registration.spawn_message_loop();
    let reloads = Arc::new(ReloadSignal::default());
    let coordinator =
      UpdateCoordinator::new(messages.clone(), reloads.clone(), false);
    tokio::spawn(coordinator.clone().run(registration.subscribe()));

    if let Err(e) = registration.register(first).await {
      tracing::warn!(error = %e, "initial install failed; serving uncontrolled");
    }

    Ok(Self {
      config: Arc::new(config),
      registration,
      coordinator,
      messages,
      reloads,
      origin,
    })
  }

  pub fn status(&self) -> ShellStatus {
    ShellStatus {
      controller:   self.registration.controller().map(|w| WorkerInfo::of(&*w)),
      waiting:      self.registration.waiting().map(|w| WorkerInfo::of(&*w)),
      caches:       self.registration.caches().keys(),
      update_ready: self.coordinator.update_ready(),
      reloads:      self.reloads.count(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
  pub id:            u64,
  pub cache_version: String,
  pub state:         WorkerState,
}

impl WorkerInfo {
  fn of<N: Network>(worker: &ServiceWorker<N>) -> Self {
    Self {
      id:            worker.id(),
      cache_version: worker.config().cache_version.clone(),
      state:         worker.state(),
    }
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellStatus {
  pub controller:   Option<WorkerInfo>,
  pub waiting:      Option<WorkerInfo>,
  pub caches:       Vec<String>,
  pub update_ready: Option<u64>,
  pub reloads:      u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest {
  cache_version: String,
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the shell [`Router`]. `/__sw/*` drives the lifecycle; every other
/// request goes through the controlling worker.
pub fn router<N: Network>(state: ShellState<N>) -> Router {
  Router::new()
    .route("/__sw/status",  get(status_handler::<N>))
    .route("/__sw/message", post(message_handler::<N>))
    .route("/__sw/update",  post(update_handler::<N>))
    .route("/__sw/apply",   post(apply_handler::<N>))
    .fallback(intercept::<N>)
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn status_handler<N: Network>(
  State(state): State<ShellState<N>>,
) -> Json<ShellStatus> {
  Json(state.status())
}

async fn message_handler<N: Network>(
  State(state): State<ShellState<N>>,
  Json(message): Json<WorkerMessage>,
) -> Result<StatusCode> {
  state
    .messages
    .send(message)
    .await
    .map_err(|_| Error::InvalidState("worker message channel closed".into()))?;
  Ok(StatusCode::ACCEPTED)
}

async fn update_handler<N: Network>(
  State(state): State<ShellState<N>>,
  Json(req): Json<UpdateRequest>,
) -> Result<Json<WorkerInfo>> {
  let config = state.config.worker_config(&req.cache_version)?;
  let worker = state.registration.register(config).await?;
  Ok(Json(WorkerInfo::of(&*worker)))
}

async fn apply_handler<N: Network>(
  State(state): State<ShellState<N>>,
) -> Result<StatusCode> {
  state.coordinator.apply_update().await?;
  Ok(StatusCode::ACCEPTED)
}

async fn intercept<N: Network>(
  State(state): State<ShellState<N>>,
  method: Method,
  uri: Uri,
  headers: HeaderMap,
) -> Response {
  let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
  let url = match state.origin.join(path) {
    Ok(url) => url,
    Err(e) => return e.into_response(),
  };
  let header_str =
    |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
  let request = FetchRequest {
    method,
    url,
    mode: header_str("sec-fetch-mode")
      .map(RequestMode::from_header)
      .unwrap_or_default(),
    accept: header_str(header::ACCEPT.as_str()).map(str::to_owned),
  };

  match state.registration.fetch(&request).await {
    Ok(response) => response.into_response(),
    Err(e) => e.into_response(),
  }
}
