//! The offline cache controller: one worker generation and its lifecycle.
//!
//! A worker installs by precaching the core app shell into a cache named
//! after its version, waits until told to take over, then evicts every
//! other generation's cache when it activates. While active it answers
//! in-scope fetches cache-first for static assets and network-first for
//! everything else.

use std::sync::Arc;

use axum::http::Method;
use serde::Serialize;
use tokio::sync::watch;

use crate::{
  Error, Result,
  cache::CacheStorage,
  network::Network,
  request::{FetchRequest, Origin},
  response::FetchResponse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
  Installing,
  /// Installed, waiting for the current controller to step aside.
  Waiting,
  Activating,
  Active,
  /// Failed to install, or replaced by a newer generation.
  Redundant,
}

/// Everything that varies between deploys of the shell.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub origin:        Origin,
  /// Name of this generation's cache. Bump on every deploy.
  pub cache_version: String,
  pub core_assets:   Vec<String>,
  pub assets_prefix: String,
  pub offline_page:  Option<String>,
}

impl WorkerConfig {
  /// Paths fetched during install: the core assets plus the offline page.
  pub fn precache_list(&self) -> Vec<String> {
    let mut paths = self.core_assets.clone();
    if let Some(page) = &self.offline_page
      && !paths.contains(page)
    {
      paths.push(page.clone());
    }
    paths
  }

  /// Static assets are served cache-first.
  fn is_static_asset(&self, path: &str) -> bool {
    path.starts_with(&self.assets_prefix)
      || path.ends_with(".js")
      || path.ends_with(".css")
  }
}

/// What the worker decided to do with a request.
#[derive(Debug)]
pub enum FetchOutcome {
  /// Not intercepted; the page talks to the network directly.
  Passthrough,
  Respond(FetchResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
  CacheFirst,
  /// Network first; the flag enables the offline page fallback.
  NetworkFirst { offline_page: bool },
}

pub struct ServiceWorker<N> {
  id:      u64,
  config:  Arc<WorkerConfig>,
  caches:  CacheStorage,
  network: Arc<N>,
  state:   watch::Sender<WorkerState>,
}

impl<N: Network> ServiceWorker<N> {
  pub fn new(
    id: u64,
    config: Arc<WorkerConfig>,
    caches: CacheStorage,
    network: Arc<N>,
  ) -> Self {
    Self {
      id,
      config,
      caches,
      network,
      state: watch::Sender::new(WorkerState::Installing),
    }
  }

  pub fn id(&self) -> u64 { self.id }

  pub fn config(&self) -> &WorkerConfig { &self.config }

  pub fn state(&self) -> WorkerState { *self.state.borrow() }

  pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
    self.state.subscribe()
  }

  fn set_state(&self, state: WorkerState) {
    let previous = self.state.send_replace(state);
    if previous != state {
      tracing::debug!(worker = self.id, ?previous, ?state, "worker state");
    }
  }

  // ─── Lifecycle ──────────────────────────────────────────────────────────────

  /// Precache the core shell. Every asset must come back `2xx` before
  /// anything is written; on failure the worker becomes redundant and the
  /// cache is left untouched.
  pub async fn install(&self) -> Result<()> {
    if self.state() != WorkerState::Installing {
      return Err(Error::InvalidState(format!(
        "install called in state {:?}",
        self.state()
      )));
    }
    let name = &self.config.cache_version;
    tracing::info!(worker = self.id, cache = %name, "installing");

    let mut entries = Vec::new();
    for path in self.config.precache_list() {
      let fetched = self.fetch_origin(&path).await;
      match fetched {
        Ok(resp) if resp.is_ok() => entries.push((path, resp)),
        Ok(resp) => {
          return Err(self.install_failed(path, format!("status {}", resp.status)));
        }
        Err(e) => return Err(self.install_failed(path, e.to_string())),
      }
    }

    self.caches.put_all(name, entries);
    self.set_state(WorkerState::Waiting);
    tracing::info!(worker = self.id, cache = %name, "installed");
    Ok(())
  }

  fn install_failed(&self, path: String, reason: String) -> Error {
    tracing::warn!(worker = self.id, %path, %reason, "install failed");
    self.set_state(WorkerState::Redundant);
    Error::InstallFailed { path, reason }
  }

  async fn fetch_origin(&self, path: &str) -> Result<FetchResponse> {
    let url = self.config.origin.join(path)?;
    let request = FetchRequest {
      method: Method::GET,
      url,
      mode: Default::default(),
      accept: None,
    };
    self.network.fetch(&request).await
  }

  /// Take control: delete every cache not belonging to this generation.
  /// Returns the evicted cache names.
  pub fn activate(&self) -> Result<Vec<String>> {
    if self.state() != WorkerState::Waiting {
      return Err(Error::InvalidState(format!(
        "activate called in state {:?}",
        self.state()
      )));
    }
    self.set_state(WorkerState::Activating);
    let evicted: Vec<String> = self
      .caches
      .keys()
      .into_iter()
      .filter(|name| *name != self.config.cache_version)
      .filter(|name| self.caches.delete(name))
      .collect();
    for name in &evicted {
      tracing::info!(worker = self.id, cache = %name, "evicted stale cache");
    }
    self.caches.open(&self.config.cache_version);
    self.set_state(WorkerState::Active);
    tracing::info!(worker = self.id, cache = %self.config.cache_version, "activated");
    Ok(evicted)
  }

  pub fn make_redundant(&self) { self.set_state(WorkerState::Redundant); }

  // ─── Fetch ──────────────────────────────────────────────────────────────────

  /// Whether this worker intercepts `request` at all.
  pub fn in_scope(&self, request: &FetchRequest) -> bool {
    request.method == Method::GET && self.config.origin.contains(&request.url)
  }

  fn strategy(&self, request: &FetchRequest) -> Strategy {
    if request.is_navigation() {
      Strategy::NetworkFirst { offline_page: true }
    } else if self.config.is_static_asset(request.path()) {
      Strategy::CacheFirst
    } else {
      Strategy::NetworkFirst { offline_page: false }
    }
  }

  /// Answer an intercepted request. Never fails: network errors fall back
  /// to the cache and finally to [`FetchResponse::offline`].
  pub async fn handle_fetch(&self, request: &FetchRequest) -> FetchOutcome {
    if !self.in_scope(request) {
      return FetchOutcome::Passthrough;
    }
    let strategy = self.strategy(request);
    tracing::debug!(path = %request.cache_key(), ?strategy, "fetch");
    let response = match strategy {
      Strategy::CacheFirst => self.cache_first(request).await,
      Strategy::NetworkFirst { offline_page } => {
        self.network_first(request, offline_page).await
      }
    };
    FetchOutcome::Respond(response)
  }

  async fn cache_first(&self, request: &FetchRequest) -> FetchResponse {
    let key = request.cache_key();
    if let Some(hit) = self.caches.lookup(&self.config.cache_version, &key) {
      return hit;
    }
    match self.network.fetch(request).await {
      Ok(resp) => {
        if resp.is_ok() {
          self.caches.put(&self.config.cache_version, &key, resp.clone());
        }
        resp
      }
      Err(e) => {
        tracing::warn!(path = %key, error = %e, "asset unavailable offline");
        FetchResponse::offline()
      }
    }
  }

  async fn network_first(
    &self,
    request: &FetchRequest,
    offline_page: bool,
  ) -> FetchResponse {
    // Keyed on the path alone so query variants share one entry.
    let key = request.path().to_owned();
    let name = &self.config.cache_version;
    let error = match self.network.fetch(request).await {
      Ok(resp) if resp.is_ok() => {
        self.caches.put(name, &key, resp.clone());
        return resp;
      }
      // Unknown client-side routes still get the app shell.
      Ok(resp) => {
        return offline_page.then(|| self.shell_page()).flatten().unwrap_or(resp);
      }
      Err(e) => e,
    };
    tracing::warn!(path = %key, error = %error, "network failed, using cache");

    self
      .caches
      .lookup(name, &key)
      .or_else(|| offline_page.then(|| self.shell_page()).flatten())
      .unwrap_or_else(FetchResponse::offline)
  }

  fn shell_page(&self) -> Option<FetchResponse> {
    let page = self.config.offline_page.as_deref()?;
    self.caches.lookup(&self.config.cache_version, page)
  }

  /// Cache the stylesheets and scripts the cached shell page links to.
  /// Best effort: failures are skipped. Returns how many were stored.
  pub async fn warm_assets(&self) -> usize {
    let Some(page) = self.shell_page() else {
      return 0;
    };
    let html = String::from_utf8_lossy(&page.body);
    let mut stored = 0;
    for path in linked_assets(&html, &self.config.assets_prefix) {
      if self.caches.lookup(&self.config.cache_version, &path).is_some() {
        continue;
      }
      let fetched = self.fetch_origin(&path).await;
      match fetched {
        Ok(resp) if resp.is_ok() => {
          self.caches.put(&self.config.cache_version, &path, resp);
          stored += 1;
        }
        Ok(_) | Err(_) => tracing::debug!(%path, "skipped warming asset"),
      }
    }
    stored
  }
}

/// `href="..."`/`src="..."` targets under `prefix` ending in `.css`/`.js`.
fn linked_assets(html: &str, prefix: &str) -> Vec<String> {
  let mut found = Vec::new();
  for attr in ["href=\"", "src=\""] {
    for rest in html.split(attr).skip(1) {
      let Some(end) = rest.find('"') else { continue };
      let target = &rest[..end];
      if target.starts_with(prefix)
        && (target.ends_with(".css") || target.ends_with(".js"))
        && !found.iter().any(|f| f == target)
      {
        found.push(target.to_owned());
      }
    }
  }
  found
}

#[cfg(test)]
mod tests {
  use axum::http::StatusCode;

  use super::*;
  use crate::{response::OFFLINE_BODY, testing::FakeNetwork};

  fn config(version: &str) -> Arc<WorkerConfig> {
    Arc::new(WorkerConfig {
      origin:        "http://lumina.test".parse().unwrap(),
      cache_version: version.into(),
      core_assets:   vec!["/".into(), "/manifest.webmanifest".into()],
      assets_prefix: "/assets/".into(),
      offline_page:  Some("/index.html".into()),
    })
  }

  fn worker(
    version: &str,
    caches: &CacheStorage,
    net: &FakeNetwork,
  ) -> ServiceWorker<FakeNetwork> {
    ServiceWorker::new(1, config(version), caches.clone(), Arc::new(net.clone()))
  }

  async fn active(
    version: &str,
    caches: &CacheStorage,
    net: &FakeNetwork,
  ) -> ServiceWorker<FakeNetwork> {
    let sw = worker(version, caches, net);
    sw.install().await.unwrap();
    sw.activate().unwrap();
    sw
  }

  fn body(outcome: FetchOutcome) -> (StatusCode, String) {
    match outcome {
      FetchOutcome::Respond(r) => {
        (r.status, String::from_utf8(r.body.to_vec()).unwrap())
      }
      FetchOutcome::Passthrough => panic!("expected a response"),
    }
  }

  #[tokio::test]
  async fn install_precaches_core_and_offline_page() {
    let caches = CacheStorage::new();
    let sw = worker("v1", &caches, &FakeNetwork::shell());
    sw.install().await.unwrap();
    assert_eq!(sw.state(), WorkerState::Waiting);
    assert_eq!(caches.len("v1"), Some(3));
    assert!(caches.lookup("v1", "/index.html").is_some());
  }

  #[tokio::test]
  async fn install_is_all_or_nothing() {
    let caches = CacheStorage::new();
    let net = FakeNetwork::shell();
    let mut cfg = (*config("v1")).clone();
    cfg.core_assets.push("/icons/missing.png".into());
    let sw = ServiceWorker::new(1, Arc::new(cfg), caches.clone(), Arc::new(net));

    let err = sw.install().await.unwrap_err();
    assert!(matches!(err, Error::InstallFailed { ref path, .. } if path == "/icons/missing.png"));
    assert_eq!(sw.state(), WorkerState::Redundant);
    assert!(!caches.has("v1"));

    let offline = FakeNetwork::shell();
    offline.set_online(false);
    let sw = worker("v2", &caches, &offline);
    assert!(matches!(sw.install().await, Err(Error::InstallFailed { .. })));
    assert!(caches.keys().is_empty());
  }

  #[tokio::test]
  async fn activate_evicts_every_other_generation() {
    let caches = CacheStorage::new();
    let net = FakeNetwork::shell();
    active("v1", &caches, &net).await;
    caches.put("lumina-cache-v0", "/", FetchResponse::offline());
    caches.open("some-other-cache");

    let next = worker("v2", &caches, &net);
    next.install().await.unwrap();
    assert_eq!(caches.keys(), ["lumina-cache-v0", "some-other-cache", "v1", "v2"]);

    let evicted = next.activate().unwrap();
    assert_eq!(evicted, ["lumina-cache-v0", "some-other-cache", "v1"]);
    assert_eq!(caches.keys(), ["v2"]);
    assert_eq!(next.state(), WorkerState::Active);
  }

  #[tokio::test]
  async fn activate_requires_waiting() {
    let caches = CacheStorage::new();
    let sw = worker("v1", &caches, &FakeNetwork::shell());
    assert!(matches!(sw.activate(), Err(Error::InvalidState(_))));
  }

  #[tokio::test]
  async fn assets_are_cache_first() {
    let caches = CacheStorage::new();
    let net = FakeNetwork::shell();
    let sw = active("v1", &caches, &net).await;
    let req = FetchRequest::get("http://lumina.test/assets/app.js").unwrap();

    assert_eq!(body(sw.handle_fetch(&req).await), (StatusCode::OK, "app v1".into()));
    let hits = net.hits();
    assert_eq!(body(sw.handle_fetch(&req).await).1, "app v1");
    assert_eq!(net.hits(), hits, "second fetch served from cache");

    net.set_online(false);
    assert_eq!(body(sw.handle_fetch(&req).await).1, "app v1");
    let uncached = FetchRequest::get("http://lumina.test/assets/style.css").unwrap();
    assert_eq!(
      body(sw.handle_fetch(&uncached).await),
      (StatusCode::SERVICE_UNAVAILABLE, OFFLINE_BODY.into())
    );
  }

  #[tokio::test]
  async fn failed_asset_responses_are_not_cached() {
    let caches = CacheStorage::new();
    let net = FakeNetwork::shell();
    let sw = active("v1", &caches, &net).await;
    let req = FetchRequest::get("http://lumina.test/assets/later.js").unwrap();
    assert_eq!(body(sw.handle_fetch(&req).await).0, StatusCode::NOT_FOUND);
    assert!(caches.lookup("v1", "/assets/later.js").is_none());
  }

  #[tokio::test]
  async fn navigation_falls_back_to_cache_then_offline_page() {
    let caches = CacheStorage::new();
    let net = FakeNetwork::shell().serve("/notes", "text/html", "<main>notes</main>");
    let sw = active("v1", &caches, &net).await;

    let home = FetchRequest::navigate("http://lumina.test/").unwrap();
    let notes = FetchRequest::navigate("http://lumina.test/notes").unwrap();
    let never = FetchRequest::navigate("http://lumina.test/settings").unwrap();

    net.set_online(false);
    assert_eq!(body(sw.handle_fetch(&home).await).1, "<main>home v1</main>");
    assert_eq!(body(sw.handle_fetch(&notes).await).1, "<main>offline shell</main>");

    net.set_online(true);
    assert_eq!(body(sw.handle_fetch(&notes).await).1, "<main>notes</main>");
    net.set_online(false);
    assert_eq!(body(sw.handle_fetch(&notes).await).1, "<main>notes</main>");
    assert_eq!(
      body(sw.handle_fetch(&never).await),
      (StatusCode::OK, "<main>offline shell</main>".into())
    );
  }

  #[tokio::test]
  async fn query_variants_share_one_cache_entry() {
    let caches = CacheStorage::new();
    let net = FakeNetwork::shell().serve("/api/feed", "application/json", "[1]");
    let sw = active("v1", &caches, &net).await;
    let installed = caches.len("v1").unwrap();

    for page in 1..=5 {
      let req =
        FetchRequest::get(&format!("http://lumina.test/api/feed?page={page}"))
          .unwrap();
      assert_eq!(body(sw.handle_fetch(&req).await).1, "[1]");
    }
    assert_eq!(caches.len("v1"), Some(installed + 1));
    assert!(caches.lookup("v1", "/api/feed").is_some());

    net.set_online(false);
    let other = FetchRequest::get("http://lumina.test/api/feed?page=9").unwrap();
    assert_eq!(body(sw.handle_fetch(&other).await), (StatusCode::OK, "[1]".into()));
  }

  #[tokio::test]
  async fn unknown_routes_get_the_shell_online() {
    let caches = CacheStorage::new();
    let net = FakeNetwork::shell();
    let sw = active("v1", &caches, &net).await;
    let route = FetchRequest::navigate("http://lumina.test/notes/42").unwrap();
    assert_eq!(
      body(sw.handle_fetch(&route).await),
      (StatusCode::OK, "<main>offline shell</main>".into())
    );
    let data = FetchRequest::get("http://lumina.test/missing.json").unwrap();
    assert_eq!(body(sw.handle_fetch(&data).await).0, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn warms_assets_linked_from_the_shell() {
    let caches = CacheStorage::new();
    let net = FakeNetwork::shell().serve(
      "/index.html",
      "text/html",
      r#"<link href="/assets/style.css"><script src="/assets/app.js"></script>
         <script src="/assets/gone.js"></script><img src="/logo.png">"#,
    );
    let sw = active("v1", &caches, &net).await;
    assert_eq!(sw.warm_assets().await, 2);
    assert!(caches.lookup("v1", "/assets/app.js").is_some());
    assert!(caches.lookup("v1", "/assets/gone.js").is_none());
    assert_eq!(sw.warm_assets().await, 0);
  }

  #[test]
  fn linked_assets_are_filtered_and_deduplicated() {
    let html = r#"<a href="/assets/a.css"></a><b src="/assets/a.css"></b>
      <c src="/other/x.js"></c><d href="/assets/pic.png"></d><e src="/assets/b.js"></e>"#;
    assert_eq!(linked_assets(html, "/assets/"), ["/assets/a.css", "/assets/b.js"]);
  }

  #[tokio::test]
  async fn html_accept_counts_as_navigation() {
    let caches = CacheStorage::new();
    let net = FakeNetwork::shell();
    let sw = active("v1", &caches, &net).await;
    net.set_online(false);

    let doc = FetchRequest::get("http://lumina.test/about")
      .unwrap()
      .with_accept("text/html");
    assert_eq!(body(sw.handle_fetch(&doc).await).1, "<main>offline shell</main>");

    let data = FetchRequest::get("http://lumina.test/data.json").unwrap();
    assert_eq!(
      body(sw.handle_fetch(&data).await),
      (StatusCode::SERVICE_UNAVAILABLE, OFFLINE_BODY.into())
    );
  }

  #[tokio::test]
  async fn out_of_scope_requests_pass_through() {
    let caches = CacheStorage::new();
    let net = FakeNetwork::shell();
    let sw = active("v1", &caches, &net).await;
    let hits = net.hits();

    let post = FetchRequest::get("http://lumina.test/assets/app.js")
      .unwrap()
      .with_method(Method::POST);
    let cross = FetchRequest::get("http://cdn.test/assets/app.js").unwrap();
    let other_scheme = FetchRequest::get("https://lumina.test/assets/app.js").unwrap();
    for req in [post, cross, other_scheme] {
      assert!(matches!(sw.handle_fetch(&req).await, FetchOutcome::Passthrough));
    }
    assert_eq!(net.hits(), hits);
  }
}
