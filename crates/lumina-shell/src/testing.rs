//! An in-memory [`Network`] whose connectivity can be switched off.

use std::{
  collections::BTreeMap,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
};

use axum::http::StatusCode;
use parking_lot::Mutex;

use crate::{
  Error, Result, network::Network, request::FetchRequest,
  response::FetchResponse,
};

#[derive(Clone, Default)]
pub struct FakeNetwork {
  online: Arc<AtomicBool>,
  files:  Arc<Mutex<BTreeMap<String, (&'static str, String)>>>,
  hits:   Arc<AtomicUsize>,
}

impl FakeNetwork {
  /// Online, serving a small app shell.
  pub fn shell() -> Self {
    let net = Self::default();
    net.set_online(true);
    net
      .serve("/", "text/html", "<main>home v1</main>")
      .serve("/index.html", "text/html", "<main>offline shell</main>")
      .serve("/manifest.webmanifest", "application/manifest+json", "{}")
      .serve("/assets/app.js", "text/javascript", "app v1")
      .serve("/assets/style.css", "text/css", "body{}")
  }

  pub fn serve(self, path: &str, content_type: &'static str, body: &str) -> Self {
    self.files.lock().insert(path.to_owned(), (content_type, body.to_owned()));
    self
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Fetches that reached the network while online.
  pub fn hits(&self) -> usize { self.hits.load(Ordering::SeqCst) }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    if !self.online.load(Ordering::SeqCst) {
      return Err(Error::NetworkUnavailable("offline".into()));
    }
    self.hits.fetch_add(1, Ordering::SeqCst);
    let found = {
      let files = self.files.lock();
      files
        .get(&request.cache_key())
        .or_else(|| files.get(request.path()))
        .cloned()
    };
    Ok(match found {
      Some((content_type, body)) => {
        FetchResponse::new(StatusCode::OK, content_type, body)
      }
      None => FetchResponse::new(StatusCode::NOT_FOUND, "text/plain", "missing"),
    })
  }
}
