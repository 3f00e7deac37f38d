//! Where the worker's network fetches actually go.

use std::{
  future::Future,
  io::ErrorKind,
  path::{Component, Path, PathBuf},
  time::Duration,
};

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};

use crate::{Error, Result, request::FetchRequest, response::FetchResponse};

/// The network as seen from inside the worker.
///
/// `Err` means the origin could not be reached at all; HTTP error statuses
/// come back as `Ok` responses.
pub trait Network: Send + Sync + 'static {
  fn fetch(
    &self,
    request: &FetchRequest,
  ) -> impl Future<Output = Result<FetchResponse>> + Send;
}

// ─── Static directory ─────────────────────────────────────────────────────────

/// Serves a built app shell from a local directory.
#[derive(Debug, Clone)]
pub struct DirOrigin {
  root: PathBuf,
}

impl DirOrigin {
  pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

  /// Map a URL path to a file under the root. `None` for anything that
  /// tries to climb out of it.
  fn resolve(&self, url_path: &str) -> Option<PathBuf> {
    let relative = url_path.trim_start_matches('/');
    let relative = if relative.is_empty() || relative.ends_with('/') {
      format!("{relative}index.html")
    } else {
      relative.to_owned()
    };
    let relative = Path::new(&relative);
    if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
      return None;
    }
    Some(self.root.join(relative))
  }
}

impl Network for DirOrigin {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    let head = match request.method {
      Method::GET => false,
      Method::HEAD => true,
      _ => return Ok(method_not_allowed()),
    };
    let Some(path) = self.resolve(request.path()) else {
      return Ok(not_found());
    };
    match tokio::fs::read(&path).await {
      Ok(body) => {
        let body = if head { Vec::new() } else { body };
        Ok(FetchResponse::new(StatusCode::OK, content_type(&path), body))
      }
      Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
        Ok(not_found())
      }
      Err(e) => Err(Error::NetworkUnavailable(format!("{}: {e}", path.display()))),
    }
  }
}

fn not_found() -> FetchResponse {
  FetchResponse::new(StatusCode::NOT_FOUND, "text/plain; charset=utf-8", "Not Found")
}

fn method_not_allowed() -> FetchResponse {
  let mut resp = FetchResponse::new(
    StatusCode::METHOD_NOT_ALLOWED,
    "text/plain; charset=utf-8",
    "Method Not Allowed",
  );
  resp
    .headers
    .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
  resp
}

fn content_type(path: &Path) -> &'static str {
  match path.extension().and_then(|e| e.to_str()) {
    Some("html") => "text/html; charset=utf-8",
    Some("js" | "mjs") => "text/javascript; charset=utf-8",
    Some("css") => "text/css; charset=utf-8",
    Some("json") => "application/json",
    Some("webmanifest") => "application/manifest+json",
    Some("svg") => "image/svg+xml",
    Some("png") => "image/png",
    Some("ico") => "image/x-icon",
    Some("woff2") => "font/woff2",
    Some("txt") => "text/plain; charset=utf-8",
    _ => "application/octet-stream",
  }
}

// ─── HTTP upstream ────────────────────────────────────────────────────────────

/// Proxies fetches to a running dev or production server.
#[derive(Debug, Clone)]
pub struct HttpOrigin {
  client: reqwest::Client,
  base:   String,
}

impl HttpOrigin {
  pub fn new(base: impl Into<String>) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| Error::NetworkUnavailable(e.to_string()))?;
    Ok(Self { client, base: base.into().trim_end_matches('/').to_owned() })
  }
}

impl Network for HttpOrigin {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    let url = format!("{}{}", self.base, request.cache_key());
    let mut builder = self.client.request(request.method.clone(), &url);
    if let Some(accept) = &request.accept {
      builder = builder.header(header::ACCEPT, accept);
    }
    let resp = builder
      .send()
      .await
      .map_err(|e| Error::NetworkUnavailable(format!("{url}: {e}")))?;

    let status = resp.status();
    let mut headers: HeaderMap = resp.headers().clone();
    headers.remove(header::CONNECTION);
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONTENT_LENGTH);
    let body = resp
      .bytes()
      .await
      .map_err(|e| Error::NetworkUnavailable(format!("{url}: {e}")))?;
    Ok(FetchResponse { status, headers, body })
  }
}

// ─── Configured upstream ──────────────────────────────────────────────────────

/// Either origin, chosen at startup from configuration.
#[derive(Debug, Clone)]
pub enum Upstream {
  Dir(DirOrigin),
  Http(HttpOrigin),
}

impl Network for Upstream {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    match self {
      Upstream::Dir(dir) => dir.fetch(request).await,
      Upstream::Http(http) => http.fetch(request).await,
    }
  }
}
