//! Responses produced by the origin or the cache.

use axum::{
  http::{HeaderMap, HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use bytes::Bytes;

/// Body of the synthetic response served when neither cache nor network can
/// answer.
pub const OFFLINE_BODY: &str = "Offline (Lumina Local)";

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
  pub status:  StatusCode,
  pub headers: HeaderMap,
  pub body:    Bytes,
}

impl FetchResponse {
  pub fn new(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
  ) -> Self {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    Self { status, headers, body: body.into() }
  }

  /// `503` plain-text stand-in for an unreachable resource.
  pub fn offline() -> Self {
    Self::new(
      StatusCode::SERVICE_UNAVAILABLE,
      "text/plain; charset=utf-8",
      OFFLINE_BODY,
    )
  }

  /// A 2xx status.
  pub fn is_ok(&self) -> bool { self.status.is_success() }

  pub fn content_type(&self) -> Option<&str> {
    self
      .headers
      .get(header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
  }
}

impl IntoResponse for FetchResponse {
  fn into_response(self) -> Response {
    (self.status, self.headers, self.body).into_response()
  }
}
