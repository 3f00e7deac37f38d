//! Error types and axum `IntoResponse` implementation.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The origin could not be reached. Never surfaces for intercepted
  /// requests; those fall back to the cache or an offline response.
  #[error("network unavailable: {0}")]
  NetworkUnavailable(String),

  #[error("install failed: {path} could not be cached ({reason})")]
  InstallFailed { path: String, reason: String },

  #[error("invalid worker state: {0}")]
  InvalidState(String),

  #[error("invalid origin: {0}")]
  InvalidOrigin(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = match self {
      Error::NetworkUnavailable(_) => StatusCode::BAD_GATEWAY,
      Error::InstallFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
      Error::InvalidState(_) => StatusCode::CONFLICT,
      Error::InvalidOrigin(_) => StatusCode::BAD_REQUEST,
    };
    (status, self.to_string()).into_response()
  }
}
