//! Error types for the backup encryption layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(
    "passphrase is too short (at least {} characters)",
    crate::MIN_PASSPHRASE_CHARS
  )]
  WeakPassphrase,

  /// Wrong passphrase, tampered envelope or corrupted ciphertext. The cause
  /// is deliberately not distinguished.
  #[error("incorrect passphrase or corrupted backup")]
  AuthenticationFailed,

  #[error("unsupported encrypted backup format: {0}")]
  UnsupportedEnvelope(String),

  #[error("backup file is not a valid document: {0}")]
  MalformedDocument(String),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
