//! Telling encrypted backup files from plain ones.

use serde_json::Value;

use crate::{Envelope, Error, Result};

/// Fields whose presence marks a document as encrypted.
const ENCRYPTED_MARKERS: [&str; 4] = ["ct", "ctB64", "mac", "macB64"];

/// A backup file as loaded from disk, before any decryption.
#[derive(Debug, Clone, PartialEq)]
pub enum BackupDocument {
  Encrypted(Envelope),
  Plain(Value),
}

impl BackupDocument {
  /// Parse `bytes` as JSON and classify it by shape.
  pub fn sniff(bytes: &[u8]) -> Result<Self> {
    let value: Value = serde_json::from_slice(bytes)
      .map_err(|e| Error::MalformedDocument(e.to_string()))?;
    Self::from_value(value)
  }

  pub fn from_value(value: Value) -> Result<Self> {
    let Some(obj) = value.as_object() else {
      return Err(Error::MalformedDocument("expected a JSON object".into()));
    };
    if !ENCRYPTED_MARKERS.iter().any(|k| obj.contains_key(*k)) {
      return Ok(Self::Plain(value));
    }
    let envelope = serde_json::from_value(value)
      .map_err(|e| Error::MalformedDocument(e.to_string()))?;
    Ok(Self::Encrypted(envelope))
  }

  pub fn is_encrypted(&self) -> bool { matches!(self, Self::Encrypted(_)) }
}
