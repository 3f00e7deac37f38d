//! Error types for `lumina-core`.

use thiserror::Error;

use crate::model::Table;

#[derive(Debug, Error)]
pub enum Error {
  // ── Opening the local store ─────────────────────────────────────────────
  #[error("local storage is unavailable: {0}")]
  StorageUnavailable(String),

  #[error("database schema v{found} is newer than supported v{supported}")]
  SchemaIncompatible { found: i64, supported: i64 },

  #[error("local database is corrupt: {0}")]
  CorruptDatabase(String),

  #[error("repair of the local database was declined")]
  RepairDeclined,

  // ── Backup / restore ────────────────────────────────────────────────────
  #[error("backup schema {found:?} is not supported (expected {expected})")]
  IncompatibleSchema { found: Option<i64>, expected: i64 },

  #[error("backup is malformed: {0}")]
  InvalidSnapshot(String),

  #[error("read-only mode is enabled; disable it to restore a backup")]
  ReadOnly,

  // ── Record operations ───────────────────────────────────────────────────
  #[error("{table} already contains a record with id {id:?}")]
  DuplicateId { table: Table, id: String },

  #[error("{table} has no record with id {id:?}")]
  NotFound { table: Table, id: String },

  #[error("table {0} is not part of this transaction")]
  TableNotInScope(Table),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Open-time failures that the repair path can recover from.
  pub fn is_repairable(&self) -> bool {
    matches!(
      self,
      Self::SchemaIncompatible { .. } | Self::CorruptDatabase(_)
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
