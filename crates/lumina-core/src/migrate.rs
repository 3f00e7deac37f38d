//! One-shot import of legacy flat storage into the structured store.
//!
//! The migrator runs at startup, before any repository is handed out. It is
//! best-effort: it never returns an error, and a run that cannot complete
//! leaves the store exactly as it found it.

use std::time::Duration;

use serde::Serialize;

use crate::{
  Error, Result,
  backup::ImportSummary,
  legacy::{LegacyImport, LegacySource},
  model::{SETTINGS_ID, Settings, Table},
  store::{TableTx, VaultStore},
};

/// Meta key set once legacy storage has been dealt with. Never cleared.
pub const MIGRATION_FLAG: &str = "legacy_migrated";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
  /// The flag was already set; nothing was read.
  AlreadyMigrated,
  /// No legacy data was found; the flag is now set.
  NoLegacyData,
  /// Legacy records were imported; the flag is now set.
  Migrated(ImportSummary),
  /// The store already held user data, so legacy data was ignored.
  DestinationNotEmpty,
  /// Storage kept failing or the import could not be applied. The flag is
  /// not set, so the next start tries again.
  Unavailable,
}

pub struct SchemaMigrator<'a, S> {
  store:        &'a S,
  legacy:       Option<&'a dyn LegacySource>,
  max_attempts: u32,
  backoff:      Duration,
}

impl<'a, S: VaultStore> SchemaMigrator<'a, S> {
  pub fn new(store: &'a S, legacy: Option<&'a dyn LegacySource>) -> Self {
    Self {
      store,
      legacy,
      max_attempts: 3,
      backoff: Duration::from_millis(50),
    }
  }

  /// Override the retry policy. `max_attempts` is clamped to at least 1;
  /// the delay doubles after each failed attempt.
  pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
    self.max_attempts = max_attempts.max(1);
    self.backoff = backoff;
    self
  }

  pub async fn migrate_if_needed(&self) -> MigrationOutcome {
    // Parsing is pure and infallible; do it once, outside the retry loop.
    let legacy = self.legacy.map(LegacyImport::read).unwrap_or_default();

    let mut delay = self.backoff;
    for attempt in 1..=self.max_attempts {
      let import = legacy.clone();
      let result = self
        .store
        .transaction(Table::ALL, move |tx| apply(tx, import))
        .await;

      match result {
        Ok(outcome) => {
          log_outcome(&outcome);
          return outcome;
        }
        Err(e) if is_transient(&e) && attempt < self.max_attempts => {
          tracing::warn!(
            "legacy migration attempt {attempt}/{} failed: {e}; retrying",
            self.max_attempts
          );
          tokio::time::sleep(delay).await;
          delay *= 2;
        }
        Err(e) => {
          tracing::warn!("legacy migration skipped: {e}");
          return MigrationOutcome::Unavailable;
        }
      }
    }
    MigrationOutcome::Unavailable
  }
}

fn is_transient(e: &Error) -> bool {
  matches!(e, Error::Storage(_) | Error::StorageUnavailable(_))
}

fn apply(tx: &mut dyn TableTx, legacy: LegacyImport) -> Result<MigrationOutcome> {
  if tx.get_meta(MIGRATION_FLAG)?.is_some() {
    return Ok(MigrationOutcome::AlreadyMigrated);
  }

  let outcome = if legacy.is_empty() {
    MigrationOutcome::NoLegacyData
  } else if !destination_is_empty(tx)? {
    MigrationOutcome::DestinationNotEmpty
  } else {
    let mut summary = ImportSummary::default();
    if let Some(settings) = &legacy.settings
      && tx.get::<Settings>(SETTINGS_ID)?.is_none()
    {
      tx.put(settings)?;
      summary.settings = true;
    }
    tx.bulk_add(&legacy.notes)?;
    tx.bulk_add(&legacy.shopping)?;
    tx.bulk_add(&legacy.appointments)?;
    tx.bulk_add(&legacy.medications)?;
    summary.notes = legacy.notes.len();
    summary.shopping = legacy.shopping.len();
    summary.appointments = legacy.appointments.len();
    summary.medications = legacy.medications.len();
    MigrationOutcome::Migrated(summary)
  };

  tx.set_meta(MIGRATION_FLAG, "1")?;
  Ok(outcome)
}

fn destination_is_empty(tx: &mut dyn TableTx) -> Result<bool> {
  for table in Table::COLLECTIONS {
    if tx.count(table)? > 0 {
      return Ok(false);
    }
  }
  Ok(true)
}

fn log_outcome(outcome: &MigrationOutcome) {
  match outcome {
    MigrationOutcome::AlreadyMigrated => {
      tracing::debug!("legacy migration already done")
    }
    MigrationOutcome::NoLegacyData => {
      tracing::info!("no legacy data found; migration flag set")
    }
    MigrationOutcome::Migrated(s) => tracing::info!(
      "migrated legacy data: {} notes, {} shopping, {} appointments, {} \
       medications",
      s.notes,
      s.shopping,
      s.appointments,
      s.medications
    ),
    MigrationOutcome::DestinationNotEmpty => {
      tracing::warn!("store already holds data; legacy data left untouched")
    }
    MigrationOutcome::Unavailable => {}
  }
}
