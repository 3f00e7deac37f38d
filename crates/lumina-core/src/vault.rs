//! The vault handle: a migrated store plus the repositories over it.

use std::sync::Arc;

use serde_json::Value;

use crate::{
  Result,
  backup::{self, ImportSummary, Snapshot},
  legacy::LegacySource,
  migrate::{MigrationOutcome, SchemaMigrator},
  repo::{
    AppointmentsRepo, MedicationsRepo, NotesRepo, SettingsRepo, ShoppingRepo,
  },
  store::VaultStore,
};

/// Shared, cheaply clonable handle to an opened and migrated store.
///
/// The only constructor is [`Vault::start`], which runs the legacy migration
/// first, so no repository can observe the store before it has settled.
pub struct Vault<S> {
  store: Arc<S>,
}

impl<S> Clone for Vault<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: VaultStore> Vault<S> {
  pub async fn start(
    store: S,
    legacy: Option<&dyn LegacySource>,
  ) -> (Self, MigrationOutcome) {
    let outcome = SchemaMigrator::new(&store, legacy).migrate_if_needed().await;
    (Self { store: Arc::new(store) }, outcome)
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn settings(&self) -> SettingsRepo<'_, S> {
    SettingsRepo { store: &self.store }
  }

  pub fn notes(&self) -> NotesRepo<'_, S> { NotesRepo { store: &self.store } }

  pub fn shopping(&self) -> ShoppingRepo<'_, S> {
    ShoppingRepo { store: &self.store }
  }

  pub fn appointments(&self) -> AppointmentsRepo<'_, S> {
    AppointmentsRepo { store: &self.store }
  }

  pub fn medications(&self) -> MedicationsRepo<'_, S> {
    MedicationsRepo { store: &self.store }
  }

  pub async fn export_snapshot(&self) -> Result<Snapshot> {
    backup::export_snapshot(&*self.store).await
  }

  pub async fn import_snapshot(&self, value: Value) -> Result<ImportSummary> {
    backup::import_snapshot(&*self.store, value).await
  }
}
