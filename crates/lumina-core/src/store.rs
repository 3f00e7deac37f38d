//! The `VaultStore` trait and the transaction interface behind it.
//!
//! The trait is implemented by storage backends (e.g. `lumina-store-sqlite`).
//! Repositories, the backup codec and the migrator depend on this
//! abstraction, not on any concrete backend.

use std::future::Future;

use serde_json::Value;

use crate::{
  Error, Result,
  model::{Record, Table},
};

// ─── Raw records ─────────────────────────────────────────────────────────────

/// A record as the engine sees it: indexed columns plus the JSON value.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
  pub id:         String,
  pub created_at: i64,
  pub updated_at: i64,
  pub sort_key:   Option<String>,
  pub value:      Value,
}

impl RawRecord {
  pub fn from_record<R: Record>(record: &R) -> Result<Self> {
    Ok(Self {
      id:         record.id().to_owned(),
      created_at: record.created_at(),
      updated_at: record.updated_at(),
      sort_key:   record.sort_key().map(str::to_owned),
      value:      serde_json::to_value(record)?,
    })
  }

  pub fn into_record<R: Record>(self) -> Result<R> {
    Ok(serde_json::from_value(self.value)?)
  }
}

// ─── Ordering ────────────────────────────────────────────────────────────────

/// The indexed column a listing is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
  #[default]
  Id,
  CreatedAt,
  UpdatedAt,
  /// The record-specific key from [`Record::sort_key`].
  SortKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderBy {
  pub field:      SortField,
  pub descending: bool,
}

impl OrderBy {
  pub fn asc(field: SortField) -> Self { Self { field, descending: false } }

  pub fn desc(field: SortField) -> Self { Self { field, descending: true } }
}

// ─── Transactions ────────────────────────────────────────────────────────────

/// Synchronous access to the tables of one open transaction.
///
/// Handed to the callback of [`VaultStore::transaction`]. Every method fails
/// with [`Error::TableNotInScope`] for tables the transaction did not
/// declare. The `meta` key/value area is always in scope.
pub trait TableTx {
  fn get_raw(&mut self, table: Table, id: &str) -> Result<Option<RawRecord>>;

  /// Insert or replace.
  fn put_raw(&mut self, table: Table, record: RawRecord) -> Result<()>;

  /// Insert; fails with [`Error::DuplicateId`] if the id exists.
  fn insert_raw(&mut self, table: Table, record: RawRecord) -> Result<()>;

  /// Returns whether a record was removed.
  fn delete(&mut self, table: Table, id: &str) -> Result<bool>;

  fn list_raw(
    &mut self,
    table: Table,
    order: Option<OrderBy>,
  ) -> Result<Vec<RawRecord>>;

  fn count(&mut self, table: Table) -> Result<u64>;

  fn clear(&mut self, table: Table) -> Result<()>;

  fn get_meta(&mut self, key: &str) -> Result<Option<String>>;

  fn set_meta(&mut self, key: &str, value: &str) -> Result<()>;
}

/// Typed helpers over the raw transaction interface.
impl dyn TableTx + '_ {
  pub fn get<R: Record>(&mut self, id: &str) -> Result<Option<R>> {
    self
      .get_raw(R::TABLE, id)?
      .map(RawRecord::into_record)
      .transpose()
  }

  pub fn put<R: Record>(&mut self, record: &R) -> Result<()> {
    self.put_raw(R::TABLE, RawRecord::from_record(record)?)
  }

  pub fn add<R: Record>(&mut self, record: &R) -> Result<()> {
    self.insert_raw(R::TABLE, RawRecord::from_record(record)?)
  }

  pub fn bulk_put<R: Record>(&mut self, records: &[R]) -> Result<()> {
    records.iter().try_for_each(|r| self.put(r))
  }

  pub fn bulk_add<R: Record>(&mut self, records: &[R]) -> Result<()> {
    records.iter().try_for_each(|r| self.add(r))
  }

  pub fn list<R: Record>(&mut self, order: Option<OrderBy>) -> Result<Vec<R>> {
    self
      .list_raw(R::TABLE, order)?
      .into_iter()
      .map(RawRecord::into_record)
      .collect()
  }

  /// Read, modify and write back one record. Fails with
  /// [`Error::NotFound`] if it does not exist.
  pub fn modify<R: Record>(
    &mut self,
    id: &str,
    f: impl FnOnce(&mut R),
  ) -> Result<R> {
    let mut record = self.get::<R>(id)?.ok_or_else(|| Error::NotFound {
      table: R::TABLE,
      id:    id.to_owned(),
    })?;
    f(&mut record);
    self.put(&record)?;
    Ok(record)
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the local record store.
///
/// Single-record operations are each atomic. Multi-step work (read-modify-
/// write, restores, migrations) goes through [`VaultStore::transaction`],
/// which commits all of its writes together or none of them.
///
/// All methods return `Send` futures so the store can be shared across a
/// multi-threaded tokio runtime.
pub trait VaultStore: Send + Sync {
  /// Run `f` inside one transaction spanning `tables`. If `f` returns an
  /// error, every write it made is rolled back.
  ///
  /// Implementations collect `tables` before the returned future is first
  /// polled.
  fn transaction<T, F>(
    &self,
    tables: impl IntoIterator<Item = Table>,
    f: F,
  ) -> impl Future<Output = Result<T>> + Send + '_
  where
    T: Send + 'static,
    F: FnOnce(&mut dyn TableTx) -> Result<T> + Send + 'static;

  fn get<R: Record>(
    &self,
    id: &str,
  ) -> impl Future<Output = Result<Option<R>>> + Send + '_ {
    let id = id.to_owned();
    self.transaction([R::TABLE], move |tx| tx.get::<R>(&id))
  }

  /// Insert or replace a record.
  fn put<R: Record>(
    &self,
    record: R,
  ) -> impl Future<Output = Result<()>> + Send + '_ {
    self.transaction([R::TABLE], move |tx| tx.put(&record))
  }

  /// Insert a new record; fails with [`Error::DuplicateId`] if taken.
  fn add<R: Record>(
    &self,
    record: R,
  ) -> impl Future<Output = Result<()>> + Send + '_ {
    self.transaction([R::TABLE], move |tx| tx.add(&record))
  }

  fn delete(
    &self,
    table: Table,
    id: &str,
  ) -> impl Future<Output = Result<bool>> + Send + '_ {
    let id = id.to_owned();
    self.transaction([table], move |tx| tx.delete(table, &id))
  }

  fn list<R: Record>(
    &self,
    order: Option<OrderBy>,
  ) -> impl Future<Output = Result<Vec<R>>> + Send + '_ {
    self.transaction([R::TABLE], move |tx| tx.list::<R>(order))
  }

  fn bulk_put<R: Record>(
    &self,
    records: Vec<R>,
  ) -> impl Future<Output = Result<()>> + Send + '_ {
    self.transaction([R::TABLE], move |tx| tx.bulk_put(&records))
  }

  fn clear(&self, table: Table) -> impl Future<Output = Result<()>> + Send + '_ {
    self.transaction([table], move |tx| tx.clear(table))
  }

  fn count(&self, table: Table) -> impl Future<Output = Result<u64>> + Send + '_ {
    self.transaction([table], move |tx| tx.count(table))
  }
}
