//! [`SqliteStore`], the SQLite implementation of [`VaultStore`].

use std::{
  collections::BTreeSet,
  future::Future,
  path::{Path, PathBuf},
};

use rusqlite::{ErrorCode, OptionalExtension as _};

use lumina_core::{
  Error as CoreError,
  model::Table,
  store::{OrderBy, RawRecord, TableTx, VaultStore},
};

use crate::{
  Error, Result,
  encode::{COLUMNS, RawRow, encode_value, order_clause},
  schema::{CURRENT_VERSION, MIGRATIONS, PRAGMAS},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Lumina vault backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// What [`SqliteStore::open_safe`] may do when the database cannot be
/// opened.
pub enum RepairPolicy {
  /// Report the failure and leave the file alone.
  Never,
  /// Delete and recreate the database without asking.
  Auto,
  /// Ask the callback; repair only if it returns `true`.
  Confirm(Box<dyn FnOnce(&CoreError) -> bool + Send>),
}

/// Result of [`SqliteStore::open_safe`]. Never an `Err`: a broken store is
/// a state the caller renders, not a crash.
pub enum OpenOutcome {
  Ready(SqliteStore),
  Broken(CoreError),
}

impl SqliteStore {
  /// Open (or create) a store at `path` and bring its schema up to date.
  ///
  /// Open failures are classified as [`CoreError::StorageUnavailable`],
  /// [`CoreError::SchemaIncompatible`] or [`CoreError::CorruptDatabase`].
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let conn = tokio_rusqlite::Connection::open(path)
      .await
      .map_err(classify_open)?;
    let store = Self { conn };
    let from = store.init_schema().await?;
    tracing::info!(
      "opened vault at {} (schema v{from} -> v{CURRENT_VERSION})",
      path.display()
    );
    Ok(store)
  }

  /// Open a private in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory()
      .await
      .map_err(classify_open)?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open `path`, applying `policy` if that fails with a repairable error.
  pub async fn open_safe(
    path: impl AsRef<Path>,
    policy: RepairPolicy,
  ) -> OpenOutcome {
    let path = path.as_ref();
    let err = match Self::open(path).await {
      Ok(store) => return OpenOutcome::Ready(store),
      Err(e) => CoreError::from(e),
    };
    tracing::warn!("cannot open vault at {}: {err}", path.display());

    if !err.is_repairable() {
      return OpenOutcome::Broken(err);
    }
    match policy {
      RepairPolicy::Never => return OpenOutcome::Broken(err),
      RepairPolicy::Confirm(approve) => {
        if !approve(&err) {
          return OpenOutcome::Broken(CoreError::RepairDeclined);
        }
      }
      RepairPolicy::Auto => {}
    }

    if let Err(e) = Self::repair(path).await {
      return OpenOutcome::Broken(e.into());
    }
    match Self::open(path).await {
      Ok(store) => OpenOutcome::Ready(store),
      Err(e) => OpenOutcome::Broken(e.into()),
    }
  }

  /// Delete the database at `path` together with its WAL and shared-memory
  /// files. Destroys every record.
  pub async fn repair(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    for file in sibling_files(path) {
      match tokio::fs::remove_file(&file).await {
        Ok(()) => tracing::debug!("removed {}", file.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
      }
    }
    tracing::info!("local vault at {} was reset", path.display());
    Ok(())
  }

  /// Close the connection, waiting for pending work to finish.
  pub async fn close(self) -> Result<()> {
    self.conn.close().await?;
    Ok(())
  }

  /// The `user_version` of the open database.
  pub async fn schema_version(&self) -> Result<i64> {
    let v = self
      .conn
      .call(|conn| {
        Ok(conn.query_row("PRAGMA user_version", [], |r| r.get::<_, i64>(0))?)
      })
      .await?;
    Ok(v)
  }

  /// Apply pending schema steps. Returns the version found on disk.
  async fn init_schema(&self) -> Result<i64> {
    let found = self
      .conn
      .call(|conn| {
        conn.execute_batch(PRAGMAS)?;
        let found: i64 =
          conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        if (0..CURRENT_VERSION).contains(&found) {
          let tx = conn.transaction()?;
          for step in &MIGRATIONS[found as usize..] {
            tx.execute_batch(step)?;
          }
          tx.pragma_update(None, "user_version", CURRENT_VERSION)?;
          tx.commit()?;
        }
        Ok(found)
      })
      .await
      .map_err(classify_open)?;

    if found > CURRENT_VERSION {
      return Err(
        CoreError::SchemaIncompatible { found, supported: CURRENT_VERSION }
          .into(),
      );
    }
    if found < CURRENT_VERSION {
      tracing::info!("upgraded schema v{found} -> v{CURRENT_VERSION}");
    }
    Ok(found)
  }
}

fn sibling_files(path: &Path) -> [PathBuf; 3] {
  let with_suffix = |suffix: &str| {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
  };
  [path.to_owned(), with_suffix("-wal"), with_suffix("-shm")]
}

/// Map a failure while opening into the core taxonomy.
fn classify_open(e: tokio_rusqlite::Error) -> Error {
  let code = match &e {
    tokio_rusqlite::Error::Rusqlite(e) => e.sqlite_error_code(),
    _ => None,
  };
  let classified = match code {
    Some(
      ErrorCode::CannotOpen
      | ErrorCode::PermissionDenied
      | ErrorCode::ReadOnly
      | ErrorCode::DatabaseBusy
      | ErrorCode::DatabaseLocked
      | ErrorCode::DiskFull
      | ErrorCode::OutOfMemory,
    ) => CoreError::StorageUnavailable(e.to_string()),
    _ => CoreError::CorruptDatabase(e.to_string()),
  };
  Error::Core(classified)
}

// ─── Transactions ────────────────────────────────────────────────────────────

/// The tables of one open SQLite transaction, limited to a declared scope.
struct SqliteTx<'c> {
  conn:  &'c rusqlite::Connection,
  scope: BTreeSet<Table>,
}

impl SqliteTx<'_> {
  fn check(&self, table: Table) -> Result<()> {
    if self.scope.contains(&table) {
      Ok(())
    } else {
      Err(CoreError::TableNotInScope(table).into())
    }
  }

  fn read(&self, table: Table, id: &str) -> Result<Option<RawRecord>> {
    self.check(table)?;
    self
      .conn
      .query_row(
        &format!("SELECT {COLUMNS} FROM {table} WHERE id = ?1"),
        [id],
        RawRow::from_row,
      )
      .optional()?
      .map(RawRow::decode)
      .transpose()
  }

  fn write(&self, table: Table, record: &RawRecord, verb: &str) -> Result<usize> {
    self.check(table)?;
    let value_json = encode_value(record)?;
    let changed = self.conn.execute(
      &format!("{verb} INTO {table} ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
      rusqlite::params![
        record.id,
        record.created_at,
        record.updated_at,
        record.sort_key,
        value_json,
      ],
    )?;
    Ok(changed)
  }

  fn insert(&self, table: Table, record: &RawRecord) -> Result<()> {
    if self.write(table, record, "INSERT OR IGNORE")? == 0 {
      return Err(
        CoreError::DuplicateId { table, id: record.id.clone() }.into(),
      );
    }
    Ok(())
  }

  fn remove(&self, table: Table, id: &str) -> Result<bool> {
    self.check(table)?;
    let n = self
      .conn
      .execute(&format!("DELETE FROM {table} WHERE id = ?1"), [id])?;
    Ok(n > 0)
  }

  fn list(&self, table: Table, order: Option<OrderBy>) -> Result<Vec<RawRecord>> {
    self.check(table)?;
    let sql = format!("SELECT {COLUMNS} FROM {table} {}", order_clause(order));
    let mut stmt = self.conn.prepare(&sql)?;
    let rows = stmt
      .query_map([], RawRow::from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(RawRow::decode).collect()
  }

  fn count_rows(&self, table: Table) -> Result<u64> {
    self.check(table)?;
    let n: i64 = self.conn.query_row(
      &format!("SELECT COUNT(*) FROM {table}"),
      [],
      |r| r.get(0),
    )?;
    Ok(n.max(0) as u64)
  }

  fn clear_table(&self, table: Table) -> Result<()> {
    self.check(table)?;
    self.conn.execute(&format!("DELETE FROM {table}"), [])?;
    Ok(())
  }

  fn meta(&self, key: &str) -> Result<Option<String>> {
    Ok(
      self
        .conn
        .query_row("SELECT value FROM meta WHERE key = ?1", [key], |r| r.get(0))
        .optional()?,
    )
  }

  fn put_meta(&self, key: &str, value: &str) -> Result<()> {
    self.conn.execute(
      "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
      [key, value],
    )?;
    Ok(())
  }
}

impl TableTx for SqliteTx<'_> {
  fn get_raw(
    &mut self,
    table: Table,
    id: &str,
  ) -> lumina_core::Result<Option<RawRecord>> {
    Ok(self.read(table, id)?)
  }

  fn put_raw(&mut self, table: Table, record: RawRecord) -> lumina_core::Result<()> {
    self.write(table, &record, "INSERT OR REPLACE")?;
    Ok(())
  }

  fn insert_raw(
    &mut self,
    table: Table,
    record: RawRecord,
  ) -> lumina_core::Result<()> {
    Ok(self.insert(table, &record)?)
  }

  fn delete(&mut self, table: Table, id: &str) -> lumina_core::Result<bool> {
    Ok(self.remove(table, id)?)
  }

  fn list_raw(
    &mut self,
    table: Table,
    order: Option<OrderBy>,
  ) -> lumina_core::Result<Vec<RawRecord>> {
    Ok(self.list(table, order)?)
  }

  fn count(&mut self, table: Table) -> lumina_core::Result<u64> {
    Ok(self.count_rows(table)?)
  }

  fn clear(&mut self, table: Table) -> lumina_core::Result<()> {
    Ok(self.clear_table(table)?)
  }

  fn get_meta(&mut self, key: &str) -> lumina_core::Result<Option<String>> {
    Ok(self.meta(key)?)
  }

  fn set_meta(&mut self, key: &str, value: &str) -> lumina_core::Result<()> {
    Ok(self.put_meta(key, value)?)
  }
}

// ─── VaultStore impl ─────────────────────────────────────────────────────────

impl VaultStore for SqliteStore {
  fn transaction<T, F>(
    &self,
    tables: impl IntoIterator<Item = Table>,
    f: F,
  ) -> impl Future<Output = lumina_core::Result<T>> + Send + '_
  where
    T: Send + 'static,
    F: FnOnce(&mut dyn TableTx) -> lumina_core::Result<T> + Send + 'static,
  {
    let scope: BTreeSet<Table> = tables.into_iter().collect();
    async move {
      let outcome = self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;
          let outcome = f(&mut SqliteTx { conn: &tx, scope });
          // Dropping an uncommitted transaction rolls it back.
          if outcome.is_ok() {
            tx.commit()?;
          }
          Ok(outcome)
        })
        .await
        .map_err(Error::from)?;
      outcome
    }
  }
}
