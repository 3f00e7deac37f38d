//! Plain JSON snapshots of the whole vault.
//!
//! A snapshot is a point-in-time copy of every table, tagged with
//! [`SNAPSHOT_SCHEMA`]. Restoring one is a full replace, never a merge.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  Error, Result,
  model::{
    Appointment, Medication, Note, SETTINGS_ID, Settings, ShoppingItem, Table,
    now_ms,
  },
  store::VaultStore,
};

/// The snapshot format this build reads and writes.
pub const SNAPSHOT_SCHEMA: i64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
  pub schema:       i64,
  #[serde(default)]
  pub exported_at:  i64,
  pub settings:     Option<Settings>,
  #[serde(default)]
  pub notes:        Vec<Note>,
  #[serde(default)]
  pub shopping:     Vec<ShoppingItem>,
  #[serde(default)]
  pub appointments: Vec<Appointment>,
  #[serde(default)]
  pub medications:  Vec<Medication>,
}

/// Row counts written by [`import_snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
  pub settings:     bool,
  pub notes:        usize,
  pub shopping:     usize,
  pub appointments: usize,
  pub medications:  usize,
}

/// Read every table in one transaction.
pub async fn export_snapshot<S: VaultStore>(store: &S) -> Result<Snapshot> {
  store
    .transaction(Table::ALL, |tx| {
      Ok(Snapshot {
        schema:       SNAPSHOT_SCHEMA,
        exported_at:  now_ms(),
        settings:     tx.get::<Settings>(SETTINGS_ID)?,
        notes:        tx.list(None)?,
        shopping:     tx.list(None)?,
        appointments: tx.list(None)?,
        medications:  tx.list(None)?,
      })
    })
    .await
}

/// Validate `value` and replace the vault's contents with it.
///
/// Validation happens before any write: a missing or unknown `schema` is
/// [`Error::IncompatibleSchema`], a shape error is
/// [`Error::InvalidSnapshot`]. The replace itself runs in one transaction,
/// so a duplicate id or a read-only vault leaves the store untouched.
pub async fn import_snapshot<S: VaultStore>(
  store: &S,
  value: Value,
) -> Result<ImportSummary> {
  let found = value.get("schema").and_then(Value::as_i64);
  if found != Some(SNAPSHOT_SCHEMA) {
    return Err(Error::IncompatibleSchema { found, expected: SNAPSHOT_SCHEMA });
  }
  let snapshot: Snapshot = serde_json::from_value(value)
    .map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

  let summary = store
    .transaction(Table::ALL, move |tx| {
      if tx
        .get::<Settings>(SETTINGS_ID)?
        .is_some_and(|s| s.is_read_only())
      {
        return Err(Error::ReadOnly);
      }
      for table in Table::ALL {
        tx.clear(table)?;
      }
      if let Some(settings) = &snapshot.settings {
        tx.put(settings)?;
      }
      tx.bulk_add(&snapshot.notes)?;
      tx.bulk_add(&snapshot.shopping)?;
      tx.bulk_add(&snapshot.appointments)?;
      tx.bulk_add(&snapshot.medications)?;
      Ok(ImportSummary {
        settings:     snapshot.settings.is_some(),
        notes:        snapshot.notes.len(),
        shopping:     snapshot.shopping.len(),
        appointments: snapshot.appointments.len(),
        medications:  snapshot.medications.len(),
      })
    })
    .await?;

  tracing::info!(
    "restored snapshot: {} notes, {} shopping, {} appointments, {} medications",
    summary.notes,
    summary.shopping,
    summary.appointments,
    summary.medications
  );
  Ok(summary)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_arrays_default_to_empty() {
    let snap: Snapshot = serde_json::from_str(
      r#"{"schema": 1, "exportedAt": 5, "settings": null,
          "notes": [{"id": "n", "title": "t", "content": "", "createdAt": 1,
                     "updatedAt": 2}]}"#,
    )
    .unwrap();
    assert_eq!(snap.notes.len(), 1);
    assert!(snap.shopping.is_empty());
    assert!(snap.medications.is_empty());
    assert!(snap.settings.is_none());
  }

  #[test]
  fn serialises_with_wire_field_names() {
    let snap = Snapshot {
      schema:       SNAPSHOT_SCHEMA,
      exported_at:  42,
      settings:     Some(Settings::default()),
      notes:        vec![],
      shopping:     vec![],
      appointments: vec![],
      medications:  vec![],
    };
    let json = serde_json::to_value(&snap).unwrap();
    assert_eq!(json["schema"], 1);
    assert_eq!(json["exportedAt"], 42);
    assert_eq!(json["settings"]["seniorMode"], false);
    assert!(json["appointments"].as_array().unwrap().is_empty());
  }
}
