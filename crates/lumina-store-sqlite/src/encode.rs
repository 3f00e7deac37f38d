//! Conversion between SQLite rows and [`RawRecord`]s.
//!
//! Timestamps are epoch-ms integers; the record body is compact JSON in
//! `value_json`.

use lumina_core::store::{OrderBy, RawRecord, SortField};

use crate::Result;

/// Column list shared by every record query, in [`decode_row`] order.
pub const COLUMNS: &str = "id, created_at, updated_at, sort_key, value_json";

/// A row as read from SQLite, before the JSON body is parsed.
pub struct RawRow {
  pub id:         String,
  pub created_at: i64,
  pub updated_at: i64,
  pub sort_key:   Option<String>,
  pub value_json: String,
}

impl RawRow {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      created_at: row.get(1)?,
      updated_at: row.get(2)?,
      sort_key:   row.get(3)?,
      value_json: row.get(4)?,
    })
  }

  pub fn decode(self) -> Result<RawRecord> {
    Ok(RawRecord {
      id:         self.id,
      created_at: self.created_at,
      updated_at: self.updated_at,
      sort_key:   self.sort_key,
      value:      serde_json::from_str(&self.value_json)?,
    })
  }
}

pub fn encode_value(record: &RawRecord) -> Result<String> {
  Ok(serde_json::to_string(&record.value)?)
}

/// The `ORDER BY` clause for a listing. `id` breaks ties so results are
/// deterministic.
pub fn order_clause(order: Option<OrderBy>) -> String {
  let order = order.unwrap_or_default();
  let column = match order.field {
    SortField::Id => "id",
    SortField::CreatedAt => "created_at",
    SortField::UpdatedAt => "updated_at",
    SortField::SortKey => "sort_key",
  };
  let dir = if order.descending { "DESC" } else { "ASC" };
  if column == "id" {
    format!("ORDER BY id {dir}")
  } else {
    format!("ORDER BY {column} {dir}, id {dir}")
  }
}
