//! Record types: the entities persisted in the local vault.
//!
//! Every record lives in exactly one [`Table`], carries an immutable string
//! `id`, and never references another record. Field names serialise in
//! camelCase so snapshots keep the on-disk JSON shape of earlier releases.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

// ─── Tables ──────────────────────────────────────────────────────────────────

/// The tables of the local store.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumIter,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Table {
  Settings,
  Notes,
  Shopping,
  Appointments,
  Medications,
}

impl Table {
  /// Every table, settings first.
  pub const ALL: [Table; 5] = [
    Table::Settings,
    Table::Notes,
    Table::Shopping,
    Table::Appointments,
    Table::Medications,
  ];

  /// Tables holding user-created collections (everything but settings).
  pub const COLLECTIONS: [Table; 4] = [
    Table::Notes,
    Table::Shopping,
    Table::Appointments,
    Table::Medications,
  ];
}

// ─── Record trait ────────────────────────────────────────────────────────────

/// A value that can be stored in one table of the vault.
///
/// The timestamp and sort-key accessors feed the indexed columns used by
/// [`crate::store::OrderBy`]; the full value is stored as JSON.
pub trait Record:
  Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
  const TABLE: Table;

  fn id(&self) -> &str;

  fn created_at(&self) -> i64 { 0 }

  fn updated_at(&self) -> i64 { self.created_at() }

  fn sort_key(&self) -> Option<&str> { None }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 { Utc::now().timestamp_millis() }

/// A fresh random record id.
pub fn new_id() -> String { Uuid::new_v4().to_string() }

// ─── Settings ────────────────────────────────────────────────────────────────

/// The fixed id of the singleton settings record.
pub const SETTINGS_ID: &str = "settings";

/// App-wide preferences. Exactly one instance exists; absence means the
/// store has not been initialised yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
  pub senior_mode:    bool,
  pub version:        String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_backup:    Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub read_only_mode: Option<bool>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      senior_mode:    false,
      version:        "0.2.0".to_owned(),
      last_backup:    None,
      read_only_mode: None,
    }
  }
}

impl Settings {
  pub fn is_read_only(&self) -> bool { self.read_only_mode.unwrap_or(false) }
}

impl Record for Settings {
  const TABLE: Table = Table::Settings;

  fn id(&self) -> &str { SETTINGS_ID }
}

// ─── Notes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
  pub id:         String,
  pub title:      String,
  pub content:    String,
  #[serde(default)]
  pub tags:       Vec<String>,
  pub created_at: i64,
  pub updated_at: i64,
}

impl Record for Note {
  const TABLE: Table = Table::Notes;

  fn id(&self) -> &str { &self.id }

  fn created_at(&self) -> i64 { self.created_at }

  fn updated_at(&self) -> i64 { self.updated_at }
}

/// Input to [`crate::repo::NotesRepo::add`].
#[derive(Debug, Clone, Default)]
pub struct NewNote {
  pub title:   String,
  pub content: String,
  pub tags:    Vec<String>,
}

/// Partial update for a note; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct NotePatch {
  pub title:   Option<String>,
  pub content: Option<String>,
  pub tags:    Option<Vec<String>>,
}

// ─── Shopping ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingItem {
  pub id:         String,
  pub text:       String,
  #[serde(default)]
  pub completed:  bool,
  pub created_at: i64,
}

impl Record for ShoppingItem {
  const TABLE: Table = Table::Shopping;

  fn id(&self) -> &str { &self.id }

  fn created_at(&self) -> i64 { self.created_at }
}

// ─── Appointments ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
  pub id:            String,
  pub title:         String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub place:         Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub doctor:        Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub note:          Option<String>,
  /// ISO-8601 date-time; appointments are listed in this order.
  #[serde(rename = "dateTimeISO")]
  pub date_time_iso: String,
  pub created_at:    i64,
}

impl Record for Appointment {
  const TABLE: Table = Table::Appointments;

  fn id(&self) -> &str { &self.id }

  fn created_at(&self) -> i64 { self.created_at }

  fn sort_key(&self) -> Option<&str> { Some(&self.date_time_iso) }
}

/// Input to [`crate::repo::AppointmentsRepo::add`].
#[derive(Debug, Clone, Default)]
pub struct NewAppointment {
  pub title:         String,
  pub place:         Option<String>,
  pub doctor:        Option<String>,
  pub note:          Option<String>,
  pub date_time_iso: String,
}

// ─── Medications ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
  pub id:         String,
  pub name:       String,
  pub dose:       String,
  /// Times of day as `HH:MM`.
  #[serde(default)]
  pub times:      Vec<String>,
  pub active:     bool,
  /// The day (`YYYY-MM-DD`) the dose was marked as taken, if any.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub taken_on:   Option<String>,
  pub created_at: i64,
  pub updated_at: i64,
}

impl Medication {
  /// Whether the dose has been marked as taken on `day`.
  pub fn taken_on_day(&self, day: NaiveDate) -> bool {
    self.taken_on.as_deref() == Some(day_key(day).as_str())
  }
}

impl Record for Medication {
  const TABLE: Table = Table::Medications;

  fn id(&self) -> &str { &self.id }

  fn created_at(&self) -> i64 { self.created_at }

  fn updated_at(&self) -> i64 { self.updated_at }
}

/// Input to [`crate::repo::MedicationsRepo::add`].
#[derive(Debug, Clone, Default)]
pub struct NewMedication {
  pub name:  String,
  pub dose:  String,
  pub times: Vec<String>,
}

/// The `YYYY-MM-DD` key stored in [`Medication::taken_on`].
pub fn day_key(day: NaiveDate) -> String { day.format("%Y-%m-%d").to_string() }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn table_names_are_snake_case() {
    assert_eq!(Table::Shopping.as_ref(), "shopping");
    assert_eq!(Table::Appointments.to_string(), "appointments");
    assert_eq!("medications".parse::<Table>().unwrap(), Table::Medications);
  }

  #[test]
  fn appointment_uses_iso_field_name() {
    let appt = Appointment {
      id:            "a1".into(),
      title:         "Dentist".into(),
      place:         None,
      doctor:        Some("Dr. Ruiz".into()),
      note:          None,
      date_time_iso: "2026-03-01T09:30:00Z".into(),
      created_at:    1,
    };
    let json = serde_json::to_value(&appt).unwrap();
    assert_eq!(json["dateTimeISO"], "2026-03-01T09:30:00Z");
    assert_eq!(json["createdAt"], 1);
    assert!(json.get("place").is_none());
  }

  #[test]
  fn settings_default_and_optional_fields() {
    let s: Settings =
      serde_json::from_str(r#"{"seniorMode":true,"version":"1.0"}"#).unwrap();
    assert!(s.senior_mode);
    assert_eq!(s.last_backup, None);
    assert!(!s.is_read_only());
    assert_eq!(Settings::default().version, "0.2.0");
  }

  #[test]
  fn medication_taken_on_day() {
    let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
    let mut med = Medication {
      id:         "m".into(),
      name:       "Ibuprofen".into(),
      dose:       "200mg".into(),
      times:      vec!["08:00".into()],
      active:     true,
      taken_on:   Some("2026-10-19".into()),
      created_at: 0,
      updated_at: 0,
    };
    assert!(med.taken_on_day(day));
    med.taken_on = Some("2026-10-18".into());
    assert!(!med.taken_on_day(day));
  }
}
