//! Lenient parsing of the flat key/value storage used by earlier releases.
//!
//! Nothing read from a legacy source is trusted: every field is taken from a
//! raw [`serde_json::Value`], coerced to the expected type, and entries that
//! cannot provide a usable identity are dropped.

use std::{collections::HashMap, path::Path};

use serde_json::{Map, Value};

use crate::model::{
  Appointment, Medication, Note, Settings, ShoppingItem, new_id, now_ms,
};

// ─── Keys ────────────────────────────────────────────────────────────────────

/// Keys that held the whole app state as one JSON object.
pub const BLOB_KEYS: [&str; 5] = [
  "LUMINA_PURE_VAULT",
  "LUMINA_PURE_VAULT_V3",
  "LUMINA_PURE_VAULT_VAULT",
  "LUMINA_PURE_VAULT_STATE",
  "LUMINA_LOCAL_VAULT",
];

pub const SETTINGS_KEY: &str = "lumina:settings:v1";
pub const NOTES_KEY: &str = "lumina:notes:v1";
pub const SHOPPING_KEY: &str = "lumina:shopping:v1";
pub const APPOINTMENTS_KEY: &str = "lumina:appointments:v1";
pub const MEDS_KEY: &str = "lumina_meds_v1";

// ─── Sources ─────────────────────────────────────────────────────────────────

/// Read access to the legacy flat storage.
pub trait LegacySource: Send + Sync {
  fn read(&self, key: &str) -> Option<String>;
}

/// In-memory legacy storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
  entries: HashMap<String, String>,
}

impl MemorySource {
  pub fn new() -> Self { Self::default() }

  pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
    self.entries.insert(key.to_owned(), value.into());
    self
  }
}

impl LegacySource for MemorySource {
  fn read(&self, key: &str) -> Option<String> { self.entries.get(key).cloned() }
}

/// A flat JSON object file (`{"key": "<serialized value>", ...}`), the
/// on-disk dump of the old key/value storage.
///
/// Values may be strings holding serialized JSON or inline JSON values.
#[derive(Debug, Clone, Default)]
pub struct JsonFileSource {
  entries: HashMap<String, String>,
}

impl JsonFileSource {
  /// Load `path`. A missing or unreadable file yields an empty source.
  pub fn load(path: impl AsRef<Path>) -> Self {
    let path = path.as_ref();
    let raw = match std::fs::read_to_string(path) {
      Ok(raw) => raw,
      Err(e) => {
        tracing::debug!("no legacy storage at {}: {e}", path.display());
        return Self::default();
      }
    };
    Self::parse(&raw)
  }

  pub fn parse(raw: &str) -> Self {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
      tracing::warn!("legacy storage file is not a JSON object; ignoring it");
      return Self::default();
    };
    let entries = map
      .into_iter()
      .map(|(k, v)| match v {
        Value::String(s) => (k, s),
        other => (k, other.to_string()),
      })
      .collect();
    Self { entries }
  }
}

impl LegacySource for JsonFileSource {
  fn read(&self, key: &str) -> Option<String> { self.entries.get(key).cloned() }
}

// ─── Parsed result ───────────────────────────────────────────────────────────

/// Everything recovered from legacy storage, ready for bulk insertion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyImport {
  pub settings:     Option<Settings>,
  pub notes:        Vec<Note>,
  pub shopping:     Vec<ShoppingItem>,
  pub appointments: Vec<Appointment>,
  pub medications:  Vec<Medication>,
}

impl LegacyImport {
  pub fn is_empty(&self) -> bool {
    self.settings.is_none()
      && self.notes.is_empty()
      && self.shopping.is_empty()
      && self.appointments.is_empty()
      && self.medications.is_empty()
  }

  /// Read every known legacy layout from `source`. Keys that are missing or
  /// hold unparseable JSON contribute nothing.
  pub fn read(source: &dyn LegacySource) -> Self {
    let mut out = Self::default();

    if let Some((key, blob)) = BLOB_KEYS
      .iter()
      .find_map(|k| {
        source
          .read(k)
          .filter(|raw| raw.trim_start().starts_with('{'))
          .map(|raw| (*k, raw))
      })
      .and_then(|(k, raw)| Some((k, parse_json(&raw)?)))
    {
      out.absorb_blob(key, &blob);
    }

    if let Some(v) = source.read(SETTINGS_KEY).and_then(|r| parse_json(&r))
      && v.is_object()
    {
      out.settings = Some(coerce_settings(&v));
    }
    if let Some(v) = source.read(NOTES_KEY).and_then(|r| parse_json(&r)) {
      out.notes.extend(each(&v).filter_map(coerce_note));
    }
    if let Some(v) = source.read(SHOPPING_KEY).and_then(|r| parse_json(&r)) {
      out.shopping.extend(each(&v).filter_map(coerce_shopping_item));
    }
    if let Some(v) = source.read(APPOINTMENTS_KEY).and_then(|r| parse_json(&r)) {
      let now = now_ms();
      out.appointments.extend(
        each(&v)
          .enumerate()
          .filter_map(|(i, a)| {
            coerce_appointment(a, APPOINTMENTS_KEY, i, now)
          }),
      );
    }
    if let Some(v) = source.read(MEDS_KEY).and_then(|r| parse_json(&r)) {
      out.medications.extend(each(&v).filter_map(coerce_medication));
    }

    out.dedupe();
    out
  }

  fn absorb_blob(&mut self, key: &str, blob: &Value) {
    self.settings = Some(coerce_settings(blob));
    let now = now_ms();
    self
      .notes
      .extend(each(field(blob, "notes")).filter_map(coerce_note));
    self.shopping.extend(
      each(field(blob, "shoppingList"))
        .chain(each(field(blob, "shopping")))
        .filter_map(coerce_shopping_item),
    );
    self.appointments.extend(
      each(field(blob, "appointments"))
        .enumerate()
        .filter_map(|(i, a)| coerce_appointment(a, key, i, now)),
    );
    self.medications.extend(
      each(field(blob, "meds"))
        .chain(each(field(blob, "medications")))
        .filter_map(coerce_medication),
    );
  }

  /// Keep the first occurrence of each id so bulk inserts cannot collide.
  fn dedupe(&mut self) {
    fn keep_first<T>(items: &mut Vec<T>, id: impl Fn(&T) -> &str) {
      let mut seen = std::collections::HashSet::new();
      items.retain(|item| seen.insert(id(item).to_owned()));
    }
    keep_first(&mut self.notes, |n| &n.id);
    keep_first(&mut self.shopping, |s| &s.id);
    keep_first(&mut self.appointments, |a| &a.id);
    keep_first(&mut self.medications, |m| &m.id);
  }
}

// ─── Coercion helpers ────────────────────────────────────────────────────────

fn parse_json(raw: &str) -> Option<Value> {
  serde_json::from_str(raw).ok()
}

fn field<'v>(v: &'v Value, key: &str) -> &'v Value {
  v.get(key).unwrap_or(&Value::Null)
}

fn each(v: &Value) -> impl Iterator<Item = &Value> {
  v.as_array().into_iter().flatten()
}

/// A string, or a number rendered as a string.
fn as_text(v: &Value) -> Option<String> {
  match v {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

fn as_nonempty_text(v: &Value) -> Option<String> {
  as_text(v).filter(|s| !s.trim().is_empty())
}

/// Epoch-ms from a number or a numeric string.
fn as_millis(v: &Value) -> Option<i64> {
  match v {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn as_string_list(v: &Value) -> Vec<String> {
  each(v).filter_map(as_text).collect()
}

fn first_text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
  keys.iter().find_map(|k| obj.get(*k).and_then(as_nonempty_text))
}

fn coerce_settings(v: &Value) -> Settings {
  Settings {
    senior_mode:    field(v, "seniorMode").as_bool().unwrap_or(false),
    version:        field(v, "version")
      .as_str()
      .map(str::to_owned)
      .unwrap_or_else(|| "legacy".to_owned()),
    last_backup:    as_millis(field(v, "lastBackup")),
    read_only_mode: field(v, "readOnlyMode").as_bool(),
  }
}

fn coerce_note(v: &Value) -> Option<Note> {
  let obj = v.as_object()?;
  let id = obj.get("id").and_then(as_nonempty_text)?;
  let created_at = obj.get("createdAt").and_then(as_millis).unwrap_or_else(now_ms);
  let updated_at = obj
    .get("updatedAt")
    .and_then(as_millis)
    .unwrap_or(created_at)
    .max(created_at);
  Some(Note {
    id,
    title: obj.get("title").and_then(as_text).unwrap_or_default(),
    content: obj.get("content").and_then(as_text).unwrap_or_default(),
    tags: obj.get("tags").map(as_string_list).unwrap_or_default(),
    created_at,
    updated_at,
  })
}

fn coerce_shopping_item(v: &Value) -> Option<ShoppingItem> {
  // Early releases kept the list as bare strings.
  if let Some(text) = v.as_str() {
    return (!text.trim().is_empty()).then(|| ShoppingItem {
      id:         new_id(),
      text:       text.trim().to_owned(),
      completed:  false,
      created_at: now_ms(),
    });
  }
  let obj = v.as_object()?;
  let text = obj.get("text").and_then(as_text).unwrap_or_default();
  let id = obj.get("id").and_then(as_nonempty_text);
  if id.is_none() && text.trim().is_empty() {
    return None;
  }
  Some(ShoppingItem {
    id: id.unwrap_or_else(new_id),
    text,
    completed: obj.get("completed").and_then(Value::as_bool).unwrap_or(false),
    created_at: obj.get("createdAt").and_then(as_millis).unwrap_or_else(now_ms),
  })
}

/// Entries without an id get one derived from the key they were read from
/// and their position, so two sources never mint the same id.
fn coerce_appointment(
  v: &Value,
  source_key: &str,
  index: usize,
  now: i64,
) -> Option<Appointment> {
  let obj = v.as_object()?;
  let id = obj.get("id").and_then(as_nonempty_text);
  let when = first_text(obj, &["dateTimeISO", "dateTime", "date"]);
  if id.is_none() && when.is_none() {
    return None;
  }
  Some(Appointment {
    id:            id.unwrap_or_else(|| format!("{source_key}-{now}-{index}")),
    title:         first_text(obj, &["title", "name", "text"])
      .unwrap_or_else(|| "Cita".to_owned()),
    place:         first_text(obj, &["place"]),
    doctor:        first_text(obj, &["doctor"]),
    note:          first_text(obj, &["note"]),
    date_time_iso: when.unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
    created_at:    obj.get("createdAt").and_then(as_millis).unwrap_or(now),
  })
}

fn coerce_medication(v: &Value) -> Option<Medication> {
  let obj = v.as_object()?;
  let name = obj.get("name").and_then(as_nonempty_text)?;
  let created_at = obj.get("createdAt").and_then(as_millis).unwrap_or_else(now_ms);
  Some(Medication {
    id: obj
      .get("id")
      .and_then(as_nonempty_text)
      .unwrap_or_else(new_id),
    name: name.trim().to_owned(),
    dose: obj.get("dose").and_then(as_text).unwrap_or_default(),
    times: obj.get("times").map(as_string_list).unwrap_or_default(),
    // Absent means active; only an explicit `false` disables.
    active: obj.get("active").and_then(Value::as_bool).unwrap_or(true),
    taken_on: obj.get("takenOn").and_then(Value::as_str).map(str::to_owned),
    created_at,
    updated_at: obj
      .get("updatedAt")
      .and_then(as_millis)
      .unwrap_or(created_at),
  })
}
