//! One repository per entity type, each borrowing the injected store.
//!
//! Repositories hold no state of their own; they translate user intents
//! (add, toggle, patch) into store operations. Read-modify-write updates run
//! inside a single transaction so concurrent callers cannot lose updates.

use chrono::NaiveDate;

use crate::{
  Error, Result,
  model::{
    Appointment, Medication, NewAppointment, NewMedication, NewNote, Note,
    NotePatch, Record, SETTINGS_ID, Settings, ShoppingItem, Table, day_key,
    new_id, now_ms,
  },
  store::{OrderBy, SortField, VaultStore},
};

fn not_found<R: Record>(id: &str) -> Error {
  Error::NotFound { table: R::TABLE, id: id.to_owned() }
}

// ─── Settings ────────────────────────────────────────────────────────────────

pub struct SettingsRepo<'a, S> {
  pub(crate) store: &'a S,
}

impl<S: VaultStore> SettingsRepo<'_, S> {
  /// The current settings, created with defaults on first access.
  pub async fn get(&self) -> Result<Settings> {
    self
      .store
      .transaction([Table::Settings], |tx| {
        if let Some(existing) = tx.get::<Settings>(SETTINGS_ID)? {
          return Ok(existing);
        }
        let defaults = Settings::default();
        tx.put(&defaults)?;
        Ok(defaults)
      })
      .await
  }

  pub async fn set(&self, settings: Settings) -> Result<()> {
    self.store.put(settings).await
  }

  async fn update(
    &self,
    f: impl FnOnce(&mut Settings) + Send + 'static,
  ) -> Result<Settings> {
    self
      .store
      .transaction([Table::Settings], move |tx| {
        let mut settings = tx.get::<Settings>(SETTINGS_ID)?.unwrap_or_default();
        f(&mut settings);
        tx.put(&settings)?;
        Ok(settings)
      })
      .await
  }

  pub async fn set_senior_mode(&self, enabled: bool) -> Result<Settings> {
    self.update(move |s| s.senior_mode = enabled).await
  }

  pub async fn set_read_only(&self, enabled: bool) -> Result<Settings> {
    self.update(move |s| s.read_only_mode = Some(enabled)).await
  }

  /// Record that a backup was exported at `at` (epoch-ms).
  pub async fn mark_backup(&self, at: i64) -> Result<Settings> {
    self.update(move |s| s.last_backup = Some(at)).await
  }
}

// ─── Notes ───────────────────────────────────────────────────────────────────

pub struct NotesRepo<'a, S> {
  pub(crate) store: &'a S,
}

impl<S: VaultStore> NotesRepo<'_, S> {
  /// All notes, most recently updated first.
  pub async fn list(&self) -> Result<Vec<Note>> {
    self.store.list(Some(OrderBy::desc(SortField::UpdatedAt))).await
  }

  pub async fn get(&self, id: &str) -> Result<Option<Note>> {
    self.store.get(id).await
  }

  pub async fn add(&self, input: NewNote) -> Result<Note> {
    let at = now_ms();
    let note = Note {
      id:         new_id(),
      title:      input.title.trim().to_owned(),
      content:    input.content.trim().to_owned(),
      tags:       input.tags,
      created_at: at,
      updated_at: at,
    };
    self.store.add(note.clone()).await?;
    Ok(note)
  }

  /// Apply `patch` and refresh `updatedAt`.
  pub async fn update(&self, id: &str, patch: NotePatch) -> Result<Note> {
    let id = id.to_owned();
    self
      .store
      .transaction([Table::Notes], move |tx| {
        tx.modify::<Note>(&id, |note| {
          if let Some(title) = patch.title {
            note.title = title.trim().to_owned();
          }
          if let Some(content) = patch.content {
            note.content = content.trim().to_owned();
          }
          if let Some(tags) = patch.tags {
            note.tags = tags;
          }
          note.updated_at = now_ms().max(note.created_at);
        })
      })
      .await
  }

  pub async fn remove(&self, id: &str) -> Result<bool> {
    self.store.delete(Table::Notes, id).await
  }
}

// ─── Shopping ────────────────────────────────────────────────────────────────

pub struct ShoppingRepo<'a, S> {
  pub(crate) store: &'a S,
}

impl<S: VaultStore> ShoppingRepo<'_, S> {
  /// All items, newest first.
  pub async fn list(&self) -> Result<Vec<ShoppingItem>> {
    self.store.list(Some(OrderBy::desc(SortField::CreatedAt))).await
  }

  pub async fn add(&self, text: &str) -> Result<ShoppingItem> {
    let item = ShoppingItem {
      id:         new_id(),
      text:       text.trim().to_owned(),
      completed:  false,
      created_at: now_ms(),
    };
    self.store.add(item.clone()).await?;
    Ok(item)
  }

  /// Flip `completed` atomically and return the new state.
  pub async fn toggle(&self, id: &str) -> Result<ShoppingItem> {
    let id = id.to_owned();
    self
      .store
      .transaction([Table::Shopping], move |tx| {
        tx.modify::<ShoppingItem>(&id, |item| item.completed = !item.completed)
      })
      .await
  }

  pub async fn remove(&self, id: &str) -> Result<bool> {
    self.store.delete(Table::Shopping, id).await
  }

  /// Delete every completed item; returns how many were removed.
  pub async fn clear_completed(&self) -> Result<usize> {
    self
      .store
      .transaction([Table::Shopping], |tx| {
        let done: Vec<ShoppingItem> = tx
          .list::<ShoppingItem>(None)?
          .into_iter()
          .filter(|i| i.completed)
          .collect();
        for item in &done {
          tx.delete(Table::Shopping, &item.id)?;
        }
        Ok(done.len())
      })
      .await
  }
}

// ─── Appointments ────────────────────────────────────────────────────────────

pub struct AppointmentsRepo<'a, S> {
  pub(crate) store: &'a S,
}

impl<S: VaultStore> AppointmentsRepo<'_, S> {
  /// All appointments in chronological order.
  pub async fn list(&self) -> Result<Vec<Appointment>> {
    self.store.list(Some(OrderBy::asc(SortField::SortKey))).await
  }

  pub async fn add(&self, input: NewAppointment) -> Result<Appointment> {
    let appt = Appointment {
      id:            new_id(),
      title:         input.title.trim().to_owned(),
      place:         input.place,
      doctor:        input.doctor,
      note:          input.note,
      date_time_iso: input.date_time_iso,
      created_at:    now_ms(),
    };
    self.store.add(appt.clone()).await?;
    Ok(appt)
  }

  /// Replace an existing appointment; its id and `createdAt` are kept.
  pub async fn update(&self, appt: Appointment) -> Result<Appointment> {
    self
      .store
      .transaction([Table::Appointments], move |tx| {
        let existing = tx
          .get::<Appointment>(&appt.id)?
          .ok_or_else(|| not_found::<Appointment>(&appt.id))?;
        let updated = Appointment { created_at: existing.created_at, ..appt };
        tx.put(&updated)?;
        Ok(updated)
      })
      .await
  }

  pub async fn remove(&self, id: &str) -> Result<bool> {
    self.store.delete(Table::Appointments, id).await
  }
}

// ─── Medications ─────────────────────────────────────────────────────────────

pub struct MedicationsRepo<'a, S> {
  pub(crate) store: &'a S,
}

impl<S: VaultStore> MedicationsRepo<'_, S> {
  /// All medications, newest first.
  pub async fn list(&self) -> Result<Vec<Medication>> {
    self.store.list(Some(OrderBy::desc(SortField::CreatedAt))).await
  }

  pub async fn add(&self, input: NewMedication) -> Result<Medication> {
    let at = now_ms();
    let med = Medication {
      id:         new_id(),
      name:       input.name.trim().to_owned(),
      dose:       input.dose.trim().to_owned(),
      times:      input
        .times
        .iter()
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .collect(),
      active:     true,
      taken_on:   None,
      created_at: at,
      updated_at: at,
    };
    self.store.add(med.clone()).await?;
    Ok(med)
  }

  pub async fn toggle_active(&self, id: &str) -> Result<Medication> {
    let id = id.to_owned();
    self
      .store
      .transaction([Table::Medications], move |tx| {
        tx.modify::<Medication>(&id, |m| {
          m.active = !m.active;
          m.updated_at = now_ms();
        })
      })
      .await
  }

  /// Mark (or unmark) the dose as taken on `today`.
  pub async fn set_taken(
    &self,
    id: &str,
    taken: bool,
    today: NaiveDate,
  ) -> Result<Medication> {
    let id = id.to_owned();
    self
      .store
      .transaction([Table::Medications], move |tx| {
        tx.modify::<Medication>(&id, |m| {
          m.taken_on = taken.then(|| day_key(today));
          m.updated_at = now_ms();
        })
      })
      .await
  }

  /// Clear `takenOn` marks left over from previous days. Returns the number
  /// of medications reset.
  pub async fn normalize_for_today(&self, today: NaiveDate) -> Result<usize> {
    let key = day_key(today);
    self
      .store
      .transaction([Table::Medications], move |tx| {
        let mut reset = 0;
        for mut med in tx.list::<Medication>(None)? {
          if med.taken_on.as_ref().is_some_and(|d| *d != key) {
            med.taken_on = None;
            tx.put(&med)?;
            reset += 1;
          }
        }
        Ok(reset)
      })
      .await
  }

  pub async fn remove(&self, id: &str) -> Result<bool> {
    self.store.delete(Table::Medications, id).await
  }
}
