//! SQL schema for the Lumina SQLite store.
//!
//! The schema is an ordered list of additive steps. `PRAGMA user_version`
//! records how many have been applied; opening a file runs the missing ones
//! inside a single transaction. Steps never drop or rewrite existing tables.

/// Number of schema steps this build knows about.
pub const CURRENT_VERSION: i64 = MIGRATIONS.len() as i64;

/// Pragmas applied on every connection, outside any transaction.
pub const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous  = NORMAL;
";

// Every record table shares one layout: the indexed columns used for
// ordering plus the full record as JSON.
pub const MIGRATIONS: [&str; 3] = [
  // v1: settings, notes, shopping list, meta flags.
  "
  CREATE TABLE IF NOT EXISTS meta (
      key   TEXT PRIMARY KEY,
      value TEXT NOT NULL
  );

  CREATE TABLE IF NOT EXISTS settings (
      id         TEXT PRIMARY KEY,
      created_at INTEGER NOT NULL,
      updated_at INTEGER NOT NULL,
      sort_key   TEXT,
      value_json TEXT NOT NULL
  );

  CREATE TABLE IF NOT EXISTS notes (
      id         TEXT PRIMARY KEY,
      created_at INTEGER NOT NULL,
      updated_at INTEGER NOT NULL,
      sort_key   TEXT,
      value_json TEXT NOT NULL
  );
  CREATE INDEX IF NOT EXISTS notes_updated_idx ON notes(updated_at);

  CREATE TABLE IF NOT EXISTS shopping (
      id         TEXT PRIMARY KEY,
      created_at INTEGER NOT NULL,
      updated_at INTEGER NOT NULL,
      sort_key   TEXT,
      value_json TEXT NOT NULL
  );
  CREATE INDEX IF NOT EXISTS shopping_created_idx ON shopping(created_at);
  ",
  // v2: appointments, ordered by their ISO date-time.
  "
  CREATE TABLE IF NOT EXISTS appointments (
      id         TEXT PRIMARY KEY,
      created_at INTEGER NOT NULL,
      updated_at INTEGER NOT NULL,
      sort_key   TEXT,
      value_json TEXT NOT NULL
  );
  CREATE INDEX IF NOT EXISTS appointments_sort_idx ON appointments(sort_key);
  ",
  // v3: medications.
  "
  CREATE TABLE IF NOT EXISTS medications (
      id         TEXT PRIMARY KEY,
      created_at INTEGER NOT NULL,
      updated_at INTEGER NOT NULL,
      sort_key   TEXT,
      value_json TEXT NOT NULL
  );
  CREATE INDEX IF NOT EXISTS medications_created_idx ON medications(created_at);
  ",
];
