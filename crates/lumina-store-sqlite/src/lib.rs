//! SQLite backend for the Lumina vault.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every [`lumina_core::store::VaultStore`]
//! transaction maps onto one SQLite transaction on that thread.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use schema::CURRENT_VERSION;
pub use store::{OpenOutcome, RepairPolicy, SqliteStore};
