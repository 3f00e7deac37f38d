//! Core types and trait definitions for the Lumina local data vault.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! Storage backends implement [`store::VaultStore`]; everything else here
//! (repositories, backups, legacy migration) is written against that trait.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod backup;
pub mod error;
pub mod legacy;
pub mod migrate;
pub mod model;
pub mod repo;
pub mod store;
pub mod vault;

pub use error::{Error, Result};
pub use vault::Vault;
