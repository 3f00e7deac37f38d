//! Passphrase-based encryption of Lumina backups.
//!
//! A backup is sealed into an [`Envelope`]: PBKDF2-HMAC-SHA256 stretches the
//! passphrase into 64 bytes of key material, the first half keys AES-256-GCM
//! and the second half keys an HMAC-SHA256 over the envelope's fields. The
//! MAC is checked before any decryption is attempted.
//!
//! Pure synchronous code; callers on an async runtime should run
//! [`EncryptionEngine`] calls on a blocking thread, since key derivation is
//! deliberately slow.
//!
//! ```no_run
//! use lumina_crypto::EncryptionEngine;
//!
//! let engine = EncryptionEngine::default();
//! let envelope = engine.encrypt("correct-horse", &serde_json::json!({"foo": 1})).unwrap();
//! let value = engine.decrypt("correct-horse", &envelope).unwrap();
//! assert_eq!(value["foo"], 1);
//! ```

mod document;
mod engine;
mod envelope;

pub mod error;

pub use document::BackupDocument;
pub use engine::EncryptionEngine;
pub use envelope::Envelope;
pub use error::{Error, Result};

/// PBKDF2 iterations for new exports.
pub const ITERATIONS: u32 = 210_000;

/// Iteration counts accepted when reading an envelope.
pub const MIN_ITERATIONS: u32 = 1_000;
pub const MAX_ITERATIONS: u32 = 10_000_000;

pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;

/// Minimum passphrase length, counted in characters after trimming.
pub const MIN_PASSPHRASE_CHARS: usize = 6;
