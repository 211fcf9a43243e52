//! Flatdoc is a single-file, concurrency-safe JSON document store.
//!
//! It is meant as a lightweight persistence substrate for programs that need
//! durable state without a relational database: one JSON value per file,
//! guarded by OS advisory locks, replaced atomically on every write, and
//! optionally wrapped in an AES-256-GCM envelope.
//!
//! ## Core Components
//! - [`store::lock`]: Per-document advisory locking (shared readers, exclusive writers).
//! - [`store::atomic`]: Crash-safe stage-fsync-rename file replacement.
//! - [`store::recover`]: Tolerant decoding of documents damaged by unsynchronized writers.
//! - [`store::envelope`]: Authenticated-encryption wrapping of serialized documents.
//! - [`store::document`]: The [`DocumentStore`] facade composing the above.
//!
//! ```no_run
//! use flatdoc::{DocumentStore, StoreOptions};
//! use serde_json::json;
//!
//! let store = DocumentStore::new(
//!     StoreOptions::new("data", "settings.json"),
//!     || json!({}),
//! )?;
//! store.init()?;
//! store.write(json!({"theme": "dark"}))?;
//! let settings = store.read()?;
//! # Ok::<(), flatdoc::Error>(())
//! ```

pub mod store;

pub use store::document::{DocumentStore, StoreOptions};
pub use store::envelope::EncryptionKey;
pub use store::lock::LockBackend;

use thiserror::Error;

/// Errors returned by a flatdoc store.
///
/// Only failures of the write path and of construction ever reach callers.
/// Corruption, tampering, and race artifacts discovered while reading are
/// recovered internally and logged, never raised.
#[derive(Error, Debug)]
pub enum Error {
    /// The OS refused or failed the advisory-lock syscall.
    #[error("lock acquisition failed on {path:?}: {source}")]
    Lock {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    /// The configured encryption algorithm identifier is not implemented.
    #[error("unsupported encryption algorithm: {0:?}")]
    UnsupportedAlgorithm(String),
    /// The cipher rejected an encryption request.
    #[error("encryption failed: {0}")]
    Encryption(String),
    /// An I/O error occurred while staging, renaming, or reading a document.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A specialized Result type for flatdoc operations.
pub type Result<T> = std::result::Result<T, Error>;
