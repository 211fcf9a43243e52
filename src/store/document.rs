use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{error, warn};
use serde_json::Value;

use crate::store::envelope::{self, EncryptionKey, Envelope, UnsealError, AES_256_GCM};
use crate::store::lock::{LockBackend, LockManager};
use crate::store::{atomic, recover};
use crate::{Error, Result};

/// Configuration for a [`DocumentStore`].
///
/// Only `"aes-256-gcm"` is accepted as an algorithm identifier; anything else
/// is rejected at construction. Supplying an encryption key switches the
/// on-disk format from a plain pretty-printed value to an
/// [`Envelope`](crate::store::envelope::Envelope) object.
pub struct StoreOptions {
    dir: PathBuf,
    file_name: String,
    algorithm: String,
    key: Option<EncryptionKey>,
    lock_backend: LockBackend,
}

impl StoreOptions {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(dir: P, file_name: S) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.into(),
            algorithm: AES_256_GCM.to_string(),
            key: None,
            lock_backend: LockBackend::Advisory,
        }
    }

    /// Enables encryption. The key is owned by the caller's bootstrap layer,
    /// typically via [`EncryptionKey::derive`].
    pub fn encryption_key(mut self, key: EncryptionKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn algorithm<S: Into<String>>(mut self, algorithm: S) -> Self {
        self.algorithm = algorithm.into();
        self
    }

    pub fn lock_backend(mut self, backend: LockBackend) -> Self {
        self.lock_backend = backend;
        self
    }
}

type DefaultFactory = Box<dyn Fn() -> Value + Send + Sync>;

/// One JSON document on disk, safe against concurrent readers and writers on
/// a single host.
///
/// A store is constructed once per document and lives for the process's
/// duration. Locks are acquired and released per call, never held across
/// calls, and no descriptor is cached. `read()` always comes back with some
/// valid value: corruption is quarantined, race artifacts are merged and
/// healed, tampered or mis-keyed envelopes degrade to the plain/default
/// value. Only `write()` (and construction) surface errors to the caller.
pub struct DocumentStore {
    path: PathBuf,
    locks: LockManager,
    key: Option<EncryptionKey>,
    default_factory: DefaultFactory,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("path", &self.path)
            .field("locks", &self.locks)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl DocumentStore {
    pub fn new<F>(options: StoreOptions, default_factory: F) -> Result<Self>
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        if options.algorithm != AES_256_GCM {
            return Err(Error::UnsupportedAlgorithm(options.algorithm));
        }

        let path = options.dir.join(&options.file_name);
        let lock_path = options.dir.join(format!("{}.lock", options.file_name));
        Ok(Self {
            path,
            locks: LockManager::new(lock_path, options.lock_backend),
            key: options.key,
            default_factory: Box::new(default_factory),
        })
    }

    /// Canonical path of the document file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensures the directory exists and lazily creates the document with the
    /// default value when absent.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.path.parent().unwrap_or(Path::new(".")))?;
        if !self.path.exists() {
            self.write((self.default_factory)())?;
        }
        Ok(())
    }

    /// Reads the current document value.
    ///
    /// An absent file yields the default without taking any lock or creating
    /// the file; only `init()` and `write()` create it. Otherwise the bytes
    /// are loaded under a shared lock and interpreted: envelope decrypt when
    /// a key is configured, then a tolerant plain decode, then the corruption
    /// fallback (quarantine plus default). Lock and I/O failures still
    /// propagate; nothing about the document's *content* ever does.
    pub fn read(&self) -> Result<Value> {
        if !self.path.exists() {
            return Ok((self.default_factory)());
        }

        let raw = {
            let _guard = self.locks.acquire(true)?;
            fs::read(&self.path)?
        };

        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok((self.default_factory)());
        }

        if let Some(key) = &self.key {
            if let Ok(env) = serde_json::from_slice::<Envelope>(&raw) {
                match envelope::open(&env, key) {
                    Ok(plaintext) => {
                        if let Some(rec) = recover::decode(&plaintext) {
                            if rec.had_extra_data {
                                self.heal(&rec.value);
                            }
                            return Ok(rec.value);
                        }
                        warn!("decrypted payload of {:?} is not valid JSON", self.path);
                    }
                    Err(UnsealError::Authentication) => {
                        // Envelope shape present but the tag does not verify:
                        // almost certainly a wrong key or a tampered file,
                        // not legacy plaintext.
                        warn!(
                            "envelope authentication failed for {:?} (wrong key or tampered data), falling back to plain decode",
                            self.path
                        );
                    }
                    Err(e) => {
                        warn!("cannot open envelope for {:?}: {}", self.path, e);
                    }
                }
            }
        }

        match recover::decode(&raw) {
            Some(rec) => {
                if rec.had_extra_data {
                    self.heal(&rec.value);
                }
                Ok(rec.value)
            }
            None => {
                self.quarantine();
                Ok((self.default_factory)())
            }
        }
    }

    /// Serializes `value` and atomically replaces the document under the
    /// exclusive lock. Serialization, lock, and disk errors all propagate.
    pub fn write(&self, value: Value) -> Result<()> {
        let payload = match &self.key {
            Some(key) => {
                let plaintext = serde_json::to_vec(&value)?;
                let env = envelope::seal(&plaintext, key)?;
                serde_json::to_vec_pretty(&env)?
            }
            None => serde_json::to_vec_pretty(&value)?,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let _guard = self.locks.acquire(false)?;
        atomic::replace_file(&self.path, &payload)
    }

    /// Rewrites the canonical single-value form after a merge recovered a
    /// document damaged by unsynchronized writers. Failing to heal is logged,
    /// never raised: the caller already has a usable value.
    fn heal(&self, value: &Value) {
        warn!(
            "document {:?} held concatenated values, rewriting merged form",
            self.path
        );
        if let Err(e) = self.write(value.clone()) {
            error!("failed to heal {:?}: {}", self.path, e);
        }
    }

    /// Moves an unreadable document aside as `<file>.corrupt.<epoch-secs>`
    /// so it is kept for diagnosis while the store serves the default.
    fn quarantine(&self) {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let corrupt_path = self
            .path
            .with_file_name(format!("{}.corrupt.{}", name, epoch_seconds()));
        warn!(
            "document {:?} is unreadable, quarantining as {:?}",
            self.path, corrupt_path
        );
        if let Err(e) = fs::rename(&self.path, &corrupt_path) {
            error!("failed to quarantine {:?}: {}", self.path, e);
        }
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn plain_store(dir: &Path) -> DocumentStore {
        DocumentStore::new(StoreOptions::new(dir, "doc.json"), || json!({})).unwrap()
    }

    #[test]
    fn test_init_creates_default_document() {
        let dir = tempdir().unwrap();
        let store =
            DocumentStore::new(StoreOptions::new(dir.path(), "doc.json"), || {
                json!({"seeded": true})
            })
            .unwrap();

        store.init().unwrap();
        assert!(store.path().exists());
        assert_eq!(store.read().unwrap(), json!({"seeded": true}));

        // init is lazy: a second call must not reset existing content.
        store.write(json!({"seeded": false})).unwrap();
        store.init().unwrap();
        assert_eq!(store.read().unwrap(), json!({"seeded": false}));
    }

    #[test]
    fn test_read_absent_returns_default_without_mutation() {
        let dir = tempdir().unwrap();
        let store = plain_store(dir.path());

        assert_eq!(store.read().unwrap(), json!({}));
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempdir().unwrap();
        let store = plain_store(dir.path());

        let value = json!({"users": [{"id": 1, "name": "ada"}], "count": 1});
        store.write(value.clone()).unwrap();
        assert_eq!(store.read().unwrap(), value);
    }

    #[test]
    fn test_unknown_algorithm_rejected_at_construction() {
        let dir = tempdir().unwrap();
        let options = StoreOptions::new(dir.path(), "doc.json").algorithm("rot13");
        let err = DocumentStore::new(options, || json!(null)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn test_concatenated_values_heal_on_read() {
        let dir = tempdir().unwrap();
        let store = plain_store(dir.path());

        fs::write(store.path(), br#"{"a":1}{"b":2}"#).unwrap();
        assert_eq!(store.read().unwrap(), json!({"a": 1, "b": 2}));

        // Self-healed: the file is back to one canonical value.
        let healed = fs::read(store.path()).unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&healed).unwrap(),
            json!({"a": 1, "b": 2})
        );
    }

    #[test]
    fn test_corrupt_document_is_quarantined() {
        let dir = tempdir().unwrap();
        let store = plain_store(dir.path());

        fs::write(store.path(), b"\x00\x01 not json").unwrap();
        assert_eq!(store.read().unwrap(), json!({}));

        assert!(!store.path().exists());
        let quarantined: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.contains(".corrupt."))
            .collect();
        assert_eq!(quarantined.len(), 1);
        let bytes = fs::read(dir.path().join(&quarantined[0])).unwrap();
        assert_eq!(bytes, b"\x00\x01 not json");
    }

    #[test]
    fn test_empty_file_serves_default_without_quarantine() {
        let dir = tempdir().unwrap();
        let store = plain_store(dir.path());

        fs::write(store.path(), b"").unwrap();
        assert_eq!(store.read().unwrap(), json!({}));
        assert!(store.path().exists());
    }

    #[test]
    fn test_encrypted_round_trip() {
        let dir = tempdir().unwrap();
        let options = StoreOptions::new(dir.path(), "doc.json")
            .encryption_key(EncryptionKey::derive("hunter2"));
        let store = DocumentStore::new(options, || json!([])).unwrap();

        let value = json!({"token": "s3cr3t", "ttl": 3600});
        store.write(value.clone()).unwrap();
        assert_eq!(store.read().unwrap(), value);

        // On disk there is an envelope, not the plaintext.
        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("aes-256-gcm"));
        assert!(!raw.contains("s3cr3t"));
    }

    #[test]
    fn test_plaintext_file_readable_after_enabling_encryption() {
        let dir = tempdir().unwrap();
        plain_store(dir.path()).write(json!({"legacy": true})).unwrap();

        let options = StoreOptions::new(dir.path(), "doc.json")
            .encryption_key(EncryptionKey::derive("hunter2"));
        let store = DocumentStore::new(options, || json!({})).unwrap();
        assert_eq!(store.read().unwrap(), json!({"legacy": true}));
    }
}
