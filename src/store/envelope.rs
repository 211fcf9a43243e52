use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// The only algorithm identifier this store implements.
pub const AES_256_GCM: &str = "aes-256-gcm";

/// Current envelope schema version.
pub const ENVELOPE_VERSION: u8 = 1;

/// A 32-byte AES-256-GCM key.
///
/// Owned by the bootstrap layer and handed to the store at construction; the
/// store never persists it. The same secret must be supplied on every process
/// start to decrypt previously written data; the store does not validate
/// this, a wrong key simply manifests as authentication failures on read.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Derives a key as the SHA-256 digest of an operator-supplied secret.
    pub fn derive(secret: &str) -> Self {
        Self(Sha256::digest(secret.as_bytes()).into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// On-disk wrapper for an encrypted document. All binary fields are
/// base64-encoded; `v` and `alg` exist for forward compatibility.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u8,
    pub alg: String,
    pub iv: String,
    pub tag: String,
    pub payload: String,
}

/// Why an envelope could not be opened. Never propagated out of the store:
/// the read path logs it and falls back to a plain decode of the raw bytes.
#[derive(thiserror::Error, Debug)]
pub enum UnsealError {
    #[error("unsupported envelope schema: v={v} alg={alg:?}")]
    Schema { v: u8, alg: String },
    #[error("envelope field is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("bad nonce length: {0} bytes")]
    NonceLength(usize),
    #[error("authentication failed (wrong key or tampered data)")]
    Authentication,
}

/// Encrypts `plaintext` under a fresh random 96-bit nonce.
///
/// The nonce comes from the OS RNG on every call; reusing a nonce under a
/// fixed key would break GCM entirely. The 16-byte authentication tag the
/// cipher appends is split off and stored in its own envelope field.
pub fn seal(plaintext: &[u8], key: &EncryptionKey) -> Result<Envelope> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Encryption(e.to_string()))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng); // 96 bits / 12 bytes
    let mut sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Encryption(e.to_string()))?;

    let tag = sealed.split_off(sealed.len() - 16);
    Ok(Envelope {
        v: ENVELOPE_VERSION,
        alg: AES_256_GCM.to_string(),
        iv: BASE64.encode(nonce.as_slice()),
        tag: BASE64.encode(tag),
        payload: BASE64.encode(sealed),
    })
}

/// Decrypts an envelope, verifying its authentication tag.
pub fn open(envelope: &Envelope, key: &EncryptionKey) -> std::result::Result<Vec<u8>, UnsealError> {
    if envelope.v != ENVELOPE_VERSION || envelope.alg != AES_256_GCM {
        return Err(UnsealError::Schema {
            v: envelope.v,
            alg: envelope.alg.clone(),
        });
    }

    let nonce_bytes = BASE64.decode(&envelope.iv)?;
    if nonce_bytes.len() != 12 {
        return Err(UnsealError::NonceLength(nonce_bytes.len()));
    }
    let mut ciphertext = BASE64.decode(&envelope.payload)?;
    ciphertext.extend(BASE64.decode(&envelope.tag)?);

    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| UnsealError::Authentication)?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| UnsealError::Authentication)
}
