//! Session-scoped authenticated encryption.
//!
//! AES-256-GCM, 96-bit random nonce per message.
//!
//! Ciphertext wire format (standard base64, padded):
//!   base64( nonce (12 bytes) | ciphertext + tag (16 bytes) )
//!
//! The key only ever lives in process memory and in the volatile slot of the
//! backend handed to [`CryptoKeyManager`]; it is never written durably.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose, Engine as _};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::backend::StorageBackend;
use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const DEFAULT_KEY_SLOT: &str = "quiz-keep-encryption-key";

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Serializable form, suitable for volatile storage only.
    pub fn export(&self) -> Zeroizing<String> {
        Zeroizing::new(general_purpose::STANDARD.encode(self.0))
    }

    pub fn import(exported: &str) -> Result<Self, CryptoError> {
        let raw = Zeroizing::new(
            general_purpose::STANDARD
                .decode(exported.trim())
                .map_err(|e| CryptoError::InvalidKey(format!("decode: {e}")))?,
        );
        if raw.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                raw.len()
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext`, prepending a fresh random nonce.
pub fn encrypt(key: &SessionKey, plaintext: &str) -> Result<String, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let nonce = generate_nonce();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| CryptoError::Encryption)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(general_purpose::STANDARD.encode(out))
}

/// Decrypt a blob produced by [`encrypt`].
pub fn decrypt(key: &SessionKey, blob: &str) -> Result<String, CryptoError> {
    let data = general_purpose::STANDARD
        .decode(blob)
        .map_err(|_| CryptoError::Decryption)?;
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Decryption);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Decryption)
}

/// Owns the one key of the current session.
///
/// The exported key sits in the volatile backend under `slot`. Losing that
/// backend (process exit) loses the key, and with it every blob sealed
/// under it.
pub struct CryptoKeyManager {
    volatile: Arc<dyn StorageBackend>,
    slot: String,
    issue: Mutex<()>,
}

impl CryptoKeyManager {
    pub fn new(volatile: Arc<dyn StorageBackend>, slot: impl Into<String>) -> Self {
        Self {
            volatile,
            slot: slot.into(),
            issue: Mutex::new(()),
        }
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Never fails: an unreadable or corrupt export is replaced by a new key.
    pub fn get_or_create_key(&self) -> SessionKey {
        let _issue = self.issue.lock();
        match self.volatile.get_item(&self.slot) {
            Ok(Some(stored)) => match SessionKey::import(&Zeroizing::new(stored)) {
                Ok(key) => return key,
                Err(err) => warn!(slot = %self.slot, error = %err, "stored key unusable, generating a new one"),
            },
            Ok(None) => {}
            Err(err) => warn!(slot = %self.slot, error = %err, "volatile key slot unreadable"),
        }

        let key = SessionKey::generate();
        if let Err(err) = self.volatile.set_item(&self.slot, &key.export()) {
            warn!(slot = %self.slot, error = %err, "could not stash session key; it will not survive this call");
        } else {
            debug!(slot = %self.slot, "generated session key");
        }
        key
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        encrypt(&self.get_or_create_key(), plaintext)
    }

    pub fn open(&self, blob: &str) -> Result<String, CryptoError> {
        decrypt(&self.get_or_create_key(), blob)
    }

    /// Discard the session key. Anything sealed under it is now unreadable.
    pub fn clear(&self) {
        let _issue = self.issue.lock();
        if let Err(err) = self.volatile.remove_item(&self.slot) {
            warn!(slot = %self.slot, error = %err, "failed to clear session key");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn manager() -> (Arc<MemoryBackend>, CryptoKeyManager) {
        let volatile = Arc::new(MemoryBackend::new());
        let manager = CryptoKeyManager::new(volatile.clone(), DEFAULT_KEY_SLOT);
        (volatile, manager)
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = SessionKey::generate();
        for plaintext in ["", "user@example.com", "ünïcödé ✓", "{\"a\":[1,2]}"] {
            let blob = encrypt(&key, plaintext).unwrap();
            assert_ne!(blob, plaintext);
            assert_eq!(decrypt(&key, &blob).unwrap(), plaintext);
        }
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let key = SessionKey::generate();
        let a = encrypt(&key, "same").unwrap();
        let b = encrypt(&key, "same").unwrap();
        assert_ne!(a, b);
        let raw_a = general_purpose::STANDARD.decode(&a).unwrap();
        let raw_b = general_purpose::STANDARD.decode(&b).unwrap();
        assert_ne!(raw_a[..NONCE_LEN], raw_b[..NONCE_LEN]);
        assert_eq!(raw_a.len(), NONCE_LEN + "same".len() + TAG_LEN);
    }

    #[test]
    fn tampered_or_malformed_blobs_fail() {
        let key = SessionKey::generate();
        let blob = encrypt(&key, "secret").unwrap();
        let mut raw = general_purpose::STANDARD.decode(&blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = general_purpose::STANDARD.encode(raw);

        assert!(matches!(decrypt(&key, &tampered), Err(CryptoError::Decryption)));
        assert!(matches!(decrypt(&key, "not base64!"), Err(CryptoError::Decryption)));
        assert!(matches!(decrypt(&key, "AAAA"), Err(CryptoError::Decryption)));
        let other = SessionKey::generate();
        assert!(matches!(decrypt(&other, &blob), Err(CryptoError::Decryption)));
    }

    #[test]
    fn key_is_reused_within_session() {
        let (volatile, manager) = manager();
        let first = manager.get_or_create_key();
        let second = manager.get_or_create_key();
        assert_eq!(first, second);
        assert_eq!(volatile.len(), 1);
    }

    #[test]
    fn corrupt_export_is_replaced() {
        let (volatile, manager) = manager();
        volatile.set_item(DEFAULT_KEY_SLOT, "garbage").unwrap();
        let key = manager.get_or_create_key();
        let stored = volatile.get_item(DEFAULT_KEY_SLOT).unwrap().unwrap();
        assert_eq!(SessionKey::import(&stored).unwrap(), key);
    }

    #[test]
    fn clear_strands_sealed_data() {
        let (_volatile, manager) = manager();
        let blob = manager.seal("user@example.com").unwrap();
        assert_eq!(manager.open(&blob).unwrap(), "user@example.com");
        manager.clear();
        assert!(matches!(manager.open(&blob), Err(CryptoError::Decryption)));
    }

    #[test]
    fn debug_does_not_leak_key() {
        let key = SessionKey::generate();
        assert_eq!(format!("{key:?}"), "SessionKey(..)");
    }
}
