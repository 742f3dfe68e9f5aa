//! Authenticated encryption at rest for OAuth tokens.
//!
//! Encrypted blob layout: `[nonce: 24 bytes][ciphertext + Poly1305 tag]`.
//! The associated data binds a ciphertext to the record it belongs to, so
//! a ciphertext copied between fields or users fails to decrypt.

use base64::Engine;
#[allow(deprecated)] // upstream generic-array 0.x deprecation, same as the rest of the ecosystem
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::StoreError;

const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

/// An ordered set of keys: index 0 is the current key used for new
/// encryptions; later entries are older keys still tried on decrypt.
pub struct KeyRing {
    keys: Vec<Zeroizing<[u8; KEY_LEN]>>,
}

impl KeyRing {
    /// Load the current key from a file containing the base64 encoding of
    /// 32 raw bytes (44 bytes of base64 text). Presence of this file is
    /// mandatory; a missing key is a fatal startup error.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Internal(format!("failed to read key file {}: {e}", path.display()))
        })?;
        let key = decode_key(text.trim())?;
        Ok(Self { keys: vec![key] })
    }

    /// Construct a ring from raw 32-byte keys, current first. Used by
    /// rotation tooling and tests.
    pub fn from_keys(keys: Vec<[u8; KEY_LEN]>) -> Self {
        Self {
            keys: keys.into_iter().map(Zeroizing::new).collect(),
        }
    }

    pub fn current_version(&self) -> i64 {
        0
    }

    fn key_for_version(&self, version: i64) -> Option<&[u8; KEY_LEN]> {
        // version 0 is "current", version N>0 indexes older keys by age.
        let idx = version.max(0) as usize;
        self.keys.get(idx).map(|k| k.as_ref())
    }

    /// Encrypt `plaintext` under the current (index 0) key.
    pub fn encrypt(&self, plaintext: &str, aad: &[u8]) -> Result<Vec<u8>, StoreError> {
        let key = self
            .keys
            .first()
            .ok_or_else(|| StoreError::Internal("key ring is empty".into()))?;
        encrypt_with_key(key, plaintext.as_bytes(), aad)
    }

    /// Decrypt `ciphertext` that was stored with `key_version`, trying the
    /// key at that version first, then progressively older keys.
    pub fn decrypt(&self, ciphertext: &[u8], key_version: i64, aad: &[u8]) -> Result<String, StoreError> {
        if let Some(key) = self.key_for_version(key_version) {
            if let Ok(plain) = decrypt_with_key(key, ciphertext, aad) {
                return Ok(plain);
            }
        }
        for key in &self.keys {
            if let Ok(plain) = decrypt_with_key(key, ciphertext, aad) {
                return Ok(plain);
            }
        }
        Err(StoreError::Corrupt(
            "ciphertext did not decrypt under any known key".into(),
        ))
    }
}

fn decode_key(b64: &str) -> Result<Zeroizing<[u8; KEY_LEN]>, StoreError> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| StoreError::Internal(format!("invalid key file encoding: {e}")))?;
    if raw.len() != KEY_LEN {
        return Err(StoreError::Internal(format!(
            "key file must decode to {KEY_LEN} bytes, got {}",
            raw.len()
        )));
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&raw);
    Ok(Zeroizing::new(key))
}

fn encrypt_with_key(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, StoreError> {
    #[allow(deprecated)]
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| StoreError::Internal(format!("encryption failed: {e}")))?;

    let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn decrypt_with_key(key: &[u8; KEY_LEN], blob: &[u8], aad: &[u8]) -> Result<String, StoreError> {
    if blob.len() < NONCE_LEN + 16 {
        return Err(StoreError::Corrupt("ciphertext too short".into()));
    }
    let (nonce_bytes, ct) = blob.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);
    #[allow(deprecated)]
    let cipher = XChaCha20Poly1305::new(key.into());

    let plain = cipher
        .decrypt(nonce, Payload { msg: ct, aad })
        .map_err(|e| StoreError::Corrupt(format!("decryption failed: {e}")))?;

    String::from_utf8(plain).map_err(|e| StoreError::Corrupt(format!("decrypted bytes not utf8: {e}")))
}

/// Mask a token for logging: first four characters plus a fixed redaction
/// marker. Never log the return value of `KeyRing::decrypt` directly.
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{prefix}…redacted")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring() -> KeyRing {
        KeyRing::from_keys(vec![[0x11u8; KEY_LEN]])
    }

    #[test]
    fn round_trips_plaintext() {
        let ring = ring();
        let aad = b"user:1:bot:access";
        let ciphertext = ring.encrypt("super-secret-token", aad).unwrap();
        assert_ne!(ciphertext, b"super-secret-token".to_vec());
        let plain = ring.decrypt(&ciphertext, 0, aad).unwrap();
        assert_eq!(plain, "super-secret-token");
    }

    #[test]
    fn wrong_aad_fails_closed() {
        let ring = ring();
        let ciphertext = ring.encrypt("super-secret-token", b"user:1").unwrap();
        let result = ring.decrypt(&ciphertext, 0, b"user:2");
        assert!(result.is_err());
    }

    #[test]
    fn older_key_is_tried_on_rotation() {
        let ring = KeyRing::from_keys(vec![[0x22u8; KEY_LEN], [0x11u8; KEY_LEN]]);
        let old_ring = KeyRing::from_keys(vec![[0x11u8; KEY_LEN]]);
        let aad = b"user:1";
        let ciphertext = old_ring.encrypt("token-value", aad).unwrap();
        // Stored with key_version=0 under the old single-key ring, but now
        // the new ring's current key (index 0) differs; version 1 matches.
        let plain = ring.decrypt(&ciphertext, 1, aad).unwrap();
        assert_eq!(plain, "token-value");
    }

    #[test]
    fn mask_keeps_only_first_four_chars() {
        assert_eq!(mask_token("abcdefgh"), "abcd…redacted");
        assert_eq!(mask_token("ab"), "ab…redacted");
    }
}
