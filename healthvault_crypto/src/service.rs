//! CryptoService - IV handling, key generation and the session tag key

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::RwLock;
use rand::{rngs::OsRng, RngCore};
use tracing::debug;

use crate::crypto;
use crate::error::{CryptoError, Result};
use crate::key::{BlockMode, Key, KeyType, RSA_KEY_BITS};
use crate::keypair::KeyPair;
use crate::store::SecureStore;

/// Default secure-store entry for the account key pair
pub const DEFAULT_KEY_PAIR_TAG: &str = "healthvault.keypair";

pub struct CryptoService {
    store: Arc<dyn SecureStore>,
    key_pair_tag: String,
    key_pair_bits: u32,
    key_pair: RwLock<Option<KeyPair>>,
    /// Current tag encryption key; replaced on every session refresh
    tag_key: RwLock<Option<Key>>,
}

impl CryptoService {
    pub fn new(store: Arc<dyn SecureStore>, key_pair_tag: &str) -> Self {
        Self {
            store,
            key_pair_tag: key_pair_tag.to_string(),
            key_pair_bits: RSA_KEY_BITS,
            key_pair: RwLock::new(None),
            tag_key: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn SecureStore> {
        &self.store
    }

    /// Secure-store entry holding the account key pair
    pub fn key_pair_tag(&self) -> &str {
        &self.key_pair_tag
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SYMMETRIC
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt with a fresh random IV. Output is `iv || ciphertext`.
    pub fn encrypt(&self, data: &[u8], key: &Key) -> Result<Vec<u8>> {
        let mut iv = vec![0u8; key.iv_size()];
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|e| CryptoError::CouldNotEncryptData(e.to_string()))?;

        let ciphertext = crypto::encrypt(key, &iv, data)?;

        let mut output = Vec::with_capacity(iv.len() + ciphertext.len());
        output.extend_from_slice(&iv);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    /// Decrypt `iv || ciphertext` produced by [`CryptoService::encrypt`].
    pub fn decrypt(&self, data: &[u8], key: &Key) -> Result<Vec<u8>> {
        let iv_size = key.iv_size();
        if data.len() < iv_size {
            return Err(CryptoError::InvalidEncryptedDataSize {
                expected: iv_size,
                got: data.len(),
            });
        }

        let (iv, ciphertext) = data.split_at(iv_size);
        crypto::decrypt(key, iv, ciphertext)
    }

    /// Deterministic encryption with an all-zero IV, base64 output.
    ///
    /// Equal inputs give equal outputs so the server can match them. Callers
    /// canonicalize (trim, lowercase) before calling.
    pub fn encrypt_string(&self, value: &str, key: &Key) -> Result<String> {
        let iv = deterministic_iv(key)?;
        let ciphertext = crypto::encrypt(key, &iv, value.as_bytes())?;
        Ok(STANDARD.encode(ciphertext))
    }

    pub fn decrypt_string(&self, value: &str, key: &Key) -> Result<String> {
        let iv = deterministic_iv(key)?;
        let ciphertext = STANDARD.decode(value)?;
        let plaintext = crypto::decrypt(key, &iv, &ciphertext)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TAG KEY (session state)
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_tag_key(&self, key: Option<Key>) {
        *self.tag_key.write() = key;
    }

    pub fn tag_key(&self) -> Result<Key> {
        self.tag_key.read().clone().ok_or(CryptoError::MissingTagKey)
    }

    pub fn has_tag_key(&self) -> bool {
        self.tag_key.read().is_some()
    }

    /// Encrypt a canonical tag with the current tag key.
    pub fn encrypt_tag(&self, tag: &str) -> Result<String> {
        let key = self.tag_key()?;
        self.encrypt_string(tag, &key)
    }

    pub fn decrypt_tag(&self, tag: &str) -> Result<String> {
        let key = self.tag_key()?;
        self.decrypt_string(tag, &key)
    }

    /// Drop all per-session key state (logout).
    pub fn clear_session(&self) {
        *self.tag_key.write() = None;
        *self.key_pair.write() = None;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ASYMMETRIC (key material only)
    // ═══════════════════════════════════════════════════════════════════════

    pub fn encrypt_with_keypair(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>> {
        crypto::encrypt(&key_pair.public, &[], data)
    }

    pub fn decrypt_with_keypair(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>> {
        crypto::decrypt(&key_pair.private, &[], data)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // KEY LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    pub fn generate_key(&self, key_type: KeyType) -> Result<Key> {
        debug!(?key_type, "generating symmetric key");
        Key::generate(key_type)
    }

    /// Look up the account key pair by tag; generate and persist on miss.
    pub fn fetch_or_generate_key_pair(&self) -> Result<KeyPair> {
        if let Some(pair) = self.key_pair.read().clone() {
            return Ok(pair);
        }

        let pair = match self.store.get(&self.key_pair_tag)? {
            Some(json) => {
                debug!(tag = %self.key_pair_tag, "loaded key pair from secure store");
                KeyPair::from_json(&self.key_pair_tag, &json)?
            }
            None => {
                debug!(tag = %self.key_pair_tag, bits = self.key_pair_bits, "generating key pair");
                let pair = KeyPair::generate(&self.key_pair_tag, self.key_pair_bits)?;
                self.store.set(&self.key_pair_tag, Some(pair.to_json()?))?;
                pair
            }
        };

        *self.key_pair.write() = Some(pair.clone());
        Ok(pair)
    }

    pub fn delete_key_pair(&self) -> Result<()> {
        debug!(tag = %self.key_pair_tag, "deleting key pair");
        *self.key_pair.write() = None;
        self.store.delete(&self.key_pair_tag)
    }
}

fn deterministic_iv(key: &Key) -> Result<Vec<u8>> {
    // A fixed nonce under GCM would leak the keystream
    if key.mode != BlockMode::Cbc {
        return Err(CryptoError::InvalidKeyUsage(
            "deterministic encryption needs a CBC key",
        ));
    }
    Ok(vec![0u8; key.iv_size()])
}
