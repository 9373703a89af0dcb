//! Cipher primitives
//!
//! `encrypt`/`decrypt` pick the implementation by an exact match on the key's
//! (algorithm, padding, mode, hash). They are pure: no IV generation, no state.

mod aead;
mod rsa_oaep;

pub use aead::{decrypt_aes_cbc, decrypt_aes_gcm, encrypt_aes_cbc, encrypt_aes_gcm};
pub use rsa_oaep::{decrypt_rsa_oaep, encrypt_rsa_oaep};

use crate::error::{CryptoError, Result};
use crate::key::{Algorithm, BlockMode, HashAlgorithm, Key, KeyMaterial, Padding};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suite {
    AesGcm,
    AesCbcPkcs7,
    RsaOaepSha256,
}

fn suite_for(key: &Key) -> Result<Suite> {
    match (key.algorithm, key.padding, key.mode, key.hash) {
        (Algorithm::Aes, Padding::None, BlockMode::Gcm, HashAlgorithm::None) => Ok(Suite::AesGcm),
        (Algorithm::Aes, Padding::Pkcs7, BlockMode::Cbc, HashAlgorithm::None) => Ok(Suite::AesCbcPkcs7),
        (Algorithm::Rsa, Padding::Oaep, BlockMode::None, HashAlgorithm::Sha256) => Ok(Suite::RsaOaepSha256),
        (algorithm, padding, mode, hash) => Err(CryptoError::UnsupportedAlgorithmCombination {
            algorithm,
            padding,
            mode,
            hash,
        }),
    }
}

fn symmetric_bytes(key: &Key) -> Result<&[u8]> {
    match key.material() {
        KeyMaterial::Symmetric(bytes) => Ok(bytes.as_slice()),
        _ => Err(CryptoError::InvalidKeyUsage("AES needs symmetric key material")),
    }
}

/// Encrypt `plaintext` under `key` with the caller-supplied `iv`.
pub fn encrypt(key: &Key, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    match suite_for(key)? {
        Suite::AesGcm => encrypt_aes_gcm(symmetric_bytes(key)?, iv, plaintext),
        Suite::AesCbcPkcs7 => encrypt_aes_cbc(symmetric_bytes(key)?, iv, plaintext),
        Suite::RsaOaepSha256 => encrypt_rsa_oaep(key.material(), plaintext),
    }
}

/// Decrypt `ciphertext` under `key` with the `iv` used for encryption.
pub fn decrypt(key: &Key, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    match suite_for(key)? {
        Suite::AesGcm => decrypt_aes_gcm(symmetric_bytes(key)?, iv, ciphertext),
        Suite::AesCbcPkcs7 => decrypt_aes_cbc(symmetric_bytes(key)?, iv, ciphertext),
        Suite::RsaOaepSha256 => decrypt_rsa_oaep(key.material(), ciphertext),
    }
}
