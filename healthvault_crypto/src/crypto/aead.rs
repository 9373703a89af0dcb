//! Symmetric ciphers - AES-GCM (authenticated) and AES-CBC-PKCS7 (tags)

use aes::{Aes128, Aes256};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::{CryptoError, Result};
use crate::key::{CBC_IV_LEN, GCM_IV_LEN};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

fn check_iv(iv: &[u8], expected: usize) -> Result<()> {
    if iv.len() != expected {
        return Err(CryptoError::InvalidIvSize {
            expected,
            got: iv.len(),
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// AES-GCM (records, attachments, wrapped keys)
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt with AES-GCM. Output is ciphertext || tag, the IV is not embedded.
pub fn encrypt_aes_gcm(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    check_iv(iv, GCM_IV_LEN)?;
    let nonce = Nonce::from_slice(iv);

    let ciphertext = match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeySize(key.len()))?
            .encrypt(nonce, plaintext),
        32 => Aes256Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeySize(key.len()))?
            .encrypt(nonce, plaintext),
        other => return Err(CryptoError::InvalidKeySize(other)),
    };

    ciphertext.map_err(|e| CryptoError::CouldNotEncryptData(e.to_string()))
}

/// Decrypt with AES-GCM. Authentication failure never yields plaintext.
pub fn decrypt_aes_gcm(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    check_iv(iv, GCM_IV_LEN)?;
    let nonce = Nonce::from_slice(iv);

    let plaintext = match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeySize(key.len()))?
            .decrypt(nonce, ciphertext),
        32 => Aes256Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeySize(key.len()))?
            .decrypt(nonce, ciphertext),
        other => return Err(CryptoError::InvalidKeySize(other)),
    };

    plaintext.map_err(|_| CryptoError::CouldNotDecryptData)
}

// ═══════════════════════════════════════════════════════════════════════════
// AES-CBC with PKCS#7 padding (deterministic tag encryption)
// ═══════════════════════════════════════════════════════════════════════════

pub fn encrypt_aes_cbc(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    check_iv(iv, CBC_IV_LEN)?;

    match key.len() {
        16 => Ok(Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeySize(key.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        32 => Ok(Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeySize(key.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        other => Err(CryptoError::InvalidKeySize(other)),
    }
}

pub fn decrypt_aes_cbc(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    check_iv(iv, CBC_IV_LEN)?;

    let plaintext = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeySize(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| CryptoError::InvalidKeySize(key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        other => return Err(CryptoError::InvalidKeySize(other)),
    };

    // Bad padding is the only signal CBC gives for a wrong key
    plaintext.map_err(|_| CryptoError::CouldNotDecryptData)
}
