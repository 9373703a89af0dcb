//! Key model
//!
//! Typed value objects describing a key's cipher suite alongside its material.
//! Symmetric and private material is zeroized on drop.

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

/// AES-GCM nonce length
pub const GCM_IV_LEN: usize = 12;

/// AES-CBC IV length (one block)
pub const CBC_IV_LEN: usize = 16;

/// Default symmetric key length (AES-256)
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// Default RSA modulus size
pub const RSA_KEY_BITS: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Aes,
    Rsa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    Gcm,
    Cbc,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    None,
    Pkcs7,
    Oaep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    None,
    Sha256,
}

/// What a key is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Encrypts one record body
    Data,
    /// Encrypts one record's attachment blobs
    Attachment,
    /// Deterministically encrypts searchable tags
    Tag,
    /// Per-account key wrapping data and attachment keys
    Common,
    /// Account RSA key pair half
    Identity,
}

impl KeyType {
    /// (algorithm, mode, padding, hash) every key of this type uses
    pub fn cipher_suite(&self) -> (Algorithm, BlockMode, Padding, HashAlgorithm) {
        match self {
            KeyType::Tag => (Algorithm::Aes, BlockMode::Cbc, Padding::Pkcs7, HashAlgorithm::None),
            KeyType::Data | KeyType::Attachment | KeyType::Common => {
                (Algorithm::Aes, BlockMode::Gcm, Padding::None, HashAlgorithm::None)
            }
            KeyType::Identity => (Algorithm::Rsa, BlockMode::None, Padding::Oaep, HashAlgorithm::Sha256),
        }
    }
}

/// Raw key bytes, tagged by how they are encoded
#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// Raw AES key bytes
    Symmetric(Zeroizing<Vec<u8>>),
    /// SubjectPublicKeyInfo DER
    RsaPublic(Vec<u8>),
    /// PKCS#8 DER
    RsaPrivate(Zeroizing<Vec<u8>>),
}

impl KeyMaterial {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            KeyMaterial::Symmetric(bytes) => bytes.as_slice(),
            KeyMaterial::RsaPublic(bytes) => bytes.as_slice(),
            KeyMaterial::RsaPrivate(bytes) => bytes.as_slice(),
        }
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyMaterial::Symmetric(_) => write!(f, "Symmetric([REDACTED])"),
            KeyMaterial::RsaPublic(der) => write!(f, "RsaPublic({} bytes)", der.len()),
            KeyMaterial::RsaPrivate(_) => write!(f, "RsaPrivate([REDACTED])"),
        }
    }
}

/// Immutable key value object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub algorithm: Algorithm,
    pub mode: BlockMode,
    pub padding: Padding,
    pub hash: HashAlgorithm,
    pub size_bits: u32,
    pub key_type: KeyType,
    material: KeyMaterial,
}

impl Key {
    /// Build a key with an explicit cipher suite.
    pub fn new(
        algorithm: Algorithm,
        mode: BlockMode,
        padding: Padding,
        hash: HashAlgorithm,
        key_type: KeyType,
        size_bits: u32,
        material: KeyMaterial,
    ) -> Self {
        Self {
            algorithm,
            mode,
            padding,
            hash,
            size_bits,
            key_type,
            material,
        }
    }

    /// Wrap raw AES bytes using the suite implied by `key_type`.
    pub fn symmetric(key_type: KeyType, bytes: Vec<u8>) -> Result<Self> {
        if key_type == KeyType::Identity {
            return Err(CryptoError::InvalidKeyUsage("identity keys are asymmetric"));
        }
        if bytes.len() != 16 && bytes.len() != 32 {
            return Err(CryptoError::InvalidKeySize(bytes.len()));
        }

        let (algorithm, mode, padding, hash) = key_type.cipher_suite();
        let size_bits = (bytes.len() * 8) as u32;
        Ok(Self::new(
            algorithm,
            mode,
            padding,
            hash,
            key_type,
            size_bits,
            KeyMaterial::Symmetric(Zeroizing::new(bytes)),
        ))
    }

    /// Generate a random AES-256 key for `key_type`.
    pub fn generate(key_type: KeyType) -> Result<Self> {
        let mut bytes = vec![0u8; SYMMETRIC_KEY_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Self::symmetric(key_type, bytes)
    }

    pub fn rsa_public(der: Vec<u8>, size_bits: u32) -> Self {
        let (algorithm, mode, padding, hash) = KeyType::Identity.cipher_suite();
        Self::new(
            algorithm,
            mode,
            padding,
            hash,
            KeyType::Identity,
            size_bits,
            KeyMaterial::RsaPublic(der),
        )
    }

    pub fn rsa_private(der: Vec<u8>, size_bits: u32) -> Self {
        let (algorithm, mode, padding, hash) = KeyType::Identity.cipher_suite();
        Self::new(
            algorithm,
            mode,
            padding,
            hash,
            KeyType::Identity,
            size_bits,
            KeyMaterial::RsaPrivate(Zeroizing::new(der)),
        )
    }

    /// IV length required by this key's (algorithm, mode)
    pub fn iv_size(&self) -> usize {
        match (self.algorithm, self.mode) {
            (Algorithm::Aes, BlockMode::Gcm) => GCM_IV_LEN,
            (Algorithm::Aes, BlockMode::Cbc) => CBC_IV_LEN,
            _ => 0,
        }
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    /// Expose the raw material (use with caution)
    pub fn expose(&self) -> &[u8] {
        self.material.as_bytes()
    }

    pub fn is_symmetric(&self) -> bool {
        matches!(self.material, KeyMaterial::Symmetric(_))
    }
}
