//! Error types for the HealthVault crypto core

use thiserror::Error;

use crate::key::{Algorithm, BlockMode, HashAlgorithm, Padding};

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Unsupported algorithm combination: {algorithm:?}/{padding:?}/{mode:?}/{hash:?}")]
    UnsupportedAlgorithmCombination {
        algorithm: Algorithm,
        padding: Padding,
        mode: BlockMode,
        hash: HashAlgorithm,
    },

    #[error("Could not decrypt data - wrong key or tampered ciphertext")]
    CouldNotDecryptData,

    #[error("Could not encrypt data: {0}")]
    CouldNotEncryptData(String),

    #[error("Encrypted data too short: expected at least {expected} bytes, got {got}")]
    InvalidEncryptedDataSize { expected: usize, got: usize },

    #[error("Invalid IV length: expected {expected}, got {got}")]
    InvalidIvSize { expected: usize, got: usize },

    #[error("Invalid key length: {0} bytes")]
    InvalidKeySize(usize),

    #[error("Tag encryption key is not set")]
    MissingTagKey,

    #[error("Key is not usable for this operation: {0}")]
    InvalidKeyUsage(&'static str),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Secure store error: {0}")]
    Store(String),

    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid key JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Decrypted string is not UTF-8")]
    InvalidUtf8,
}

pub type Result<T> = std::result::Result<T, CryptoError>;

impl CryptoError {
    /// Failures caused by wrong keys or modified ciphertext.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::CouldNotDecryptData | Self::InvalidUtf8)
    }

    /// Failures caused by missing session state rather than bad data.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::MissingTagKey | Self::Store(_))
    }
}
