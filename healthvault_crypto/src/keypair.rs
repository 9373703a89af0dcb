//! Account RSA key pair

use rand::rngs::OsRng;
use rsa::{
    pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey},
    traits::PublicKeyParts,
    RsaPrivateKey,
};
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, Result};
use crate::exchange::KeyExchangeFormat;
use crate::key::{Algorithm, Key, KeyType};

/// RSA key pair, persisted in the secure store under `store_tag`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public: Key,
    pub private: Key,
    pub algorithm: Algorithm,
    pub size_bits: u32,
    pub store_tag: String,
}

/// Stored form of a key pair
#[derive(Serialize, Deserialize)]
struct StoredKeyPair {
    size_bits: u32,
    public: KeyExchangeFormat,
    private: KeyExchangeFormat,
}

impl KeyPair {
    /// Generate a fresh RSA key pair.
    pub fn generate(store_tag: &str, size_bits: u32) -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, size_bits as usize)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Self::from_rsa(store_tag, &private)
    }

    /// Rebuild a key pair from a PKCS#8 DER private key.
    pub fn from_private_der(store_tag: &str, der: &[u8]) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
        Self::from_rsa(store_tag, &private)
    }

    fn from_rsa(store_tag: &str, private: &RsaPrivateKey) -> Result<Self> {
        let size_bits = (private.size() * 8) as u32;

        let private_der = private
            .to_pkcs8_der()
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
        let public_der = private
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;

        Ok(Self {
            public: Key::rsa_public(public_der.as_bytes().to_vec(), size_bits),
            private: Key::rsa_private(private_der.as_bytes().to_vec(), size_bits),
            algorithm: Algorithm::Rsa,
            size_bits,
            store_tag: store_tag.to_string(),
        })
    }

    /// Serialize for the secure store
    pub fn to_json(&self) -> Result<String> {
        let stored = StoredKeyPair {
            size_bits: self.size_bits,
            public: KeyExchangeFormat::from_key(&self.public)?,
            private: KeyExchangeFormat::from_key(&self.private)?,
        };
        Ok(serde_json::to_string(&stored)?)
    }

    /// Parse the secure-store form
    pub fn from_json(store_tag: &str, json: &str) -> Result<Self> {
        let stored: StoredKeyPair = serde_json::from_str(json)?;
        let public = stored.public.into_key()?;
        let private = stored.private.into_key()?;

        if public.key_type != KeyType::Identity || private.key_type != KeyType::Identity {
            return Err(CryptoError::InvalidKeyFormat("stored key pair is not RSA".into()));
        }

        Ok(Self {
            public,
            private,
            algorithm: Algorithm::Rsa,
            size_bits: stored.size_bits,
            store_tag: store_tag.to_string(),
        })
    }
}
