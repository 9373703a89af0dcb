//! Key exchange format
//!
//! JSON shape every key takes before it is wrapped or stored:
//!
//! ```text
//! {"t": "dk", "v": 1, "sym": "<base64>"}      data key
//! {"t": "apub", "v": 1, "pub": "<base64>"}    RSA public key (SPKI DER)
//! {"t": "apriv", "v": 1, "priv": "<base64>"}  RSA private key (PKCS#8 DER)
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::{
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    traits::PublicKeyParts,
    RsaPrivateKey, RsaPublicKey,
};
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, Result};
use crate::key::{Key, KeyMaterial, KeyType};

/// Current format version
pub const EXCHANGE_FORMAT_VERSION: u32 = 1;

const TYPE_DATA: &str = "dk";
const TYPE_ATTACHMENT: &str = "ak";
const TYPE_TAG: &str = "tek";
const TYPE_COMMON: &str = "ck";
const TYPE_PUBLIC: &str = "apub";
const TYPE_PRIVATE: &str = "apriv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchangeFormat {
    #[serde(rename = "t")]
    pub key_type: String,
    #[serde(rename = "v")]
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sym: Option<String>,
    #[serde(rename = "pub", skip_serializing_if = "Option::is_none", default)]
    pub public: Option<String>,
    #[serde(rename = "priv", skip_serializing_if = "Option::is_none", default)]
    pub private: Option<String>,
}

impl KeyExchangeFormat {
    pub fn from_key(key: &Key) -> Result<Self> {
        let mut format = Self {
            key_type: String::new(),
            version: EXCHANGE_FORMAT_VERSION,
            sym: None,
            public: None,
            private: None,
        };

        match key.material() {
            KeyMaterial::Symmetric(bytes) => {
                format.key_type = match key.key_type {
                    KeyType::Data => TYPE_DATA,
                    KeyType::Attachment => TYPE_ATTACHMENT,
                    KeyType::Tag => TYPE_TAG,
                    KeyType::Common => TYPE_COMMON,
                    KeyType::Identity => {
                        return Err(CryptoError::InvalidKeyFormat("symmetric identity key".into()))
                    }
                }
                .to_string();
                format.sym = Some(STANDARD.encode(bytes.as_slice()));
            }
            KeyMaterial::RsaPublic(der) => {
                format.key_type = TYPE_PUBLIC.to_string();
                format.public = Some(STANDARD.encode(der));
            }
            KeyMaterial::RsaPrivate(der) => {
                format.key_type = TYPE_PRIVATE.to_string();
                format.private = Some(STANDARD.encode(der.as_slice()));
            }
        }

        Ok(format)
    }

    pub fn into_key(self) -> Result<Key> {
        if self.version != EXCHANGE_FORMAT_VERSION {
            return Err(CryptoError::InvalidKeyFormat(format!(
                "unsupported key format version {}",
                self.version
            )));
        }

        let symmetric = |key_type: KeyType, encoded: Option<String>| -> Result<Key> {
            let encoded = encoded.ok_or_else(|| CryptoError::InvalidKeyFormat("missing sym".into()))?;
            Key::symmetric(key_type, STANDARD.decode(encoded)?)
        };

        match self.key_type.as_str() {
            TYPE_DATA => symmetric(KeyType::Data, self.sym),
            TYPE_ATTACHMENT => symmetric(KeyType::Attachment, self.sym),
            TYPE_TAG => symmetric(KeyType::Tag, self.sym),
            TYPE_COMMON => symmetric(KeyType::Common, self.sym),
            TYPE_PUBLIC => {
                let encoded = self
                    .public
                    .ok_or_else(|| CryptoError::InvalidKeyFormat("missing pub".into()))?;
                let der = STANDARD.decode(encoded)?;
                let parsed = RsaPublicKey::from_public_key_der(&der)
                    .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
                Ok(Key::rsa_public(der, (parsed.size() * 8) as u32))
            }
            TYPE_PRIVATE => {
                let encoded = self
                    .private
                    .ok_or_else(|| CryptoError::InvalidKeyFormat("missing priv".into()))?;
                let der = STANDARD.decode(encoded)?;
                let parsed = RsaPrivateKey::from_pkcs8_der(&der)
                    .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
                Ok(Key::rsa_private(der, (parsed.size() * 8) as u32))
            }
            other => Err(CryptoError::InvalidKeyFormat(format!("unknown key type '{}'", other))),
        }
    }

    /// Serialize a key to its JSON bytes
    pub fn encode_key(key: &Key) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&Self::from_key(key)?)?)
    }

    /// Parse JSON bytes into a key
    pub fn decode_key(bytes: &[u8]) -> Result<Key> {
        let format: Self = serde_json::from_slice(bytes)?;
        format.into_key()
    }
}
