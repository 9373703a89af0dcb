//! RSA-OAEP-SHA256 for wrapping key material

use rand::rngs::OsRng;
use rsa::{
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    Oaep, RsaPrivateKey, RsaPublicKey,
};
use sha2::Sha256;

use crate::error::{CryptoError, Result};
use crate::key::KeyMaterial;

fn public_key(material: &KeyMaterial) -> Result<RsaPublicKey> {
    match material {
        KeyMaterial::RsaPublic(der) => RsaPublicKey::from_public_key_der(der)
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string())),
        KeyMaterial::RsaPrivate(der) => RsaPrivateKey::from_pkcs8_der(der)
            .map(|private| private.to_public_key())
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string())),
        KeyMaterial::Symmetric(_) => Err(CryptoError::InvalidKeyUsage("RSA needs an asymmetric key")),
    }
}

fn private_key(material: &KeyMaterial) -> Result<RsaPrivateKey> {
    match material {
        KeyMaterial::RsaPrivate(der) => RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string())),
        _ => Err(CryptoError::InvalidKeyUsage("RSA decryption needs the private key")),
    }
}

/// Encrypt with the public half (a private key is accepted and its public half used).
pub fn encrypt_rsa_oaep(material: &KeyMaterial, plaintext: &[u8]) -> Result<Vec<u8>> {
    let key = public_key(material)?;
    key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| CryptoError::CouldNotEncryptData(e.to_string()))
}

pub fn decrypt_rsa_oaep(material: &KeyMaterial, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let key = private_key(material)?;
    key.decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|_| CryptoError::CouldNotDecryptData)
}
