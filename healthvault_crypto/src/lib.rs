//! # HealthVault Crypto - envelope encryption core
//!
//! ## Contents:
//! - Cipher primitives (AES-GCM, AES-CBC-PKCS7, RSA-OAEP-SHA256)
//! - Typed key model and the JSON key exchange format
//! - Account key pair lifecycle
//! - Secure store seam
//! - CryptoService (IV handling, session tag key)

pub mod error;
pub mod key;
pub mod crypto;
pub mod keypair;
pub mod exchange;
pub mod store;
pub mod service;

// Re-exports
pub use error::{CryptoError, Result};
pub use exchange::KeyExchangeFormat;
pub use key::{Algorithm, BlockMode, HashAlgorithm, Key, KeyMaterial, KeyType, Padding};
pub use keypair::KeyPair;
pub use service::{CryptoService, DEFAULT_KEY_PAIR_TAG};
pub use store::{MemoryStore, SecureStore};

/// Library version
pub const VERSION: &str = "1.0.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "1.0.0");
    }
}
