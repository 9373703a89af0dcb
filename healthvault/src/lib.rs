//! # HealthVault
//!
//! Client-side envelope encryption for a health record backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    HEALTHVAULT CLIENT                     │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────┐  │
//! │  │   SESSION   │  │   RECORDS   │  │   ATTACHMENTS    │  │
//! │  │ user + keys │  │  envelope   │  │ blobs/thumbnails │  │
//! │  └──────┬──────┘  └──────┬──────┘  └────────┬─────────┘  │
//! │         │                │                   │            │
//! │  ┌──────┴────────────────┴───────────────────┴─────────┐  │
//! │  │ COMMON KEYS (RSA-OAEP wrapped)  ·  TAGS (AES-CBC,   │  │
//! │  │ versioned by id, cached)        ·  deterministic)   │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! │                          │                                │
//! │                    TRANSPORT (trait)                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Record bodies encrypted with a per-record AES-256-GCM data key
//! - Data and attachment keys wrapped with the current common key
//! - Common keys wrapped for the account RSA key pair
//! - Tags encrypted deterministically so the server can match them
//! - The backend only ever sees ciphertext

pub mod api;
pub mod attachment;
pub mod attachment_service;
pub mod batch;
pub mod common_key;
pub mod config;
pub mod error;
pub mod payload;
pub mod record;
pub mod record_service;
pub mod resource;
pub mod session;
pub mod tag_encoder;
pub mod tagging;
pub mod thumbs;
pub mod transport;

#[cfg(test)]
mod testing;

pub use api::HealthVaultClient;
pub use attachment::{Attachment, AttachmentSchema, Resolution, ThumbnailIdentity};
pub use attachment_service::DownloadToken;
pub use batch::BatchResult;
pub use config::ClientConfig;
pub use error::{VaultError, VaultResult};
pub use record::{DecryptedRecord, Metadata};
pub use record_service::SearchQuery;
pub use resource::Resource;
pub use thumbs::{ImageResizer, ThumbnailEngine};
pub use transport::{Route, Transport, TransportError};

/// HealthVault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
