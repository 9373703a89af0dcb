//! HealthVault - Error Types

use thiserror::Error;

use healthvault_crypto::CryptoError;

use crate::transport::TransportError;

/// Result type for record operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Record pipeline error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // SESSION / CONFIGURATION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Common key is not available")]
    MissingCommonKey,

    #[error("Session is not initialized - log in first")]
    SessionNotInitialized,

    #[error("Configuration error: {0}")]
    Config(String),

    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    // ═══════════════════════════════════════════════════════════════
    // MODEL COMPATIBILITY ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Record model version {record} is newer than supported version {supported}")]
    InvalidRecordModelVersionNotSupported { record: u32, supported: u32 },

    #[error("Attachment schema does not match the resource: {0}")]
    AttachmentSchemaMismatch(String),

    #[error("Resource has no record id")]
    MissingRecordId,

    // ═══════════════════════════════════════════════════════════════
    // TAG ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid character in tag: {0:?}")]
    InvalidCharacterInTag(String),

    #[error("Annotation must not be empty")]
    EmptyAnnotation,

    #[error("Malformed decrypted tag: {0}")]
    InvalidTagFormat(String),

    // ═══════════════════════════════════════════════════════════════
    // ATTACHMENT ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Could not match uploaded attachments to the resource")]
    CouldNotSynchronizeAttachments,

    #[error("Malformed attachment additional identifier: {0}")]
    MalformedAttachmentAdditionalId(String),

    #[error("Attachment has no data")]
    AttachmentDataMissing,

    #[error("Attachment payload type is not supported")]
    InvalidAttachmentPayloadType,

    #[error("Attachment too large: {size} bytes (max: {max})")]
    AttachmentPayloadSizeExceeded { size: usize, max: usize },

    #[error("Attachment hash does not match its data")]
    InvalidAttachmentPayloadHash,

    #[error("Attachment not found: {0}")]
    AttachmentNotFound(String),

    #[error("Record has no attachment key")]
    MissingAttachmentKey,

    // ═══════════════════════════════════════════════════════════════
    // THUMBNAIL ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Image is already smaller than the requested size")]
    SmallerThanOriginal,

    #[error("Image processing error: {0}")]
    ImageError(String),

    // ═══════════════════════════════════════════════════════════════
    // TRANSPORT ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Download was cancelled")]
    DownloadActionWasCancelled,

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),

    // ═══════════════════════════════════════════════════════════════
    // SERIALIZATION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl VaultError {
    /// Wrong keys, tampering or missing key state
    pub fn is_crypto_failure(&self) -> bool {
        matches!(
            self,
            VaultError::Crypto(_) | VaultError::MissingCommonKey | VaultError::MissingAttachmentKey
        )
    }

    /// Data was written by a newer client; the caller should prompt an upgrade
    pub fn requires_upgrade(&self) -> bool {
        matches!(self, VaultError::InvalidRecordModelVersionNotSupported { .. })
    }

    pub fn is_attachment_error(&self) -> bool {
        matches!(
            self,
            VaultError::CouldNotSynchronizeAttachments
                | VaultError::MalformedAttachmentAdditionalId(_)
                | VaultError::AttachmentDataMissing
                | VaultError::InvalidAttachmentPayloadType
                | VaultError::AttachmentPayloadSizeExceeded { .. }
                | VaultError::InvalidAttachmentPayloadHash
                | VaultError::AttachmentNotFound(_)
                | VaultError::AttachmentSchemaMismatch(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VaultError::Transport(TransportError::NotFound(_)))
    }
}

impl From<TransportError> for VaultError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Cancelled => VaultError::DownloadActionWasCancelled,
            other => VaultError::Transport(other),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::SerializationError(e.to_string())
    }
}

impl From<base64::DecodeError> for VaultError {
    fn from(e: base64::DecodeError) -> Self {
        VaultError::Crypto(CryptoError::Base64(e))
    }
}

impl From<image::ImageError> for VaultError {
    fn from(e: image::ImageError) -> Self {
        VaultError::ImageError(e.to_string())
    }
}
