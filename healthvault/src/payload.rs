//! HealthVault - Attachment payload checks
//!
//! Type detection by magic bytes and the validation every attachment passes
//! before any upload starts.

use crate::attachment::{content_hash, Attachment};
use crate::error::{VaultError, VaultResult};

/// Payload types accepted as attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    Jpeg,
    Png,
    Tiff,
    Pdf,
    Dicom,
}

impl PayloadType {
    pub fn mime(&self) -> &'static str {
        match self {
            PayloadType::Jpeg => "image/jpeg",
            PayloadType::Png => "image/png",
            PayloadType::Tiff => "image/tiff",
            PayloadType::Pdf => "application/pdf",
            PayloadType::Dicom => "application/dicom",
        }
    }

    /// Types the resizer can render smaller versions of
    pub fn is_image(&self) -> bool {
        matches!(self, PayloadType::Jpeg | PayloadType::Png | PayloadType::Tiff)
    }
}

/// Detect payload type from file content
pub fn detect(data: &[u8]) -> Option<PayloadType> {
    // DICOM: 128-byte preamble, then "DICM"
    if data.len() >= 132 && &data[128..132] == b"DICM" {
        return Some(PayloadType::Dicom);
    }

    match data {
        [0xFF, 0xD8, 0xFF, ..] => Some(PayloadType::Jpeg),
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(PayloadType::Png),
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Some(PayloadType::Tiff),
        [0x25, 0x50, 0x44, 0x46, 0x2D, ..] => Some(PayloadType::Pdf),
        _ => None,
    }
}

/// MIME type from file content, `application/octet-stream` when unknown
pub fn detect_mime(data: &[u8]) -> &'static str {
    detect(data).map_or("application/octet-stream", |kind| kind.mime())
}

/// Check data presence, type, size and declared hash
pub fn validate(attachment: &Attachment, max_size: usize) -> VaultResult<PayloadType> {
    let data = attachment.data.as_deref().ok_or(VaultError::AttachmentDataMissing)?;

    let kind = detect(data).ok_or(VaultError::InvalidAttachmentPayloadType)?;

    if data.len() > max_size {
        return Err(VaultError::AttachmentPayloadSizeExceeded {
            size: data.len(),
            max: max_size,
        });
    }

    if let Some(hash) = &attachment.hash {
        if *hash != content_hash(data) {
            return Err(VaultError::InvalidAttachmentPayloadHash);
        }
    }

    Ok(kind)
}
