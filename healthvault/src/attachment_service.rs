//! HealthVault - Attachment Service
//!
//! Uploads and downloads attachment blobs encrypted with the record's
//! attachment key. Image uploads also store medium and small renditions and
//! record their ids as a packed thumbnail identifier on the resource.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use healthvault_crypto::{CryptoService, Key};

use crate::attachment::{
    content_hash, fill_attachments, partition, Attachment, AttachmentSchema, Resolution,
    ThumbnailIdentity,
};
use crate::config::ClientConfig;
use crate::error::{VaultError, VaultResult};
use crate::payload::{self, PayloadType};
use crate::resource::Resource;
use crate::thumbs::ImageResizer;
use crate::transport::{decode_response, DocumentResponse, Route, Transport};

// ═══════════════════════════════════════════════════════════════════════════════
// DOWNLOAD TOKEN
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    completed: AtomicUsize,
    total: AtomicUsize,
}

/// Progress and cancellation handle shared with the caller
#[derive(Debug, Clone, Default)]
pub struct DownloadToken {
    state: Arc<TokenState>,
}

impl DownloadToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.state.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.state.total.load(Ordering::SeqCst)
    }

    /// 0.0 - 1.0
    pub fn progress(&self) -> f32 {
        match self.total() {
            0 => 0.0,
            total => self.completed() as f32 / total as f32,
        }
    }

    fn start(&self, total: usize) {
        self.state.total.store(total, Ordering::SeqCst);
        self.state.completed.store(0, Ordering::SeqCst);
    }

    fn advance(&self) {
        self.state.completed.fetch_add(1, Ordering::SeqCst);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTACHMENT SERVICE
// ═══════════════════════════════════════════════════════════════════════════════

/// One stored attachment and, for images, its renditions
#[derive(Debug, Clone)]
pub struct UploadedAttachment {
    pub attachment: Attachment,
    pub thumbnail: Option<ThumbnailIdentity>,
}

pub struct AttachmentService {
    transport: Arc<dyn Transport>,
    crypto: Arc<CryptoService>,
    resizer: Arc<dyn ImageResizer>,
    max_size: usize,
    medium_dimension: u32,
    small_dimension: u32,
    marker: String,
}

impl AttachmentService {
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        crypto: Arc<CryptoService>,
        resizer: Arc<dyn ImageResizer>,
    ) -> Self {
        Self {
            transport,
            crypto,
            resizer,
            max_size: config.max_attachment_size,
            medium_dimension: config.thumbnail_medium_dimension,
            small_dimension: config.thumbnail_small_dimension,
            marker: config.thumbnail_marker.clone(),
        }
    }

    /// Validate every payload; nothing is uploaded unless all pass
    pub fn validate_all(&self, attachments: &[Attachment]) -> VaultResult<Vec<PayloadType>> {
        attachments
            .iter()
            .map(|attachment| payload::validate(attachment, self.max_size))
            .collect()
    }

    async fn upload_blob(&self, user_id: &str, data: &[u8], key: &Key) -> VaultResult<String> {
        let encrypted = self.crypto.encrypt(data, key)?;
        let route = Route::UploadDocument {
            user_id: user_id.to_string(),
        };
        let response: DocumentResponse = decode_response(self.transport.upload(route, encrypted).await?)?;
        Ok(response.document_id)
    }

    async fn upload_rendition(
        &self,
        user_id: &str,
        data: &[u8],
        target: u32,
        full_id: &str,
        key: &Key,
    ) -> VaultResult<String> {
        match self.resizer.resize(data, target) {
            Ok(resized) => self.upload_blob(user_id, &resized, key).await,
            Err(VaultError::SmallerThanOriginal) => Ok(full_id.to_string()),
            Err(e) => {
                log::warn!("Rendition {}px of {} failed, using original: {}", target, full_id, e);
                Ok(full_id.to_string())
            }
        }
    }

    /// Validate, then upload in list order. Returned attachments carry the
    /// new id, hash and size.
    pub async fn upload_attachments(
        &self,
        user_id: &str,
        attachments: &[Attachment],
        key: &Key,
    ) -> VaultResult<Vec<UploadedAttachment>> {
        let kinds = self.validate_all(attachments)?;
        let mut uploaded = Vec::with_capacity(attachments.len());

        for (attachment, kind) in attachments.iter().zip(kinds) {
            let data = attachment.data.as_deref().ok_or(VaultError::AttachmentDataMissing)?;
            let full_id = self.upload_blob(user_id, data, key).await?;

            let thumbnail = if kind.is_image() {
                let medium = self
                    .upload_rendition(user_id, data, self.medium_dimension, &full_id, key)
                    .await?;
                let small = self
                    .upload_rendition(user_id, data, self.small_dimension, &full_id, key)
                    .await?;
                Some(ThumbnailIdentity::new(&self.marker, &full_id, &medium, &small))
            } else {
                None
            };

            let mut stored = attachment.clone();
            stored.id = Some(full_id);
            stored.hash = Some(content_hash(data));
            stored.size = Some(data.len());
            uploaded.push(UploadedAttachment {
                attachment: stored,
                thumbnail,
            });
        }

        log::debug!("Uploaded {} attachments", uploaded.len());
        Ok(uploaded)
    }

    fn other_identifiers(&self, identifiers: Vec<String>) -> Vec<String> {
        identifiers
            .into_iter()
            .filter(|id| !ThumbnailIdentity::is_thumbnail_identifier(id, &self.marker))
            .collect()
    }

    /// Upload the attachments of a new resource and write ids back into it
    pub async fn prepare_create<R: Resource>(
        &self,
        user_id: &str,
        resource: &mut R,
        key: &Key,
    ) -> VaultResult<()> {
        let mut schema = match resource.attachment_schema() {
            Some(schema) if !schema.is_empty() => schema,
            _ => return Ok(()),
        };

        let pending: Vec<Attachment> = schema.attachments().into_iter().cloned().collect();
        let uploaded = self.upload_attachments(user_id, &pending, key).await?;

        let filled: Vec<Attachment> = uploaded.iter().map(|u| u.attachment.clone()).collect();
        fill_attachments(schema.attachments_mut(), &filled)?;
        resource.apply_attachment_schema(schema)?;

        let mut identifiers = self.other_identifiers(resource.additional_identifiers());
        identifiers.extend(uploaded.iter().filter_map(|u| u.thumbnail.as_ref().map(|t| t.pack())));
        resource.set_additional_identifiers(identifiers);

        Ok(())
    }

    /// Reconcile the attachments of `resource` against the stored `previous`
    /// version. Only new and modified payloads are uploaded; thumbnail ids of
    /// removed or replaced attachments are dropped.
    pub async fn prepare_update<R: Resource>(
        &self,
        user_id: &str,
        resource: &mut R,
        previous: &R,
        key: &Key,
    ) -> VaultResult<()> {
        let previous_schema = previous.attachment_schema();
        let previous_attachments: Vec<&Attachment> = previous_schema
            .as_ref()
            .map(AttachmentSchema::attachments)
            .unwrap_or_default();
        let previous_identifiers = previous.additional_identifiers();

        let mut schema = match resource.attachment_schema() {
            Some(schema) => schema,
            None => return Ok(()),
        };

        let parts = partition(&schema.attachments(), &previous_attachments)?;
        let uploaded = self.upload_attachments(user_id, &parts.to_upload(), key).await?;

        let mut filled: Vec<Attachment> = parts.unmodified.clone();
        filled.extend(uploaded.iter().map(|u| u.attachment.clone()));
        fill_attachments(schema.attachments_mut(), &filled)?;
        resource.apply_attachment_schema(schema)?;

        // Keep thumbnails of untouched attachments
        let mut identifiers = self.other_identifiers(resource.additional_identifiers());
        for unmodified in &parts.unmodified {
            if let Some(id) = &unmodified.id {
                if let Some(identity) = ThumbnailIdentity::find(&previous_identifiers, &self.marker, id)? {
                    identifiers.push(identity.pack());
                }
            }
        }
        identifiers.extend(uploaded.iter().filter_map(|u| u.thumbnail.as_ref().map(|t| t.pack())));
        resource.set_additional_identifiers(identifiers);

        Ok(())
    }

    /// Download and decrypt attachments of `resource` by id.
    ///
    /// Full resolution payloads are checked against their hash. Renditions
    /// keep the attachment id and drop the hash.
    pub async fn download_attachments<R: Resource>(
        &self,
        user_id: &str,
        resource: &R,
        attachment_ids: &[String],
        resolution: Resolution,
        key: Option<&Key>,
        token: &DownloadToken,
    ) -> VaultResult<Vec<Attachment>> {
        let key = key.ok_or(VaultError::MissingAttachmentKey)?;
        let schema = resource.attachment_schema();
        let attachments: Vec<&Attachment> = schema
            .as_ref()
            .map(AttachmentSchema::attachments)
            .unwrap_or_default();
        let identifiers = resource.additional_identifiers();

        token.start(attachment_ids.len());
        let mut downloaded = Vec::with_capacity(attachment_ids.len());

        for attachment_id in attachment_ids {
            if token.is_cancelled() {
                return Err(VaultError::DownloadActionWasCancelled);
            }

            let attachment = attachments
                .iter()
                .find(|a| a.id.as_deref() == Some(attachment_id.as_str()))
                .ok_or_else(|| VaultError::AttachmentNotFound(attachment_id.clone()))?;

            let blob_id = match resolution {
                Resolution::Full => attachment_id.clone(),
                _ => ThumbnailIdentity::find(&identifiers, &self.marker, attachment_id)?
                    .map(|identity| identity.select(resolution).to_string())
                    .unwrap_or_else(|| attachment_id.clone()),
            };

            let route = Route::DownloadDocument {
                user_id: user_id.to_string(),
                document_id: blob_id.clone(),
            };
            let encrypted = self.transport.download(route).await?;
            if token.is_cancelled() {
                return Err(VaultError::DownloadActionWasCancelled);
            }
            let data = self.crypto.decrypt(&encrypted, key)?;

            let mut result = (*attachment).clone();
            if blob_id == *attachment_id {
                if let Some(hash) = &attachment.hash {
                    if *hash != content_hash(&data) {
                        return Err(VaultError::InvalidAttachmentPayloadHash);
                    }
                }
            } else {
                result.hash = None;
            }
            result.size = Some(data.len());
            result.data = Some(data);

            downloaded.push(result);
            token.advance();
        }

        Ok(downloaded)
    }
}
