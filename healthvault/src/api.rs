//! HealthVault - Unified Public API
//!
//! Single entry point for record and attachment operations. Wires the
//! session, record and attachment services over one transport and one
//! secure store.

use std::sync::Arc;

use healthvault_crypto::{CryptoService, KeyType, SecureStore};

use crate::attachment::{Attachment, AttachmentSchema, Resolution};
use crate::attachment_service::{AttachmentService, DownloadToken};
use crate::batch::BatchResult;
use crate::common_key::CommonKeyService;
use crate::config::ClientConfig;
use crate::error::{VaultError, VaultResult};
use crate::record::DecryptedRecord;
use crate::record_service::{RecordService, SearchQuery};
use crate::resource::Resource;
use crate::session::Session;
use crate::thumbs::{ImageResizer, ThumbnailEngine};
use crate::transport::Transport;

/// HealthVault client
///
/// # Example
///
/// ```rust,ignore
/// use healthvault::{ClientConfig, HealthVaultClient, SearchQuery};
///
/// let client = HealthVaultClient::new(ClientConfig::new("acme#web"), store, transport)?;
/// client.login().await?;
///
/// let record = client.create_resource(patient, &["family".into()]).await?;
/// let found = client.search_resources::<Patient>(&SearchQuery::new()).await?;
///
/// client.logout()?;
/// ```
pub struct HealthVaultClient {
    config: ClientConfig,
    crypto: Arc<CryptoService>,
    session: Arc<Session>,
    records: RecordService,
    attachments: AttachmentService,
}

impl HealthVaultClient {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    pub fn new(
        config: ClientConfig,
        store: Arc<dyn SecureStore>,
        transport: Arc<dyn Transport>,
    ) -> VaultResult<Self> {
        Self::with_resizer(config, store, transport, Arc::new(ThumbnailEngine::new()))
    }

    /// Create with a custom image resizer
    pub fn with_resizer(
        config: ClientConfig,
        store: Arc<dyn SecureStore>,
        transport: Arc<dyn Transport>,
        resizer: Arc<dyn ImageResizer>,
    ) -> VaultResult<Self> {
        config.validate()?;

        let crypto = Arc::new(CryptoService::new(store, &config.key_pair_tag));
        let common_keys = Arc::new(CommonKeyService::new(crypto.clone(), transport.clone()));
        let session = Arc::new(Session::new(transport.clone(), crypto.clone(), common_keys.clone()));

        let records = RecordService::new(
            &config,
            transport.clone(),
            crypto.clone(),
            session.clone(),
            common_keys,
        );
        let attachments = AttachmentService::new(&config, transport, crypto.clone(), resizer);

        Ok(Self {
            config,
            crypto,
            session,
            records,
            attachments,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SESSION
    // ═══════════════════════════════════════════════════════════════════════

    /// Load user info and keys; returns the user id
    pub async fn login(&self) -> VaultResult<String> {
        self.session.refresh().await
    }

    /// Forget all session keys
    pub fn logout(&self) -> VaultResult<()> {
        self.session.clear()
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_active()
    }

    pub fn user_id(&self) -> VaultResult<String> {
        self.session.user_id()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RESOURCES
    // ═══════════════════════════════════════════════════════════════════════

    /// Upload attachments, then store the resource as a new record
    pub async fn create_resource<R: Resource>(
        &self,
        mut resource: R,
        annotations: &[String],
    ) -> VaultResult<DecryptedRecord<R>> {
        let user_id = self.session.ensure_ready().await?;

        let attachment_key = if has_attachments(&resource) {
            Some(self.crypto.generate_key(KeyType::Attachment)?)
        } else {
            None
        };
        if let Some(key) = &attachment_key {
            self.attachments.prepare_create(&user_id, &mut resource, key).await?;
        }

        let source = resource.attachment_schema();
        let body = without_attachment_data(&resource)?;
        let mut record = self
            .records
            .create_record(&body, annotations, attachment_key.as_ref())
            .await?;
        restore_attachment_data(&mut record.resource, source.as_ref())?;

        Ok(record)
    }

    /// Update the record named by `resource.id()`. Unchanged attachments
    /// are not uploaded again. `None` annotations keeps the stored ones.
    pub async fn update_resource<R: Resource>(
        &self,
        mut resource: R,
        annotations: Option<&[String]>,
    ) -> VaultResult<DecryptedRecord<R>> {
        let record_id = resource.id().ok_or(VaultError::MissingRecordId)?;
        let user_id = self.session.ensure_ready().await?;
        let existing = self.records.fetch_record::<R>(&record_id).await?;

        let attachment_key = match &existing.attachment_key {
            Some(key) => Some(key.clone()),
            None if has_attachments(&resource) => Some(self.crypto.generate_key(KeyType::Attachment)?),
            None => None,
        };
        if let Some(key) = &attachment_key {
            self.attachments
                .prepare_update(&user_id, &mut resource, &existing.resource, key)
                .await?;
        }

        let source = resource.attachment_schema();
        let body = without_attachment_data(&resource)?;
        let mut record = self
            .records
            .update_existing(&existing, &body, annotations, attachment_key.as_ref())
            .await?;
        restore_attachment_data(&mut record.resource, source.as_ref())?;

        Ok(record)
    }

    pub async fn fetch_resource<R: Resource>(&self, record_id: &str) -> VaultResult<DecryptedRecord<R>> {
        self.records.fetch_record(record_id).await
    }

    pub async fn search_resources<R: Resource>(
        &self,
        query: &SearchQuery,
    ) -> VaultResult<Vec<DecryptedRecord<R>>> {
        self.records.search_records(query).await
    }

    pub async fn count_resources<R: Resource>(&self, annotations: &[String]) -> VaultResult<usize> {
        self.records.count_records::<R>(annotations).await
    }

    pub async fn delete_resource(&self, record_id: &str) -> VaultResult<()> {
        self.records.delete_record(record_id).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BATCH
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn create_resources<R: Resource>(
        &self,
        resources: Vec<R>,
        annotations: &[String],
    ) -> BatchResult<DecryptedRecord<R>, R> {
        let mut result = BatchResult::new();
        for resource in resources {
            let outcome = self.create_resource(resource.clone(), annotations).await;
            result.push(resource, outcome);
        }
        result
    }

    pub async fn fetch_resources<R: Resource>(
        &self,
        record_ids: &[String],
    ) -> BatchResult<DecryptedRecord<R>, String> {
        self.records.fetch_records(record_ids).await
    }

    pub async fn delete_resources(&self, record_ids: &[String]) -> BatchResult<String, String> {
        self.records.delete_records(record_ids).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ATTACHMENTS
    // ═══════════════════════════════════════════════════════════════════════

    /// Download attachments of a stored record at the given resolution
    pub async fn download_attachments<R: Resource>(
        &self,
        record_id: &str,
        attachment_ids: &[String],
        resolution: Resolution,
        token: &DownloadToken,
    ) -> VaultResult<Vec<Attachment>> {
        let user_id = self.session.ensure_ready().await?;
        let record = self.records.fetch_record::<R>(record_id).await?;

        self.attachments
            .download_attachments(
                &user_id,
                &record.resource,
                attachment_ids,
                resolution,
                record.attachment_key.as_ref(),
                token,
            )
            .await
    }
}

fn has_attachments<R: Resource>(resource: &R) -> bool {
    resource
        .attachment_schema()
        .map_or(false, |schema| !schema.is_empty())
}

/// Copy of `resource` whose attachments carry no payload bytes
fn without_attachment_data<R: Resource>(resource: &R) -> VaultResult<R> {
    let mut stripped = resource.clone();
    if let Some(mut schema) = stripped.attachment_schema() {
        schema.strip_data();
        stripped.apply_attachment_schema(schema)?;
    }
    Ok(stripped)
}

fn restore_attachment_data<R: Resource>(
    resource: &mut R,
    source: Option<&AttachmentSchema>,
) -> VaultResult<()> {
    if let (Some(mut schema), Some(source)) = (resource.attachment_schema(), source) {
        schema.restore_data(source);
        resource.apply_attachment_schema(schema)?;
    }
    Ok(())
}
