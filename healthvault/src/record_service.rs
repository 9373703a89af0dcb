//! HealthVault - Record Service
//!
//! Envelope pipeline between resources and the backend.
//!
//! ```text
//! write: resource ─► tags ─► enc(tek)            ─┐
//!        body ─────────────► enc(data key)        ├─► transport
//!        data/attachment key ─► enc(common key)  ─┘
//! read:  the inverse, keyed by the record's common key id
//! ```

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use zeroize::Zeroizing;

use healthvault_crypto::{CryptoService, Key, KeyExchangeFormat, KeyType};

use crate::batch::BatchResult;
use crate::common_key::{CommonKeyService, INITIAL_COMMON_KEY_ID};
use crate::config::ClientConfig;
use crate::error::{VaultError, VaultResult};
use crate::record::{DecryptedRecord, Metadata};
use crate::resource::Resource;
use crate::session::Session;
use crate::tag_encoder::TagEncoder;
use crate::tagging::{TagGroup, TaggingService};
use crate::transport::{
    decode_response, CountResponse, EncryptedRecord, RecordParameters, Route, SearchParameters,
    Transport,
};

/// Search filter; annotations are ANDed with the type tags
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub annotations: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn annotations(mut self, annotations: &[&str]) -> Self {
        self.annotations = annotations.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

pub struct RecordService {
    transport: Arc<dyn Transport>,
    crypto: Arc<CryptoService>,
    session: Arc<Session>,
    common_keys: Arc<CommonKeyService>,
    tagging: TaggingService,
    encoder: TagEncoder,
    default_page_size: usize,
}

impl RecordService {
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        crypto: Arc<CryptoService>,
        session: Arc<Session>,
        common_keys: Arc<CommonKeyService>,
    ) -> Self {
        Self {
            transport,
            encoder: TagEncoder::new(crypto.clone()),
            crypto,
            session,
            common_keys,
            tagging: TaggingService::new(config),
            default_page_size: config.default_page_size,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // WRITE
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt and store a new record under a fresh data key
    pub async fn create_record<R: Resource>(
        &self,
        resource: &R,
        annotations: &[String],
        attachment_key: Option<&Key>,
    ) -> VaultResult<DecryptedRecord<R>> {
        let data_key = self.crypto.generate_key(KeyType::Data)?;
        let user_id = self.session.refresh().await?;

        let tags = self.tagging.make_tag_group(resource, None, Some(annotations))?;
        let date = Utc::now().date_naive();

        self.upload(
            Route::CreateRecord { user_id },
            resource,
            &tags,
            &data_key,
            attachment_key,
            date,
        )
        .await
    }

    /// Replace the resource of an existing record
    pub async fn update_record<R: Resource>(
        &self,
        record_id: &str,
        resource: &R,
        annotations: Option<&[String]>,
    ) -> VaultResult<DecryptedRecord<R>> {
        let existing = self.fetch_record::<R>(record_id).await?;
        self.update_existing(&existing, resource, annotations, None).await
    }

    /// Update against an already decrypted record. The data key, date and
    /// provenance of `existing` are kept.
    pub async fn update_existing<R: Resource>(
        &self,
        existing: &DecryptedRecord<R>,
        resource: &R,
        annotations: Option<&[String]>,
        attachment_key: Option<&Key>,
    ) -> VaultResult<DecryptedRecord<R>> {
        let user_id = self.session.refresh().await?;

        let old_tags = TagGroup {
            tags: existing.tags.clone(),
            annotations: existing.annotations.clone(),
        };
        let tags = self.tagging.make_tag_group(resource, Some(&old_tags), annotations)?;
        let attachment_key = attachment_key.or(existing.attachment_key.as_ref());

        self.upload(
            Route::UpdateRecord {
                user_id,
                record_id: existing.id.clone(),
            },
            resource,
            &tags,
            &existing.data_key,
            attachment_key,
            existing.metadata.date,
        )
        .await
    }

    async fn upload<R: Resource>(
        &self,
        route: Route,
        resource: &R,
        tags: &TagGroup,
        data_key: &Key,
        attachment_key: Option<&Key>,
        date: NaiveDate,
    ) -> VaultResult<DecryptedRecord<R>> {
        let (common_key_id, common_key) = self.common_keys.current_key()?;

        let encrypted_tags = self.encoder.encode_for_upload(tags)?;

        // The id is transport truth, never part of the body
        let mut body = resource.clone();
        body.set_id(None);
        let json = Zeroizing::new(serde_json::to_vec(&body)?);
        let encrypted_body = STANDARD.encode(self.crypto.encrypt(&json, data_key)?);

        let encrypted_key = self.wrap_key(data_key, &common_key)?;
        let attachment_key = attachment_key
            .map(|key| self.wrap_key(key, &common_key))
            .transpose()?;

        let params = RecordParameters {
            encrypted_tags,
            encrypted_body,
            encrypted_key,
            attachment_key,
            common_key_id,
            model_version: R::MODEL_VERSION,
            date,
        };

        log::debug!("Uploading {} record to {}", R::RESOURCE_TYPE, route.path());
        let response = self.transport.send(route, serde_json::to_value(&params)?).await?;
        self.decrypt_record(decode_response(response)?).await
    }

    fn wrap_key(&self, key: &Key, common_key: &Key) -> VaultResult<String> {
        let json = Zeroizing::new(KeyExchangeFormat::encode_key(key)?);
        Ok(STANDARD.encode(self.crypto.encrypt(&json, common_key)?))
    }

    fn unwrap_key(&self, wrapped: &str, common_key: &Key) -> VaultResult<Key> {
        let json = Zeroizing::new(self.crypto.decrypt(&STANDARD.decode(wrapped)?, common_key)?);
        Ok(KeyExchangeFormat::decode_key(&json)?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // READ
    // ═══════════════════════════════════════════════════════════════════════

    /// Open an envelope. Records newer than `R` understands are rejected
    /// before anything is decrypted.
    pub async fn decrypt_record<R: Resource>(
        &self,
        record: EncryptedRecord,
    ) -> VaultResult<DecryptedRecord<R>> {
        if record.model_version > R::MODEL_VERSION {
            return Err(VaultError::InvalidRecordModelVersionNotSupported {
                record: record.model_version,
                supported: R::MODEL_VERSION,
            });
        }

        let user_id = self.session.user_id()?;
        let tags = self.encoder.decode(&record.encrypted_tags)?;

        let key_id = record
            .common_key_id
            .as_deref()
            .unwrap_or(INITIAL_COMMON_KEY_ID);
        let common_key = self.common_keys.fetch_key(&user_id, key_id).await?;

        let data_key = self.unwrap_key(&record.encrypted_key, &common_key)?;
        let attachment_key = record
            .attachment_key
            .as_deref()
            .map(|wrapped| self.unwrap_key(wrapped, &common_key))
            .transpose()?;

        let body = Zeroizing::new(
            self.crypto
                .decrypt(&STANDARD.decode(&record.encrypted_body)?, &data_key)?,
        );
        let mut resource: R = serde_json::from_slice(&body)?;
        resource.set_id(Some(record.record_id.clone()));

        Ok(DecryptedRecord {
            id: record.record_id,
            metadata: Metadata {
                date: record.date,
                created_at: record.created_at,
                updated_at: record.updated_at,
                status: record.status,
            },
            tags: tags.tags,
            annotations: tags.annotations,
            resource,
            data_key,
            attachment_key,
            model_version: record.model_version,
        })
    }

    pub async fn fetch_record<R: Resource>(&self, record_id: &str) -> VaultResult<DecryptedRecord<R>> {
        let user_id = self.session.ensure_ready().await?;
        let route = Route::FetchRecord {
            user_id,
            record_id: record_id.to_string(),
        };
        let response = self.transport.send(route, Value::Null).await?;
        self.decrypt_record(decode_response(response)?).await
    }

    fn search_parameters<R: Resource>(&self, query: &SearchQuery) -> VaultResult<SearchParameters> {
        let group = self.tagging.make_search_group::<R>(&query.annotations)?;
        Ok(SearchParameters {
            tags: Some(self.encoder.search_query(&group)?),
            start_date: query.start_date,
            end_date: query.end_date,
            limit: Some(query.limit.unwrap_or(self.default_page_size)),
            offset: query.offset,
        })
    }

    pub async fn search_records<R: Resource>(
        &self,
        query: &SearchQuery,
    ) -> VaultResult<Vec<DecryptedRecord<R>>> {
        let user_id = self.session.ensure_ready().await?;
        let params = self.search_parameters::<R>(query)?;

        let response = self
            .transport
            .send(Route::SearchRecords { user_id }, serde_json::to_value(&params)?)
            .await?;
        let records: Vec<EncryptedRecord> = decode_response(response)?;

        let mut decrypted = Vec::with_capacity(records.len());
        for record in records {
            decrypted.push(self.decrypt_record(record).await?);
        }
        Ok(decrypted)
    }

    pub async fn count_records<R: Resource>(&self, annotations: &[String]) -> VaultResult<usize> {
        let user_id = self.session.ensure_ready().await?;
        let group = self.tagging.make_search_group::<R>(annotations)?;
        let params = SearchParameters {
            tags: Some(self.encoder.search_query(&group)?),
            ..Default::default()
        };

        let response = self
            .transport
            .send(Route::CountRecords { user_id }, serde_json::to_value(&params)?)
            .await?;
        let count: CountResponse = decode_response(response)?;
        Ok(count.total_count)
    }

    pub async fn delete_record(&self, record_id: &str) -> VaultResult<()> {
        let user_id = self.session.ensure_ready().await?;
        let route = Route::DeleteRecord {
            user_id,
            record_id: record_id.to_string(),
        };
        self.transport.send(route, Value::Null).await?;
        log::debug!("Deleted record {}", record_id);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BATCH
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn create_records<R: Resource>(
        &self,
        resources: Vec<R>,
        annotations: &[String],
    ) -> BatchResult<DecryptedRecord<R>, R> {
        let mut result = BatchResult::new();
        for resource in resources {
            let outcome = self.create_record(&resource, annotations, None).await;
            result.push(resource, outcome);
        }
        result
    }

    pub async fn fetch_records<R: Resource>(
        &self,
        record_ids: &[String],
    ) -> BatchResult<DecryptedRecord<R>, String> {
        let mut result = BatchResult::new();
        for record_id in record_ids {
            let outcome = self.fetch_record::<R>(record_id).await;
            result.push(record_id.clone(), outcome);
        }
        result
    }

    pub async fn delete_records(&self, record_ids: &[String]) -> BatchResult<String, String> {
        let mut result = BatchResult::new();
        for record_id in record_ids {
            let outcome = self.delete_record(record_id).await.map(|_| record_id.clone());
            result.push(record_id.clone(), outcome);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagging::{TAG_CLIENT, TAG_RESOURCE_TYPE, TAG_UPDATED_BY_CLIENT};
    use crate::testing::{DocumentReference, Harness, Patient};
    use serde_json::json;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_create_and_fetch() {
        let harness = Harness::new();
        let records = harness.records();

        let created = records
            .create_record(&Patient::new("Ada"), &strings(&["Family"]), None)
            .await
            .unwrap();

        assert_eq!(created.resource.id.as_deref(), Some(created.id.as_str()));
        assert_eq!(created.tag(TAG_CLIENT), Some("test#rust"));
        assert_eq!(created.tag(TAG_RESOURCE_TYPE), Some("patient"));
        assert_eq!(created.annotations, vec!["family"]);
        assert_eq!(created.metadata.date, Utc::now().date_naive());
        assert!(created.attachment_key.is_none());

        let fetched = records.fetch_record::<Patient>(&created.id).await.unwrap();
        assert_eq!(fetched.resource, created.resource);
        assert_eq!(fetched.data_key, created.data_key);

        // Stored body is ciphertext
        let stored = harness.backend.record(&created.id).unwrap();
        let raw = STANDARD.decode(&stored.encrypted_body).unwrap();
        assert!(serde_json::from_slice::<Value>(&raw).is_err());
        assert_eq!(stored.model_version, 1);
    }

    #[tokio::test]
    async fn test_equal_resources_give_different_ciphertexts() {
        let harness = Harness::new();
        let records = harness.records();
        let patient = Patient::new("Same");

        let a = records.create_record(&patient, &[], None).await.unwrap();
        let b = records.create_record(&patient, &[], None).await.unwrap();

        let stored_a = harness.backend.record(&a.id).unwrap();
        let stored_b = harness.backend.record(&b.id).unwrap();
        assert_ne!(stored_a.encrypted_body, stored_b.encrypted_body);
        // Tags are deterministic
        assert_eq!(stored_a.encrypted_tags, stored_b.encrypted_tags);
    }

    #[tokio::test]
    async fn test_update_keeps_data_key_and_provenance() {
        let harness = Harness::new();
        let records = harness.records();

        let created = records
            .create_record(&Patient::new("Ada"), &strings(&["keep"]), None)
            .await
            .unwrap();

        let mut changed = created.resource.clone();
        changed.name = "Ada Lovelace".into();
        let updated = records
            .update_record(&created.id, &changed, None)
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.resource.name, "Ada Lovelace");
        assert_eq!(updated.data_key, created.data_key);
        assert_eq!(updated.metadata.date, created.metadata.date);
        assert_eq!(updated.annotations, vec!["keep"]);
        assert_eq!(updated.tag(TAG_CLIENT), Some("test#rust"));
        assert_eq!(updated.tag(TAG_UPDATED_BY_CLIENT), Some("test#rust"));

        let cleared = records
            .update_record(&created.id, &changed, Some(&[]))
            .await
            .unwrap();
        assert!(cleared.annotations.is_empty());
    }

    #[tokio::test]
    async fn test_newer_model_version_rejected_before_decryption() {
        let harness = Harness::new();
        let records = harness.records();
        harness.session.refresh().await.unwrap();

        let mut record = harness
            .backend
            .seal_record("future", &["resourcetype=patient"], &json!({"name": "x"}), 7);
        record.encrypted_body = "not even base64".into();
        harness.backend.insert_record(record);

        let result = records.fetch_record::<Patient>("future").await;
        assert!(matches!(
            result,
            Err(VaultError::InvalidRecordModelVersionNotSupported { record: 7, supported: 1 })
        ));
    }

    #[tokio::test]
    async fn test_search_filters_by_type_and_annotation() {
        let harness = Harness::new();
        let records = harness.records();

        records.create_record(&Patient::new("A"), &strings(&["lab"]), None).await.unwrap();
        records.create_record(&Patient::new("B"), &[], None).await.unwrap();
        records
            .create_record(&DocumentReference::new("doc", vec![]), &strings(&["lab"]), None)
            .await
            .unwrap();

        let patients = records.search_records::<Patient>(&SearchQuery::new()).await.unwrap();
        assert_eq!(patients.len(), 2);

        let lab = records
            .search_records::<Patient>(&SearchQuery::new().annotations(&["LAB"]))
            .await
            .unwrap();
        assert_eq!(lab.len(), 1);
        assert_eq!(lab[0].resource.name, "A");

        assert_eq!(records.count_records::<Patient>(&[]).await.unwrap(), 2);
        assert_eq!(records.count_records::<DocumentReference>(&strings(&["lab"])).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_finds_legacy_encodings() {
        let harness = Harness::new();
        let records = harness.records();
        harness.session.refresh().await.unwrap();

        // Written by an older client: unescaped annotation
        let legacy = harness.backend.seal_record(
            "legacy-1",
            &["resourcetype=patient", "fhirversion=3.0.1", "custom=blood test"],
            &json!({"name": "Old"}),
            1,
        );
        harness.backend.insert_record(legacy);

        // Older JS client: extended-safe escaping
        let js = harness.backend.seal_record(
            "legacy-2",
            &["resourcetype=patient", "fhirversion=3.0.1", "custom=blood%20test"],
            &json!({"name": "Js"}),
            1,
        );
        harness.backend.insert_record(js);

        let found = records
            .search_records::<Patient>(&SearchQuery::new().annotations(&["Blood Test"]))
            .await
            .unwrap();
        let mut names: Vec<_> = found.iter().map(|r| r.resource.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["Js", "Old"]);
        assert!(found.iter().all(|r| r.annotations == vec!["blood test"]));
    }

    #[tokio::test]
    async fn test_search_date_range_and_paging() {
        let harness = Harness::new();
        let records = harness.records();
        for name in ["a", "b", "c"] {
            records.create_record(&Patient::new(name), &[], None).await.unwrap();
        }

        let today = Utc::now().date_naive();
        let page = records
            .search_records::<Patient>(&SearchQuery::new().between(today, today).page(2, 1))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);

        let yesterday = today.pred_opt().unwrap();
        let none = records
            .search_records::<Patient>(&SearchQuery::new().between(yesterday, yesterday))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_batches() {
        let harness = Harness::new();
        let records = harness.records();

        let created = records
            .create_records(vec![Patient::new("a"), Patient::new("b")], &[])
            .await;
        assert!(created.success());
        let ids: Vec<String> = created.successes.iter().map(|r| r.id.clone()).collect();

        records.delete_record(&ids[0]).await.unwrap();
        let err = records.fetch_record::<Patient>(&ids[0]).await.unwrap_err();
        assert!(err.is_not_found());

        let fetched = records.fetch_records::<Patient>(&ids).await;
        assert_eq!(fetched.successes.len(), 1);
        assert_eq!(fetched.failures.len(), 1);
        assert_eq!(fetched.failures[0].0, ids[0]);

        let deleted = records.delete_records(&ids).await;
        assert_eq!(deleted.successes, vec![ids[1].clone()]);
        assert_eq!(deleted.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_records_survive_common_key_rotation() {
        let harness = Harness::new();
        let records = harness.records();

        let before = records.create_record(&Patient::new("before"), &[], None).await.unwrap();
        let rotated = harness.backend.rotate_common_key().unwrap();
        let after = records.create_record(&Patient::new("after"), &[], None).await.unwrap();

        let stored = harness.backend.record(&after.id).unwrap();
        assert_eq!(stored.common_key_id.as_deref(), Some(rotated.as_str()));
        assert_ne!(harness.backend.record(&before.id).unwrap().common_key_id, stored.common_key_id);

        // Tag key was re-wrapped, old tags still decrypt
        let old = records.fetch_record::<Patient>(&before.id).await.unwrap();
        assert_eq!(old.resource.name, "before");
    }

    #[tokio::test]
    async fn test_unknown_common_key_fetched_on_read() {
        let harness = Harness::new();
        let records = harness.records();
        harness.session.refresh().await.unwrap();

        let rotated = harness.backend.rotate_common_key().unwrap();
        let record = harness
            .backend
            .seal_record("rotated", &["resourcetype=patient"], &json!({"name": "R"}), 1);
        assert_eq!(record.common_key_id.as_deref(), Some(rotated.as_str()));
        harness.backend.insert_record(record);

        let fetched = records.fetch_record::<Patient>("rotated").await.unwrap();
        assert_eq!(fetched.resource.name, "R");
        assert_eq!(harness.backend.calls("commonkey"), 1);

        records.fetch_record::<Patient>("rotated").await.unwrap();
        assert_eq!(harness.backend.calls("commonkey"), 1);
    }
}
