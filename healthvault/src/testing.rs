//! HealthVault - Test doubles
//!
//! In-memory backend speaking the record/document protocol, a wiring
//! harness and a few sample resources.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use healthvault_crypto::{CryptoService, Key, KeyExchangeFormat, KeyPair, KeyType, MemoryStore};

use crate::api::HealthVaultClient;
use crate::attachment::{Attachment, AttachmentSchema};
use crate::attachment_service::AttachmentService;
use crate::common_key::{CommonKeyService, INITIAL_COMMON_KEY_ID};
use crate::config::ClientConfig;
use crate::error::{VaultError, VaultResult};
use crate::record_service::RecordService;
use crate::resource::Resource;
use crate::session::Session;
use crate::tagging::{FLAG_APP_DATA, TAG_FLAG};
use crate::thumbs::{ImageResizer, ThumbnailEngine};
use crate::transport::{EncryptedRecord, RecordParameters, Route, SearchParameters, Transport, TransportError};

pub const TEST_USER: &str = "user-1";

static SHARED_KEY_PAIR: OnceLock<String> = OnceLock::new();

/// One RSA key pair for the whole test run
fn shared_key_pair() -> String {
    SHARED_KEY_PAIR
        .get_or_init(|| {
            KeyPair::generate("shared", 2048)
                .and_then(|pair| pair.to_json())
                .expect("key pair")
        })
        .clone()
}

// ═══════════════════════════════════════════════════════════════════════════════
// MOCK BACKEND
// ═══════════════════════════════════════════════════════════════════════════════

struct BackendState {
    common_keys: HashMap<String, Key>,
    current_key_id: String,
    tag_key: Key,
    records: Vec<EncryptedRecord>,
    documents: HashMap<String, Vec<u8>>,
    calls: HashMap<&'static str, usize>,
    next_id: usize,
}

impl BackendState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn current_key(&self) -> Key {
        self.common_keys[&self.current_key_id].clone()
    }
}

/// Backend double holding only ciphertext, like the real one
pub struct MockBackend {
    crypto: CryptoService,
    account: KeyPair,
    state: Mutex<BackendState>,
}

impl MockBackend {
    /// Backend for the account behind `client`; seeds the shared key pair
    /// into the client's store when it has none.
    pub fn new(client: &CryptoService) -> VaultResult<Self> {
        let store = client.store();
        if store.get(client.key_pair_tag())?.is_none() {
            store.set(client.key_pair_tag(), Some(shared_key_pair()))?;
        }
        let account = client.fetch_or_generate_key_pair()?;

        let mut common_keys = HashMap::new();
        common_keys.insert(INITIAL_COMMON_KEY_ID.to_string(), Key::generate(KeyType::Common)?);

        Ok(Self {
            crypto: CryptoService::new(Arc::new(MemoryStore::new()), "backend.keypair"),
            account,
            state: Mutex::new(BackendState {
                common_keys,
                current_key_id: INITIAL_COMMON_KEY_ID.to_string(),
                tag_key: Key::generate(KeyType::Tag)?,
                records: Vec::new(),
                documents: HashMap::new(),
                calls: HashMap::new(),
                next_id: 0,
            }),
        })
    }

    pub fn calls(&self, kind: &str) -> usize {
        self.state.lock().calls.get(kind).copied().unwrap_or(0)
    }

    /// Switch to a fresh common key. The tag key stays the same.
    pub fn rotate_common_key(&self) -> VaultResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut state = self.state.lock();
        state.common_keys.insert(id.clone(), Key::generate(KeyType::Common)?);
        state.current_key_id = id.clone();
        Ok(id)
    }

    /// Serve `key` as the account's tag encryption key
    pub fn replace_tag_key(&self, key: Key) {
        self.state.lock().tag_key = key;
    }

    pub fn common_key(&self, id: &str) -> Option<Key> {
        self.state.lock().common_keys.get(id).cloned()
    }

    pub fn current_common_key_id(&self) -> String {
        self.state.lock().current_key_id.clone()
    }

    pub fn record(&self, id: &str) -> Option<EncryptedRecord> {
        self.state.lock().records.iter().find(|r| r.record_id == id).cloned()
    }

    pub fn insert_record(&self, record: EncryptedRecord) {
        self.state.lock().records.push(record);
    }

    pub fn document(&self, id: &str) -> Option<Vec<u8>> {
        self.state.lock().documents.get(id).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.state.lock().documents.len()
    }

    /// Build a record the way some other client would have written it.
    /// `tags` are the exact `key=value` strings to encrypt.
    pub fn seal_record(&self, id: &str, tags: &[&str], body: &Value, model_version: u32) -> EncryptedRecord {
        let state = self.state.lock();
        let common_key = state.current_key();
        let data_key = Key::generate(KeyType::Data).unwrap();

        let encrypted_tags = tags
            .iter()
            .map(|tag| self.crypto.encrypt_string(tag, &state.tag_key).unwrap())
            .collect();
        let body = serde_json::to_vec(body).unwrap();

        EncryptedRecord {
            record_id: id.to_string(),
            encrypted_tags,
            encrypted_body: STANDARD.encode(self.crypto.encrypt(&body, &data_key).unwrap()),
            encrypted_key: self.wrap(&data_key, &common_key),
            attachment_key: None,
            common_key_id: Some(state.current_key_id.clone()),
            model_version,
            date: Utc::now().date_naive(),
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
            status: Some("Active".into()),
        }
    }

    fn wrap(&self, key: &Key, common_key: &Key) -> String {
        let json = KeyExchangeFormat::encode_key(key).unwrap();
        STANDARD.encode(self.crypto.encrypt(&json, common_key).unwrap())
    }

    fn wrap_for_account(&self, key: &Key) -> String {
        let json = KeyExchangeFormat::encode_key(key).unwrap();
        STANDARD.encode(self.crypto.encrypt_with_keypair(&json, &self.account).unwrap())
    }

    fn count(&self, kind: &'static str) {
        *self.state.lock().calls.entry(kind).or_insert(0) += 1;
    }
}

fn bad_request(e: impl std::fmt::Display) -> TransportError {
    TransportError::Server {
        status: 400,
        message: e.to_string(),
    }
}

/// `a,(b,c),d` -> `[[a], [b, c], [d]]`
fn parse_query(query: &str) -> Vec<Vec<String>> {
    let mut groups = Vec::new();
    let mut group = Vec::new();
    let mut token = String::new();
    let mut nested = false;

    for c in query.chars() {
        match c {
            '(' => nested = true,
            ')' => nested = false,
            ',' => {
                group.push(std::mem::take(&mut token));
                if !nested {
                    groups.push(std::mem::take(&mut group));
                }
            }
            _ => token.push(c),
        }
    }
    if !token.is_empty() {
        group.push(token);
    }
    if !group.is_empty() {
        groups.push(group);
    }
    groups
}

fn record_matches(record: &EncryptedRecord, params: &SearchParameters) -> bool {
    let tags_match = params
        .tags
        .as_deref()
        .map(parse_query)
        .unwrap_or_default()
        .iter()
        .all(|candidates| candidates.iter().any(|c| record.encrypted_tags.contains(c)));

    tags_match
        && params.start_date.map_or(true, |start| record.date >= start)
        && params.end_date.map_or(true, |end| record.date <= end)
}

#[async_trait]
impl Transport for MockBackend {
    async fn send(&self, route: Route, params: Value) -> Result<Value, TransportError> {
        match route {
            Route::UserInfo => {
                self.count("userinfo");
                let state = self.state.lock();
                let common_key = state.current_key();
                Ok(json!({
                    "sub": TEST_USER,
                    "common_key_id": state.current_key_id,
                    "common_key": self.wrap_for_account(&common_key),
                    "tag_encryption_key": self.wrap(&state.tag_key, &common_key),
                }))
            }
            Route::CommonKey { key_id, .. } => {
                self.count("commonkey");
                let key = self
                    .common_key(&key_id)
                    .ok_or_else(|| TransportError::NotFound(key_id.clone()))?;
                Ok(json!({ "common_key": self.wrap_for_account(&key) }))
            }
            Route::CreateRecord { .. } => {
                self.count("create");
                let params: RecordParameters = serde_json::from_value(params).map_err(bad_request)?;
                let mut state = self.state.lock();
                let now = Utc::now();
                let record = EncryptedRecord {
                    record_id: state.next_id("record"),
                    encrypted_tags: params.encrypted_tags,
                    encrypted_body: params.encrypted_body,
                    encrypted_key: params.encrypted_key,
                    attachment_key: params.attachment_key,
                    common_key_id: Some(params.common_key_id),
                    model_version: params.model_version,
                    date: params.date,
                    created_at: Some(now),
                    updated_at: Some(now),
                    status: Some("Active".into()),
                };
                state.records.push(record.clone());
                serde_json::to_value(record).map_err(bad_request)
            }
            Route::UpdateRecord { record_id, .. } => {
                self.count("update");
                let params: RecordParameters = serde_json::from_value(params).map_err(bad_request)?;
                let mut state = self.state.lock();
                let record = state
                    .records
                    .iter_mut()
                    .find(|r| r.record_id == record_id)
                    .ok_or(TransportError::NotFound(record_id))?;
                record.encrypted_tags = params.encrypted_tags;
                record.encrypted_body = params.encrypted_body;
                record.encrypted_key = params.encrypted_key;
                record.attachment_key = params.attachment_key;
                record.common_key_id = Some(params.common_key_id);
                record.model_version = params.model_version;
                record.date = params.date;
                record.updated_at = Some(Utc::now());
                serde_json::to_value(record.clone()).map_err(bad_request)
            }
            Route::FetchRecord { record_id, .. } => {
                self.count("fetch");
                let record = self.record(&record_id).ok_or(TransportError::NotFound(record_id))?;
                serde_json::to_value(record).map_err(bad_request)
            }
            Route::SearchRecords { .. } => {
                self.count("search");
                let params: SearchParameters = serde_json::from_value(params).map_err(bad_request)?;
                let found: Vec<EncryptedRecord> = self
                    .state
                    .lock()
                    .records
                    .iter()
                    .filter(|r| record_matches(r, &params))
                    .skip(params.offset.unwrap_or(0))
                    .take(params.limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect();
                serde_json::to_value(found).map_err(bad_request)
            }
            Route::CountRecords { .. } => {
                self.count("count");
                let params: SearchParameters = serde_json::from_value(params).map_err(bad_request)?;
                let total = self.state.lock().records.iter().filter(|r| record_matches(r, &params)).count();
                Ok(json!({ "total_count": total }))
            }
            Route::DeleteRecord { record_id, .. } => {
                self.count("delete");
                let mut state = self.state.lock();
                let before = state.records.len();
                state.records.retain(|r| r.record_id != record_id);
                if state.records.len() == before {
                    return Err(TransportError::NotFound(record_id));
                }
                Ok(Value::Null)
            }
            other => Err(bad_request(format!("{} is not a JSON route", other.path()))),
        }
    }

    async fn upload(&self, route: Route, data: Vec<u8>) -> Result<Value, TransportError> {
        self.count("upload");
        match route {
            Route::UploadDocument { .. } => {
                let mut state = self.state.lock();
                let id = state.next_id("document");
                state.documents.insert(id.clone(), data);
                Ok(json!({ "document_id": id }))
            }
            other => Err(bad_request(format!("cannot upload to {}", other.path()))),
        }
    }

    async fn download(&self, route: Route) -> Result<Vec<u8>, TransportError> {
        self.count("download");
        match route {
            Route::DownloadDocument { document_id, .. } => self
                .document(&document_id)
                .ok_or(TransportError::NotFound(document_id)),
            other => Err(bad_request(format!("cannot download from {}", other.path()))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HARNESS
// ═══════════════════════════════════════════════════════════════════════════════

/// Services wired against one [`MockBackend`]
pub struct Harness {
    pub backend: Arc<MockBackend>,
    pub store: Arc<MemoryStore>,
    pub crypto: Arc<CryptoService>,
    pub config: ClientConfig,
    pub common_keys: Arc<CommonKeyService>,
    pub session: Arc<Session>,
}

impl Harness {
    pub fn new() -> Self {
        let config = ClientConfig::new("test#rust");
        let store = Arc::new(MemoryStore::new());
        let crypto = Arc::new(CryptoService::new(store.clone(), &config.key_pair_tag));
        let backend = Arc::new(MockBackend::new(&crypto).unwrap());
        let common_keys = Arc::new(CommonKeyService::new(crypto.clone(), backend.clone()));
        let session = Arc::new(Session::new(backend.clone(), crypto.clone(), common_keys.clone()));

        Self {
            backend,
            store,
            crypto,
            config,
            common_keys,
            session,
        }
    }

    pub fn records(&self) -> RecordService {
        RecordService::new(
            &self.config,
            self.backend.clone(),
            self.crypto.clone(),
            self.session.clone(),
            self.common_keys.clone(),
        )
    }

    pub fn attachments(&self) -> AttachmentService {
        self.attachments_with(Arc::new(ThumbnailEngine::new()))
    }

    pub fn attachments_with(&self, resizer: Arc<dyn ImageResizer>) -> AttachmentService {
        AttachmentService::new(&self.config, self.backend.clone(), self.crypto.clone(), resizer)
    }

    /// Full client over the same store and backend
    pub fn client(&self) -> HealthVaultClient {
        HealthVaultClient::new(self.config.clone(), self.store.clone(), self.backend.clone()).unwrap()
    }
}

/// Gradient PNG, so renditions differ from the original
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut output = Vec::new();
    img.write_to(&mut Cursor::new(&mut output), image::ImageFormat::Png)
        .unwrap();
    output
}

// ═══════════════════════════════════════════════════════════════════════════════
// SAMPLE RESOURCES
// ═══════════════════════════════════════════════════════════════════════════════

fn schema_mismatch(resource: &str) -> VaultError {
    VaultError::AttachmentSchemaMismatch(format!("unexpected schema for {}", resource))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

impl Patient {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
        }
    }
}

impl Resource for Patient {
    const RESOURCE_TYPE: &'static str = "Patient";
    const BASE_TYPE: &'static str = "DomainResource";
    const MODEL_VERSION: u32 = 1;
    const SCHEMA_VERSION: &'static str = "3.0.1";

    fn id(&self) -> Option<String> {
        self.id.clone()
    }

    fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }
}

/// Attachments in a flat list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub content: Vec<Attachment>,
    #[serde(default)]
    pub identifier: Vec<String>,
}

impl DocumentReference {
    pub fn new(description: &str, content: Vec<Attachment>) -> Self {
        Self {
            id: None,
            description: description.to_string(),
            content,
            identifier: Vec::new(),
        }
    }
}

impl Resource for DocumentReference {
    const RESOURCE_TYPE: &'static str = "DocumentReference";
    const BASE_TYPE: &'static str = "DomainResource";
    const MODEL_VERSION: u32 = 1;
    const SCHEMA_VERSION: &'static str = "3.0.1";

    fn id(&self) -> Option<String> {
        self.id.clone()
    }

    fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    fn additional_identifiers(&self) -> Vec<String> {
        self.identifier.clone()
    }

    fn set_additional_identifiers(&mut self, identifiers: Vec<String>) {
        self.identifier = identifiers;
    }

    fn attachment_schema(&self) -> Option<AttachmentSchema> {
        Some(AttachmentSchema::List(self.content.clone()))
    }

    fn apply_attachment_schema(&mut self, schema: AttachmentSchema) -> VaultResult<()> {
        match schema {
            AttachmentSchema::List(content) => {
                self.content = content;
                Ok(())
            }
            _ => Err(schema_mismatch(Self::RESOURCE_TYPE)),
        }
    }
}

/// Attachments in a list plus one optional slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub presented_form: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<Attachment>,
    #[serde(default)]
    pub identifier: Vec<String>,
}

impl DiagnosticReport {
    pub fn new(presented_form: Vec<Attachment>, photo: Option<Attachment>) -> Self {
        Self {
            id: None,
            presented_form,
            photo,
            identifier: Vec::new(),
        }
    }
}

impl Resource for DiagnosticReport {
    const RESOURCE_TYPE: &'static str = "DiagnosticReport";
    const BASE_TYPE: &'static str = "DomainResource";
    const MODEL_VERSION: u32 = 1;
    const SCHEMA_VERSION: &'static str = "3.0.1";

    fn id(&self) -> Option<String> {
        self.id.clone()
    }

    fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    fn additional_identifiers(&self) -> Vec<String> {
        self.identifier.clone()
    }

    fn set_additional_identifiers(&mut self, identifiers: Vec<String>) {
        self.identifier = identifiers;
    }

    fn attachment_schema(&self) -> Option<AttachmentSchema> {
        Some(AttachmentSchema::Nested(vec![
            AttachmentSchema::List(self.presented_form.clone()),
            AttachmentSchema::Single(self.photo.clone()),
        ]))
    }

    fn apply_attachment_schema(&mut self, schema: AttachmentSchema) -> VaultResult<()> {
        let AttachmentSchema::Nested(children) = schema else {
            return Err(schema_mismatch(Self::RESOURCE_TYPE));
        };
        match <[AttachmentSchema; 2]>::try_from(children) {
            Ok([AttachmentSchema::List(forms), AttachmentSchema::Single(photo)]) => {
                self.presented_form = forms;
                self.photo = photo;
                Ok(())
            }
            _ => Err(schema_mismatch(Self::RESOURCE_TYPE)),
        }
    }
}

/// Resource typed only by its base type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl Resource for GenericResource {
    const RESOURCE_TYPE: &'static str = "DomainResource";
    const BASE_TYPE: &'static str = "DomainResource";
    const MODEL_VERSION: u32 = 1;
    const SCHEMA_VERSION: &'static str = "3.0.1";

    fn id(&self) -> Option<String> {
        self.id.clone()
    }

    fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }
}

/// Application data, outside any clinical schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppNote {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
}

impl Resource for AppNote {
    const RESOURCE_TYPE: &'static str = "AppNote";
    const BASE_TYPE: &'static str = "AppData";
    const MODEL_VERSION: u32 = 1;
    const SCHEMA_VERSION: &'static str = "";

    fn static_tags() -> Vec<(String, String)> {
        vec![(TAG_FLAG.to_string(), FLAG_APP_DATA.to_string())]
    }

    fn id(&self) -> Option<String> {
        self.id.clone()
    }

    fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        let groups = parse_query("a,(b,c),d");
        assert_eq!(groups, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
        assert!(parse_query("").is_empty());
    }
}
