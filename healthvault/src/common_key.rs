//! HealthVault - Common Key Service
//!
//! The per-account common key wraps every data and attachment key. It rotates
//! by id: records remember the id they were written under, new writes always
//! use the current one.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::RwLock;
use serde_json::Value;

use healthvault_crypto::{CryptoError, CryptoService, Key, KeyExchangeFormat, KeyType};

use crate::error::{VaultError, VaultResult};
use crate::transport::{decode_response, CommonKeyResponse, Route, Transport};

/// Id of the account's first common key
pub const INITIAL_COMMON_KEY_ID: &str = "00000000-0000-0000-0000-000000000000";

const INITIAL_KEY_ENTRY: &str = "healthvault.commonkey.initial";
const KEY_NAMESPACE: &str = "healthvault.commonkey";
const CURRENT_ID_ENTRY: &str = "healthvault.commonkey.current";
const INDEX_ENTRY: &str = "healthvault.commonkey.index";

/// Common key cache over the secure store and the backend
pub struct CommonKeyService {
    crypto: Arc<CryptoService>,
    transport: Arc<dyn Transport>,
    cache: RwLock<HashMap<String, Key>>,
    current_id: RwLock<Option<String>>,
}

impl CommonKeyService {
    pub fn new(crypto: Arc<CryptoService>, transport: Arc<dyn Transport>) -> Self {
        Self {
            crypto,
            transport,
            cache: RwLock::new(HashMap::new()),
            current_id: RwLock::new(None),
        }
    }

    /// Resolve a common key by id: memory, then secure store, then backend
    pub async fn fetch_key(&self, user_id: &str, id: &str) -> VaultResult<Key> {
        if let Some(key) = self.cache.read().get(id) {
            return Ok(key.clone());
        }

        if let Some(key) = self.load_stored(id)? {
            self.cache.write().insert(id.to_string(), key.clone());
            return Ok(key);
        }

        log::debug!("Fetching common key {} from backend", id);
        let route = Route::CommonKey {
            user_id: user_id.to_string(),
            key_id: id.to_string(),
        };
        let response: CommonKeyResponse = decode_response(self.transport.send(route, Value::Null).await?)?;

        let key_pair = self.crypto.fetch_or_generate_key_pair()?;
        let wrapped = STANDARD.decode(&response.common_key)?;
        let json = self.crypto.decrypt_with_keypair(&wrapped, &key_pair)?;
        let key = KeyExchangeFormat::decode_key(&json)?;

        self.store_key(&key, id, false)?;
        Ok(key)
    }

    /// Persist `key` under `id`; `is_current` moves the current-id pointer
    pub fn store_key(&self, key: &Key, id: &str, is_current: bool) -> VaultResult<()> {
        if key.key_type != KeyType::Common {
            return Err(CryptoError::InvalidKeyUsage("expected a common key").into());
        }

        let json = serde_json::to_string(&KeyExchangeFormat::from_key(key)?)?;
        let store = self.crypto.store();
        if id == INITIAL_COMMON_KEY_ID {
            store.set(INITIAL_KEY_ENTRY, Some(json))?;
        } else {
            store.store(KEY_NAMESPACE, id, json)?;
            self.add_to_index(id)?;
        }

        self.cache.write().insert(id.to_string(), key.clone());

        if is_current {
            store.set(CURRENT_ID_ENTRY, Some(id.to_string()))?;
            *self.current_id.write() = Some(id.to_string());
        }

        Ok(())
    }

    fn load_stored(&self, id: &str) -> VaultResult<Option<Key>> {
        let store = self.crypto.store();
        let json = if id == INITIAL_COMMON_KEY_ID {
            store.get(INITIAL_KEY_ENTRY)?
        } else {
            store.get_by_id(KEY_NAMESPACE, id)?
        };

        json.map(|json| KeyExchangeFormat::decode_key(json.as_bytes()).map_err(VaultError::from))
            .transpose()
    }

    /// Ids of every rotated key persisted so far, across restarts
    fn stored_ids(&self) -> VaultResult<Vec<String>> {
        match self.crypto.store().get(INDEX_ENTRY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    fn add_to_index(&self, id: &str) -> VaultResult<()> {
        let mut ids = self.stored_ids()?;
        if !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
            self.crypto.store().set(INDEX_ENTRY, Some(serde_json::to_string(&ids)?))?;
        }
        Ok(())
    }

    pub fn current_id(&self) -> VaultResult<Option<String>> {
        if let Some(id) = self.current_id.read().clone() {
            return Ok(Some(id));
        }

        let stored = self.crypto.store().get(CURRENT_ID_ENTRY)?;
        if let Some(id) = &stored {
            *self.current_id.write() = Some(id.clone());
        }
        Ok(stored)
    }

    /// Current key and its id; writes wrap new key material under it
    pub fn current_key(&self) -> VaultResult<(String, Key)> {
        let id = self.current_id()?.ok_or(VaultError::MissingCommonKey)?;

        if let Some(key) = self.cache.read().get(&id) {
            return Ok((id.clone(), key.clone()));
        }

        let key = self.load_stored(&id)?.ok_or(VaultError::MissingCommonKey)?;
        self.cache.write().insert(id.clone(), key.clone());
        Ok((id, key))
    }

    /// Number of keys held in memory
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Forget every stored common key, including those persisted by an
    /// earlier process (logout)
    pub fn clear(&self) -> VaultResult<()> {
        let store = self.crypto.store();
        let mut ids = self.stored_ids()?;
        ids.extend(self.cache.write().drain().map(|(id, _)| id));
        ids.sort();
        ids.dedup();

        for id in ids.iter().filter(|id| id.as_str() != INITIAL_COMMON_KEY_ID) {
            store.remove(KEY_NAMESPACE, id)?;
        }

        store.delete(INITIAL_KEY_ENTRY)?;
        store.delete(INDEX_ENTRY)?;
        store.delete(CURRENT_ID_ENTRY)?;
        *self.current_id.write() = None;
        Ok(())
    }
}
