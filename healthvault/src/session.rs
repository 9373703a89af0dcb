//! HealthVault - Session
//!
//! Owns the login-scoped key state: user id, current common key and the tag
//! encryption key. Refreshes run one at a time so a slow refresh cannot
//! overwrite a newer key.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;

use healthvault_crypto::{CryptoError, CryptoService, KeyExchangeFormat, KeyType};

use crate::common_key::CommonKeyService;
use crate::error::{VaultError, VaultResult};
use crate::transport::{decode_response, Route, Transport, UserInfoResponse};

pub struct Session {
    transport: Arc<dyn Transport>,
    crypto: Arc<CryptoService>,
    common_keys: Arc<CommonKeyService>,
    user_id: RwLock<Option<String>>,
    refresh_lock: Mutex<()>,
}

impl Session {
    pub fn new(
        transport: Arc<dyn Transport>,
        crypto: Arc<CryptoService>,
        common_keys: Arc<CommonKeyService>,
    ) -> Self {
        Self {
            transport,
            crypto,
            common_keys,
            user_id: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Fetch user info and install the current common key and tag key
    pub async fn refresh(&self) -> VaultResult<String> {
        let _guard = self.refresh_lock.lock().await;

        let info: UserInfoResponse =
            decode_response(self.transport.send(Route::UserInfo, Value::Null).await?)?;

        let key_pair = self.crypto.fetch_or_generate_key_pair()?;
        let wrapped = STANDARD.decode(&info.common_key)?;
        let common_key =
            KeyExchangeFormat::decode_key(&self.crypto.decrypt_with_keypair(&wrapped, &key_pair)?)?;

        let wrapped_tek = STANDARD.decode(&info.tag_encryption_key)?;
        let tek = KeyExchangeFormat::decode_key(&self.crypto.decrypt(&wrapped_tek, &common_key)?)?;
        if tek.key_type != KeyType::Tag {
            return Err(CryptoError::InvalidKeyUsage("expected a tag encryption key").into());
        }

        // Nothing is installed until both keys check out
        self.common_keys.store_key(&common_key, &info.common_key_id, true)?;
        self.crypto.set_tag_key(Some(tek));

        *self.user_id.write() = Some(info.sub.clone());
        log::info!("Session refreshed, common key {}", info.common_key_id);

        Ok(info.sub)
    }

    /// Refresh only when some key state is missing
    pub async fn ensure_ready(&self) -> VaultResult<String> {
        let user_id = self.user_id.read().clone();
        if let Some(user_id) = user_id {
            if self.crypto.has_tag_key() && self.common_keys.current_id()?.is_some() {
                return Ok(user_id);
            }
        }
        self.refresh().await
    }

    pub fn user_id(&self) -> VaultResult<String> {
        self.user_id.read().clone().ok_or(VaultError::SessionNotInitialized)
    }

    pub fn is_active(&self) -> bool {
        self.user_id.read().is_some()
    }

    /// Drop all key state (logout)
    pub fn clear(&self) -> VaultResult<()> {
        *self.user_id.write() = None;
        self.crypto.clear_session();
        self.common_keys.clear()?;
        log::info!("Session cleared");
        Ok(())
    }
}
