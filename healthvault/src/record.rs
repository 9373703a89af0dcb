//! HealthVault - Decrypted records

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use healthvault_crypto::Key;

use crate::resource::Resource;

/// Server-side bookkeeping of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Record date (`yyyy-MM-dd` on the wire)
    pub date: NaiveDate,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
}

/// A record after envelope decryption. Never persisted.
#[derive(Debug, Clone)]
pub struct DecryptedRecord<R: Resource> {
    pub id: String,
    pub metadata: Metadata,
    pub tags: BTreeMap<String, String>,
    pub annotations: Vec<String>,
    pub resource: R,
    pub data_key: Key,
    pub attachment_key: Option<Key>,
    pub model_version: u32,
}

impl<R: Resource> DecryptedRecord<R> {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}
