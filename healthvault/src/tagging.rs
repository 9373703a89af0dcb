//! HealthVault - Tagging
//!
//! Builds the plaintext tag group describing a record: type tags, provenance
//! and user annotations.

use std::collections::BTreeMap;

use crate::config::ClientConfig;
use crate::error::{VaultError, VaultResult};
use crate::resource::Resource;

pub const TAG_RESOURCE_TYPE: &str = "resourcetype";
pub const TAG_SCHEMA_VERSION: &str = "fhirversion";
pub const TAG_CLIENT: &str = "client";
pub const TAG_PARTNER: &str = "partner";
pub const TAG_UPDATED_BY_CLIENT: &str = "updatedbyclient";
pub const TAG_UPDATED_BY_PARTNER: &str = "updatedbypartner";
pub const TAG_ANNOTATION: &str = "custom";
pub const TAG_FLAG: &str = "flag";
pub const FLAG_APP_DATA: &str = "appdata";

/// Plaintext tags and annotations of one record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagGroup {
    /// Lowercased key -> lowercased value
    pub tags: BTreeMap<String, String>,
    /// Lowercased, non-empty, in insertion order
    pub annotations: Vec<String>,
}

impl TagGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.tags.insert(key.to_lowercase(), value.to_lowercase());
    }

    /// Insert unless `key` is already present
    pub fn insert_if_absent(&mut self, key: &str, value: &str) {
        self.tags
            .entry(key.to_lowercase())
            .or_insert_with(|| value.to_lowercase());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn set_annotations(&mut self, annotations: &[String]) -> VaultResult<()> {
        self.annotations = normalize_annotations(annotations)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.annotations.is_empty()
    }
}

fn normalize_annotations(annotations: &[String]) -> VaultResult<Vec<String>> {
    annotations
        .iter()
        .map(|annotation| {
            let trimmed = annotation.trim();
            if trimmed.is_empty() {
                Err(VaultError::EmptyAnnotation)
            } else {
                Ok(trimmed.to_lowercase())
            }
        })
        .collect()
}

/// Tag group builder bound to this client's provenance
#[derive(Debug, Clone)]
pub struct TaggingService {
    client_id: String,
    partner_id: String,
}

impl TaggingService {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            partner_id: config.partner_id().to_string(),
        }
    }

    /// Tags selecting records of type `R`, used for search and count
    pub fn make_search_group<R: Resource>(&self, annotations: &[String]) -> VaultResult<TagGroup> {
        let mut group = TagGroup::new();

        if R::RESOURCE_TYPE != R::BASE_TYPE {
            group.insert(TAG_RESOURCE_TYPE, R::RESOURCE_TYPE);
        }
        if !R::SCHEMA_VERSION.is_empty() {
            group.insert(TAG_SCHEMA_VERSION, R::SCHEMA_VERSION);
        }
        for (key, value) in R::static_tags() {
            group.insert(&key, &value);
        }

        group.set_annotations(annotations)?;
        Ok(group)
    }

    /// Tags for uploading `resource`.
    ///
    /// `old` is the decrypted group of the record being updated (`None` on
    /// create). `annotations: None` keeps the existing annotations,
    /// `Some(vec![])` removes them.
    pub fn make_tag_group<R: Resource>(
        &self,
        resource: &R,
        old: Option<&TagGroup>,
        annotations: Option<&[String]>,
    ) -> VaultResult<TagGroup> {
        let mut group = old.cloned().unwrap_or_default();

        // Provenance is append-only: the creator stays, updaters are marked
        if group.get(TAG_CLIENT).is_none() {
            group.insert(TAG_CLIENT, &self.client_id);
            group.insert(TAG_PARTNER, &self.partner_id);
        } else {
            group.insert(TAG_UPDATED_BY_CLIENT, &self.client_id);
            group.insert(TAG_UPDATED_BY_PARTNER, &self.partner_id);
        }

        group.insert_if_absent(TAG_RESOURCE_TYPE, &resource.resource_type());
        if !R::SCHEMA_VERSION.is_empty() {
            group.insert_if_absent(TAG_SCHEMA_VERSION, R::SCHEMA_VERSION);
        }
        for (key, value) in R::static_tags() {
            group.insert_if_absent(&key, &value);
        }

        if let Some(annotations) = annotations {
            group.set_annotations(annotations)?;
        }

        Ok(group)
    }
}
