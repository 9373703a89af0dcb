//! HealthVault - Attachments
//!
//! Content-addressed attachment identity, schema flattening, update
//! reconciliation and the packed thumbnail identifier.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::{VaultError, VaultResult};

/// base64(sha1(data)), the content hash carried by attachments
pub fn content_hash(data: &[u8]) -> String {
    STANDARD.encode(Sha1::digest(data))
}

mod base64_data {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|value| STANDARD.decode(value).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Binary payload referenced by a resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Remote blob id; `None` until uploaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_data")]
    pub data: Option<Vec<u8>>,
    /// base64 sha1 of `data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<String>,
}

impl Attachment {
    /// New local attachment with hash and size filled in
    pub fn new(title: &str, content_type: &str, data: Vec<u8>) -> Self {
        Self {
            id: None,
            content_type: Some(content_type.to_string()),
            hash: Some(content_hash(&data)),
            size: Some(data.len()),
            data: Some(data),
            title: Some(title.to_string()),
            creation: None,
        }
    }

    /// Hash of the carried data, if any
    pub fn data_hash(&self) -> Option<String> {
        self.data.as_deref().map(content_hash)
    }

    /// Same payload: equal ids, else equal hashes, else `other`'s hash
    /// equals the hash of this attachment's bytes
    pub fn is_same_as(&self, other: &Attachment) -> bool {
        match_rank(self, other).is_some()
    }
}

/// 0 = id match, 1 = hash match, 2 = hash of bytes match
fn match_rank(unfilled: &Attachment, filled: &Attachment) -> Option<u8> {
    if unfilled.id.is_some() && unfilled.id == filled.id {
        return Some(0);
    }
    if unfilled.hash.is_some() && unfilled.hash == filled.hash {
        return Some(1);
    }
    match (unfilled.data_hash(), filled.hash.as_ref()) {
        (Some(computed), Some(hash)) if &computed == hash => Some(2),
        _ => None,
    }
}

/// Best counterpart of `unfilled` in `filled`, preferring id over hash
pub fn find_match<'a>(unfilled: &Attachment, filled: &'a [Attachment]) -> Option<&'a Attachment> {
    filled
        .iter()
        .filter_map(|candidate| match_rank(unfilled, candidate).map(|rank| (rank, candidate)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, candidate)| candidate)
}

/// Copy remote identity from uploaded attachments onto the resource's own
/// entries. Every entry must find a counterpart.
pub fn fill_attachments(unfilled: Vec<&mut Attachment>, filled: &[Attachment]) -> VaultResult<()> {
    for attachment in unfilled {
        let counterpart =
            find_match(attachment, filled).ok_or(VaultError::CouldNotSynchronizeAttachments)?;
        attachment.id = counterpart.id.clone();
        attachment.hash = counterpart.hash.clone();
        attachment.size = counterpart.size;
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCHEMA
// ═══════════════════════════════════════════════════════════════════════════════

/// Where a resource keeps its attachments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSchema {
    Single(Option<Attachment>),
    List(Vec<Attachment>),
    Nested(Vec<AttachmentSchema>),
}

impl AttachmentSchema {
    /// All attachments in declaration order
    pub fn attachments(&self) -> Vec<&Attachment> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Attachment>) {
        match self {
            AttachmentSchema::Single(Some(attachment)) => out.push(attachment),
            AttachmentSchema::Single(None) => {}
            AttachmentSchema::List(list) => out.extend(list.iter()),
            AttachmentSchema::Nested(children) => {
                for child in children {
                    child.collect(out);
                }
            }
        }
    }

    pub fn attachments_mut(&mut self) -> Vec<&mut Attachment> {
        let mut out = Vec::new();
        self.collect_mut(&mut out);
        out
    }

    fn collect_mut<'a>(&'a mut self, out: &mut Vec<&'a mut Attachment>) {
        match self {
            AttachmentSchema::Single(Some(attachment)) => out.push(attachment),
            AttachmentSchema::Single(None) => {}
            AttachmentSchema::List(list) => out.extend(list.iter_mut()),
            AttachmentSchema::Nested(children) => {
                for child in children {
                    child.collect_mut(out);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attachments().is_empty()
    }

    /// Drop payload bytes; the record body never carries blobs
    pub fn strip_data(&mut self) {
        for attachment in self.attachments_mut() {
            attachment.data = None;
        }
    }

    /// Put back payload bytes from `source` onto entries with the same id
    pub fn restore_data(&mut self, source: &AttachmentSchema) {
        let source = source.attachments();
        for attachment in self.attachments_mut() {
            if attachment.data.is_some() {
                continue;
            }
            if let Some(original) = source
                .iter()
                .find(|candidate| candidate.id.is_some() && candidate.id == attachment.id)
            {
                attachment.data = original.data.clone();
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// UPDATE RECONCILIATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Attachments of an updated resource relative to the stored version
#[derive(Debug, Clone, Default)]
pub struct AttachmentPartition {
    /// No id yet
    pub new: Vec<Attachment>,
    /// Known id, carried bytes differ from the stored payload
    pub modified: Vec<Attachment>,
    /// Known id, same hash (or no new payload)
    pub unmodified: Vec<Attachment>,
}

impl AttachmentPartition {
    pub fn to_upload(&self) -> Vec<Attachment> {
        self.new.iter().chain(self.modified.iter()).cloned().collect()
    }
}

pub fn partition(current: &[&Attachment], previous: &[&Attachment]) -> VaultResult<AttachmentPartition> {
    let mut result = AttachmentPartition::default();

    for attachment in current {
        let id = match &attachment.id {
            None => {
                result.new.push((*attachment).clone());
                continue;
            }
            Some(id) => id,
        };

        let stored = previous
            .iter()
            .find(|candidate| candidate.id.as_ref() == Some(id))
            .ok_or(VaultError::CouldNotSynchronizeAttachments)?;

        // Carried bytes decide, not the declared hash
        let changed = match attachment.data_hash() {
            Some(computed) => Some(computed) != stored.hash,
            None => false,
        };

        if changed {
            result.modified.push((*attachment).clone());
        } else {
            let mut kept = (*attachment).clone();
            if kept.hash.is_none() {
                kept.hash = stored.hash.clone();
                kept.size = stored.size;
            }
            result.unmodified.push(kept);
        }
    }

    Ok(result)
}

// ═══════════════════════════════════════════════════════════════════════════════
// THUMBNAIL IDENTITY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Full,
    Medium,
    Small,
}

/// Packed `marker#full#medium#small` identifier stored on the resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailIdentity {
    pub marker: String,
    pub full: String,
    pub medium: String,
    pub small: String,
}

const SEPARATOR: char = '#';

impl ThumbnailIdentity {
    pub fn new(marker: &str, full: &str, medium: &str, small: &str) -> Self {
        Self {
            marker: marker.to_string(),
            full: full.to_string(),
            medium: medium.to_string(),
            small: small.to_string(),
        }
    }

    pub fn pack(&self) -> String {
        self.to_string()
    }

    pub fn parse(value: &str) -> VaultResult<Self> {
        let parts: Vec<&str> = value.split(SEPARATOR).collect();
        match parts.as_slice() {
            [marker, full, medium, small] if parts.iter().all(|part| !part.is_empty()) => {
                Ok(Self::new(marker, full, medium, small))
            }
            _ => Err(VaultError::MalformedAttachmentAdditionalId(value.to_string())),
        }
    }

    /// Identifiers produced by this client's marker
    pub fn is_thumbnail_identifier(value: &str, marker: &str) -> bool {
        value
            .strip_prefix(marker)
            .map_or(false, |rest| rest.starts_with(SEPARATOR))
    }

    pub fn select(&self, resolution: Resolution) -> &str {
        match resolution {
            Resolution::Full => &self.full,
            Resolution::Medium => &self.medium,
            Resolution::Small => &self.small,
        }
    }

    /// Find the identity of `attachment_id` among a resource's identifiers
    pub fn find(identifiers: &[String], marker: &str, attachment_id: &str) -> VaultResult<Option<Self>> {
        for identifier in identifiers {
            if !Self::is_thumbnail_identifier(identifier, marker) {
                continue;
            }
            let identity = Self::parse(identifier)?;
            if identity.full == attachment_id {
                return Ok(Some(identity));
            }
        }
        Ok(None)
    }
}

impl fmt::Display for ThumbnailIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}",
            self.marker,
            self.full,
            self.medium,
            self.small,
            sep = SEPARATOR
        )
    }
}
