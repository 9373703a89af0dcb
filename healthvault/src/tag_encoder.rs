//! HealthVault - Tag Encoder
//!
//! Upload writes exactly one canonical form per tag. Search ORs every form a
//! previous client generation may have written, so records stay findable
//! whichever SDK stored them.
//!
//! ```text
//! upload:  [enc("resourcetype=patient"), enc("custom=my%20tag")]
//! search:  enc(resourcetype=patient),(enc(custom=my%20tag),enc(custom=my tag))
//! ```

use std::sync::Arc;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use healthvault_crypto::CryptoService;

use crate::error::{VaultError, VaultResult};
use crate::tagging::{TagGroup, TAG_ANNOTATION};

/// Characters left unescaped by the extended legacy encoding
const EXTENDED_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// One way a tag string has been written to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagEncoding {
    /// Everything but ASCII alphanumerics percent-encoded, then lowercased
    Canonical,
    /// Lowercased, no escaping
    Unescaped,
    /// Lowercased, then percent-encoded keeping `!()*-._~`; hex stays uppercase
    ExtendedSafe,
}

/// Encodings tried on search, canonical first
pub const SEARCH_ENCODINGS: &[TagEncoding] = &[
    TagEncoding::Canonical,
    TagEncoding::Unescaped,
    TagEncoding::ExtendedSafe,
];

impl TagEncoding {
    pub fn encode(&self, value: &str) -> String {
        let lowered = value.to_lowercase();
        match self {
            TagEncoding::Canonical => utf8_percent_encode(&lowered, NON_ALPHANUMERIC)
                .to_string()
                .to_lowercase(),
            TagEncoding::Unescaped => lowered,
            TagEncoding::ExtendedSafe => utf8_percent_encode(&lowered, EXTENDED_SAFE).to_string(),
        }
    }
}

fn validate_component(value: &str) -> VaultResult<()> {
    if value.is_empty() || value.chars().any(char::is_control) {
        return Err(VaultError::InvalidCharacterInTag(value.to_string()));
    }
    Ok(())
}

/// Logical `(key, value)` pairs of a group, annotations last
fn logical_tags(group: &TagGroup) -> VaultResult<Vec<(&str, &str)>> {
    let mut pairs = Vec::with_capacity(group.tags.len() + group.annotations.len());

    for (key, value) in &group.tags {
        validate_component(key)?;
        validate_component(value)?;
        pairs.push((key.as_str(), value.as_str()));
    }
    for annotation in &group.annotations {
        if annotation.is_empty() {
            return Err(VaultError::EmptyAnnotation);
        }
        validate_component(annotation)?;
        pairs.push((TAG_ANNOTATION, annotation.as_str()));
    }

    Ok(pairs)
}

fn format_tag(encoding: TagEncoding, key: &str, value: &str) -> String {
    format!("{}={}", encoding.encode(key), encoding.encode(value))
}

/// Canonical plaintext tags as uploaded (before encryption)
pub fn upload_tags(group: &TagGroup) -> VaultResult<Vec<String>> {
    Ok(logical_tags(group)?
        .into_iter()
        .map(|(key, value)| format_tag(TagEncoding::Canonical, key, value))
        .collect())
}

/// Plaintext OR-candidates per logical tag, duplicates collapsed
pub fn search_candidates(group: &TagGroup, encodings: &[TagEncoding]) -> VaultResult<Vec<Vec<String>>> {
    Ok(logical_tags(group)?
        .into_iter()
        .map(|(key, value)| {
            let mut candidates: Vec<String> = Vec::with_capacity(encodings.len());
            for encoding in encodings {
                let candidate = format_tag(*encoding, key, value);
                if !candidates.contains(&candidate) {
                    candidates.push(candidate);
                }
            }
            candidates
        })
        .collect())
}

/// Join candidate groups with the search grammar
pub fn format_query(groups: &[Vec<String>]) -> String {
    groups
        .iter()
        .map(|candidates| {
            if candidates.len() == 1 {
                candidates[0].clone()
            } else {
                format!("({})", candidates.join(","))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse one decrypted `key=value` string
pub fn parse_tag(tag: &str) -> VaultResult<(String, String)> {
    let (key, value) = tag
        .split_once('=')
        .ok_or_else(|| VaultError::InvalidTagFormat(tag.to_string()))?;

    let decode = |part: &str| -> VaultResult<String> {
        percent_decode_str(part)
            .decode_utf8()
            .map(|decoded| decoded.to_lowercase())
            .map_err(|_| VaultError::InvalidTagFormat(tag.to_string()))
    };

    Ok((decode(key)?, decode(value)?))
}

/// Encrypts tag groups with the session tag key
pub struct TagEncoder {
    crypto: Arc<CryptoService>,
    encodings: Vec<TagEncoding>,
}

impl TagEncoder {
    pub fn new(crypto: Arc<CryptoService>) -> Self {
        Self::with_encodings(crypto, SEARCH_ENCODINGS.to_vec())
    }

    pub fn with_encodings(crypto: Arc<CryptoService>, encodings: Vec<TagEncoding>) -> Self {
        Self { crypto, encodings }
    }

    /// Encrypted canonical tags for a create/update request
    pub fn encode_for_upload(&self, group: &TagGroup) -> VaultResult<Vec<String>> {
        upload_tags(group)?
            .iter()
            .map(|tag| Ok(self.crypto.encrypt_tag(tag)?))
            .collect()
    }

    /// Encrypted search query matching any known encoding of each tag
    pub fn search_query(&self, group: &TagGroup) -> VaultResult<String> {
        let encrypted = search_candidates(group, &self.encodings)?
            .into_iter()
            .map(|candidates| {
                candidates
                    .iter()
                    .map(|candidate| Ok(self.crypto.encrypt_tag(candidate)?))
                    .collect::<VaultResult<Vec<_>>>()
            })
            .collect::<VaultResult<Vec<_>>>()?;

        Ok(format_query(&encrypted))
    }

    /// Decrypt stored tags back into a group
    pub fn decode(&self, encrypted: &[String]) -> VaultResult<TagGroup> {
        let mut group = TagGroup::new();

        for tag in encrypted {
            let plain = self.crypto.decrypt_tag(tag)?;
            let (key, value) = parse_tag(&plain)?;
            if key == TAG_ANNOTATION {
                group.annotations.push(value);
            } else {
                group.tags.insert(key, value);
            }
        }

        Ok(group)
    }
}
