//! HealthVault - Client Configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use healthvault_crypto::DEFAULT_KEY_PAIR_TAG;

use crate::error::{VaultError, VaultResult};

/// 20 MiB
pub const DEFAULT_MAX_ATTACHMENT_SIZE: usize = 20 * 1024 * 1024;

/// Marker prefixing packed thumbnail identifiers
pub const DEFAULT_THUMBNAIL_MARKER: &str = "d4l_f_p_t";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `partner#platform`
    pub client_id: String,
    /// Secure-store entry holding the account key pair
    pub key_pair_tag: String,
    /// Largest accepted attachment payload
    pub max_attachment_size: usize,
    /// Longest edge of the medium rendition
    pub thumbnail_medium_dimension: u32,
    /// Longest edge of the small rendition
    pub thumbnail_small_dimension: u32,
    pub thumbnail_marker: String,
    /// Search page size when the caller gives none
    pub default_page_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: "healthvault#rust".into(),
            key_pair_tag: DEFAULT_KEY_PAIR_TAG.into(),
            max_attachment_size: DEFAULT_MAX_ATTACHMENT_SIZE,
            thumbnail_medium_dimension: 1000,
            thumbnail_small_dimension: 200,
            thumbnail_marker: DEFAULT_THUMBNAIL_MARKER.into(),
            default_page_size: 100,
        }
    }
}

impl ClientConfig {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            ..Default::default()
        }
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> VaultResult<Self> {
        let data = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&data)
            .map_err(|e| VaultError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(VaultError::Config("client_id must not be empty".into()));
        }
        if self.thumbnail_small_dimension == 0
            || self.thumbnail_small_dimension > self.thumbnail_medium_dimension
        {
            return Err(VaultError::Config(
                "thumbnail dimensions must satisfy 0 < small <= medium".into(),
            ));
        }
        if self.thumbnail_marker.contains('#') {
            return Err(VaultError::Config("thumbnail_marker must not contain '#'".into()));
        }
        Ok(())
    }

    /// Partner part of `partner#platform`
    pub fn partner_id(&self) -> &str {
        self.client_id
            .split('#')
            .next()
            .unwrap_or(self.client_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partner_id() {
        assert_eq!(ClientConfig::new("acme#ios").partner_id(), "acme");
        assert_eq!(ClientConfig::new("acme").partner_id(), "acme");
    }

    #[test]
    fn test_load_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"client_id": "clinic#web", "max_attachment_size": 1024}}"#).unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.client_id, "clinic#web");
        assert_eq!(config.max_attachment_size, 1024);
        assert_eq!(config.thumbnail_medium_dimension, 1000);
        assert_eq!(config.thumbnail_marker, "d4l_f_p_t");
    }

    #[test]
    fn test_load_rejects_bad_dimensions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"thumbnail_medium_dimension": 100, "thumbnail_small_dimension": 500}}"#
        )
        .unwrap();

        assert!(matches!(ClientConfig::load(file.path()), Err(VaultError::Config(_))));
    }
}
