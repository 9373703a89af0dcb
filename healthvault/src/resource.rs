//! HealthVault - Resource Capability
//!
//! Document types (FHIR or app data) plug into the record pipeline through
//! [`Resource`]. The schema itself lives outside this crate.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::attachment::AttachmentSchema;
use crate::error::{VaultError, VaultResult};

pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Concrete type name, e.g. `Patient`
    const RESOURCE_TYPE: &'static str;

    /// Declared base type; search narrows by type only when it differs
    const BASE_TYPE: &'static str;

    /// Highest envelope model version this type can decode
    const MODEL_VERSION: u32;

    /// Schema version tag value (FHIR version); empty for untyped data
    const SCHEMA_VERSION: &'static str;

    /// Type of this instance; generic containers override it
    fn resource_type(&self) -> String {
        Self::RESOURCE_TYPE.to_string()
    }

    /// Fixed tags every record of this type carries, e.g. `flag=appdata`
    fn static_tags() -> Vec<(String, String)> {
        Vec::new()
    }

    fn id(&self) -> Option<String>;

    fn set_id(&mut self, id: Option<String>);

    fn additional_identifiers(&self) -> Vec<String> {
        Vec::new()
    }

    fn set_additional_identifiers(&mut self, _identifiers: Vec<String>) {}

    /// Attachments carried by this resource, if the type has any
    fn attachment_schema(&self) -> Option<AttachmentSchema> {
        None
    }

    /// Write back a schema previously returned by `attachment_schema`
    fn apply_attachment_schema(&mut self, _schema: AttachmentSchema) -> VaultResult<()> {
        Err(VaultError::AttachmentSchemaMismatch(format!(
            "{} has no attachments",
            Self::RESOURCE_TYPE
        )))
    }
}
