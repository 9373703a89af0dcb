//! HealthVault - Transport Seam
//!
//! The HTTP layer (auth, retries, connectivity) lives outside this crate.
//! Services talk to the backend only through [`Transport`] and the wire types
//! below.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{VaultError, VaultResult};

// ═══════════════════════════════════════════════════════════════════════════════
// ROUTES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    UserInfo,
    CommonKey { user_id: String, key_id: String },
    CreateRecord { user_id: String },
    UpdateRecord { user_id: String, record_id: String },
    FetchRecord { user_id: String, record_id: String },
    SearchRecords { user_id: String },
    CountRecords { user_id: String },
    DeleteRecord { user_id: String, record_id: String },
    UploadDocument { user_id: String },
    DownloadDocument { user_id: String, document_id: String },
}

impl Route {
    /// Backend path for this route
    pub fn path(&self) -> String {
        match self {
            Route::UserInfo => "/userinfo".into(),
            Route::CommonKey { user_id, key_id } => {
                format!("/users/{}/commonkeys/{}", user_id, key_id)
            }
            Route::CreateRecord { user_id }
            | Route::SearchRecords { user_id }
            | Route::CountRecords { user_id } => format!("/users/{}/records", user_id),
            Route::UpdateRecord { user_id, record_id }
            | Route::FetchRecord { user_id, record_id }
            | Route::DeleteRecord { user_id, record_id } => {
                format!("/users/{}/records/{}", user_id, record_id)
            }
            Route::UploadDocument { user_id } => format!("/users/{}/documents", user_id),
            Route::DownloadDocument { user_id, document_id } => {
                format!("/users/{}/documents/{}", user_id, document_id)
            }
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Route::CreateRecord { .. } | Route::UploadDocument { .. } => "POST",
            Route::UpdateRecord { .. } => "PUT",
            Route::DeleteRecord { .. } => "DELETE",
            Route::CountRecords { .. } => "HEAD",
            _ => "GET",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),
}

/// User-implemented network layer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send JSON parameters and decode the JSON response
    async fn send(&self, route: Route, params: Value) -> Result<Value, TransportError>;

    /// Upload an opaque blob; the response carries the new document id
    async fn upload(&self, route: Route, data: Vec<u8>) -> Result<Value, TransportError>;

    /// Download an opaque blob
    async fn download(&self, route: Route) -> Result<Vec<u8>, TransportError>;
}

/// Decode a JSON response body into a wire type
pub fn decode_response<T: DeserializeOwned>(value: Value) -> VaultResult<T> {
    serde_json::from_value(value).map_err(|e| VaultError::InvalidResponse(e.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// WIRE TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Stored record envelope as the server returns it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub record_id: String,
    pub encrypted_tags: Vec<String>,
    /// base64(iv || ciphertext) of the resource JSON
    pub encrypted_body: String,
    /// base64 of the data key, wrapped with the common key
    pub encrypted_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_key_id: Option<String>,
    pub model_version: u32,
    pub date: NaiveDate,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Body of create/update requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordParameters {
    pub encrypted_tags: Vec<String>,
    pub encrypted_body: String,
    pub encrypted_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_key: Option<String>,
    pub common_key_id: String,
    pub model_version: u32,
    pub date: NaiveDate,
}

/// Query of search/count requests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParameters {
    /// Encrypted tag query, see `tag_encoder::search_query`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfoResponse {
    pub sub: String,
    pub common_key_id: String,
    /// base64 RSA-OAEP ciphertext of the common key's exchange JSON
    pub common_key: String,
    /// base64(iv || ciphertext) of the tag key's exchange JSON under the common key
    pub tag_encryption_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonKeyResponse {
    pub common_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub document_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountResponse {
    pub total_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_route_paths() {
        let route = Route::FetchRecord {
            user_id: "u1".into(),
            record_id: "r1".into(),
        };
        assert_eq!(route.path(), "/users/u1/records/r1");
        assert_eq!(route.method(), "GET");
        assert_eq!(Route::CreateRecord { user_id: "u1".into() }.method(), "POST");
    }

    #[test]
    fn test_record_wire_format() {
        let value = json!({
            "record_id": "r1",
            "encrypted_tags": ["abc"],
            "encrypted_body": "Ym9keQ==",
            "encrypted_key": "a2V5",
            "common_key_id": "00000000-0000-0000-0000-000000000000",
            "model_version": 1,
            "date": "2024-03-01",
            "createdAt": "2024-03-01T10:00:00Z"
        });

        let record: EncryptedRecord = decode_response(value).unwrap();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert!(record.attachment_key.is_none());
        assert!(record.created_at.is_some());

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["date"], "2024-03-01");
        assert!(back.get("attachment_key").is_none());
    }

    #[test]
    fn test_invalid_response() {
        let result: VaultResult<CountResponse> = decode_response(json!({"count": 3}));
        assert!(matches!(result, Err(VaultError::InvalidResponse(_))));
    }
}
