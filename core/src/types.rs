//! Wire-level DTOs shared by every endpoint.
//!
//! # Design
//! Every Clappform response is an envelope with `code`, `message` and
//! `response_id`. Successful calls usually carry `data`; paginated calls add
//! `total` and `next_page` next to it. Keys the client does not model are
//! kept in `extra` rather than dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of tabular data inside a collection.
pub type Record = Map<String, Value>;

/// Name of the database-generated identity field of a record.
pub const IDENTITY_FIELD: &str = "_id";

/// Generic API response returned by operations without a typed payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code as reported by the server.
    pub code: i64,
    pub message: String,
    /// Correlation id, quoted when opening a support ticket.
    pub response_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Decoded response envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub code: i64,
    pub message: String,
    pub response_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Take the payload, failing when the server sent none.
    pub fn into_data(self) -> Result<Value, crate::ApiError> {
        self.data.ok_or_else(|| {
            crate::ApiError::Deserialization(format!(
                "response {} has no 'data'",
                self.response_id
            ))
        })
    }

    /// Drop the payload and keep the status fields.
    pub fn into_api_response(self) -> ApiResponse {
        let mut extra = self.extra;
        if let Some(data) = self.data {
            extra.insert("data".to_string(), data);
        }
        ApiResponse {
            code: self.code,
            message: self.message,
            response_id: self.response_id,
            extra,
        }
    }
}

/// Login payload returned by `POST /auth`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthPayload {
    pub access_token: String,
    pub refresh_token: String,
    pub refresh_expiration: i64,
}
