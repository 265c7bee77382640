//! Error types for the Clappform API client.
//!
//! # Design
//! Every failure surfaces synchronously as one `ApiError`. Local failures
//! (`Precondition`, `Validation`) are raised before any network call.
//! Pagination contract violations get their own variants so callers can tell
//! "the server sent no `total`" apart from "the result is empty".

use thiserror::Error;

/// Errors returned by the client, the dispatcher and the transfer engine.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection-level failure that survived the transport retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server returned a non-2xx status.
    #[error("HTTP {status} (code {code}, response {response_id}): {message}")]
    Http {
        status: u16,
        code: i64,
        message: String,
        response_id: String,
    },

    /// An identity field or argument required by the operation is missing or
    /// malformed.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Request options or tabular input do not satisfy their schema.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A paginated response lacks a key the pagination contract requires.
    #[error("paginated response is missing '{missing_key}'")]
    PaginationKey { missing_key: &'static str },

    /// A paginated response reports no records at all.
    #[error("paginated response has total {total}")]
    PaginationTotal { total: u64 },

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Client configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// True for the two pagination contract errors.
    pub fn is_pagination(&self) -> bool {
        matches!(
            self,
            ApiError::PaginationKey { .. } | ApiError::PaginationTotal { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_display_carries_server_fields() {
        let err = ApiError::Http {
            status: 404,
            code: 404,
            message: "App not found".to_string(),
            response_id: "r-1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP 404 (code 404, response r-1): App not found"
        );
    }

    #[test]
    fn pagination_errors_are_distinguishable() {
        assert!(ApiError::PaginationKey { missing_key: "total" }.is_pagination());
        assert!(ApiError::PaginationTotal { total: 0 }.is_pagination());
        assert!(!ApiError::Validation("limit".to_string()).is_pagination());
    }
}
