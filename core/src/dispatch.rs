//! Request dispatcher: JSON in, envelope out.
//!
//! # Design
//! `Dispatcher` owns the transport and the API root. It attaches the common
//! headers, decodes the envelope and maps every non-2xx status to
//! `ApiError::Http` with the server's `code`, `message` and `response_id`.
//! Authentication is not its concern: the caller passes the bearer value in.

use serde::Serialize;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::types::Envelope;

/// `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("clappform/", env!("CARGO_PKG_VERSION"), " ureq/3");

#[derive(Debug, Clone)]
pub struct Dispatcher<T> {
    api_root: String,
    transport: T,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(api_root: &str, transport: T) -> Self {
        Self {
            api_root: api_root.trim_end_matches('/').to_string(),
            transport,
        }
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Build the request for `path` (relative to the API root).
    pub fn build(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
        bearer: Option<&str>,
    ) -> HttpRequest {
        let mut headers = vec![("user-agent".to_string(), USER_AGENT.to_string())];
        if body.is_some() {
            headers.push((
                "content-type".to_string(),
                "application/json; charset=utf-8".to_string(),
            ));
        }
        if let Some(token) = bearer {
            headers.push(("authorization".to_string(), format!("Bearer {token}")));
        }
        HttpRequest {
            method,
            url: format!("{}{path}", self.api_root),
            headers,
            body,
        }
    }

    /// Send a pre-serialized body and decode the envelope.
    pub fn execute_raw(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
        bearer: Option<&str>,
    ) -> Result<Envelope, ApiError> {
        let request = self.build(method, path, body, bearer);
        let response = self.transport.execute(&request)?;
        tracing::debug!(
            method = method.as_str(),
            path,
            status = response.status,
            "dispatched request"
        );
        parse_envelope(response)
    }

    /// Serialize `body` as JSON, send it and decode the envelope.
    pub fn execute<B: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&B>,
        bearer: Option<&str>,
    ) -> Result<Envelope, ApiError> {
        let body = body.map(to_json).transpose()?;
        self.execute_raw(method, path, body, bearer)
    }
}

pub(crate) fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<String, ApiError> {
    serde_json::to_string(body).map_err(|e| ApiError::Serialization(e.to_string()))
}

/// Map non-success statuses to `ApiError::Http` and decode the envelope.
fn parse_envelope(response: HttpResponse) -> Result<Envelope, ApiError> {
    if !response.is_success() {
        return Err(match serde_json::from_str::<Envelope>(&response.body) {
            Ok(envelope) => ApiError::Http {
                status: response.status,
                code: envelope.code,
                message: envelope.message,
                response_id: envelope.response_id,
            },
            Err(_) => ApiError::Http {
                status: response.status,
                code: i64::from(response.status),
                message: response.body,
                response_id: String::new(),
            },
        });
    }
    serde_json::from_str(&response.body).map_err(|e| ApiError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use serde_json::json;

    fn dispatcher(transport: &ScriptedTransport) -> Dispatcher<&ScriptedTransport> {
        Dispatcher::new("http://localhost:3000/api/", transport)
    }

    #[test]
    fn build_attaches_common_headers() {
        let transport = ScriptedTransport::new();
        let req = dispatcher(&transport).build(
            HttpMethod::Post,
            "/app",
            Some("{}".to_string()),
            Some("tok"),
        );
        assert_eq!(req.url, "http://localhost:3000/api/app");
        assert_eq!(req.header("user-agent"), Some(USER_AGENT));
        assert_eq!(req.header("authorization"), Some("Bearer tok"));
        assert_eq!(
            req.header("content-type"),
            Some("application/json; charset=utf-8")
        );
    }

    #[test]
    fn build_without_body_has_no_content_type() {
        let transport = ScriptedTransport::new();
        let req = dispatcher(&transport).build(HttpMethod::Get, "/apps", None, None);
        assert!(req.header("content-type").is_none());
        assert!(req.header("authorization").is_none());
    }

    #[test]
    fn user_agent_names_library_and_transport() {
        assert!(USER_AGENT.starts_with("clappform/"));
        assert!(USER_AGENT.ends_with(" ureq/3"));
    }

    #[test]
    fn execute_decodes_envelope() {
        let transport = ScriptedTransport::new();
        transport.respond(200, json!({"code": 200, "message": "ok", "response_id": "r1", "data": {"api": "1"}}));
        let env = dispatcher(&transport)
            .execute(HttpMethod::Post, "/x", Some(&json!({"a": 1})), None)
            .unwrap();
        assert_eq!(env.response_id, "r1");
        assert_eq!(env.data, Some(json!({"api": "1"})));
        assert_eq!(transport.requests()[0].body.as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn non_2xx_carries_server_fields() {
        let transport = ScriptedTransport::new();
        transport.respond(
            404,
            json!({"code": 404, "message": "App not found", "response_id": "r404"}),
        );
        let err = dispatcher(&transport)
            .execute::<()>(HttpMethod::Get, "/app/x", None, None)
            .unwrap_err();
        match err {
            ApiError::Http {
                status,
                code,
                message,
                response_id,
            } => {
                assert_eq!(status, 404);
                assert_eq!(code, 404);
                assert_eq!(message, "App not found");
                assert_eq!(response_id, "r404");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_2xx_without_envelope_keeps_raw_body() {
        let transport = ScriptedTransport::new();
        transport.respond_raw(502, "bad gateway");
        let err = dispatcher(&transport)
            .execute::<()>(HttpMethod::Get, "/apps", None, None)
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Http { status: 502, code: 502, ref message, .. } if message == "bad gateway"
        ));
    }

    #[test]
    fn malformed_success_body_is_decode_error() {
        let transport = ScriptedTransport::new();
        transport.respond_raw(200, "not json");
        let err = dispatcher(&transport)
            .execute::<()>(HttpMethod::Get, "/apps", None, None)
            .unwrap_err();
        assert!(matches!(err, ApiError::Deserialization(_)));
    }
}
