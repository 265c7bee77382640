//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::http::{HttpRequest, HttpResponse, Transport};

/// Replays queued responses in order and records what was sent.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
    pauses: Mutex<Vec<Duration>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, status: u16, body: Value) {
        self.respond_raw(status, &body.to_string());
    }

    pub fn respond_raw(&self, status: u16, body: &str) {
        self.responses.lock().unwrap().push_back(HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        });
    }

    /// Queue a successful envelope around `data`.
    pub fn respond_data(&self, data: Value) {
        self.respond(
            200,
            json!({"code": 200, "message": "ok", "response_id": "test", "data": data}),
        );
    }

    /// Queue a `POST /auth` answer whose token expires at `exp`.
    pub fn respond_login(&self, exp: i64) {
        self.respond_data(json!({
            "access_token": jwt(exp),
            "refresh_token": "refresh",
            "refresh_expiration": exp + 3600,
        }));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().unwrap().clone()
    }

    /// Request paths relative to the API root, with the query string.
    pub fn paths(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| {
                r.url
                    .split_once("/api")
                    .map(|(_, p)| p.to_string())
                    .unwrap_or_else(|| r.url.clone())
            })
            .collect()
    }

    pub fn body(&self, index: usize) -> Value {
        let requests = self.requests();
        serde_json::from_str(requests[index].body.as_deref().unwrap()).unwrap()
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ApiError::Transport(format!("no scripted response for {}", request.url)))
    }

    fn pause(&self, interval: Duration) {
        self.pauses.lock().unwrap().push(interval);
    }
}

/// Unsigned JWT whose payload carries `exp`.
pub fn jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({"sub": "tester", "exp": exp}).to_string());
    format!("{header}.{payload}.signature")
}
