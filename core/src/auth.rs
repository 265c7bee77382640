//! Session and bearer-token lifecycle.
//!
//! # Design
//! `Session` owns the credentials and the cached `TokenState`. Before every
//! privileged call `ensure_authenticated` checks the token's `exp` claim and
//! logs in again when fewer than 60 seconds remain. The cached state sits
//! behind a `Mutex` held across the login, so concurrent callers sharing one
//! client never log in twice for the same expiry.

use std::sync::{Mutex, MutexGuard, PoisonError};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::Serialize;

use crate::config::Credentials;
use crate::dispatch::Dispatcher;
use crate::error::ApiError;
use crate::http::{HttpMethod, Transport};
use crate::types::AuthPayload;

/// Seconds before `exp` at which a token is no longer used.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Tokens returned by one successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: String,
    pub refresh_expiration: i64,
    /// `exp` claim of the access token, seconds since the epoch.
    pub expires_at: i64,
}

impl TokenState {
    pub fn from_payload(payload: AuthPayload) -> Result<Self, ApiError> {
        let expires_at = decode_expiry(&payload.access_token)?;
        Ok(Self {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            refresh_expiration: payload.refresh_expiration,
            expires_at,
        })
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        self.expires_at > now + EXPIRY_MARGIN_SECS
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now().timestamp())
    }
}

/// Read the `exp` claim from the payload segment of a JWT.
fn decode_expiry(token: &str) -> Result<i64, ApiError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| ApiError::Deserialization("access token is not a JWT".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ApiError::Deserialization(format!("access token payload: {e}")))?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::Deserialization(format!("access token claims: {e}")))?;
    claims
        .get("exp")
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| ApiError::Deserialization("access token has no 'exp' claim".to_string()))
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug)]
pub struct Session {
    credentials: Credentials,
    token: Mutex<Option<TokenState>>,
}

impl Session {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            token: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Snapshot of the cached token state.
    pub fn token(&self) -> Option<TokenState> {
        self.lock().clone()
    }

    /// Return a usable access token, logging in when none is cached or the
    /// cached one is about to expire.
    pub fn ensure_authenticated<T: Transport>(
        &self,
        dispatcher: &Dispatcher<T>,
    ) -> Result<String, ApiError> {
        let mut guard = self.lock();
        if let Some(state) = guard.as_ref() {
            if state.is_valid() {
                return Ok(state.access_token.clone());
            }
            tracing::debug!(expires_at = state.expires_at, "access token expiring, re-authenticating");
        }
        let state = self.exchange(dispatcher)?;
        let token = state.access_token.clone();
        *guard = Some(state);
        Ok(token)
    }

    /// Log in unconditionally and replace the cached state.
    pub fn login<T: Transport>(&self, dispatcher: &Dispatcher<T>) -> Result<String, ApiError> {
        let mut guard = self.lock();
        let state = self.exchange(dispatcher)?;
        let token = state.access_token.clone();
        *guard = Some(state);
        Ok(token)
    }

    fn exchange<T: Transport>(&self, dispatcher: &Dispatcher<T>) -> Result<TokenState, ApiError> {
        let body = LoginRequest {
            username: self.credentials.username(),
            password: self.credentials.password(),
        };
        let envelope = dispatcher.execute(HttpMethod::Post, "/auth", Some(&body), None)?;
        let payload: AuthPayload = serde_json::from_value(envelope.into_data()?)
            .map_err(|e| ApiError::Deserialization(format!("auth payload: {e}")))?;
        let state = TokenState::from_payload(payload)?;
        tracing::info!(
            username = self.credentials.username(),
            expires_at = state.expires_at,
            "authenticated"
        );
        Ok(state)
    }

    fn lock(&self) -> MutexGuard<'_, Option<TokenState>> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
