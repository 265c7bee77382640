//! Client configuration.
//!
//! Built directly with `ClientConfig::new` or from the process environment
//! with `ClientConfig::from_env`, which also loads a `.env` file if present.

use std::env;
use std::time::Duration;

use crate::error::ApiError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const ENV_BASE_URL: &str = "CLAPPFORM_BASE_URL";
const ENV_USERNAME: &str = "CLAPPFORM_USERNAME";
const ENV_PASSWORD: &str = "CLAPPFORM_PASSWORD";
const ENV_TIMEOUT_SECS: &str = "CLAPPFORM_TIMEOUT_SECS";
const ENV_MAX_RETRIES: &str = "CLAPPFORM_MAX_RETRIES";

/// Username and password used for `POST /auth`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Environment root, e.g. `https://app.clappform.com`. `/api` is appended.
    pub base_url: String,
    pub credentials: Credentials,
    /// Global per-request timeout.
    pub timeout: Duration,
    /// Connection-level retries per request.
    pub max_retries: u32,
}

impl ClientConfig {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: Credentials::new(username, password),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Read `CLAPPFORM_*` variables, after loading `.env` when one exists.
    pub fn from_env() -> Result<Self, ApiError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiError> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ApiError::Config(format!("{key} is not set")))
        };
        let mut config = Self::new(
            &required(ENV_BASE_URL)?,
            &required(ENV_USERNAME)?,
            &required(ENV_PASSWORD)?,
        );
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs = raw
                .parse::<u64>()
                .map_err(|e| ApiError::Config(format!("{ENV_TIMEOUT_SECS}={raw}: {e}")))?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            config.max_retries = raw
                .parse::<u32>()
                .map_err(|e| ApiError::Config(format!("{ENV_MAX_RETRIES}={raw}: {e}")))?;
        }
        tracing::debug!(
            base_url = %config.base_url,
            username = config.credentials.username(),
            "loaded client configuration from environment"
        );
        Ok(config)
    }

    /// Root every API path is appended to.
    pub fn api_root(&self) -> String {
        format!("{}/api", self.base_url)
    }
}
