//! Component versions of an environment. Read-only.

use serde::{Deserialize, Serialize};

use super::{unsupported, PathMode, Resource};
use crate::error::ApiError;

/// Versions reported by `GET /version`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub api: Option<String>,
    pub web_application: Option<String>,
    pub web_server: Option<String>,
}

impl Resource for Version {
    const KIND: &'static str = "version";

    fn path(&self, mode: PathMode) -> Result<String, ApiError> {
        match mode {
            PathMode::OneOrAll | PathMode::One | PathMode::All => Ok("/version".to_string()),
            PathMode::Create => Err(unsupported(Self::KIND, mode)),
        }
    }
}
