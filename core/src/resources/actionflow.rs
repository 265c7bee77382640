//! Actionflows, addressed by numeric id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{missing, PathMode, Resource};
use crate::error::ApiError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actionflow {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub settings: Option<Value>,
    pub cronjobs: Option<Vec<Value>>,
    pub tasks: Option<Vec<Value>>,
}

impl Actionflow {
    pub fn with_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }
}

impl Resource for Actionflow {
    const KIND: &'static str = "actionflow";

    fn path(&self, mode: PathMode) -> Result<String, ApiError> {
        match mode {
            PathMode::OneOrAll if self.id.is_some() => self.path(PathMode::One),
            PathMode::OneOrAll | PathMode::All => Ok("/actionflows".to_string()),
            PathMode::One => {
                let id = self.id.ok_or_else(|| missing(Self::KIND, "id"))?;
                Ok(format!("/actionflow/{id}"))
            }
            PathMode::Create => Ok("/actionflow".to_string()),
        }
    }
}
