//! Questionnaires (form templates).
//!
//! Create and update send only `name` and `settings`; the server owns the
//! version history.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{bool_flag, missing, PathMode, Resource};
use crate::error::ApiError;

/// A form template.
///
/// Create and update only ever send `name` and `settings`; the server owns
/// every other field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Questionnaire {
    pub name: Option<String>,
    pub id: Option<i64>,
    pub created_at: Option<i64>,
    pub active: Option<bool>,
    pub created_by: Option<Value>,
    pub latest_version: Option<Value>,
    pub versions: Option<Vec<Value>>,
    pub settings: Option<Value>,
    #[serde(skip)]
    pub extended: bool,
}

impl Questionnaire {
    pub fn with_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    fn form_body(&self) -> Value {
        json!({"name": self.name, "settings": self.settings})
    }
}

impl Resource for Questionnaire {
    const KIND: &'static str = "questionnaire";

    fn path(&self, mode: PathMode) -> Result<String, ApiError> {
        let extended = bool_flag(self.extended);
        match mode {
            PathMode::OneOrAll if self.id.is_some() => self.path(PathMode::One),
            PathMode::OneOrAll | PathMode::All => {
                Ok(format!("/questionnaires?extended={extended}"))
            }
            PathMode::One => {
                let id = self.id.ok_or_else(|| missing(Self::KIND, "id"))?;
                Ok(format!("/questionnaire/{id}?extended={extended}"))
            }
            PathMode::Create => Ok("/questionnaire".to_string()),
        }
    }

    fn create_body(&self) -> Result<Value, ApiError> {
        Ok(self.form_body())
    }

    fn update_body(&self) -> Result<Value, ApiError> {
        Ok(self.form_body())
    }
}
