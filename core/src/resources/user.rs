//! Users, addressed by email.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{bool_flag, missing, strip_unset, PathMode, Resource};
use crate::error::ApiError;

/// A user, identified by email.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub email: Option<String>,
    pub extra_information: Option<Value>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: Option<bool>,
    pub id: Option<i64>,
    pub phone: Option<String>,
    pub messages: Option<Value>,
    pub last_online: Option<i64>,
    pub permissions: Option<Vec<String>>,
    pub roles: Option<Vec<Value>>,
    #[serde(skip)]
    pub extended: bool,
}

impl User {
    pub fn with_email(email: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            ..Self::default()
        }
    }
}

impl Resource for User {
    const KIND: &'static str = "user";

    fn path(&self, mode: PathMode) -> Result<String, ApiError> {
        let extended = bool_flag(self.extended);
        match mode {
            PathMode::OneOrAll if self.email.is_some() => self.path(PathMode::One),
            PathMode::OneOrAll | PathMode::All => Ok(format!("/users?extended={extended}")),
            PathMode::One => {
                let email = self
                    .email
                    .as_deref()
                    .ok_or_else(|| missing(Self::KIND, "email"))?;
                Ok(format!("/user/{email}?extended={extended}"))
            }
            PathMode::Create => Ok("/user".to_string()),
        }
    }

    /// The email is the identity and travels in the path only.
    fn update_body(&self) -> Result<Value, ApiError> {
        let mut body = strip_unset(self)?;
        if let Value::Object(map) = &mut body {
            map.remove("email");
        }
        Ok(body)
    }
}
