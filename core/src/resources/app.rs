//! Apps: the top-level container of collections and pages.
//!
//! Routes: `/app/{id}?extended=`, `/apps?extended=`, `/app`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{bool_flag, missing, PathMode, Resource};
use crate::error::ApiError;

/// A Clappform app.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Shown below the app name.
    pub description: Option<String>,
    /// Page opened when the app is entered.
    pub default_page: Option<String>,
    /// A count normally; the list of collections when fetched extended.
    pub collections: Option<Value>,
    /// A count normally; the full group tree when fetched extended.
    pub groups: Option<Value>,
    pub settings: Option<Value>,
    #[serde(skip)]
    pub extended: bool,
}

impl App {
    pub fn with_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::default()
        }
    }

    pub fn with_extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    pub(crate) fn require_id(&self) -> Result<&str, ApiError> {
        self.id.as_deref().ok_or_else(|| missing(Self::KIND, "id"))
    }
}

impl Resource for App {
    const KIND: &'static str = "app";

    fn path(&self, mode: PathMode) -> Result<String, ApiError> {
        let extended = bool_flag(self.extended);
        match mode {
            PathMode::OneOrAll if self.id.is_some() => self.path(PathMode::One),
            PathMode::OneOrAll | PathMode::All => Ok(format!("/apps?extended={extended}")),
            PathMode::One => Ok(format!("/app/{}?extended={extended}", self.require_id()?)),
            PathMode::Create => Ok("/app".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths() {
        let app = App::with_id("clappform");
        assert_eq!(app.path(PathMode::OneOrAll).unwrap(), "/app/clappform?extended=false");
        assert_eq!(
            app.clone().with_extended(true).path(PathMode::One).unwrap(),
            "/app/clappform?extended=true"
        );
        assert_eq!(App::default().path(PathMode::OneOrAll).unwrap(), "/apps?extended=false");
        assert_eq!(App::default().path(PathMode::Create).unwrap(), "/app");
    }

    #[test]
    fn one_path_requires_id() {
        let err = App::default().path(PathMode::One).unwrap_err();
        assert!(matches!(err, ApiError::Precondition(_)));
    }

    #[test]
    fn extended_flag_is_not_serialized() {
        let body = App::with_id("a").with_extended(true).create_body().unwrap();
        assert!(body.get("extended").is_none());
    }
}
