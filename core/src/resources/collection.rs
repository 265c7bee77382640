//! Collections and the item and dataframe routes hanging off them.
//!
//! # Design
//! A collection is identified by `(app, slug)`, which every item and
//! dataframe path needs, so [`Collection::identity`] is the single place
//! that checks both are set. `extended` is a depth level checked when the
//! path is built.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{missing, App, PathMode, Resource};
use crate::error::ApiError;

/// Highest `extended` level the collection routes accept.
pub const MAX_COLLECTION_EXTENDED: u8 = 3;

/// A tabular collection inside an app.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Id of the owning app.
    pub app: Option<String>,
    pub slug: Option<String>,
    pub database: Option<String>,
    pub name: Option<String>,
    /// Number of records.
    pub items: Option<i64>,
    pub description: Option<String>,
    pub is_encrypted: Option<bool>,
    pub is_locked: Option<bool>,
    pub is_logged: Option<bool>,
    pub queries: Option<Vec<Value>>,
    pub sources: Option<Vec<Value>>,
    pub id: Option<i64>,
    /// Response depth, 0 through 3.
    #[serde(skip)]
    pub extended: u8,
}

impl Collection {
    pub fn new(app: &str, slug: &str) -> Self {
        Self {
            app: Some(app.to_string()),
            slug: Some(slug.to_string()),
            ..Self::default()
        }
    }

    /// Collection `slug` of `app`. The app must carry its id.
    pub fn for_app(app: &App, slug: &str) -> Result<Self, ApiError> {
        Ok(Self::new(app.require_id()?, slug))
    }

    pub fn with_extended(mut self, level: u8) -> Result<Self, ApiError> {
        check_extended(level)?;
        self.extended = level;
        Ok(self)
    }

    /// `(app, slug)`, both required by item and dataframe routes.
    pub fn identity(&self) -> Result<(&str, &str), ApiError> {
        match (self.app.as_deref(), self.slug.as_deref()) {
            (Some(app), Some(slug)) => Ok((app, slug)),
            _ => Err(ApiError::Precondition(
                "collection 'app' and 'slug' must both be set".to_string(),
            )),
        }
    }

    pub fn item_path(&self, item_id: &str) -> Result<String, ApiError> {
        let (app, slug) = self.identity()?;
        Ok(format!("/item/{app}/{slug}/{item_id}"))
    }

    pub fn create_item_path(&self) -> Result<String, ApiError> {
        let (app, slug) = self.identity()?;
        Ok(format!("/item/{app}/{slug}"))
    }

    pub fn dataframe_path(&self) -> Result<String, ApiError> {
        let (app, slug) = self.identity()?;
        Ok(format!("/dataframe/{app}/{slug}"))
    }
}

fn check_extended(level: u8) -> Result<(), ApiError> {
    if level > MAX_COLLECTION_EXTENDED {
        return Err(ApiError::Precondition(format!(
            "collection extended level {level} not in 0..={MAX_COLLECTION_EXTENDED}"
        )));
    }
    Ok(())
}

impl Resource for Collection {
    const KIND: &'static str = "collection";

    fn path(&self, mode: PathMode) -> Result<String, ApiError> {
        match mode {
            PathMode::OneOrAll if self.app.is_none() && self.slug.is_none() => {
                self.path(PathMode::All)
            }
            PathMode::OneOrAll | PathMode::One => {
                check_extended(self.extended)?;
                let (app, slug) = self.identity()?;
                Ok(format!("/collection/{app}/{slug}?extended={}", self.extended))
            }
            PathMode::All => {
                check_extended(self.extended)?;
                Ok(format!("/collections?extended={}", self.extended))
            }
            PathMode::Create => {
                let app = self.app.as_deref().ok_or_else(|| missing(Self::KIND, "app"))?;
                Ok(format!("/collection/{app}"))
            }
        }
    }
}
