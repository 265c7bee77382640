//! Stored queries, addressed by slug.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{missing, Collection, PathMode, Resource};
use crate::error::ApiError;

/// A stored query over a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub app: Option<String>,
    /// Slug of the queried collection.
    pub collection: Option<String>,
    pub data_source: Option<String>,
    pub export: Option<bool>,
    pub id: Option<i64>,
    pub name: Option<String>,
    /// Aggregation pipeline stages.
    pub query: Option<Vec<Value>>,
    pub slug: Option<String>,
    pub source_query: Option<String>,
    pub modules: Option<Vec<Value>>,
    pub primary: Option<bool>,
    pub settings: Option<Value>,
}

impl Query {
    pub fn with_slug(slug: &str) -> Self {
        Self {
            slug: Some(slug.to_string()),
            ..Self::default()
        }
    }

    /// A new query over `collection`, taking both its app and its slug.
    pub fn for_collection(collection: &Collection) -> Result<Self, ApiError> {
        let (app, slug) = collection.identity()?;
        Ok(Self {
            app: Some(app.to_string()),
            collection: Some(slug.to_string()),
            ..Self::default()
        })
    }

    pub(crate) fn require_slug(&self) -> Result<&str, ApiError> {
        self.slug.as_deref().ok_or_else(|| missing(Self::KIND, "slug"))
    }

    /// Route that re-sources the query.
    pub fn source_path(&self) -> Result<String, ApiError> {
        Ok(format!("/source_query/{}", self.require_slug()?))
    }
}

impl Resource for Query {
    const KIND: &'static str = "query";

    fn path(&self, mode: PathMode) -> Result<String, ApiError> {
        match mode {
            PathMode::OneOrAll if self.slug.is_some() => self.path(PathMode::One),
            PathMode::OneOrAll | PathMode::All => Ok("/queries".to_string()),
            PathMode::One => Ok(format!("/query/{}", self.require_slug()?)),
            PathMode::Create => Ok("/query".to_string()),
        }
    }
}
