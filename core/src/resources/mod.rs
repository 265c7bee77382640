//! Typed descriptors for the REST resources of a Clappform environment.
//!
//! # Design
//! Each resource kind is a plain struct implementing [`Resource`]. The trait
//! is the only thing the CRUD façade knows about a kind: where it lives
//! (`path`) and what goes over the wire on create and update. Per-kind quirks
//! (questionnaires sending `{name, settings}`, users never sending `email` on
//! update) live in the kind's own impl instead of in the client.
//!
//! Identity fields are checked when a path is built. A missing identity is an
//! `ApiError::Precondition`, raised before anything touches the network.

mod actionflow;
mod app;
mod collection;
mod query;
mod questionnaire;
mod user;
mod version;

pub use actionflow::Actionflow;
pub use app::App;
pub use collection::{Collection, MAX_COLLECTION_EXTENDED};
pub use query::Query;
pub use questionnaire::Questionnaire;
pub use user::User;
pub use version::Version;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;

/// Which route of a resource to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    /// Single item when the identity is set, the listing otherwise.
    OneOrAll,
    One,
    All,
    Create,
}

/// Capability interface shared by every resource kind.
pub trait Resource: Serialize + DeserializeOwned {
    /// Human-readable kind, used in error messages and logs.
    const KIND: &'static str;

    /// Route of this resource relative to the API root.
    fn path(&self, mode: PathMode) -> Result<String, ApiError>;

    /// Body for `POST` to the create route.
    fn create_body(&self) -> Result<Value, ApiError> {
        strip_unset(self)
    }

    /// Body for `PUT` to the single-item route.
    fn update_body(&self) -> Result<Value, ApiError> {
        strip_unset(self)
    }
}

/// Result of a `get`: the server answers with an object or a list.
#[derive(Debug, Clone, PartialEq)]
pub enum OneOrMany<R> {
    One(R),
    Many(Vec<R>),
}

impl<R> OneOrMany<R> {
    pub fn into_one(self) -> Result<R, ApiError> {
        match self {
            OneOrMany::One(r) => Ok(r),
            OneOrMany::Many(_) => Err(ApiError::Deserialization(
                "expected one resource, got a list".to_string(),
            )),
        }
    }

    pub fn into_many(self) -> Vec<R> {
        match self {
            OneOrMany::One(r) => vec![r],
            OneOrMany::Many(rs) => rs,
        }
    }
}

impl<R: Resource> OneOrMany<R> {
    /// Reconstruct typed resources from an envelope's `data`.
    pub fn from_data(data: Value) -> Result<Self, ApiError> {
        let decode = |v: Value| {
            serde_json::from_value::<R>(v)
                .map_err(|e| ApiError::Deserialization(format!("{}: {e}", R::KIND)))
        };
        match data {
            Value::Array(items) => items
                .into_iter()
                .map(decode)
                .collect::<Result<Vec<_>, _>>()
                .map(OneOrMany::Many),
            obj @ Value::Object(_) => decode(obj).map(OneOrMany::One),
            other => Err(ApiError::Deserialization(format!(
                "{} data is neither a list nor an object: {other}",
                R::KIND
            ))),
        }
    }
}

/// Serialize `resource` and drop every field that is unset.
pub fn strip_unset<R: Serialize + ?Sized>(resource: &R) -> Result<Value, ApiError> {
    let mut value =
        serde_json::to_value(resource).map_err(|e| ApiError::Serialization(e.to_string()))?;
    if let Value::Object(map) = &mut value {
        map.retain(|_, v| !v.is_null());
    }
    Ok(value)
}

fn bool_flag(flag: bool) -> &'static str {
    if flag {
        "true"
    } else {
        "false"
    }
}

fn missing(kind: &str, field: &str) -> ApiError {
    ApiError::Precondition(format!("{kind} '{field}' must be set"))
}

fn unsupported(kind: &str, mode: PathMode) -> ApiError {
    ApiError::Precondition(format!("{kind} has no {mode:?} route"))
}
