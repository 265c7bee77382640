//! Blocking client for a Clappform environment.
//!
//! # Design
//! `Client` composes a `Dispatcher` (transport, headers, envelope decoding)
//! with a `Session` (credentials and cached token). Every resource call goes
//! through `private_request`, which re-checks the token first, so callers
//! never authenticate by hand.
//!
//! Generic CRUD works on any [`Resource`]. Item-level operations on
//! collections take a [`Record`] keyed by the database-generated `_id`: the
//! id is split off into the path and put back on the returned record.

use serde::Serialize;
use serde_json::Value;

use crate::auth::Session;
use crate::config::ClientConfig;
use crate::dispatch::{to_json, Dispatcher};
use crate::error::ApiError;
use crate::http::{HttpMethod, Transport, UreqTransport};
use crate::resources::{Collection, OneOrMany, PathMode, Query, Resource, User, Version};
use crate::types::{ApiResponse, Envelope, Record, IDENTITY_FIELD};

#[derive(Debug)]
pub struct Client<T = UreqTransport> {
    config: ClientConfig,
    dispatcher: Dispatcher<T>,
    session: Session,
}

impl Client<UreqTransport> {
    pub fn new(config: ClientConfig) -> Self {
        let transport = UreqTransport::new(config.timeout, config.max_retries);
        Self::with_transport(config, transport)
    }

    /// Client configured from `CLAPPFORM_*` environment variables.
    pub fn from_env() -> Result<Self, ApiError> {
        ClientConfig::from_env().map(Self::new)
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Self {
        let dispatcher = Dispatcher::new(&config.api_root(), transport);
        let session = Session::new(config.credentials.clone());
        Self {
            config,
            dispatcher,
            session,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn transport(&self) -> &T {
        self.dispatcher.transport()
    }

    /// Log in now, replacing any cached token.
    pub fn auth(&self) -> Result<(), ApiError> {
        self.session.login(&self.dispatcher).map(|_| ())
    }

    /// Log in only when no usable token is cached.
    pub fn ensure_authenticated(&self) -> Result<(), ApiError> {
        self.session.ensure_authenticated(&self.dispatcher).map(|_| ())
    }

    /// Ask the server whether the current token is accepted.
    pub fn verify_auth(&self) -> Result<ApiResponse, ApiError> {
        self.private_request::<()>(HttpMethod::Post, "/auth/verify", None)
            .map(Envelope::into_api_response)
    }

    pub(crate) fn private_request<B: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&B>,
    ) -> Result<Envelope, ApiError> {
        let body = body.map(to_json).transpose()?;
        self.private_request_raw(method, path, body)
    }

    pub(crate) fn private_request_raw(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
    ) -> Result<Envelope, ApiError> {
        let token = self.session.ensure_authenticated(&self.dispatcher)?;
        self.dispatcher.execute_raw(method, path, body, Some(&token))
    }

    /// Fetch one resource when its identity is set, all of its kind otherwise.
    pub fn get<R: Resource>(&self, resource: &R) -> Result<OneOrMany<R>, ApiError> {
        let path = resource.path(PathMode::OneOrAll)?;
        let envelope = self.private_request::<()>(HttpMethod::Get, &path, None)?;
        OneOrMany::from_data(envelope.into_data()?)
    }

    pub fn create<R: Resource>(&self, resource: &R) -> Result<R, ApiError> {
        let path = resource.path(PathMode::Create)?;
        let body = resource.create_body()?;
        let envelope = self.private_request(HttpMethod::Post, &path, Some(&body))?;
        decode_one(envelope)
    }

    pub fn update<R: Resource>(&self, resource: &R) -> Result<R, ApiError> {
        let path = resource.path(PathMode::One)?;
        let body = resource.update_body()?;
        let envelope = self.private_request(HttpMethod::Put, &path, Some(&body))?;
        decode_one(envelope)
    }

    pub fn delete<R: Resource>(&self, resource: &R) -> Result<ApiResponse, ApiError> {
        let path = resource.path(PathMode::One)?;
        self.private_request::<()>(HttpMethod::Delete, &path, None)
            .map(Envelope::into_api_response)
    }

    /// Fetch the record of `collection` whose `_id` matches `item`'s.
    pub fn get_item(&self, collection: &Collection, item: &Record) -> Result<Record, ApiError> {
        let (item_id, _) = separate_id(item)?;
        let path = collection.item_path(&item_id)?;
        let envelope = self.private_request::<()>(HttpMethod::Get, &path, None)?;
        attach_id(envelope.into_data()?, item_id)
    }

    pub fn create_item(&self, collection: &Collection, item: &Record) -> Result<Record, ApiError> {
        let path = collection.create_item_path()?;
        let envelope = self.private_request(
            HttpMethod::Post,
            &path,
            Some(&serde_json::json!({ "data": item })),
        )?;
        into_record(envelope.into_data()?)
    }

    /// Replace the fields of one record. `_id` is sent in the path only.
    pub fn update_item(&self, collection: &Collection, item: &Record) -> Result<Record, ApiError> {
        let (item_id, fields) = separate_id(item)?;
        let path = collection.item_path(&item_id)?;
        let envelope = self.private_request(
            HttpMethod::Put,
            &path,
            Some(&serde_json::json!({ "data": fields })),
        )?;
        attach_id(envelope.into_data()?, item_id)
    }

    /// Delete every record in `items` with a single request.
    pub fn delete_items(
        &self,
        collection: &Collection,
        items: &[Record],
    ) -> Result<ApiResponse, ApiError> {
        let oids = items
            .iter()
            .map(|item| separate_id(item).map(|(id, _)| id))
            .collect::<Result<Vec<_>, _>>()?;
        let path = collection.create_item_path()?;
        tracing::debug!(path, count = oids.len(), "deleting items");
        self.private_request(
            HttpMethod::Delete,
            &path,
            Some(&serde_json::json!({ "oids": oids })),
        )
        .map(Envelope::into_api_response)
    }

    /// The user the client is logged in as.
    pub fn current_user(&self, extended: bool) -> Result<User, ApiError> {
        let path = format!("/user/me?extended={extended}");
        decode_one(self.private_request::<()>(HttpMethod::Get, &path, None)?)
    }

    pub fn version(&self) -> Result<Version, ApiError> {
        self.get(&Version::default())?.into_one()
    }

    /// Ask the server to re-run a stored query into its target collection.
    pub fn source_query(&self, query: &Query) -> Result<ApiResponse, ApiError> {
        let path = query.source_path()?;
        self.private_request::<()>(HttpMethod::Get, &path, None)
            .map(Envelope::into_api_response)
    }
}

fn decode_one<R: Resource>(envelope: Envelope) -> Result<R, ApiError> {
    OneOrMany::from_data(envelope.into_data()?)?.into_one()
}

/// Split `_id` off a record. The id must be a string.
fn separate_id(item: &Record) -> Result<(String, Record), ApiError> {
    let mut fields = item.clone();
    match fields.remove(IDENTITY_FIELD) {
        Some(Value::String(id)) => Ok((id, fields)),
        Some(other) => Err(ApiError::Precondition(format!(
            "item '{IDENTITY_FIELD}' must be a string, got {other}"
        ))),
        None => Err(ApiError::Precondition(format!(
            "could not find '{IDENTITY_FIELD}' in item"
        ))),
    }
}

fn into_record(data: Value) -> Result<Record, ApiError> {
    match data {
        Value::Object(map) => Ok(map),
        other => Err(ApiError::Deserialization(format!(
            "item data is not an object: {other}"
        ))),
    }
}

fn attach_id(data: Value, item_id: String) -> Result<Record, ApiError> {
    let mut record = into_record(data)?;
    record.insert(IDENTITY_FIELD.to_string(), Value::String(item_id));
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{App, Questionnaire};
    use crate::testing::ScriptedTransport;
    use chrono::Utc;
    use serde_json::json;

    fn client(transport: &ScriptedTransport) -> Client<&ScriptedTransport> {
        transport.respond_login(Utc::now().timestamp() + 3600);
        Client::with_transport(
            ClientConfig::new("http://localhost:3000", "j.doe@clappform.com", "secret"),
            transport,
        )
    }

    fn record(value: Value) -> Record {
        into_record(value).unwrap()
    }

    #[test]
    fn first_privileged_call_authenticates_lazily() {
        let transport = ScriptedTransport::new();
        let c = client(&transport);
        assert!(transport.requests().is_empty());

        transport.respond_data(json!([]));
        transport.respond_data(json!([]));
        c.get(&App::default()).unwrap();
        c.get(&App::default()).unwrap();

        assert_eq!(
            transport.paths(),
            vec!["/auth", "/apps?extended=false", "/apps?extended=false"]
        );
        let requests = transport.requests();
        let bearer = format!("Bearer {}", c.session().token().unwrap().access_token);
        assert!(requests[0].header("authorization").is_none());
        assert_eq!(requests[1].header("authorization"), Some(bearer.as_str()));
    }

    #[test]
    fn get_list_and_single() {
        let transport = ScriptedTransport::new();
        let c = client(&transport);
        transport.respond_data(json!([{"id": "a", "name": "A"}, {"id": "b", "name": "B"}]));
        transport.respond_data(json!({"id": "a", "name": "A", "collections": 2}));

        let all = c.get(&App::default()).unwrap().into_many();
        assert_eq!(all.len(), 2);
        let one = c.get(&App::with_id("a")).unwrap().into_one().unwrap();
        assert_eq!(one.collections, Some(json!(2)));
        assert_eq!(transport.paths()[2], "/app/a?extended=false");
    }

    #[test]
    fn missing_identity_fails_before_network() {
        let transport = ScriptedTransport::new();
        let c = client(&transport);
        let err = c.update(&App::default()).unwrap_err();
        assert!(matches!(err, ApiError::Precondition(_)));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn create_strips_unset_fields() {
        let transport = ScriptedTransport::new();
        let c = client(&transport);
        transport.respond_data(json!({"id": "sales", "name": "Sales"}));

        let created = c
            .create(&App {
                name: Some("Sales".to_string()),
                ..App::default()
            })
            .unwrap();
        assert_eq!(created.id.as_deref(), Some("sales"));
        assert_eq!(transport.paths()[1], "/app");
        assert_eq!(transport.body(1), json!({"name": "Sales"}));
    }

    #[test]
    fn questionnaire_update_sends_form_body() {
        let transport = ScriptedTransport::new();
        let c = client(&transport);
        transport.respond_data(json!({"id": 4, "name": "Intake v2"}));

        let q = Questionnaire {
            id: Some(4),
            name: Some("Intake v2".to_string()),
            active: Some(false),
            ..Questionnaire::default()
        };
        c.update(&q).unwrap();
        assert_eq!(transport.paths()[1], "/questionnaire/4?extended=false");
        assert_eq!(transport.body(1), json!({"name": "Intake v2", "settings": null}));
    }

    #[test]
    fn item_id_goes_to_path_and_back() {
        let transport = ScriptedTransport::new();
        let c = client(&transport);
        let collection = Collection::new("clappform", "us_presidents");
        transport.respond_data(json!({"name": "X"}));
        transport.respond_data(json!({"name": "X"}));

        let item = record(json!({"_id": "abc", "name": "X"}));
        let fetched = c.get_item(&collection, &item).unwrap();
        let updated = c.update_item(&collection, &item).unwrap();

        assert_eq!(fetched["_id"], "abc");
        assert_eq!(updated["_id"], "abc");
        assert_eq!(
            transport.paths()[1..].to_vec(),
            vec!["/item/clappform/us_presidents/abc", "/item/clappform/us_presidents/abc"]
        );
        assert_eq!(transport.requests()[2].method, HttpMethod::Put);
        assert_eq!(transport.body(2), json!({"data": {"name": "X"}}));
    }

    #[test]
    fn item_without_string_id_is_rejected_locally() {
        let transport = ScriptedTransport::new();
        let c = client(&transport);
        let collection = Collection::new("a", "b");

        let err = c.get_item(&collection, &record(json!({"name": "X"}))).unwrap_err();
        assert!(matches!(err, ApiError::Precondition(_)));
        let err = c
            .update_item(&collection, &record(json!({"_id": 7})))
            .unwrap_err();
        assert!(matches!(err, ApiError::Precondition(_)));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn bulk_delete_sends_oids_once() {
        let transport = ScriptedTransport::new();
        let c = client(&transport);
        transport.respond(
            200,
            json!({"code": 200, "message": "Deleted 2 items", "response_id": "r"}),
        );

        let items = [record(json!({"_id": "a"})), record(json!({"_id": "b"}))];
        let resp = c.delete_items(&Collection::new("app", "col"), &items).unwrap();

        assert_eq!(resp.message, "Deleted 2 items");
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(transport.requests()[1].method, HttpMethod::Delete);
        assert_eq!(transport.paths()[1], "/item/app/col");
        assert_eq!(transport.body(1), json!({"oids": ["a", "b"]}));
    }

    #[test]
    fn create_item_wraps_record() {
        let transport = ScriptedTransport::new();
        let c = client(&transport);
        transport.respond_data(json!({"_id": "new", "name": "Y"}));

        let created = c
            .create_item(&Collection::new("app", "col"), &record(json!({"name": "Y"})))
            .unwrap();
        assert_eq!(created["_id"], "new");
        assert_eq!(transport.body(1), json!({"data": {"name": "Y"}}));
    }

    #[test]
    fn delete_returns_api_response() {
        let transport = ScriptedTransport::new();
        let c = client(&transport);
        transport.respond(200, json!({"code": 200, "message": "Deleted", "response_id": "r9"}));

        let resp = c.delete(&App::with_id("sales")).unwrap();
        assert_eq!(resp.response_id, "r9");
        assert_eq!(transport.paths()[1], "/app/sales?extended=false");
    }

    #[test]
    fn server_error_propagates_unchanged() {
        let transport = ScriptedTransport::new();
        let c = client(&transport);
        transport.respond(
            403,
            json!({"code": 403, "message": "Forbidden", "response_id": "r403"}),
        );
        let err = c.get(&App::default()).unwrap_err();
        assert!(matches!(err, ApiError::Http { status: 403, ref response_id, .. } if response_id == "r403"));
    }

    #[test]
    fn current_user_and_verify() {
        let transport = ScriptedTransport::new();
        let c = client(&transport);
        transport.respond_data(json!({"email": "j.doe@clappform.com", "first_name": "Jane"}));
        transport.respond(200, json!({"code": 200, "message": "Valid", "response_id": "v"}));

        let me = c.current_user(true).unwrap();
        assert_eq!(me.first_name.as_deref(), Some("Jane"));
        assert_eq!(c.verify_auth().unwrap().message, "Valid");
        assert_eq!(
            transport.paths()[1..].to_vec(),
            vec!["/user/me?extended=true", "/auth/verify"]
        );
    }

    #[test]
    fn explicit_auth_always_logs_in() {
        let transport = ScriptedTransport::new();
        let c = client(&transport);
        transport.respond_login(Utc::now().timestamp() + 7200);
        c.ensure_authenticated().unwrap();
        c.auth().unwrap();
        c.ensure_authenticated().unwrap();
        assert_eq!(transport.paths(), vec!["/auth", "/auth"]);
    }

    #[test]
    fn source_query_uses_slug() {
        let transport = ScriptedTransport::new();
        let c = client(&transport);
        transport.respond(200, json!({"code": 200, "message": "Sourced", "response_id": "s"}));
        assert_eq!(c.source_query(&Query::with_slug("top_ten")).unwrap().message, "Sourced");
        assert_eq!(transport.paths()[1], "/source_query/top_ten");
        assert!(c.source_query(&Query::default()).is_err());
    }
}
