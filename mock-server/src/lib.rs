//! In-memory Clappform API for tests and local development.
//!
//! Every route lives under `/api` and answers with the standard envelope
//! (`code`, `message`, `response_id`, optional `data`). All routes except
//! `POST /api/auth` require a bearer token minted by that route.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const DEMO_USERNAME: &str = "j.doe@clappform.com";
pub const DEMO_PASSWORD: &str = "secret";
pub const API_VERSION: &str = "7.4.0";

const MIN_LIMIT: u64 = 10;
const MAX_LIMIT: u64 = 500;

pub type Record = Map<String, Value>;
pub type Db = Arc<RwLock<Store>>;

/// Resource kinds kept in a keyed map.
#[derive(Debug, Clone, Copy)]
struct Kind {
    name: &'static str,
    key: &'static str,
    /// Keys are assigned by the server as increasing integers.
    numbered: bool,
    list_path: &'static str,
    one_path: &'static str,
}

const APP: Kind = Kind {
    name: "app",
    key: "id",
    numbered: false,
    list_path: "/apps",
    one_path: "/app/{key}",
};
const QUERY: Kind = Kind {
    name: "query",
    key: "slug",
    numbered: false,
    list_path: "/queries",
    one_path: "/query/{key}",
};
const ACTIONFLOW: Kind = Kind {
    name: "actionflow",
    key: "id",
    numbered: true,
    list_path: "/actionflows",
    one_path: "/actionflow/{key}",
};
const QUESTIONNAIRE: Kind = Kind {
    name: "questionnaire",
    key: "id",
    numbered: true,
    list_path: "/questionnaires",
    one_path: "/questionnaire/{key}",
};
const USER: Kind = Kind {
    name: "user",
    key: "email",
    numbered: false,
    list_path: "/users",
    one_path: "/user/{key}",
};

const KINDS: [Kind; 5] = [APP, QUERY, ACTIONFLOW, QUESTIONNAIRE, USER];

#[derive(Debug, Clone)]
struct Cursor {
    rows: Vec<Record>,
    offset: usize,
    limit: usize,
}

#[derive(Debug)]
pub struct Store {
    accounts: HashMap<String, String>,
    token_ttl: i64,
    tokens: HashSet<String>,
    resources: HashMap<&'static str, BTreeMap<String, Value>>,
    next_number: i64,
    collections: BTreeMap<(String, String), Value>,
    records: HashMap<(String, String), Vec<Record>>,
    cursors: HashMap<String, Cursor>,
    imports: Vec<Value>,
    transfers: Vec<Value>,
    logins: usize,
}

impl Default for Store {
    fn default() -> Self {
        let mut store = Self {
            accounts: HashMap::new(),
            token_ttl: 3600,
            tokens: HashSet::new(),
            resources: HashMap::new(),
            next_number: 1,
            collections: BTreeMap::new(),
            records: HashMap::new(),
            cursors: HashMap::new(),
            imports: Vec::new(),
            transfers: Vec::new(),
            logins: 0,
        };
        store.add_account(DEMO_USERNAME, DEMO_PASSWORD);
        store
    }
}

impl Store {
    pub fn add_account(&mut self, username: &str, password: &str) {
        self.accounts.insert(username.to_string(), password.to_string());
        self.resources.entry(USER.name).or_default().insert(
            username.to_string(),
            json!({"email": username, "first_name": "Jane", "last_name": "Doe", "is_active": true}),
        );
    }

    /// Lifetime of minted tokens. Zero or less yields already-expired tokens.
    pub fn with_token_ttl(mut self, secs: i64) -> Self {
        self.token_ttl = secs;
        self
    }

    pub fn add_import(&mut self, entry: Value) {
        self.imports.push(entry);
    }

    pub fn logins(&self) -> usize {
        self.logins
    }

    /// Bodies received on `POST /api/transfer/app`.
    pub fn transfers(&self) -> &[Value] {
        &self.transfers
    }

    pub fn records(&self, app: &str, slug: &str) -> &[Record] {
        self.records
            .get(&(app.to_string(), slug.to_string()))
            .map_or(&[], Vec::as_slice)
    }
}

/// Envelope response.
#[derive(Debug)]
struct Reply {
    status: StatusCode,
    message: String,
    fields: Map<String, Value>,
}

type ApiResult = Result<Reply, Reply>;

impl Reply {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            message: message.into(),
            fields: Map::new(),
        }
    }

    fn fail(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            ..Self::ok(message)
        }
    }

    fn not_found(what: &str) -> Self {
        Self::fail(StatusCode::NOT_FOUND, format!("{what} not found"))
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::fail(StatusCode::BAD_REQUEST, message)
    }

    fn data(self, data: Value) -> Self {
        self.field("data", data)
    }

    fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut body = Map::new();
        body.insert("code".to_string(), self.status.as_u16().into());
        body.insert("message".to_string(), self.message.into());
        body.insert(
            "response_id".to_string(),
            Uuid::new_v4().simple().to_string().into(),
        );
        body.extend(self.fields);
        (self.status, Json(Value::Object(body))).into_response()
    }
}

pub fn app() -> Router {
    app_with_db(Arc::new(RwLock::new(Store::default())))
}

/// Router over a shared store, so tests can inspect what the server saw.
pub fn app_with_db(db: Db) -> Router {
    let protected = KINDS
        .into_iter()
        .fold(Router::new(), keyed_routes)
        .route("/auth/verify", post(verify))
        .route("/version", get(version))
        .route("/user/me", get(current_user))
        .route("/source_query/{slug}", get(source_query))
        .route("/collections", get(list_collections))
        .route("/collection/{app}", post(create_collection))
        .route(
            "/collection/{app}/{slug}",
            get(get_collection)
                .put(update_collection)
                .delete(delete_collection),
        )
        .route("/item/{app}/{slug}", post(create_item).delete(delete_items))
        .route("/item/{app}/{slug}/{id}", get(get_item).put(update_item))
        .route("/dataframe/aggregate", post(aggregate))
        .route("/dataframe/read_data", post(read_data))
        .route(
            "/dataframe/{app}/{slug}",
            post(append_rows).put(replace_rows).delete(empty_rows),
        )
        .route("/import", get(list_imports))
        .route("/transfer/app", post(transfer_app))
        .route_layer(middleware::from_fn_with_state(db.clone(), require_bearer));

    let api = Router::new().route("/auth", post(login)).merge(protected);
    Router::new().nest("/api", api).with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with_db(listener: TcpListener, db: Db) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_db(db)).await
}

async fn require_bearer(State(db): State<Db>, request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned);
    let known = match token {
        Some(token) => db.read().await.tokens.contains(&token),
        None => false,
    };
    if !known {
        return Reply::fail(StatusCode::UNAUTHORIZED, "Invalid or missing token").into_response();
    }
    next.run(request).await
}

// --- auth ---

#[derive(Deserialize)]
struct Login {
    username: String,
    password: String,
}

/// Unsigned JWT carrying `sub` and `exp`.
fn mint_token(username: &str, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let claims = json!({"sub": username, "exp": exp, "jti": Uuid::new_v4().simple().to_string()});
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.mock")
}

async fn login(State(db): State<Db>, Json(input): Json<Login>) -> ApiResult {
    let mut store = db.write().await;
    if store.accounts.get(&input.username) != Some(&input.password) {
        tracing::info!(username = %input.username, "rejected login");
        return Err(Reply::fail(StatusCode::UNAUTHORIZED, "Invalid credentials"));
    }
    let exp = Utc::now().timestamp() + store.token_ttl;
    let token = mint_token(&input.username, exp);
    store.tokens.insert(token.clone());
    store.logins += 1;
    Ok(Reply::ok("Successfully logged in").data(json!({
        "access_token": token,
        "refresh_token": Uuid::new_v4().simple().to_string(),
        "refresh_expiration": exp + 86_400,
    })))
}

async fn verify() -> Reply {
    Reply::ok("Token is valid")
}

async fn version() -> Reply {
    Reply::ok("Version").data(json!({
        "api": API_VERSION,
        "web_application": API_VERSION,
        "web_server": API_VERSION,
    }))
}

async fn current_user(State(db): State<Db>) -> ApiResult {
    let store = db.read().await;
    store
        .resources
        .get(USER.name)
        .and_then(|users| users.get(DEMO_USERNAME))
        .cloned()
        .map(|user| Reply::ok("User").data(user))
        .ok_or_else(|| Reply::not_found("user"))
}

// --- keyed resources ---

fn keyed_routes(router: Router<Db>, kind: Kind) -> Router<Db> {
    router
        .route(kind.list_path, get(move |s: State<Db>| list(s, kind)))
        .route(
            &format!("/{}", kind.name),
            post(move |s: State<Db>, b: Json<Value>| create(s, kind, b)),
        )
        .route(
            kind.one_path,
            get(move |s: State<Db>, p: Path<String>| fetch(s, kind, p))
                .put(move |s: State<Db>, p: Path<String>, b: Json<Value>| update(s, kind, p, b))
                .delete(move |s: State<Db>, p: Path<String>| remove(s, kind, p)),
        )
}

fn object(body: Value) -> Result<Record, Reply> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(Reply::bad_request("body must be an object")),
    }
}

async fn list(State(db): State<Db>, kind: Kind) -> Reply {
    let store = db.read().await;
    let all = store
        .resources
        .get(kind.name)
        .map(|m| m.values().cloned().collect())
        .unwrap_or_default();
    Reply::ok(format!("{} list", kind.name)).data(Value::Array(all))
}

async fn create(State(db): State<Db>, kind: Kind, Json(body): Json<Value>) -> ApiResult {
    let mut body = object(body)?;
    let mut store = db.write().await;
    let key = if kind.numbered {
        let number = store.next_number;
        store.next_number += 1;
        body.insert(kind.key.to_string(), number.into());
        number.to_string()
    } else {
        match body.get(kind.key) {
            Some(Value::String(key)) => key.clone(),
            _ => return Err(Reply::bad_request(format!("'{}' is required", kind.key))),
        }
    };
    let entries = store.resources.entry(kind.name).or_default();
    if entries.contains_key(&key) {
        return Err(Reply::fail(
            StatusCode::CONFLICT,
            format!("{} '{key}' already exists", kind.name),
        ));
    }
    let value = Value::Object(body);
    entries.insert(key, value.clone());
    Ok(Reply::ok(format!("{} created", kind.name)).data(value))
}

async fn fetch(State(db): State<Db>, kind: Kind, Path(key): Path<String>) -> ApiResult {
    let store = db.read().await;
    store
        .resources
        .get(kind.name)
        .and_then(|m| m.get(&key))
        .cloned()
        .map(|value| Reply::ok(kind.name).data(value))
        .ok_or_else(|| Reply::not_found(kind.name))
}

async fn update(
    State(db): State<Db>,
    kind: Kind,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    let fields = object(body)?;
    let mut store = db.write().await;
    let Some(Value::Object(current)) = store
        .resources
        .get_mut(kind.name)
        .and_then(|m| m.get_mut(&key))
    else {
        return Err(Reply::not_found(kind.name));
    };
    for (name, value) in fields {
        if name != kind.key {
            current.insert(name, value);
        }
    }
    Ok(Reply::ok(format!("{} updated", kind.name)).data(Value::Object(current.clone())))
}

async fn remove(State(db): State<Db>, kind: Kind, Path(key): Path<String>) -> ApiResult {
    let mut store = db.write().await;
    store
        .resources
        .get_mut(kind.name)
        .and_then(|m| m.remove(&key))
        .map(|_| Reply::ok(format!("{} deleted", kind.name)))
        .ok_or_else(|| Reply::not_found(kind.name))
}

async fn source_query(State(db): State<Db>, Path(slug): Path<String>) -> ApiResult {
    let store = db.read().await;
    store
        .resources
        .get(QUERY.name)
        .filter(|m| m.contains_key(&slug))
        .map(|_| Reply::ok(format!("Query '{slug}' sourced")))
        .ok_or_else(|| Reply::not_found("query"))
}

// --- collections ---

fn collection_key(app: &str, slug: &str) -> (String, String) {
    (app.to_string(), slug.to_string())
}

fn with_item_count(store: &Store, key: &(String, String), mut collection: Value) -> Value {
    let count = store.records.get(key).map_or(0, Vec::len);
    if let Value::Object(map) = &mut collection {
        map.insert("items".to_string(), count.into());
    }
    collection
}

async fn list_collections(State(db): State<Db>) -> Reply {
    let store = db.read().await;
    let all = store
        .collections
        .iter()
        .map(|(key, c)| with_item_count(&store, key, c.clone()))
        .collect();
    Reply::ok("collection list").data(Value::Array(all))
}

async fn create_collection(
    State(db): State<Db>,
    Path(app): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult {
    let mut body = object(body)?;
    let Some(Value::String(slug)) = body.get("slug").cloned() else {
        return Err(Reply::bad_request("'slug' is required"));
    };
    let mut store = db.write().await;
    let app_known = store
        .resources
        .get(APP.name)
        .is_some_and(|apps| apps.contains_key(&app));
    if !app_known {
        return Err(Reply::not_found("app"));
    }
    let key = collection_key(&app, &slug);
    if store.collections.contains_key(&key) {
        return Err(Reply::fail(
            StatusCode::CONFLICT,
            format!("collection '{slug}' already exists"),
        ));
    }
    body.insert("app".to_string(), app.into());
    let collection = Value::Object(body);
    store.collections.insert(key.clone(), collection.clone());
    store.records.insert(key, Vec::new());
    Ok(Reply::ok("collection created").data(collection))
}

async fn get_collection(
    State(db): State<Db>,
    Path((app, slug)): Path<(String, String)>,
) -> ApiResult {
    let store = db.read().await;
    let key = collection_key(&app, &slug);
    store
        .collections
        .get(&key)
        .cloned()
        .map(|c| Reply::ok("collection").data(with_item_count(&store, &key, c)))
        .ok_or_else(|| Reply::not_found("collection"))
}

async fn update_collection(
    State(db): State<Db>,
    Path((app, slug)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult {
    let fields = object(body)?;
    let mut store = db.write().await;
    let Some(Value::Object(current)) = store.collections.get_mut(&collection_key(&app, &slug))
    else {
        return Err(Reply::not_found("collection"));
    };
    for (name, value) in fields {
        if name != "app" && name != "slug" {
            current.insert(name, value);
        }
    }
    Ok(Reply::ok("collection updated").data(Value::Object(current.clone())))
}

async fn delete_collection(
    State(db): State<Db>,
    Path((app, slug)): Path<(String, String)>,
) -> ApiResult {
    let mut store = db.write().await;
    let key = collection_key(&app, &slug);
    store.records.remove(&key);
    store
        .collections
        .remove(&key)
        .map(|_| Reply::ok("collection deleted"))
        .ok_or_else(|| Reply::not_found("collection"))
}

// --- items ---

fn new_record(mut fields: Record) -> Record {
    fields.insert("_id".to_string(), Uuid::new_v4().simple().to_string().into());
    fields
}

fn rows_mut<'s>(store: &'s mut Store, app: &str, slug: &str) -> Result<&'s mut Vec<Record>, Reply> {
    store
        .records
        .get_mut(&collection_key(app, slug))
        .ok_or_else(|| Reply::not_found("collection"))
}

#[derive(Deserialize)]
struct ItemBody {
    data: Record,
}

#[derive(Deserialize)]
struct DeleteItems {
    oids: Vec<String>,
}

async fn create_item(
    State(db): State<Db>,
    Path((app, slug)): Path<(String, String)>,
    Json(body): Json<ItemBody>,
) -> ApiResult {
    let mut store = db.write().await;
    let record = new_record(body.data);
    rows_mut(&mut store, &app, &slug)?.push(record.clone());
    Ok(Reply::ok("item created").data(Value::Object(record)))
}

async fn get_item(
    State(db): State<Db>,
    Path((app, slug, id)): Path<(String, String, String)>,
) -> ApiResult {
    let mut store = db.write().await;
    rows_mut(&mut store, &app, &slug)?
        .iter()
        .find(|r| r.get("_id").and_then(Value::as_str) == Some(id.as_str()))
        .cloned()
        .map(|r| Reply::ok("item").data(Value::Object(r)))
        .ok_or_else(|| Reply::not_found("item"))
}

async fn update_item(
    State(db): State<Db>,
    Path((app, slug, id)): Path<(String, String, String)>,
    Json(body): Json<ItemBody>,
) -> ApiResult {
    let mut store = db.write().await;
    let record = rows_mut(&mut store, &app, &slug)?
        .iter_mut()
        .find(|r| r.get("_id").and_then(Value::as_str) == Some(id.as_str()))
        .ok_or_else(|| Reply::not_found("item"))?;
    for (name, value) in body.data {
        if name != "_id" {
            record.insert(name, value);
        }
    }
    Ok(Reply::ok("item updated").data(Value::Object(record.clone())))
}

async fn delete_items(
    State(db): State<Db>,
    Path((app, slug)): Path<(String, String)>,
    Json(body): Json<DeleteItems>,
) -> ApiResult {
    let mut store = db.write().await;
    let rows = rows_mut(&mut store, &app, &slug)?;
    let before = rows.len();
    rows.retain(|r| {
        r.get("_id")
            .and_then(Value::as_str)
            .is_none_or(|id| !body.oids.iter().any(|oid| oid == id))
    });
    let deleted = before - rows.len();
    Ok(Reply::ok(format!("Deleted {deleted} items")).field("deleted", deleted))
}

// --- dataframes ---

#[derive(Deserialize)]
struct PageParams {
    next_page: Option<String>,
}

fn rows_of(body: Value) -> Result<Vec<Record>, Reply> {
    match body {
        Value::Array(rows) => rows.into_iter().map(object).collect(),
        _ => Err(Reply::bad_request("body must be a list of records")),
    }
}

async fn append_rows(
    State(db): State<Db>,
    Path((app, slug)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult {
    let rows = rows_of(body)?;
    let count = rows.len();
    let mut store = db.write().await;
    rows_mut(&mut store, &app, &slug)?.extend(rows.into_iter().map(new_record));
    tracing::debug!(%app, %slug, count, "appended rows");
    Ok(Reply::ok(format!("Inserted {count} rows")))
}

async fn replace_rows(
    State(db): State<Db>,
    Path((app, slug)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult {
    let rows = rows_of(body)?;
    let count = rows.len();
    let mut store = db.write().await;
    *rows_mut(&mut store, &app, &slug)? = rows.into_iter().map(new_record).collect();
    Ok(Reply::ok(format!("Replaced with {count} rows")))
}

async fn empty_rows(
    State(db): State<Db>,
    Path((app, slug)): Path<(String, String)>,
) -> ApiResult {
    let mut store = db.write().await;
    rows_mut(&mut store, &app, &slug)?.clear();
    Ok(Reply::ok("Collection emptied"))
}

fn str_field<'b>(body: &'b Value, key: &str) -> Result<&'b str, Reply> {
    body.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Reply::bad_request(format!("'{key}' is required")))
}

fn limit_of(body: &Value) -> Result<usize, Reply> {
    body.get("limit")
        .and_then(Value::as_u64)
        .filter(|l| (MIN_LIMIT..=MAX_LIMIT).contains(l))
        .map(|l| l as usize)
        .ok_or_else(|| {
            Reply::bad_request(format!("'limit' must be between {MIN_LIMIT} and {MAX_LIMIT}"))
        })
}

/// Collection a read targets: a stored query's collection, or `app` + `collection`.
fn read_target(store: &Store, body: &Value) -> Result<(String, String), Reply> {
    let key = match body.get("query").and_then(Value::as_str) {
        Some(slug) => {
            let query = store
                .resources
                .get(QUERY.name)
                .and_then(|m| m.get(slug))
                .ok_or_else(|| Reply::not_found("query"))?;
            collection_key(str_field(query, "app")?, str_field(query, "collection")?)
        }
        None => collection_key(str_field(body, "app")?, str_field(body, "collection")?),
    };
    if !store.records.contains_key(&key) {
        return Err(Reply::not_found("collection"));
    }
    Ok(key)
}

fn serve_page(store: &mut Store, cursor: Cursor) -> Reply {
    let total = cursor.rows.len();
    let end = (cursor.offset + cursor.limit).min(total);
    let data = cursor.rows[cursor.offset.min(end)..end]
        .iter()
        .cloned()
        .map(Value::Object)
        .collect();
    let mut reply = Reply::ok("Data fetched")
        .data(Value::Array(data))
        .field("total", total);
    if end < total {
        let id = Uuid::new_v4().simple().to_string();
        store.cursors.insert(id.clone(), Cursor { offset: end, ..cursor });
        reply = reply.field("next_page", id);
    }
    reply
}

fn paged(store: &mut Store, params: PageParams, body: &Value) -> ApiResult {
    let cursor = match params.next_page {
        Some(id) => store
            .cursors
            .remove(&id)
            .ok_or_else(|| Reply::not_found("page"))?,
        None => {
            let limit = limit_of(body)?;
            let key = read_target(store, body)?;
            Cursor {
                rows: store.records.get(&key).cloned().unwrap_or_default(),
                offset: 0,
                limit,
            }
        }
    };
    Ok(serve_page(store, cursor))
}

async fn read_data(
    State(db): State<Db>,
    Query(params): Query<PageParams>,
    Json(body): Json<Value>,
) -> ApiResult {
    paged(&mut *db.write().await, params, &body)
}

async fn aggregate(
    State(db): State<Db>,
    Query(params): Query<PageParams>,
    Json(body): Json<Value>,
) -> ApiResult {
    str_field(&body, "type")?;
    paged(&mut *db.write().await, params, &body)
}

// --- app transfer ---

async fn list_imports(State(db): State<Db>) -> Reply {
    let store = db.read().await;
    Reply::ok("import list").data(Value::Array(store.imports.clone()))
}

async fn transfer_app(State(db): State<Db>, Json(body): Json<Value>) -> ApiResult {
    if body.get("apps").and_then(Value::as_array).is_none() {
        return Err(Reply::bad_request("'apps' is required"));
    }
    db.write().await.transfers.push(body);
    Ok(Reply::ok("App imported"))
}
