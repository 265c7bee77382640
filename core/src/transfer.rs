//! Paginated bulk-data transfer.
//!
//! # Design
//! Reads (`aggregate_dataframe`, `read_dataframe`) return [`Pages`], a lazy,
//! forward-only iterator. Nothing is sent until the first `next()`. The first
//! response fixes how many pages exist (`ceil(total / limit)`); every later
//! page is fetched with the server's `next_page` cursor after a pacing pause.
//! At most one page is held at a time and dropping the iterator between
//! pages stops the transfer.
//!
//! Writes normalize a [`Frame`] into JSON records and submit them in fixed
//! size chunks, pausing between chunks. The first failed chunk aborts the
//! write; nothing is resumed.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::Client;
use crate::error::ApiError;
use crate::http::{HttpMethod, Transport};
use crate::resources::{Collection, Query};
use crate::types::{ApiResponse, Envelope, Record};

pub const MIN_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 500;
pub const DEFAULT_PAGE_LIMIT: u32 = 100;
pub const DEFAULT_CHUNK_SIZE: usize = 100;

const AGGREGATE_PATH: &str = "/dataframe/aggregate";
const READ_DATA_PATH: &str = "/dataframe/read_data";

/// Sort keys of an aggregation. Unknown keys are passed through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sorting {
    #[serde(rename = "ASC")]
    pub asc: Vec<Value>,
    #[serde(rename = "DESC")]
    pub desc: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Free-text search of an aggregation. Unknown keys are passed through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Search {
    pub input: String,
    pub keys: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of `POST /dataframe/aggregate`. Every key is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateOptions {
    pub app: String,
    pub collection: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Records per page, within `MIN_PAGE_LIMIT..=MAX_PAGE_LIMIT`.
    pub limit: u32,
    pub sorting: Sorting,
    pub search: Search,
    // Present but nullable.
    #[serde(deserialize_with = "Option::deserialize")]
    pub item_id: Option<String>,
    pub deep_dive: Map<String, Value>,
}

impl AggregateOptions {
    pub fn new(app: &str, collection: &str, kind: &str, limit: u32) -> Self {
        Self {
            app: app.to_string(),
            collection: collection.to_string(),
            kind: kind.to_string(),
            limit,
            sorting: Sorting::default(),
            search: Search::default(),
            item_id: None,
            deep_dive: Map::new(),
        }
    }

    /// Decode and validate untyped options.
    pub fn from_value(value: Value) -> Result<Self, ApiError> {
        let options: Self = serde_json::from_value(value)
            .map_err(|e| ApiError::Validation(format!("aggregate options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        check_limit(self.limit)
    }
}

fn check_limit(limit: u32) -> Result<(), ApiError> {
    if !(MIN_PAGE_LIMIT..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(ApiError::Validation(format!(
            "limit {limit} not in {MIN_PAGE_LIMIT}..={MAX_PAGE_LIMIT}"
        )));
    }
    Ok(())
}

/// What `read_dataframe` reads: a stored query or a whole collection.
#[derive(Debug, Clone, Copy)]
pub enum ReadSource<'a> {
    Query(&'a Query),
    Collection(&'a Collection),
}

impl<'a> From<&'a Query> for ReadSource<'a> {
    fn from(query: &'a Query) -> Self {
        ReadSource::Query(query)
    }
}

impl<'a> From<&'a Collection> for ReadSource<'a> {
    fn from(collection: &'a Collection) -> Self {
        ReadSource::Collection(collection)
    }
}

impl ReadSource<'_> {
    fn body(&self, limit: u32) -> Result<Value, ApiError> {
        let mut body = Map::new();
        body.insert("limit".to_string(), limit.into());
        match self {
            ReadSource::Query(query) => {
                body.insert("query".to_string(), query.require_slug()?.into());
            }
            ReadSource::Collection(collection) => {
                let (app, slug) = collection.identity()?;
                body.insert("app".to_string(), app.into());
                body.insert("collection".to_string(), slug.into());
            }
        }
        Ok(Value::Object(body))
    }
}

/// One page of a paginated read.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    /// Records in the whole result, as reported by the first page.
    pub total: u64,
    pub next_page: Option<String>,
}

/// `total` of the first page of a paginated read, which must be present and
/// non-zero.
fn first_page_total(envelope: &Envelope) -> Result<u64, ApiError> {
    let total = match envelope.extra.get("total") {
        None | Some(Value::Null) => {
            return Err(ApiError::PaginationKey {
                missing_key: "total",
            })
        }
        Some(value) => value.as_u64().ok_or_else(|| {
            ApiError::Deserialization(format!("'total' is not a count: {value}"))
        })?,
    };
    if total == 0 {
        return Err(ApiError::PaginationTotal { total });
    }
    Ok(total)
}

impl Page {
    /// Only `data` and `next_page` are read from the envelope; `total` comes
    /// from the first page of the read.
    fn from_envelope(envelope: Envelope, total: u64) -> Result<Self, ApiError> {
        let next_page = match envelope.extra.get("next_page") {
            Some(Value::String(cursor)) => Some(cursor.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let records = match envelope.data {
            Some(Value::Array(rows)) => rows
                .into_iter()
                .map(|row| match row {
                    Value::Object(map) => Ok(map),
                    other => Err(ApiError::Deserialization(format!(
                        "page row is not an object: {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(ApiError::Deserialization(format!(
                    "page data is not a list: {other}"
                )))
            }
        };
        Ok(Self {
            records,
            total,
            next_page,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

enum PageState {
    First,
    Following {
        cursor: Option<String>,
        remaining: u64,
        total: u64,
    },
    Done,
}

/// Lazy sequence of pages. Fused: after an error or the last page it only
/// returns `None`.
pub struct Pages<'c, T> {
    client: &'c Client<T>,
    endpoint: &'static str,
    body: String,
    limit: u64,
    interval: Duration,
    fetched: u64,
    state: PageState,
}

impl<'c, T: Transport> Pages<'c, T> {
    fn new(
        client: &'c Client<T>,
        endpoint: &'static str,
        body: &Value,
        limit: u32,
        interval: Duration,
    ) -> Result<Self, ApiError> {
        let body =
            serde_json::to_string(body).map_err(|e| ApiError::Serialization(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            body,
            limit: u64::from(limit),
            interval,
            fetched: 0,
            state: PageState::First,
        })
    }

    fn fetch(&mut self, path: &str, total: Option<u64>) -> Result<Page, ApiError> {
        let envelope =
            self.client
                .private_request_raw(HttpMethod::Post, path, Some(self.body.clone()))?;
        let total = match total {
            Some(total) => total,
            None => first_page_total(&envelope)?,
        };
        let page = Page::from_envelope(envelope, total)?;
        self.fetched += 1;
        tracing::info!(
            endpoint = self.endpoint,
            page = self.fetched,
            records = page.len(),
            total = page.total,
            "fetched page"
        );
        Ok(page)
    }

    fn first(&mut self) -> Result<Page, ApiError> {
        let page = self.fetch(&format!("{}?extended=true", self.endpoint), None)?;
        let pages = page.total.div_ceil(self.limit);
        self.state = PageState::Following {
            cursor: page.next_page.clone(),
            remaining: pages - 1,
            total: page.total,
        };
        Ok(page)
    }

    fn following(
        &mut self,
        cursor: Option<String>,
        remaining: u64,
        total: u64,
    ) -> Result<Page, ApiError> {
        let cursor = cursor.ok_or(ApiError::PaginationKey {
            missing_key: "next_page",
        })?;
        self.client.transport().pause(self.interval);
        let page = self.fetch(&format!("{}?next_page={cursor}", self.endpoint), Some(total))?;
        self.state = PageState::Following {
            cursor: page.next_page.clone(),
            remaining: remaining - 1,
            total,
        };
        Ok(page)
    }
}

impl<T: Transport> Iterator for Pages<'_, T> {
    type Item = Result<Page, ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        let page = match std::mem::replace(&mut self.state, PageState::Done) {
            PageState::Done | PageState::Following { remaining: 0, .. } => return None,
            PageState::First => self.first(),
            PageState::Following {
                cursor,
                remaining,
                total,
            } => self.following(cursor, remaining, total),
        };
        Some(page)
    }
}

impl<T: Transport> std::iter::FusedIterator for Pages<'_, T> {}

/// One cell of a [`Frame`].
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(DateTime<Utc>),
    Json(Value),
}

impl Cell {
    /// JSON value sent to the server. Non-finite floats become `null` and
    /// datetimes become epoch seconds.
    pub fn normalize(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Int(i) => Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Cell::Text(s) => Value::String(s.clone()),
            Cell::DateTime(dt) => Value::from(dt.timestamp()),
            Cell::Json(v) => v.clone(),
        }
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(v: DateTime<Utc>) -> Self {
        Cell::DateTime(v)
    }
}

impl From<Value> for Cell {
    fn from(v: Value) -> Self {
        Cell::Json(v)
    }
}

impl<C: Into<Cell>> From<Option<C>> for Cell {
    fn from(v: Option<C>) -> Self {
        v.map_or(Cell::Null, Into::into)
    }
}

/// Column-named table of cells, the input of the write operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Frame {
    pub fn new<I, S>(columns: I) -> Result<Self, ApiError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let duplicate = {
            let mut seen = HashSet::new();
            columns.iter().find(|c| !seen.insert(c.as_str())).cloned()
        };
        if let Some(dup) = duplicate {
            return Err(ApiError::Validation(format!("duplicate column '{dup}'")));
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), ApiError> {
        if row.len() != self.columns.len() {
            return Err(ApiError::Validation(format!(
                "row has {} cells, frame has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Normalized rows, one JSON object per row.
    pub fn to_records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().map(Cell::normalize))
                    .collect()
            })
            .collect()
    }
}

/// Outcome of a chunked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub rows: usize,
    pub chunks: usize,
}

fn encode_records(records: &[Record]) -> Result<String, ApiError> {
    // serde_json emits UTF-8 and leaves non-ASCII characters unescaped.
    serde_json::to_string(records).map_err(|e| ApiError::Serialization(e.to_string()))
}

impl<T: Transport> Client<T> {
    /// Run an aggregation and page through its result.
    pub fn aggregate_dataframe(
        &self,
        options: &AggregateOptions,
        interval: Duration,
    ) -> Result<Pages<'_, T>, ApiError> {
        options.validate()?;
        let body =
            serde_json::to_value(options).map_err(|e| ApiError::Serialization(e.to_string()))?;
        Pages::new(self, AGGREGATE_PATH, &body, options.limit, interval)
    }

    /// Page through the records of a stored query or of a whole collection.
    pub fn read_dataframe<'s>(
        &self,
        source: impl Into<ReadSource<'s>>,
        limit: u32,
        interval: Duration,
    ) -> Result<Pages<'_, T>, ApiError> {
        check_limit(limit)?;
        let body = source.into().body(limit)?;
        Pages::new(self, READ_DATA_PATH, &body, limit, interval)
    }

    /// Append `frame` to `collection`, `chunk_size` rows per request.
    pub fn write_dataframe(
        &self,
        frame: &Frame,
        collection: &Collection,
        chunk_size: usize,
        interval: Duration,
    ) -> Result<WriteReport, ApiError> {
        if chunk_size == 0 {
            return Err(ApiError::Validation("chunk size must be positive".to_string()));
        }
        let path = collection.dataframe_path()?;
        let records = frame.to_records();
        let mut chunks = 0;
        for chunk in records.chunks(chunk_size) {
            if chunks > 0 {
                self.transport().pause(interval);
            }
            self.private_request_raw(HttpMethod::Post, &path, Some(encode_records(chunk)?))?;
            chunks += 1;
            tracing::info!(path, chunk = chunks, rows = chunk.len(), "wrote chunk");
        }
        Ok(WriteReport {
            rows: records.len(),
            chunks,
        })
    }

    /// Replace the whole content of `collection` with `frame`.
    pub fn replace_dataframe(
        &self,
        frame: &Frame,
        collection: &Collection,
    ) -> Result<ApiResponse, ApiError> {
        let path = collection.dataframe_path()?;
        let body = encode_records(&frame.to_records())?;
        self.private_request_raw(HttpMethod::Put, &path, Some(body))
            .map(Envelope::into_api_response)
    }

    /// Remove every record of `collection`.
    pub fn empty_dataframe(&self, collection: &Collection) -> Result<ApiResponse, ApiError> {
        let path = collection.dataframe_path()?;
        self.private_request::<()>(HttpMethod::Delete, &path, None)
            .map(Envelope::into_api_response)
    }
}
