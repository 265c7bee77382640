//! Blocking client for the Clappform API.
//!
//! # Overview
//! Typed descriptors for the resources of an environment (apps, collections,
//! queries, actionflows, questionnaires, users) and a [`Client`] that
//! authenticates, dispatches requests, and moves dataframes in and out of
//! collections in pages and chunks.
//!
//! # Design
//! - Requests and responses are plain data (`HttpRequest` / `HttpResponse`).
//!   The network round-trip sits behind the [`Transport`] trait, so every
//!   operation is testable without a server.
//! - The [`Session`](auth::Session) caches one bearer token and renews it
//!   when it expires within a minute.
//! - All failures surface as one [`ApiError`]; server rejections keep the
//!   status, code, message and response id of the envelope.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod auth;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod http;
pub mod resources;
pub mod transfer;
pub mod types;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use config::{ClientConfig, Credentials};
pub use error::ApiError;
pub use export::{AppExport, ExportConfig};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport, UreqTransport};
pub use resources::{
    Actionflow, App, Collection, OneOrMany, PathMode, Query, Questionnaire, Resource, User,
    Version,
};
pub use transfer::{
    AggregateOptions, Cell, Frame, Page, Pages, ReadSource, Search, Sorting, WriteReport,
};
pub use types::{ApiResponse, Envelope, Record};
