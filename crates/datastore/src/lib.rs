//! Coordination service client library.
//!
//! The coordination service is a document store organised into named
//! services (collections) with Feathers-style CRUD methods and a push
//! feed of change events. This crate provides:
//!
//! - [`DataStore`] -- the client trait the dispatcher is written against.
//! - [`Service`] -- a handle bound to one named collection.
//! - [`HttpDataStore`] -- REST client over [`reqwest`] plus a WebSocket
//!   event feed.
//! - [`MemoryDataStore`] -- an in-process implementation for tests and
//!   local runs.
//! - [`query`] -- query-string encoding for `find`.

pub mod feed;
pub mod http;
pub mod memory;
pub mod query;
pub mod store;

pub use http::HttpDataStore;
pub use memory::MemoryDataStore;
pub use query::Query;
pub use store::{DataStore, DataStoreError, Page, Service, ServiceEvent, ServiceEventKind};
