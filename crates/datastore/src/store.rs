//! The coordination service client trait and its supporting types.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::query::Query;

/// Page size used by [`Service::items`] when walking a collection.
const ITEMS_PAGE_SIZE: u64 = 10;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Kind of change announced on the push feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceEventKind {
    Created,
    Updated,
    Patched,
    Removed,
}

/// A change to one document, as delivered by the push feed.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceEvent {
    /// Name of the service (collection) the document belongs to.
    pub service: String,
    pub kind: ServiceEventKind,
    /// The document after the change (before it, for `removed`).
    pub data: Value,
    /// When this process received the event (UTC).
    pub received_at: DateTime<Utc>,
}

impl ServiceEvent {
    pub fn new(service: impl Into<String>, kind: ServiceEventKind, data: Value) -> Self {
        Self {
            service: service.into(),
            kind,
            data,
            received_at: Utc::now(),
        }
    }

    /// Whether this event announces a new document in `service`.
    pub fn is_created_in(&self, service: &str) -> bool {
        self.kind == ServiceEventKind::Created && self.service == service
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// One page of `find` results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub total: u64,
    pub limit: u64,
    pub skip: u64,
    pub data: Vec<Value>,
}

// ---------------------------------------------------------------------------
// DataStore
// ---------------------------------------------------------------------------

/// Client for a coordination service.
///
/// Every method addresses a named service. Failures are reported to the
/// caller and never retried here.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Open the push feed. Calling it while connected is a no-op.
    async fn connect(&self) -> Result<(), DataStoreError>;

    /// Close the push feed. Calling it while disconnected is a no-op.
    async fn disconnect(&self);

    /// Subscribe to change events from every service.
    ///
    /// Subscribers only see events published after they subscribe.
    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent>;

    async fn find(&self, service: &str, query: &Query) -> Result<Page, DataStoreError>;

    async fn get(&self, service: &str, id: &str) -> Result<Value, DataStoreError>;

    /// Create a document and return it with its store-assigned `_id`.
    async fn create(&self, service: &str, data: Value) -> Result<Value, DataStoreError>;

    /// Replace a document.
    async fn update(&self, service: &str, id: &str, data: Value) -> Result<Value, DataStoreError>;

    /// Merge `data` into a document.
    async fn patch(&self, service: &str, id: &str, data: Value) -> Result<Value, DataStoreError>;

    /// Remove a document and return it.
    async fn remove(&self, service: &str, id: &str) -> Result<Value, DataStoreError>;
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// A [`DataStore`] bound to one named service.
#[derive(Clone)]
pub struct Service {
    store: Arc<dyn DataStore>,
    name: String,
}

impl Service {
    pub fn new(store: Arc<dyn DataStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn find(&self, query: &Query) -> Result<Page, DataStoreError> {
        self.store.find(&self.name, query).await
    }

    pub async fn get(&self, id: &str) -> Result<Value, DataStoreError> {
        self.store.get(&self.name, id).await
    }

    pub async fn create(&self, data: Value) -> Result<Value, DataStoreError> {
        self.store.create(&self.name, data).await
    }

    pub async fn update(&self, id: &str, data: Value) -> Result<Value, DataStoreError> {
        self.store.update(&self.name, id, data).await
    }

    pub async fn patch(&self, id: &str, data: Value) -> Result<Value, DataStoreError> {
        self.store.patch(&self.name, id, data).await
    }

    pub async fn remove(&self, id: &str) -> Result<Value, DataStoreError> {
        self.store.remove(&self.name, id).await
    }

    /// Stream every document matching `query`, fetching pages of
    /// [`ITEMS_PAGE_SIZE`] on demand.
    ///
    /// Any `$limit`/`$skip` in `query` is overridden. The stream ends at
    /// the first empty page or the first error.
    pub fn items(&self, query: Query) -> impl Stream<Item = Result<Value, DataStoreError>> + '_ {
        struct Cursor {
            query: Query,
            skip: u64,
            buffer: VecDeque<Value>,
            done: bool,
        }

        let cursor = Cursor {
            query,
            skip: 0,
            buffer: VecDeque::new(),
            done: false,
        };

        stream::unfold(cursor, move |mut cursor| async move {
            loop {
                if let Some(item) = cursor.buffer.pop_front() {
                    return Some((Ok(item), cursor));
                }
                if cursor.done {
                    return None;
                }

                let mut page_query = cursor.query.clone();
                page_query.insert("$limit".into(), ITEMS_PAGE_SIZE.into());
                page_query.insert("$skip".into(), cursor.skip.into());

                match self.find(&page_query).await {
                    Ok(page) => {
                        if page.data.is_empty() {
                            return None;
                        }
                        cursor.skip = page.skip + page.data.len() as u64;
                        cursor.done = cursor.skip >= page.total;
                        cursor.buffer.extend(page.data);
                    }
                    Err(e) => {
                        cursor.done = true;
                        return Some((Err(e), cursor));
                    }
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from a coordination service client.
///
/// No distinction is made between transient and permanent failures.
#[derive(Debug, thiserror::Error)]
pub enum DataStoreError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with an unexpected status code.
    #[error("Coordination service error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    #[error("Document {id} not found in service {service}")]
    NotFound { service: String, id: String },

    /// The service could not be reached at all.
    #[error("Coordination service unreachable: {0}")]
    Unreachable(String),

    /// The push feed could not be opened or failed mid-stream.
    #[error("Event feed error: {0}")]
    Feed(String),

    /// A response or request body did not have the expected shape.
    #[error("Malformed document: {0}")]
    Decode(String),
}
