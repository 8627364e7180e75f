//! REST + WebSocket client for a remote coordination service.
//!
//! CRUD calls map to Feathers REST routes under the store location:
//!
//! | Method   | Route             | Expected status |
//! |----------|-------------------|-----------------|
//! | `find`   | `GET /svc?query`  | 200             |
//! | `get`    | `GET /svc/id`     | 200             |
//! | `create` | `POST /svc`       | 201             |
//! | `update` | `PUT /svc/id`     | 200             |
//! | `patch`  | `PATCH /svc/id`   | 200             |
//! | `remove` | `DELETE /svc/id`  | 200             |
//!
//! Change events arrive on a separate WebSocket feed opened by
//! [`DataStore::connect`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::feed;
use crate::query::{encode_query, Query};
use crate::store::{DataStore, DataStoreError, Page, ServiceEvent};

/// Broadcast channel capacity for feed events.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// HTTP client for a coordination service.
pub struct HttpDataStore {
    client: reqwest::Client,
    /// Base URL, always ending in `/`.
    location: String,
    feed_url: String,
    event_tx: broadcast::Sender<ServiceEvent>,
    feed: Mutex<Option<FeedTask>>,
}

/// Bookkeeping for the running feed reader.
struct FeedTask {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl HttpDataStore {
    /// Create a client for the store at `location`
    /// (e.g. `http://localhost:3030`). The feed URL is derived from it.
    pub fn new(location: impl Into<String>) -> Self {
        let location = normalize_location(location.into());
        let feed_url = feed::feed_url_for(&location);
        Self::with_feed_url(location, feed_url)
    }

    /// Create a client with an explicit feed URL.
    pub fn with_feed_url(location: impl Into<String>, feed_url: impl Into<String>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client: reqwest::Client::new(),
            location: normalize_location(location.into()),
            feed_url: feed_url.into(),
            event_tx,
            feed: Mutex::new(None),
        }
    }

    /// Base URL of the store, ending in `/`.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }

    fn collection_url(&self, service: &str) -> String {
        format!("{}{service}", self.location)
    }

    fn document_url(&self, service: &str, id: &str) -> String {
        format!("{}{service}/{id}", self.location)
    }

    // ---- private helpers ----

    /// Check the response status against `expected`, mapping 404 to
    /// [`DataStoreError::NotFound`] and anything else to
    /// [`DataStoreError::ApiError`] with the body text.
    async fn ensure_status(
        response: reqwest::Response,
        expected: StatusCode,
        service: &str,
        id: Option<&str>,
    ) -> Result<reqwest::Response, DataStoreError> {
        let status = response.status();
        if status == expected {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(DataStoreError::NotFound {
                    service: service.to_string(),
                    id: id.to_string(),
                });
            }
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(DataStoreError::ApiError {
            status: status.as_u16(),
            body,
        })
    }

    /// Parse a response with the expected status into JSON.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        expected: StatusCode,
        service: &str,
        id: Option<&str>,
    ) -> Result<T, DataStoreError> {
        let response = Self::ensure_status(response, expected, service, id).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| DataStoreError::Decode(e.to_string()))
    }
}

#[async_trait]
impl DataStore for HttpDataStore {
    async fn connect(&self) -> Result<(), DataStoreError> {
        let mut feed_slot = self.feed.lock().await;
        if let Some(task) = feed_slot.as_ref() {
            if !task.handle.is_finished() {
                return Ok(());
            }
        }

        let ws_stream = feed::open(&self.feed_url).await?;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(feed::run_feed(
            ws_stream,
            self.event_tx.clone(),
            cancel.clone(),
        ));

        *feed_slot = Some(FeedTask { cancel, handle });
        Ok(())
    }

    async fn disconnect(&self) {
        let task = self.feed.lock().await.take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                tracing::warn!(error = %e, "Feed task ended abnormally");
            }
            tracing::info!(url = %self.feed_url, "Disconnected from coordination service feed");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.event_tx.subscribe()
    }

    async fn find(&self, service: &str, query: &Query) -> Result<Page, DataStoreError> {
        let response = self
            .client
            .get(self.collection_url(service))
            .query(&encode_query(query))
            .send()
            .await?;
        Self::parse_response(response, StatusCode::OK, service, None).await
    }

    async fn get(&self, service: &str, id: &str) -> Result<Value, DataStoreError> {
        let response = self.client.get(self.document_url(service, id)).send().await?;
        Self::parse_response(response, StatusCode::OK, service, Some(id)).await
    }

    async fn create(&self, service: &str, data: Value) -> Result<Value, DataStoreError> {
        let response = self
            .client
            .post(self.collection_url(service))
            .json(&data)
            .send()
            .await?;
        Self::parse_response(response, StatusCode::CREATED, service, None).await
    }

    async fn update(&self, service: &str, id: &str, data: Value) -> Result<Value, DataStoreError> {
        let response = self
            .client
            .put(self.document_url(service, id))
            .json(&data)
            .send()
            .await?;
        Self::parse_response(response, StatusCode::OK, service, Some(id)).await
    }

    async fn patch(&self, service: &str, id: &str, data: Value) -> Result<Value, DataStoreError> {
        let response = self
            .client
            .patch(self.document_url(service, id))
            .json(&data)
            .send()
            .await?;
        Self::parse_response(response, StatusCode::OK, service, Some(id)).await
    }

    async fn remove(&self, service: &str, id: &str) -> Result<Value, DataStoreError> {
        let response = self
            .client
            .delete(self.document_url(service, id))
            .send()
            .await?;
        Self::parse_response(response, StatusCode::OK, service, Some(id)).await
    }
}

/// Ensure the store location ends with exactly one trailing `/`.
fn normalize_location(mut location: String) -> String {
    if !location.ends_with('/') {
        location.push('/');
    }
    location
}
