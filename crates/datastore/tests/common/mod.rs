//! Fake coordination service for integration tests.
//!
//! Serves Feathers-style REST routes and a WebSocket change feed on an
//! ephemeral localhost port, backed by a [`MemoryDataStore`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use trainq_datastore::{DataStore, DataStoreError, MemoryDataStore, ServiceEvent};

type Shared = Arc<MemoryDataStore>;

/// A running fake service.
pub struct FakeService {
    pub addr: SocketAddr,
    pub store: Shared,
}

impl FakeService {
    /// HTTP location of the service, e.g. `http://127.0.0.1:5123`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// Start a fake service on `127.0.0.1:0`.
pub async fn spawn_fake_service() -> FakeService {
    let store: Shared = Arc::new(MemoryDataStore::new());

    let app = Router::new()
        .route("/feed", get(feed))
        .route("/{service}", get(find).post(create))
        .route(
            "/{service}/{id}",
            get(get_one).put(update).patch(patch).delete(remove),
        )
        .with_state(Arc::clone(&store));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake service");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake service crashed");
    });

    FakeService { addr, store }
}

/// An address nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    listener.local_addr().expect("local addr")
}

// ---- handlers ----

async fn feed(ws: WebSocketUpgrade, State(store): State<Shared>) -> Response {
    // Subscribe before the upgrade so no event published after the
    // handshake is missed.
    let events = store.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, events))
}

async fn forward_events(mut socket: WebSocket, mut events: broadcast::Receiver<ServiceEvent>) {
    while let Ok(event) = events.recv().await {
        let frame = json!({
            "service": event.service,
            "event": event.kind,
            "data": event.data,
        });
        if socket
            .send(Message::Text(frame.to_string().into()))
            .await
            .is_err()
        {
            break;
        }
    }
}

async fn find(
    State(store): State<Shared>,
    Path(service): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut query = serde_json::Map::new();
    for (key, value) in params {
        let value = match key.as_str() {
            "$limit" | "$skip" => value.parse::<u64>().map(Value::from).unwrap_or(Value::Null),
            _ => Value::String(value),
        };
        query.insert(key, value);
    }
    match store.find(&service, &query).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_one(State(store): State<Shared>, Path((service, id)): Path<(String, String)>) -> Response {
    respond(store.get(&service, &id).await, StatusCode::OK)
}

async fn create(
    State(store): State<Shared>,
    Path(service): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    respond(store.create(&service, body).await, StatusCode::CREATED)
}

async fn update(
    State(store): State<Shared>,
    Path((service, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    respond(store.update(&service, &id, body).await, StatusCode::OK)
}

async fn patch(
    State(store): State<Shared>,
    Path((service, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    respond(store.patch(&service, &id, body).await, StatusCode::OK)
}

async fn remove(State(store): State<Shared>, Path((service, id)): Path<(String, String)>) -> Response {
    respond(store.remove(&service, &id).await, StatusCode::OK)
}

fn respond(result: Result<Value, DataStoreError>, status: StatusCode) -> Response {
    match result {
        Ok(doc) => (status, Json(doc)).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(err: DataStoreError) -> Response {
    let status = match err {
        DataStoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        DataStoreError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DataStoreError::Decode(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"message": err.to_string()}))).into_response()
}
