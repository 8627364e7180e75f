//! In-process coordination service.
//!
//! [`MemoryDataStore`] keeps documents in memory, assigns `_id`s, and
//! publishes a [`ServiceEvent`] for every change, mirroring what the
//! remote service would push over its feed. It can be switched offline
//! to simulate an unreachable service, either as a whole or one named
//! service at a time.
//!
//! `find` supports plain equality filters plus `$limit` and `$skip`;
//! other `$` operators are ignored.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::query::Query;
use crate::store::{DataStore, DataStoreError, Page, ServiceEvent, ServiceEventKind};

/// Broadcast channel capacity for change events.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Page size when a `find` query carries no `$limit`.
const DEFAULT_PAGE_LIMIT: u64 = 10;

/// Name of the store-assigned identity field.
const ID_FIELD: &str = "_id";

/// In-memory document store with a change feed.
pub struct MemoryDataStore {
    /// Documents per service, in insertion order.
    services: Mutex<HashMap<String, Vec<Map<String, Value>>>>,
    event_tx: broadcast::Sender<ServiceEvent>,
    offline: AtomicBool,
    /// Services whose calls fail while the connection stays up.
    failing: Mutex<HashSet<String>>,
    connected: AtomicBool,
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDataStore {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            services: Mutex::new(HashMap::new()),
            event_tx,
            offline: AtomicBool::new(false),
            failing: Mutex::new(HashSet::new()),
            connected: AtomicBool::new(false),
        }
    }

    /// Simulate the service becoming unreachable (`true`) or coming back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make every call against `service` fail as unreachable (`true`), or
    /// serve it again. Connecting and other services are unaffected.
    pub fn set_service_offline(&self, service: &str, offline: bool) {
        let mut failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if offline {
            failing.insert(service.to_string());
        } else {
            failing.remove(service);
        }
    }

    /// Whether [`DataStore::connect`] has been called without a matching
    /// [`DataStore::disconnect`].
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of every document in `service`, in insertion order.
    pub fn documents(&self, service: &str) -> Vec<Value> {
        self.with_services(|services| {
            services
                .get(service)
                .map(|docs| docs.iter().cloned().map(Value::Object).collect())
                .unwrap_or_default()
        })
    }

    // ---- private helpers ----

    fn ensure_online(&self) -> Result<(), DataStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(DataStoreError::Unreachable(
                "in-memory coordination service is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn ensure_serving(&self, service: &str) -> Result<(), DataStoreError> {
        self.ensure_online()?;
        let failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing.contains(service) {
            Err(DataStoreError::Unreachable(format!(
                "in-memory service {service} is offline"
            )))
        } else {
            Ok(())
        }
    }

    fn with_services<T>(&self, f: impl FnOnce(&mut HashMap<String, Vec<Map<String, Value>>>) -> T) -> T {
        // A panic while holding the lock cannot leave a document half-written.
        let mut guard = self.services.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    fn publish(&self, service: &str, kind: ServiceEventKind, doc: &Map<String, Value>) {
        let _ = self
            .event_tx
            .send(ServiceEvent::new(service, kind, Value::Object(doc.clone())));
    }

    /// Apply `f` to the document `id` in `service`, publish `kind`, and
    /// return the resulting document.
    fn modify(
        &self,
        service: &str,
        id: &str,
        kind: ServiceEventKind,
        f: impl FnOnce(&mut Map<String, Value>),
    ) -> Result<Value, DataStoreError> {
        self.ensure_serving(service)?;
        let doc = self.with_services(|services| {
            let doc = services
                .get_mut(service)
                .and_then(|docs| docs.iter_mut().find(|d| doc_id(d) == Some(id)))?;
            f(doc);
            Some(doc.clone())
        });
        let doc = doc.ok_or_else(|| not_found(service, id))?;
        self.publish(service, kind, &doc);
        Ok(Value::Object(doc))
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn connect(&self) -> Result<(), DataStoreError> {
        self.ensure_online()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.event_tx.subscribe()
    }

    async fn find(&self, service: &str, query: &Query) -> Result<Page, DataStoreError> {
        self.ensure_serving(service)?;

        let limit = query
            .get("$limit")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_PAGE_LIMIT);
        let skip = query.get("$skip").and_then(Value::as_u64).unwrap_or(0);

        let matching: Vec<Value> = self.with_services(|services| {
            services
                .get(service)
                .map(|docs| {
                    docs.iter()
                        .filter(|doc| matches_filters(doc, query))
                        .cloned()
                        .map(Value::Object)
                        .collect()
                })
                .unwrap_or_default()
        });

        let total = matching.len() as u64;
        let data = matching
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect();

        Ok(Page {
            total,
            limit,
            skip,
            data,
        })
    }

    async fn get(&self, service: &str, id: &str) -> Result<Value, DataStoreError> {
        self.ensure_serving(service)?;
        self.with_services(|services| {
            services
                .get(service)
                .and_then(|docs| docs.iter().find(|d| doc_id(d) == Some(id)))
                .cloned()
                .map(Value::Object)
        })
        .ok_or_else(|| not_found(service, id))
    }

    async fn create(&self, service: &str, data: Value) -> Result<Value, DataStoreError> {
        self.ensure_serving(service)?;
        let mut doc = into_object(data)?;
        if doc_id(&doc).is_none() {
            doc.insert(
                ID_FIELD.to_string(),
                Value::String(uuid::Uuid::new_v4().simple().to_string()),
            );
        }

        self.with_services(|services| {
            services
                .entry(service.to_string())
                .or_default()
                .push(doc.clone());
        });
        self.publish(service, ServiceEventKind::Created, &doc);
        Ok(Value::Object(doc))
    }

    async fn update(&self, service: &str, id: &str, data: Value) -> Result<Value, DataStoreError> {
        let mut replacement = into_object(data)?;
        replacement.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        self.modify(service, id, ServiceEventKind::Updated, |doc| {
            *doc = replacement;
        })
    }

    async fn patch(&self, service: &str, id: &str, data: Value) -> Result<Value, DataStoreError> {
        let partial = into_object(data)?;
        self.modify(service, id, ServiceEventKind::Patched, |doc| {
            for (key, value) in partial {
                if key != ID_FIELD {
                    doc.insert(key, value);
                }
            }
        })
    }

    async fn remove(&self, service: &str, id: &str) -> Result<Value, DataStoreError> {
        self.ensure_serving(service)?;
        let removed = self.with_services(|services| {
            let docs = services.get_mut(service)?;
            let index = docs.iter().position(|d| doc_id(d) == Some(id))?;
            Some(docs.remove(index))
        });
        let doc = removed.ok_or_else(|| not_found(service, id))?;
        self.publish(service, ServiceEventKind::Removed, &doc);
        Ok(Value::Object(doc))
    }
}

fn doc_id(doc: &Map<String, Value>) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

fn not_found(service: &str, id: &str) -> DataStoreError {
    DataStoreError::NotFound {
        service: service.to_string(),
        id: id.to_string(),
    }
}

fn into_object(data: Value) -> Result<Map<String, Value>, DataStoreError> {
    match data {
        Value::Object(map) => Ok(map),
        other => Err(DataStoreError::Decode(format!(
            "document must be a JSON object, got {other}"
        ))),
    }
}

/// Plain equality on every non-`$` key of `query`.
fn matches_filters(doc: &Map<String, Value>, query: &Query) -> bool {
    query
        .iter()
        .filter(|(key, _)| !key.starts_with('$'))
        .all(|(key, expected)| doc.get(key) == Some(expected))
}
