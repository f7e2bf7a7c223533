//! In-process gateway.
//!
//! Holds collections as JSON rows and answers the same query shapes as the
//! REST backend. Every write fans a change notice out to all live
//! subscribers, which makes it a faithful stand-in for tests and for the
//! CLI's `--fixture` mode.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{
    ChangeFeed, ChangeKind, ChangeNotice, DataGateway, Direction, Query, Update,
    CHANGE_FEED_CAPACITY,
};
use crate::error::GatewayError;

#[derive(Default)]
pub struct MemoryGateway {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    subscribers: Mutex<Vec<mpsc::Sender<ChangeNotice>>>,
    updates: Mutex<Vec<Update>>,
    selects: Mutex<Vec<Query>>,
    failing: Mutex<HashSet<String>>,
    refusing: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{ "<collection>": [rows...] }` from a JSON file.
    ///
    /// A collection given as a single object (e.g. `finances`) is stored as a
    /// one-row table.
    pub fn from_fixture(path: &Path) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::NotFound(format!("{}: {}", path.display(), e)))?;
        let root: HashMap<String, Value> = serde_json::from_str(&content)?;
        let gateway = Self::new();
        for (collection, rows) in root {
            let rows = match rows {
                Value::Array(rows) => rows,
                other => vec![other],
            };
            gateway.seed(&collection, rows);
        }
        Ok(gateway)
    }

    /// Replace a collection's rows without notifying subscribers.
    pub fn seed(&self, collection: &str, rows: Vec<Value>) {
        self.tables.lock().insert(collection.to_string(), rows);
    }

    /// Make every read of `collection` fail until [`heal`](Self::heal).
    pub fn fail_collection(&self, collection: &str) {
        self.failing.lock().insert(collection.to_string());
    }

    pub fn heal(&self, collection: &str) {
        self.failing.lock().remove(collection);
    }

    /// Current rows of a collection, unordered.
    pub fn rows(&self, collection: &str) -> Vec<Value> {
        self.tables
            .lock()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Every update request received so far.
    pub fn updates(&self) -> Vec<Update> {
        self.updates.lock().clone()
    }

    /// Every select request received so far.
    pub fn selects(&self) -> Vec<Query> {
        self.selects.lock().clone()
    }

    /// Make `subscribe` fail, as an unreachable realtime endpoint would.
    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.refusing.store(refuse, AtomicOrdering::SeqCst);
    }

    /// End every open change feed, as a dropped socket would.
    pub fn drop_subscribers(&self) {
        self.subscribers.lock().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| !tx.is_closed());
        subs.len()
    }

    /// Insert a row as an outside writer would.
    pub fn insert(&self, collection: &str, row: Value) {
        self.tables
            .lock()
            .entry(collection.to_string())
            .or_default()
            .push(row.clone());
        self.notify(ChangeKind::Insert, collection, row);
    }

    /// Delete a row by id as an outside writer would.
    pub fn delete(&self, collection: &str, id: &str) {
        let removed = {
            let mut tables = self.tables.lock();
            let rows = tables.entry(collection.to_string()).or_default();
            let before = rows.len();
            rows.retain(|row| row.get("id") != Some(&json!(id)));
            before != rows.len()
        };
        if removed {
            self.notify(ChangeKind::Delete, collection, json!({ "id": id }));
        }
    }

    fn notify(&self, kind: ChangeKind, table: &str, record: Value) {
        let notice = ChangeNotice {
            kind,
            table: Some(table.to_string()),
            payload: json!({ "record": record }),
        };
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| match tx.try_send(notice.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("Gateway: change feed full, dropping notice for {}", table);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// Postgres ordering: nulls sort after every value ascending.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl DataGateway for MemoryGateway {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, GatewayError> {
        self.selects.lock().push(query.clone());

        if self.failing.lock().contains(&query.collection) {
            return Err(GatewayError::Api {
                status: 503,
                message: format!("{} unavailable", query.collection),
            });
        }

        let mut rows: Vec<Value> = self
            .rows(&query.collection)
            .into_iter()
            .filter(|row| {
                query
                    .filters
                    .iter()
                    .all(|(col, val)| row.get(col) == Some(val))
            })
            .collect();

        if let Some((column, direction)) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(column), b.get(column));
                match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }

        if let Some(n) = query.limit {
            rows.truncate(n);
        }
        if query.single {
            rows.truncate(1);
        }
        Ok(rows)
    }

    async fn update(&self, update: &Update) -> Result<(), GatewayError> {
        self.updates.lock().push(update.clone());

        let changed = {
            let mut tables = self.tables.lock();
            let row = tables.get_mut(&update.collection).and_then(|rows| {
                rows.iter_mut()
                    .find(|row| row.get("id") == Some(&json!(update.id)))
            });
            match row {
                Some(Value::Object(fields)) => {
                    for (k, v) in &update.set {
                        fields.insert(k.clone(), v.clone());
                    }
                    Some(Value::Object(fields.clone()))
                }
                _ => None,
            }
        };

        // A filter matching nothing is not an error on the backend either.
        if let Some(record) = changed {
            self.notify(ChangeKind::Update, &update.collection, record);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<ChangeFeed, GatewayError> {
        if self.refusing.load(AtomicOrdering::SeqCst) {
            return Err(GatewayError::WebSocket(format!(
                "subscription to {} refused",
                channel
            )));
        }
        let (tx, rx) = mpsc::channel(CHANGE_FEED_CAPACITY);
        self.subscribers.lock().push(tx);
        log::debug!("Gateway: memory subscriber joined {}", channel);
        Ok(ChangeFeed::new(rx))
    }
}
