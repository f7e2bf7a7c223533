//! Remote data gateway.
//!
//! The dashboard talks to its backend through three narrow operations:
//! table reads ([`Query`]), update-by-id writes ([`Update`]) and a change
//! feed that fires on any insert/update/delete in the public schema.
//!
//! Implementations:
//! - rest: PostgREST reads/writes over reqwest
//! - realtime: Phoenix-style websocket change feed
//! - memory: in-process tables for tests and offline fixtures

pub mod memory;
pub mod realtime;
pub mod rest;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::GatewayError;

pub use memory::MemoryGateway;
pub use rest::RestGateway;

/// Buffer size for change notices waiting to be drained.
pub const CHANGE_FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

/// `select * from <collection> [eq ..] [order by ..] [limit N] [single]`
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<(String, Value)>,
    pub order: Option<(String, Direction)>,
    pub limit: Option<usize>,
    pub single: bool,
}

impl Query {
    pub fn from(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
            single: false,
        }
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push((column.to_string(), value.into()));
        self
    }

    pub fn order(mut self, column: &str, direction: Direction) -> Self {
        self.order = Some((column.to_string(), direction));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Expect at most one row.
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }
}

/// `update <collection> set <fields> where id = <id>`
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub collection: String,
    pub id: String,
    pub set: Map<String, Value>,
}

impl Update {
    pub fn new(collection: &str, id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
            set: Map::new(),
        }
    }

    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set.insert(column.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    #[serde(other)]
    Unknown,
}

/// "Something changed somewhere." Only arrival matters to the controller;
/// table and payload are kept for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotice {
    pub kind: ChangeKind,
    pub table: Option<String>,
    pub payload: Value,
}

/// Receiving end of a change subscription.
///
/// Dropping the feed signals its driver to leave the channel; [`close`]
/// does the same and waits for the driver to finish.
///
/// [`close`]: ChangeFeed::close
pub struct ChangeFeed {
    receiver: mpsc::Receiver<ChangeNotice>,
    shutdown: Option<oneshot::Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

impl ChangeFeed {
    /// Feed with no background driver (the sender side lives elsewhere).
    pub fn new(receiver: mpsc::Receiver<ChangeNotice>) -> Self {
        Self {
            receiver,
            shutdown: None,
            driver: None,
        }
    }

    /// Feed backed by a task that stops when `shutdown` fires.
    pub fn with_driver(
        receiver: mpsc::Receiver<ChangeNotice>,
        shutdown: oneshot::Sender<()>,
        driver: JoinHandle<()>,
    ) -> Self {
        Self {
            receiver,
            shutdown: Some(shutdown),
            driver: Some(driver),
        }
    }

    /// Next notice, or `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<ChangeNotice> {
        self.receiver.recv().await
    }

    /// Drain one already-queued notice without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeNotice> {
        self.receiver.try_recv().ok()
    }

    /// Leave the channel and wait for the driver to exit.
    pub async fn close(&mut self) {
        self.receiver.close();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                log::warn!("Gateway: change feed driver ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
pub trait DataGateway: Send + Sync {
    /// Rows matching `query`, in the query's order.
    async fn select(&self, query: &Query) -> Result<Vec<Value>, GatewayError>;

    /// Apply `update` to the row with the given id.
    async fn update(&self, update: &Update) -> Result<(), GatewayError>;

    /// Subscribe to insert/update/delete across the whole public schema.
    async fn subscribe(&self, channel: &str) -> Result<ChangeFeed, GatewayError>;
}

/// Run `query` and deserialize every row.
pub async fn fetch_rows<T: DeserializeOwned>(
    gateway: &dyn DataGateway,
    query: &Query,
) -> Result<Vec<T>, GatewayError> {
    let rows = gateway.select(query).await?;
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(GatewayError::from))
        .collect()
}

/// Run a single-row `query`. No row is `Ok(None)`.
pub async fn fetch_single<T: DeserializeOwned>(
    gateway: &dyn DataGateway,
    query: &Query,
) -> Result<Option<T>, GatewayError> {
    let query = query.clone().single();
    let mut rows = gateway.select(&query).await?;
    match rows.len() {
        0 => Ok(None),
        _ => Ok(Some(serde_json::from_value(rows.swap_remove(0))?)),
    }
}
