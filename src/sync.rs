//! Synchronization controller.
//!
//! Owns the dashboard's slices and keeps them in step with the backend:
//! - `refresh()` reads every collection concurrently and replaces each
//!   slice whose read succeeded
//! - `start()` subscribes to the change feed and spawns one consumer that
//!   calls `refresh()` per notice (optionally coalescing bursts). When the
//!   feed ends the consumer resubscribes with backoff and refreshes once
//!   to catch up
//! - `toggle_task()` writes a task's completion flag and leaves the local
//!   slice alone; the resulting change notice brings the new value back
//!
//! Overlapping refreshes are not fenced. Whichever read resolves last wins
//! its slice.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::{Config, NetProfitMode};
use crate::error::GatewayError;
use crate::gateway::{fetch_rows, fetch_single, ChangeFeed, DataGateway, Direction, Query, Update};
use crate::types::{
    Event, Expense, FinanceSnapshot, MarketPrice, Project, StrategicInsight, SystemLog, Task,
};

pub const FINANCES: &str = "finances";
pub const PROJECTS: &str = "projects";
pub const EVENTS: &str = "events";
pub const LOGS: &str = "logs";
pub const MARKET_PRICES: &str = "market_prices";
pub const TASKS: &str = "tasks";
pub const BRAIN_INSIGHTS: &str = "brain_insights";
pub const EXPENSES: &str = "expenses";

/// Local copy of every collection the dashboard renders.
#[derive(Debug, Clone, Default)]
pub struct Slices {
    pub finance: FinanceSnapshot,
    pub projects: Vec<Project>,
    pub events: Vec<Event>,
    pub tasks: Vec<Task>,
    pub market: Vec<MarketPrice>,
    pub logs: Vec<SystemLog>,
    pub insights: Vec<StrategicInsight>,
    pub expenses: Vec<Expense>,
}

/// Backoff between resubscription attempts after the change feed drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based), doubling up to the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(exponent)
                .min(self.max_backoff_ms),
        )
    }
}

/// Controller settings derived from [`Config`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub channel: String,
    pub log_limit: usize,
    pub fetch_expenses: bool,
    pub coalesce: Duration,
    pub default_finance: FinanceSnapshot,
    pub reconnect: ReconnectPolicy,
}

impl From<&Config> for SyncSettings {
    fn from(config: &Config) -> Self {
        Self {
            channel: config.channel.clone(),
            log_limit: config.effective_log_limit(),
            fetch_expenses: config.net_profit_mode == NetProfitMode::SubtractExpenses,
            coalesce: Duration::from_millis(config.coalesce_ms),
            default_finance: config.default_finance,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Outcome of one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Collections whose read failed; their slices kept the previous rows.
    pub failed: Vec<&'static str>,
}

impl RefreshReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Marks a refresh as finished when dropped, whatever the outcome.
struct LoadingGuard<'a>(&'a AtomicUsize);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Subscription {
    stop: oneshot::Sender<()>,
    consumer: JoinHandle<()>,
}

pub struct SyncController {
    gateway: Arc<dyn DataGateway>,
    settings: SyncSettings,
    slices: RwLock<Slices>,
    in_flight: AtomicUsize,
    live: AtomicBool,
    generation: watch::Sender<u64>,
    subscription: Mutex<Option<Subscription>>,
}

impl SyncController {
    /// Controller with empty slices and no subscription yet.
    pub fn new(gateway: Arc<dyn DataGateway>, settings: SyncSettings) -> Arc<Self> {
        let slices = Slices {
            finance: settings.default_finance,
            ..Slices::default()
        };
        let (generation, _) = watch::channel(0);
        Arc::new(Self {
            gateway,
            settings,
            slices: RwLock::new(slices),
            in_flight: AtomicUsize::new(0),
            live: AtomicBool::new(false),
            generation,
            subscription: Mutex::new(None),
        })
    }

    /// Construct and immediately open the standing change subscription.
    pub async fn spawn(
        gateway: Arc<dyn DataGateway>,
        settings: SyncSettings,
    ) -> Result<Arc<Self>, GatewayError> {
        let controller = Self::new(gateway, settings);
        controller.start().await?;
        Ok(controller)
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Snapshot of the current slices.
    pub fn slices(&self) -> Slices {
        self.slices.read().clone()
    }

    /// True while at least one refresh is in flight.
    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Number of refresh cycles completed so far.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Receiver that ticks after every completed refresh.
    pub fn watch_refreshes(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// True while a change feed is connected. False before `start`, after
    /// `stop`, and while the consumer is resubscribing.
    pub fn is_subscribed(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn queries(&self) -> [Query; 8] {
        [
            Query::from(FINANCES).single(),
            Query::from(PROJECTS).order("created_at", Direction::Desc),
            Query::from(EVENTS).order("date", Direction::Asc),
            Query::from(LOGS)
                .order("created_at", Direction::Desc)
                .limit(self.settings.log_limit),
            Query::from(MARKET_PRICES),
            Query::from(TASKS),
            Query::from(BRAIN_INSIGHTS)
                .order("created_at", Direction::Desc)
                .limit(1),
            Query::from(EXPENSES),
        ]
    }

    /// Run one refresh cycle.
    ///
    /// Reads are issued together and isolated from each other: a failed read
    /// is logged, reported, and leaves its slice as it was.
    pub async fn refresh(&self) -> RefreshReport {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _loading = LoadingGuard(&self.in_flight);

        let gw = self.gateway.as_ref();
        let [finance_q, projects_q, events_q, logs_q, market_q, tasks_q, insights_q, expenses_q] =
            self.queries();
        let fetch_expenses = self.settings.fetch_expenses;

        let (finance, projects, events, logs, market, tasks, insights, expenses) = tokio::join!(
            fetch_single::<FinanceSnapshot>(gw, &finance_q),
            fetch_rows::<Project>(gw, &projects_q),
            fetch_rows::<Event>(gw, &events_q),
            fetch_rows::<SystemLog>(gw, &logs_q),
            fetch_rows::<MarketPrice>(gw, &market_q),
            fetch_rows::<Task>(gw, &tasks_q),
            fetch_rows::<StrategicInsight>(gw, &insights_q),
            async {
                if fetch_expenses {
                    Some(fetch_rows::<Expense>(gw, &expenses_q).await)
                } else {
                    None
                }
            },
        );

        let mut report = RefreshReport::default();
        {
            let mut slices = self.slices.write();
            match finance {
                Ok(Some(snapshot)) => slices.finance = snapshot,
                Ok(None) => log::debug!("Sync: no finances row, keeping last known figures"),
                Err(e) => record_failure(&mut report, FINANCES, &e),
            }
            replace(&mut slices.projects, projects, PROJECTS, &mut report);
            replace(&mut slices.events, events, EVENTS, &mut report);
            replace(&mut slices.logs, logs, LOGS, &mut report);
            replace(&mut slices.market, market, MARKET_PRICES, &mut report);
            replace(&mut slices.tasks, tasks, TASKS, &mut report);
            replace(&mut slices.insights, insights, BRAIN_INSIGHTS, &mut report);
            if let Some(expenses) = expenses {
                replace(&mut slices.expenses, expenses, EXPENSES, &mut report);
            }
        }

        self.generation.send_modify(|g| *g += 1);
        if report.is_complete() {
            log::debug!("Sync: refresh complete");
        } else {
            log::info!("Sync: refresh finished with {} failed reads", report.failed.len());
        }
        report
    }

    /// Flip a task's completion flag on the backend.
    ///
    /// Local state is untouched until the change feed triggers a refresh.
    pub async fn toggle_task(&self, task_id: &str, completed: bool) -> Result<(), GatewayError> {
        let update = Update::new(TASKS, task_id).set("is_completed", !completed);
        self.gateway.update(&update).await.map_err(|e| {
            log::warn!("Sync: failed to toggle task {}: {}", task_id, e);
            e
        })
    }

    /// Subscribe to the change feed. A second call keeps the existing one.
    ///
    /// If the first subscription attempt fails the error is returned, but the
    /// consumer is spawned anyway and keeps retrying under the reconnect
    /// policy until [`stop`](Self::stop).
    pub async fn start(self: &Arc<Self>) -> Result<(), GatewayError> {
        {
            let mut slot = self.subscription.lock();
            if slot.as_ref().is_some_and(|s| !s.consumer.is_finished()) {
                log::debug!("Sync: already subscribed");
                return Ok(());
            }
            // A finished consumer left its slot behind; start over.
            *slot = None;
        }

        let (feed, result) = match self.gateway.subscribe(&self.settings.channel).await {
            Ok(feed) => (Some(feed), Ok(())),
            Err(e) => {
                log::warn!(
                    "Sync: subscribe to {} failed, retrying in background: {}",
                    self.settings.channel,
                    e
                );
                (None, Err(e))
            }
        };
        let connected = feed.is_some();
        if connected {
            self.live.store(true, Ordering::SeqCst);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let consumer = tokio::spawn(run_feed(Arc::downgrade(self), feed, stop_rx));

        let mut guard = self.subscription.lock();
        if guard.is_some() {
            // Lost a race with a concurrent start(); keep the first.
            consumer.abort();
            return result;
        }
        *guard = Some(Subscription {
            stop: stop_tx,
            consumer,
        });
        if connected {
            log::info!("Sync: listening on channel {}", self.settings.channel);
        }
        result
    }

    /// Release the change subscription and wait for its consumer to exit.
    pub async fn stop(&self) {
        let subscription = self.subscription.lock().take();
        self.live.store(false, Ordering::SeqCst);
        if let Some(Subscription { stop, consumer }) = subscription {
            let _ = stop.send(());
            if let Err(e) = consumer.await {
                if !e.is_cancelled() {
                    log::warn!("Sync: change consumer ended abnormally: {}", e);
                }
            }
            log::info!("Sync: unsubscribed from {}", self.settings.channel);
        }
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.get_mut().take() {
            subscription.consumer.abort();
        }
    }
}

fn record_failure(report: &mut RefreshReport, collection: &'static str, err: &GatewayError) {
    log::warn!(
        "Sync: failed to fetch {} (retryable: {}): {}",
        collection,
        err.is_retryable(),
        err
    );
    report.failed.push(collection);
}

fn replace<T>(
    slot: &mut Vec<T>,
    result: Result<Vec<T>, GatewayError>,
    collection: &'static str,
    report: &mut RefreshReport,
) {
    match result {
        Ok(rows) => *slot = rows,
        Err(e) => record_failure(report, collection, &e),
    }
}

/// Consumer task: drain the current feed, and when it ends resubscribe
/// under the reconnect policy. Runs until `stop` fires or the controller
/// is dropped.
async fn run_feed(
    controller: Weak<SyncController>,
    mut feed: Option<ChangeFeed>,
    mut stop: oneshot::Receiver<()>,
) {
    let Some(settings) = controller.upgrade().map(|c| c.settings.clone()) else {
        return;
    };

    loop {
        let current = match feed.take() {
            Some(feed) => feed,
            None => match resubscribe(&controller, &settings, &mut stop).await {
                Some(feed) => feed,
                None => return,
            },
        };

        match drain_feed(&controller, current, &mut stop, settings.coalesce).await {
            Ok(()) => return,
            Err(e) => {
                let Some(controller) = controller.upgrade() else { return };
                controller.live.store(false, Ordering::SeqCst);
                log::warn!(
                    "Sync: {} on {} (retryable: {}), resubscribing",
                    e,
                    settings.channel,
                    e.is_retryable()
                );
            }
        }
    }
}

/// One refresh per notice, or one per burst when `coalesce` is non-zero.
///
/// `Ok` when stopped or the controller is gone, `Err(Closed)` when the feed
/// itself ended.
async fn drain_feed(
    controller: &Weak<SyncController>,
    mut feed: ChangeFeed,
    stop: &mut oneshot::Receiver<()>,
    coalesce: Duration,
) -> Result<(), GatewayError> {
    let outcome = loop {
        tokio::select! {
            _ = &mut *stop => break Ok(()),
            notice = feed.recv() => {
                let Some(notice) = notice else {
                    break Err(GatewayError::Closed);
                };
                log::debug!(
                    "Sync: change {:?} on {}",
                    notice.kind,
                    notice.table.as_deref().unwrap_or("?")
                );

                if !coalesce.is_zero() {
                    tokio::time::sleep(coalesce).await;
                    let mut merged = 0;
                    while feed.try_recv().is_some() {
                        merged += 1;
                    }
                    if merged > 0 {
                        log::debug!("Sync: coalesced {} extra notices", merged);
                    }
                }

                let Some(controller) = controller.upgrade() else { break Ok(()) };
                controller.refresh().await;
            }
        }
    };
    feed.close().await;
    outcome
}

/// Retry the subscription until it succeeds, `stop` fires or the controller
/// is gone. A successful attempt is followed by one refresh, since changes
/// made while disconnected were never announced.
async fn resubscribe(
    controller: &Weak<SyncController>,
    settings: &SyncSettings,
    stop: &mut oneshot::Receiver<()>,
) -> Option<ChangeFeed> {
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = &mut *stop => return None,
            _ = tokio::time::sleep(settings.reconnect.delay(attempt)) => {}
        }

        let controller = controller.upgrade()?;
        match controller.gateway.subscribe(&settings.channel).await {
            Ok(feed) => {
                controller.live.store(true, Ordering::SeqCst);
                log::info!(
                    "Sync: resubscribed to {} after {} attempt(s)",
                    settings.channel,
                    attempt
                );
                controller.refresh().await;
                return Some(feed);
            }
            Err(e) => log::warn!("Sync: resubscribe attempt {} failed: {}", attempt, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(2);

    fn seeded() -> Arc<MemoryGateway> {
        let gw = Arc::new(MemoryGateway::new());
        gw.seed(
            FINANCES,
            vec![json!({ "total_projected": 338000, "current_billing": 50000 })],
        );
        gw.seed(
            PROJECTS,
            vec![
                json!({ "id": "p1", "name": "Keimadura", "created_at": "2025-01-01T00:00:00Z", "value": 250000, "progress": 100, "status": "done" }),
                json!({ "id": "p2", "name": "Acelerador", "created_at": "2025-02-01T00:00:00Z", "value": 190000, "progress": 40, "status": "active" }),
            ],
        );
        gw.seed(
            EVENTS,
            vec![
                json!({ "id": "e2", "title": "Launch", "date": "2099-01-01", "value": 0 }),
                json!({ "id": "e1", "title": "Gala", "date": "2025-01-10", "value": 50000 }),
                json!({ "id": "e3", "title": "Review", "date": "2025-03-15" }),
            ],
        );
        gw.seed(
            TASKS,
            vec![
                json!({ "id": "t1", "project_id": "p2", "title": "Pitch deck", "is_completed": false }),
                json!({ "id": "t2", "project_id": "p2", "title": "Invoice", "is_completed": true }),
            ],
        );
        gw.seed(
            MARKET_PRICES,
            vec![json!({ "symbol": "SOL", "price": 0.045, "change_24h": -1.2 })],
        );
        let logs = (0..30)
            .map(|i| {
                json!({
                    "id": format!("l{}", i),
                    "message": format!("entry {}", i),
                    "type": "info",
                    "created_at": format!("2025-05-01T00:{:02}:00Z", i),
                })
            })
            .collect();
        gw.seed(LOGS, logs);
        gw.seed(
            BRAIN_INSIGHTS,
            vec![
                json!({ "id": "b1", "title": "Old", "analysis": "...", "created_at": "2025-01-01T00:00:00Z" }),
                json!({ "id": "b2", "title": "New", "analysis": "...", "created_at": "2025-04-01T00:00:00Z" }),
            ],
        );
        gw.seed(EXPENSES, vec![json!({ "id": "x1", "amount": 1000 })]);
        gw
    }

    fn controller(gw: &Arc<MemoryGateway>) -> Arc<SyncController> {
        SyncController::new(gw.clone(), SyncSettings::default())
    }

    async fn wait_for_generation(rx: &mut watch::Receiver<u64>, target: u64) {
        tokio::time::timeout(WAIT, async {
            while *rx.borrow_and_update() < target {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("refresh did not happen in time");
    }

    #[tokio::test]
    async fn refresh_replaces_slices_in_query_order() {
        let gw = seeded();
        let sync = controller(&gw);
        assert!(sync.slices().projects.is_empty());

        let report = sync.refresh().await;
        assert!(report.is_complete());

        let slices = sync.slices();
        assert_eq!(slices.finance.total_projected, 338000.0);
        assert_eq!(
            slices.projects.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["p2", "p1"]
        );
        let dates: Vec<_> = slices.events.iter().map(|e| e.date).collect();
        assert!(dates.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(slices.logs.len(), 20);
        assert_eq!(slices.logs[0].id, "l29");
        assert_eq!(slices.insights.len(), 1);
        assert_eq!(slices.insights[0].id, "b2");
        assert_eq!(slices.market.len(), 1);
        assert_eq!(slices.tasks.len(), 2);
        assert!(!sync.is_loading());
        assert_eq!(sync.generation(), 1);
    }

    #[tokio::test]
    async fn expenses_read_only_when_subtracting() {
        let gw = seeded();
        let sync = controller(&gw);
        sync.refresh().await;
        assert!(sync.slices().expenses.is_empty());
        assert!(!gw.selects().iter().any(|q| q.collection == EXPENSES));

        let settings = SyncSettings {
            fetch_expenses: true,
            ..SyncSettings::default()
        };
        let sync = SyncController::new(gw.clone(), settings);
        sync.refresh().await;
        assert_eq!(sync.slices().expenses.len(), 1);
    }

    #[tokio::test]
    async fn failed_read_keeps_previous_slice_only() {
        let gw = seeded();
        let sync = controller(&gw);
        sync.refresh().await;

        gw.seed(EVENTS, vec![]);
        gw.seed(TASKS, vec![]);
        gw.fail_collection(EVENTS);

        let report = sync.refresh().await;
        assert_eq!(report.failed, vec![EVENTS]);
        let slices = sync.slices();
        assert_eq!(slices.events.len(), 3, "failed read keeps stale rows");
        assert!(slices.tasks.is_empty(), "other reads still apply");
        assert!(!sync.is_loading());
    }

    #[tokio::test]
    async fn missing_finances_row_keeps_default() {
        let gw = Arc::new(MemoryGateway::new());
        let sync = controller(&gw);
        let report = sync.refresh().await;
        assert!(report.is_complete());
        assert_eq!(sync.slices().finance, FinanceSnapshot::default());
    }

    #[tokio::test]
    async fn toggle_issues_one_update_and_leaves_local_state() {
        let gw = seeded();
        let sync = controller(&gw);
        sync.refresh().await;

        sync.toggle_task("t1", false).await.unwrap();

        let updates = gw.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].collection, TASKS);
        assert_eq!(updates[0].id, "t1");
        assert_eq!(updates[0].set.len(), 1);
        assert_eq!(updates[0].set["is_completed"], json!(true));

        let t1 = sync.slices().tasks.into_iter().find(|t| t.id == "t1").unwrap();
        assert!(!t1.is_completed, "local slice waits for the next refresh");
        let t2 = gw.rows(TASKS).into_iter().find(|t| t["id"] == "t2").unwrap();
        assert_eq!(t2["is_completed"], json!(true), "other rows untouched");
    }

    #[tokio::test]
    async fn double_toggle_round_trips_after_refreshes() {
        let gw = seeded();
        let sync = controller(&gw);
        sync.refresh().await;

        let is_done = |sync: &Arc<SyncController>| {
            sync.slices()
                .tasks
                .into_iter()
                .find(|t| t.id == "t1")
                .map(|t| t.is_completed)
                .unwrap()
        };

        let before = is_done(&sync);
        sync.toggle_task("t1", before).await.unwrap();
        sync.refresh().await;
        assert_eq!(is_done(&sync), !before);

        sync.toggle_task("t1", !before).await.unwrap();
        sync.refresh().await;
        assert_eq!(is_done(&sync), before);
    }

    #[tokio::test]
    async fn change_notice_triggers_refresh() {
        let gw = seeded();
        let sync = SyncController::spawn(gw.clone(), SyncSettings::default())
            .await
            .unwrap();
        let mut ticks = sync.watch_refreshes();

        gw.insert(
            EVENTS,
            json!({ "id": "e4", "title": "Board", "date": "2030-05-05", "value": 1200 }),
        );
        wait_for_generation(&mut ticks, 1).await;
        assert!(sync.slices().events.iter().any(|e| e.id == "e4"));

        // A change to a table no panel shows still refreshes everything.
        gw.insert("unrelated", json!({ "id": "u1" }));
        wait_for_generation(&mut ticks, 2).await;

        sync.stop().await;
    }

    #[tokio::test]
    async fn toggle_is_reflected_via_change_feed() {
        let gw = seeded();
        let sync = SyncController::spawn(gw.clone(), SyncSettings::default())
            .await
            .unwrap();
        let mut ticks = sync.watch_refreshes();

        sync.toggle_task("t1", false).await.unwrap();
        wait_for_generation(&mut ticks, 1).await;
        let t1 = sync.slices().tasks.into_iter().find(|t| t.id == "t1").unwrap();
        assert!(t1.is_completed);
        sync.stop().await;
    }

    #[tokio::test]
    async fn single_subscription_and_clean_teardown() {
        let gw = seeded();
        let sync = controller(&gw);
        sync.start().await.unwrap();
        sync.start().await.unwrap();
        assert_eq!(gw.subscriber_count(), 1);

        sync.stop().await;
        assert!(!sync.is_subscribed());
        assert_eq!(gw.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropping_controller_releases_feed() {
        let gw = seeded();
        let sync = controller(&gw);
        sync.start().await.unwrap();
        drop(sync);
        // The aborted consumer drops its feed on its next poll.
        tokio::time::timeout(WAIT, async {
            while gw.subscriber_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("feed was not released");
    }

    #[tokio::test]
    async fn bursts_coalesce_into_fewer_refreshes() {
        let gw = seeded();
        let settings = SyncSettings {
            coalesce: Duration::from_millis(50),
            ..SyncSettings::default()
        };
        let sync = SyncController::spawn(gw.clone(), settings).await.unwrap();
        let mut ticks = sync.watch_refreshes();

        for i in 0..5 {
            gw.insert(LOGS, json!({ "id": format!("burst{}", i), "message": "x", "type": "info" }));
        }
        wait_for_generation(&mut ticks, 1).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sync.generation() < 5);
        sync.stop().await;
    }

    fn fast_reconnect() -> SyncSettings {
        SyncSettings {
            reconnect: ReconnectPolicy {
                initial_backoff_ms: 10,
                max_backoff_ms: 40,
            },
            ..SyncSettings::default()
        }
    }

    #[test]
    fn reconnect_delay_doubles_up_to_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
        assert_eq!(policy.delay(10), Duration::from_secs(30));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn null_columns_do_not_fail_the_slice() {
        let gw = seeded();
        gw.seed(
            FINANCES,
            vec![json!({ "total_projected": null, "current_billing": 50000 })],
        );
        gw.seed(
            PROJECTS,
            vec![
                json!({ "id": "p1", "name": "Keimadura", "description": null, "status": "done", "value": null }),
                json!({ "id": "p2", "name": "Acelerador", "description": "", "status": null, "progress": null }),
            ],
        );
        let sync = controller(&gw);

        let report = sync.refresh().await;
        assert!(report.is_complete(), "failed: {:?}", report.failed);
        let slices = sync.slices();
        assert_eq!(slices.projects.len(), 2);
        assert_eq!(slices.finance.total_projected, 0.0);
        assert_eq!(slices.finance.current_billing, 50000.0);
    }

    #[tokio::test]
    async fn deleted_row_leaves_slice_after_notice() {
        let gw = seeded();
        let sync = SyncController::spawn(gw.clone(), SyncSettings::default())
            .await
            .unwrap();
        let mut ticks = sync.watch_refreshes();

        gw.delete(TASKS, "t2");
        wait_for_generation(&mut ticks, 1).await;
        let ids: Vec<_> = sync.slices().tasks.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["t1"]);
        sync.stop().await;
    }

    #[tokio::test]
    async fn dropped_feed_resubscribes_and_catches_up() {
        let gw = seeded();
        let sync = SyncController::spawn(gw.clone(), fast_reconnect())
            .await
            .unwrap();
        let mut ticks = sync.watch_refreshes();
        assert!(sync.is_subscribed());

        gw.drop_subscribers();
        // Written while nobody listens: only the catch-up refresh sees it.
        gw.insert(
            EVENTS,
            json!({ "id": "e9", "title": "Offline", "date": "2030-01-01" }),
        );

        wait_for_generation(&mut ticks, 1).await;
        assert!(sync.is_subscribed());
        assert_eq!(gw.subscriber_count(), 1);
        assert!(sync.slices().events.iter().any(|e| e.id == "e9"));

        gw.insert(TASKS, json!({ "id": "t3", "project_id": "p1", "title": "Live" }));
        wait_for_generation(&mut ticks, 2).await;
        assert!(sync.slices().tasks.iter().any(|t| t.id == "t3"));
        sync.stop().await;
        assert!(!sync.is_subscribed());
    }

    #[tokio::test]
    async fn refused_first_subscribe_keeps_retrying() {
        let gw = seeded();
        gw.refuse_subscriptions(true);
        let sync = SyncController::new(gw.clone(), fast_reconnect());
        let mut ticks = sync.watch_refreshes();

        assert!(sync.start().await.is_err());
        assert!(!sync.is_subscribed());
        // A second start while the consumer is retrying does not stack another.
        assert!(sync.start().await.is_ok());

        gw.refuse_subscriptions(false);
        wait_for_generation(&mut ticks, 1).await;
        assert!(sync.is_subscribed());
        assert_eq!(gw.subscriber_count(), 1);
        sync.stop().await;
        assert_eq!(gw.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn stop_interrupts_backoff() {
        let gw = seeded();
        gw.refuse_subscriptions(true);
        let sync = SyncController::new(gw.clone(), SyncSettings::default());
        assert!(sync.start().await.is_err());

        tokio::time::timeout(WAIT, sync.stop())
            .await
            .expect("stop waited out the backoff");
        assert!(!sync.is_subscribed());
    }
}
