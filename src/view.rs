//! Derived view model.
//!
//! Pure functions over the controller's slices. Nothing is cached; callers
//! rebuild a [`DashboardView`] whenever they render.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{Config, NetProfitMode};
use crate::sync::Slices;
use crate::types::{
    Event, Expense, FinanceSnapshot, LogKind, MarketPrice, StrategicInsight, SystemLog, Task,
};

/// Sum of expense amounts. Rows without an amount count as zero.
pub fn total_expenses(expenses: &[Expense]) -> f64 {
    expenses.iter().filter_map(|e| e.amount).sum()
}

pub fn net_profit(finance: &FinanceSnapshot, expenses: &[Expense], mode: NetProfitMode) -> f64 {
    match mode {
        NetProfitMode::ProjectedOnly => finance.total_projected,
        NetProfitMode::SubtractExpenses => finance.total_projected - total_expenses(expenses),
    }
}

/// Billed share of the projected total, in percent.
pub fn billing_progress(finance: &FinanceSnapshot) -> Option<f64> {
    if finance.total_projected == 0.0 {
        return None;
    }
    Some(finance.current_billing / finance.total_projected * 100.0)
}

/// Split events into `(upcoming, past)` relative to `now`.
///
/// `date >= now` is upcoming. Events without a usable date count as past.
/// Input order is kept in both halves.
pub fn partition_events(events: &[Event], now: DateTime<Utc>) -> (Vec<Event>, Vec<Event>) {
    events
        .iter()
        .cloned()
        .partition(|ev| ev.date.is_some_and(|d| d >= now))
}

/// An event worth invoicing has a positive value.
pub fn invoiceable(event: &Event) -> bool {
    event.value.is_some_and(|v| v > 0.0)
}

/// Newest insight log with `prefix` stripped, or `fallback`.
///
/// Logs arrive newest first, so the first insight wins.
pub fn latest_insight(logs: &[SystemLog], prefix: &str, fallback: &str) -> String {
    logs.iter()
        .find(|log| log.kind == LogKind::Insight)
        .map(|log| {
            let message = log.message.as_str();
            message
                .strip_prefix(prefix)
                .unwrap_or(message)
                .trim()
                .to_string()
        })
        .unwrap_or_else(|| fallback.to_string())
}

pub fn latest_strategic_insight(insights: &[StrategicInsight]) -> Option<&StrategicInsight> {
    insights.first()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Completion {
    pub done: usize,
    pub total: usize,
}

impl Completion {
    /// Fraction done, 0.0 for a project with no tasks.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.done as f64 / self.total as f64
        }
    }
}

/// Task completion grouped by project id.
pub fn task_completion(tasks: &[Task]) -> BTreeMap<String, Completion> {
    let mut by_project: BTreeMap<String, Completion> = BTreeMap::new();
    for task in tasks {
        let entry = by_project.entry(task.project_id.clone()).or_default();
        entry.total += 1;
        if task.is_completed {
            entry.done += 1;
        }
    }
    by_project
}

/// Tasks grouped by project id, in fetch order.
pub fn tasks_by_project(tasks: &[Task]) -> BTreeMap<String, Vec<Task>> {
    let mut grouped: BTreeMap<String, Vec<Task>> = BTreeMap::new();
    for task in tasks {
        grouped
            .entry(task.project_id.clone())
            .or_default()
            .push(task.clone());
    }
    grouped
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
}

/// Only a strictly positive change reads as up.
pub fn market_trend(price: &MarketPrice) -> Trend {
    if price.change_24h.is_some_and(|c| c > 0.0) {
        Trend::Up
    } else {
        Trend::Down
    }
}

/// Everything the four panels render, computed at one instant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub generated_at: DateTime<Utc>,
    pub finance: FinanceSnapshot,
    pub total_expenses: f64,
    pub net_profit: f64,
    pub billing_progress: Option<f64>,
    pub projects: Vec<crate::types::Project>,
    pub completion: BTreeMap<String, Completion>,
    pub tasks_by_project: BTreeMap<String, Vec<Task>>,
    pub upcoming_events: Vec<Event>,
    pub past_events: Vec<Event>,
    pub market: Vec<(MarketPrice, Trend)>,
    pub logs: Vec<SystemLog>,
    pub latest_insight: String,
    pub strategic_insight: Option<StrategicInsight>,
    pub loading: bool,
}

impl DashboardView {
    pub fn build(slices: &Slices, config: &Config, loading: bool, now: DateTime<Utc>) -> Self {
        let (upcoming_events, past_events) = partition_events(&slices.events, now);
        Self {
            generated_at: now,
            finance: slices.finance,
            total_expenses: total_expenses(&slices.expenses),
            net_profit: net_profit(&slices.finance, &slices.expenses, config.net_profit_mode),
            billing_progress: billing_progress(&slices.finance),
            projects: slices.projects.clone(),
            completion: task_completion(&slices.tasks),
            tasks_by_project: tasks_by_project(&slices.tasks),
            upcoming_events,
            past_events,
            market: slices
                .market
                .iter()
                .map(|m| (m.clone(), market_trend(m)))
                .collect(),
            logs: slices.logs.clone(),
            latest_insight: latest_insight(
                &slices.logs,
                &config.insight_prefix,
                &config.insight_fallback,
            ),
            strategic_insight: latest_strategic_insight(&slices.insights).cloned(),
            loading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(id: &str, date: Option<DateTime<Utc>>, value: Option<f64>) -> Event {
        Event {
            id: id.to_string(),
            title: format!("Event {}", id),
            date,
            location: None,
            value,
        }
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn log(id: &str, message: &str, kind: LogKind) -> SystemLog {
        SystemLog {
            id: id.to_string(),
            message: message.to_string(),
            kind,
            created_at: None,
        }
    }

    fn task(id: &str, project: &str, done: bool) -> Task {
        Task {
            id: id.to_string(),
            project_id: project.to_string(),
            title: id.to_uppercase(),
            is_completed: done,
        }
    }

    fn expense(amount: Option<f64>) -> Expense {
        Expense {
            id: "x".into(),
            description: String::new(),
            amount,
        }
    }

    #[test]
    fn past_and_upcoming_split_around_now() {
        let events = vec![
            event("gala", Some(at(2025, 1, 10)), Some(50_000.0)),
            event("future", Some(at(2099, 1, 1)), Some(0.0)),
        ];
        let (upcoming, past) = partition_events(&events, at(2025, 6, 1));
        assert_eq!(past.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["gala"]);
        assert_eq!(upcoming.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["future"]);
    }

    #[test]
    fn partition_is_total_and_exclusive() {
        let now = at(2025, 6, 1);
        let events = vec![
            event("a", Some(at(2025, 5, 31)), None),
            event("b", Some(now), None),
            event("c", None, None),
            event("d", Some(at(2030, 1, 1)), None),
            event("e", Some(at(2020, 1, 1)), None),
        ];
        let (upcoming, past) = partition_events(&events, now);
        assert_eq!(upcoming.len() + past.len(), events.len());
        for ev in &events {
            let up = upcoming.contains(ev);
            let down = past.contains(ev);
            assert!(up ^ down, "{} must be in exactly one half", ev.id);
        }
        // An event exactly at now is upcoming.
        assert!(upcoming.iter().any(|e| e.id == "b"));
    }

    #[test]
    fn events_migrate_to_past_as_clock_advances() {
        let events = vec![event("demo", Some(at(2025, 3, 1)), None)];
        let (upcoming, _) = partition_events(&events, at(2025, 2, 1));
        assert_eq!(upcoming.len(), 1);
        let (upcoming, past) = partition_events(&events, at(2025, 3, 2));
        assert!(upcoming.is_empty());
        assert_eq!(past.len(), 1);
    }

    #[test]
    fn net_profit_follows_mode() {
        let fin = FinanceSnapshot {
            total_projected: 440_000.0,
            current_billing: 50_000.0,
        };
        let expenses = vec![expense(Some(40_000.0)), expense(None), expense(Some(1_500.5))];
        assert_eq!(total_expenses(&expenses), 41_500.5);
        assert_eq!(
            net_profit(&fin, &expenses, NetProfitMode::SubtractExpenses),
            440_000.0 - 41_500.5
        );
        assert_eq!(net_profit(&fin, &expenses, NetProfitMode::ProjectedOnly), 440_000.0);
        assert_eq!(net_profit(&fin, &[], NetProfitMode::SubtractExpenses), 440_000.0);
    }

    #[test]
    fn billing_progress_guards_zero_projection() {
        let fin = FinanceSnapshot {
            total_projected: 200.0,
            current_billing: 50.0,
        };
        assert_eq!(billing_progress(&fin), Some(25.0));
        let empty = FinanceSnapshot {
            total_projected: 0.0,
            current_billing: 50.0,
        };
        assert_eq!(billing_progress(&empty), None);
    }

    #[test]
    fn latest_insight_strips_prefix() {
        let logs = vec![
            log("3", "Sync ok", LogKind::Info),
            log("2", "Insight: Rebalance toward Keimadura", LogKind::Insight),
            log("1", "Insight: older advice", LogKind::Insight),
        ];
        assert_eq!(
            latest_insight(&logs, "Insight: ", "none"),
            "Rebalance toward Keimadura"
        );
    }

    #[test]
    fn latest_insight_falls_back() {
        let logs = vec![log("1", "boom", LogKind::Error)];
        assert_eq!(latest_insight(&logs, "Insight: ", "waiting"), "waiting");
        assert_eq!(latest_insight(&[], "Insight: ", "waiting"), "waiting");
    }

    #[test]
    fn insight_without_prefix_is_kept_whole() {
        let logs = vec![log("1", "Cut costs", LogKind::Insight)];
        assert_eq!(latest_insight(&logs, "Insight: ", "-"), "Cut costs");
    }

    #[test]
    fn completion_groups_by_project() {
        let tasks = vec![
            task("a", "p1", true),
            task("b", "p1", false),
            task("c", "p1", true),
            task("d", "p2", false),
        ];
        let completion = task_completion(&tasks);
        assert_eq!(completion["p1"], Completion { done: 2, total: 3 });
        assert!((completion["p1"].ratio() - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(completion["p2"].ratio(), 0.0);
        assert_eq!(Completion::default().ratio(), 0.0);

        let grouped = tasks_by_project(&tasks);
        assert_eq!(grouped["p1"].len(), 3);
        assert_eq!(grouped["p2"][0].id, "d");
    }

    #[test]
    fn trend_and_invoiceable() {
        let up = MarketPrice {
            symbol: "SOL".into(),
            price: Some(0.045),
            change_24h: Some(2.5),
        };
        let flat = MarketPrice {
            symbol: "BTC".into(),
            price: None,
            change_24h: Some(0.0),
        };
        assert_eq!(market_trend(&up), Trend::Up);
        assert_eq!(market_trend(&flat), Trend::Down);

        assert!(invoiceable(&event("a", None, Some(10.0))));
        assert!(!invoiceable(&event("b", None, Some(0.0))));
        assert!(!invoiceable(&event("c", None, None)));
    }

    #[test]
    fn view_uses_config_mode_and_fallback() {
        let mut slices = Slices::default();
        slices.expenses = vec![expense(Some(100.0))];
        let mut config = Config::default();
        config.net_profit_mode = NetProfitMode::SubtractExpenses;
        config.insight_fallback = "quiet".into();

        let view = DashboardView::build(&slices, &config, true, at(2025, 6, 1));
        assert_eq!(view.net_profit, 440_000.0 - 100.0);
        assert_eq!(view.latest_insight, "quiet");
        assert!(view.loading);
        assert!(view.strategic_insight.is_none());
    }
}
