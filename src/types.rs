//! Row types for the dashboard's remote collections.
//!
//! Field names match the backend's snake_case columns. `select *` returns
//! nullable columns as JSON `null`: numeric ones are `Option` so the gap
//! renders as a placeholder, text and flag columns fall back to their
//! default. Only `id` is required; one odd row must not fail its slice.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Default projected total shown before the first successful finances read.
pub const DEFAULT_TOTAL_PROJECTED: f64 = 440_000.0;
/// Default billed amount shown before the first successful finances read.
pub const DEFAULT_CURRENT_BILLING: f64 = 50_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinanceSnapshot {
    #[serde(default, deserialize_with = "de_null_default")]
    pub total_projected: f64,
    #[serde(default, deserialize_with = "de_null_default")]
    pub current_billing: f64,
}

impl Default for FinanceSnapshot {
    fn default() -> Self {
        Self {
            total_projected: DEFAULT_TOTAL_PROJECTED,
            current_billing: DEFAULT_CURRENT_BILLING,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub name: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub description: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, deserialize_with = "de_null_default")]
    pub status: String,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub title: String,
    /// Agenda date. Date-only columns are read as midnight UTC.
    #[serde(default, deserialize_with = "de_timestamp")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub project_id: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub title: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPrice {
    #[serde(default, deserialize_with = "de_null_default")]
    pub symbol: String,
    #[serde(default)]
    pub price: Option<f64>,
    /// Signed 24h change in percent.
    #[serde(default)]
    pub change_24h: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    #[default]
    Info,
    Insight,
    Error,
    /// Any type string the backend adds later.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemLog {
    pub id: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub message: String,
    #[serde(rename = "type", default, deserialize_with = "de_null_default")]
    pub kind: LogKind,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategicInsight {
    pub id: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub title: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub analysis: String,
    #[serde(default)]
    pub impact_score: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    #[serde(default, deserialize_with = "de_null_default")]
    pub description: String,
    #[serde(default)]
    pub amount: Option<f64>,
}

/// Parse a backend timestamp.
///
/// Accepts RFC 3339 (`timestamptz`), naive `YYYY-MM-DDTHH:MM:SS[.f]`
/// (`timestamp`) and plain `YYYY-MM-DD` (`date`). Anything else is `None`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Read a nullable column into a plain field: `null` becomes the default.
fn de_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}
