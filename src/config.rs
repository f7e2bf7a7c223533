//! Dashboard configuration stored in ~/.noilexel/config.json.
//!
//! Every field has a serde default, so a missing or partial file still
//! yields a usable config.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::FinanceSnapshot;

/// Bounds for the number of system log rows kept per refresh.
pub const MIN_LOG_LIMIT: usize = 5;
pub const MAX_LOG_LIMIT: usize = 20;

/// How net profit is derived from the finance snapshot.
///
/// Earlier dashboards subtracted tracked expenses; later ones show the
/// projected total as-is. Both are kept because it was never settled which
/// one is correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetProfitMode {
    #[default]
    ProjectedOnly,
    SubtractExpenses,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the backend project, e.g. `https://xyz.supabase.co`.
    #[serde(default)]
    pub gateway_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Realtime channel name for change notifications.
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_log_limit")]
    pub log_limit: usize,
    #[serde(default)]
    pub net_profit_mode: NetProfitMode,
    #[serde(default = "default_insight_prefix")]
    pub insight_prefix: String,
    #[serde(default = "default_insight_fallback")]
    pub insight_fallback: String,
    /// Window for merging bursts of change notices into one refresh. 0 = one refresh per notice.
    #[serde(default)]
    pub coalesce_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_dir: Option<PathBuf>,
    #[serde(default)]
    pub default_finance: FinanceSnapshot,
}

fn default_channel() -> String {
    "pro-sync".to_string()
}

fn default_log_limit() -> usize {
    MAX_LOG_LIMIT
}

fn default_insight_prefix() -> String {
    "Insight: ".to_string()
}

fn default_insight_fallback() -> String {
    "A aguardar análise do núcleo...".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_url: String::new(),
            api_key: None,
            channel: default_channel(),
            log_limit: default_log_limit(),
            net_profit_mode: NetProfitMode::default(),
            insight_prefix: default_insight_prefix(),
            insight_fallback: default_insight_fallback(),
            coalesce_ms: 0,
            export_dir: None,
            default_finance: FinanceSnapshot::default(),
        }
    }
}

impl Config {
    /// Log limit clamped to the supported range.
    pub fn effective_log_limit(&self) -> usize {
        self.log_limit.clamp(MIN_LOG_LIMIT, MAX_LOG_LIMIT)
    }

    /// Directory invoices are written to. Falls back to the working directory.
    pub fn export_dir(&self) -> PathBuf {
        self.export_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Apply `NOILEXEL_GATEWAY_URL` / `NOILEXEL_API_KEY` when set.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("NOILEXEL_GATEWAY_URL") {
            if !url.trim().is_empty() {
                self.gateway_url = url.trim().to_string();
            }
        }
        if let Ok(key) = std::env::var("NOILEXEL_API_KEY") {
            if !key.trim().is_empty() {
                self.api_key = Some(key.trim().to_string());
            }
        }
    }

    /// Load config from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("Config: {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load the canonical config and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    /// Write config atomically to `path`, creating parent dirs as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        atomic_write_str(path, &content).map_err(|e| ConfigError::Write(e.to_string()))
    }
}

/// Canonical state directory (~/.noilexel).
pub fn state_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
    Ok(home.join(".noilexel"))
}

/// Canonical config file path (~/.noilexel/config.json).
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(state_dir()?.join("config.json"))
}

/// Write `content` to `path` via a temp file in the same directory.
pub fn atomic_write_str(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
