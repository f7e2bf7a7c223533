//! Headless core of the Noile Xel personal dashboard.
//!
//! Four panels (finance, projects, agenda, system log) backed by a remote
//! realtime database. The crate keeps local slices in sync with the
//! backend, derives what the panels show, and guards it all behind a local
//! convenience lock.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod export;
pub mod gate;
pub mod gateway;
pub mod router;
pub mod sync;
pub mod types;
pub mod view;

use std::path::Path;
use std::sync::Arc;

use config::Config;
use error::GatewayError;
use gateway::{DataGateway, MemoryGateway, RestGateway};

/// Initialize `env_logger`, defaulting to `info` unless `RUST_LOG` is set.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

/// Pick the gateway: an in-memory one seeded from `fixture` when given,
/// otherwise the REST backend from config.
pub fn open_gateway(
    config: &Config,
    fixture: Option<&Path>,
) -> Result<Arc<dyn DataGateway>, GatewayError> {
    if let Some(path) = fixture {
        log::info!("Using fixture gateway from {}", path.display());
        return Ok(Arc::new(MemoryGateway::from_fixture(path)?));
    }
    if config.gateway_url.trim().is_empty() {
        return Err(GatewayError::InvalidUrl(
            "gatewayUrl is not configured (set it in ~/.noilexel/config.json or NOILEXEL_GATEWAY_URL)"
                .to_string(),
        ));
    }
    let key = config.api_key.as_deref().unwrap_or_default();
    Ok(Arc::new(RestGateway::new(&config.gateway_url, key)?))
}
