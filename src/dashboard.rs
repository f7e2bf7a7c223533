//! Dashboard facade: the one application-state object a front end holds.
//!
//! Wires gate → sync controller → view model → router. While the gate is
//! locked nothing is fetched, subscribed or rendered.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{DashboardError, ExportError};
use crate::export::{DocumentExporter, InvoiceDocument};
use crate::gate::{AccessGate, FlagStore};
use crate::gateway::DataGateway;
use crate::router::{Tab, TabRouter};
use crate::sync::{RefreshReport, SyncController, SyncSettings};
use crate::view::DashboardView;

pub struct Dashboard {
    config: Config,
    gateway: Arc<dyn DataGateway>,
    exporter: Arc<dyn DocumentExporter>,
    gate: AccessGate,
    router: TabRouter,
    sync: Option<Arc<SyncController>>,
}

impl Dashboard {
    pub fn new(
        config: Config,
        gateway: Arc<dyn DataGateway>,
        flags: Box<dyn FlagStore>,
        exporter: Arc<dyn DocumentExporter>,
    ) -> Self {
        Self {
            config,
            gateway,
            exporter,
            gate: AccessGate::open(flags),
            router: TabRouter::new(),
            sync: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_locked(&self) -> bool {
        self.gate.is_locked()
    }

    pub fn controller(&self) -> Option<&Arc<SyncController>> {
        self.sync.as_ref()
    }

    /// Initial refresh plus the standing change subscription.
    ///
    /// Refused while locked. Calling it again reuses the running controller
    /// and just refreshes. An unreachable change feed is logged, not
    /// returned: the slices are already loaded and the controller keeps
    /// resubscribing in the background.
    pub async fn start(&mut self) -> Result<RefreshReport, DashboardError> {
        if self.gate.is_locked() {
            return Err(DashboardError::Locked);
        }
        let sync = match &self.sync {
            Some(sync) => sync.clone(),
            None => {
                let sync =
                    SyncController::new(self.gateway.clone(), SyncSettings::from(&self.config));
                self.sync = Some(sync.clone());
                sync
            }
        };
        let report = sync.refresh().await;
        if let Err(e) = sync.start().await {
            log::warn!("Dashboard: live updates unavailable for now: {}", e);
        }
        Ok(report)
    }

    /// Try the secret; on success the dashboard starts syncing.
    pub async fn unlock(&mut self, secret: &str) -> Result<RefreshReport, DashboardError> {
        if let Err(e) = self.gate.attempt(secret) {
            if self.gate.is_locked() {
                return Err(e.into());
            }
            // Unlocked but the marker was not saved; carry on for this session.
            log::warn!("Dashboard: {}", e);
        }
        self.start().await
    }

    /// Lock, tear down sync and forget every slice and the selected tab.
    pub async fn logout(&mut self) -> Result<(), DashboardError> {
        self.shutdown().await;
        self.router = TabRouter::new();
        self.gate.logout()?;
        Ok(())
    }

    /// Release the change subscription and drop the controller with its
    /// slices. `view()` returns `None` until the next `start()`.
    pub async fn shutdown(&mut self) {
        if let Some(sync) = self.sync.take() {
            sync.stop().await;
        }
    }

    pub fn selected_tab(&self) -> Tab {
        self.router.selected()
    }

    pub fn select_tab(&mut self, tab: Tab) {
        self.router.select(tab);
    }

    /// Everything the panels need, as of `now`. `None` while locked or
    /// before the first start.
    pub fn view(&self, now: DateTime<Utc>) -> Option<DashboardView> {
        if self.gate.is_locked() {
            return None;
        }
        let sync = self.sync.as_ref()?;
        Some(DashboardView::build(
            &sync.slices(),
            &self.config,
            sync.is_loading(),
            now,
        ))
    }

    pub async fn toggle_task(&self, task_id: &str, completed: bool) -> Result<(), DashboardError> {
        if self.gate.is_locked() {
            return Err(DashboardError::Locked);
        }
        let sync = self.sync.as_ref().ok_or(DashboardError::Locked)?;
        sync.toggle_task(task_id, completed).await?;
        Ok(())
    }

    /// Build the invoice for `event_id` and write it in the background.
    ///
    /// The outcome is only logged; the handle is returned for callers that
    /// want to wait anyway.
    pub fn export_invoice(
        &self,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<JoinHandle<Result<PathBuf, ExportError>>, DashboardError> {
        if self.gate.is_locked() {
            return Err(DashboardError::Locked);
        }
        let event = self
            .sync
            .as_ref()
            .and_then(|sync| sync.slices().events.into_iter().find(|e| e.id == event_id))
            .ok_or_else(|| DashboardError::UnknownEvent(event_id.to_string()))?;

        let document = InvoiceDocument::for_event(&event, now);
        let exporter = self.exporter.clone();
        Ok(tokio::spawn(async move {
            let result = exporter.export(&document).await;
            if let Err(e) = &result {
                log::warn!("Dashboard: invoice export failed: {}", e);
            }
            result
        }))
    }
}
