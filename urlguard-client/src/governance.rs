//! Shared governance snapshot and the emergency override.
//!
//! [`GovernanceMonitor`] polls `GET /api/governance/status` and fans the
//! snapshot out to every subscriber. [`OverrideWorkflow`] is the only writer
//! of that snapshot: after a successful unfreeze it replaces it wholesale,
//! forces a refresh, and releases every registered scan widget that was
//! sitting in `Frozen`.

use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use urlguard_model::{GovernanceStatus, UnfreezeResponse};

use crate::api::AnalysisApi;
use crate::config::PollPolicy;
use crate::error::GatewayResult;
use crate::poller::{PollHandle, PollSnapshot, PolledResource};
use crate::scan::ScanController;

pub type GovernanceSnapshot = PollSnapshot<GovernanceStatus>;

#[derive(Debug)]
pub struct GovernanceMonitor {
    resource: Arc<PolledResource<GovernanceStatus>>,
}

impl GovernanceMonitor {
    pub fn new(api: Arc<dyn AnalysisApi>, policy: PollPolicy) -> Arc<Self> {
        let resource = PolledResource::new("governance", policy, move || {
            let api = Arc::clone(&api);
            async move {
                let status = api.governance_status().await?;
                if !status.is_consistent() {
                    warn!(
                        is_frozen = status.is_frozen,
                        overrides = status.budget.override_count_hourly,
                        max = status.budget.max_overrides_per_hour,
                        exhausted = status.budget.budget_exhausted,
                        "governance status is internally inconsistent"
                    );
                }
                Ok(status)
            }
            .boxed()
        });
        Arc::new(Self { resource })
    }

    pub fn subscribe(&self) -> watch::Receiver<GovernanceSnapshot> {
        self.resource.subscribe()
    }

    pub fn snapshot(&self) -> GovernanceSnapshot {
        self.resource.snapshot()
    }

    pub fn latest(&self) -> Option<Arc<GovernanceStatus>> {
        self.resource.latest()
    }

    /// `None` until the first successful read.
    pub fn is_frozen(&self) -> Option<bool> {
        self.latest().map(|status| status.is_frozen)
    }

    /// Manual retry; coalesces with any read already in flight.
    ///
    /// # Errors
    /// The read failure. The last snapshot stays in place.
    pub async fn refresh(&self) -> GatewayResult<Arc<GovernanceStatus>> {
        self.resource.refresh().await
    }

    /// # Errors
    /// The read failure, when a read was needed and failed.
    pub async fn refresh_if_stale(&self) -> GatewayResult<Arc<GovernanceStatus>> {
        self.resource.refresh_if_stale().await
    }

    /// Spawns the status poll loop on the governance policy.
    pub fn start(&self) -> PollHandle {
        self.resource.start()
    }

    fn publish_unfrozen(&self) {
        match self.resource.latest() {
            Some(status) => self.resource.replace(status.unfrozen()),
            None => self.resource.invalidate(),
        }
    }
}

/// Privileged unfreeze plus its local consequences.
#[derive(Debug)]
pub struct OverrideWorkflow {
    api: Arc<dyn AnalysisApi>,
    monitor: Arc<GovernanceMonitor>,
    widgets: Mutex<Vec<Weak<ScanController>>>,
}

impl OverrideWorkflow {
    /// The workflow becomes the only writer of `monitor`'s snapshot.
    pub fn new(api: Arc<dyn AnalysisApi>, monitor: Arc<GovernanceMonitor>) -> Self {
        Self {
            api,
            monitor,
            widgets: Mutex::new(Vec::new()),
        }
    }

    pub fn monitor(&self) -> &Arc<GovernanceMonitor> {
        &self.monitor
    }

    /// Tracks a scan widget so a successful override can release it.
    /// Only a weak reference is kept.
    pub fn register(&self, widget: &Arc<ScanController>) {
        let mut widgets = self
            .widgets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        widgets.retain(|existing| existing.strong_count() > 0);
        widgets.push(Arc::downgrade(widget));
    }

    /// Lifts the freeze. Always forced.
    ///
    /// On success the governance snapshot is replaced with an unfrozen copy,
    /// refreshed from the service, and every registered `Frozen` widget goes
    /// back to `Idle`. On failure nothing local changes.
    ///
    /// # Errors
    /// The classified unfreeze failure, e.g. `RemoteRejected` with 401 for a
    /// bad key or 400 when the hourly budget is spent.
    pub async fn unfreeze(
        &self,
        ticket: Option<String>,
    ) -> GatewayResult<UnfreezeResponse> {
        let response = match self.api.unfreeze(ticket).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "emergency override failed");
                return Err(err);
            }
        };
        info!(message = ?response.message, "emergency override applied");

        self.monitor.publish_unfrozen();
        if let Err(err) = self.monitor.refresh().await {
            warn!(error = %err, "governance refresh after override failed");
        }

        let released = self.release_frozen_widgets();
        debug!(released, "released frozen scan widgets");
        Ok(response)
    }

    fn release_frozen_widgets(&self) -> usize {
        let widgets: Vec<Arc<ScanController>> = {
            let mut widgets = self
                .widgets
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            widgets.retain(|widget| widget.strong_count() > 0);
            widgets.iter().filter_map(Weak::upgrade).collect()
        };
        widgets
            .iter()
            .filter(|widget| widget.on_override_succeeded())
            .count()
    }
}
