//! Per-widget scan lifecycle.
//!
//! [`ScanMachine`] is the pure state machine: it hands out generation tokens
//! on submit and only lets the most recent generation commit. The async
//! [`ScanController`] drives it against an [`AnalysisApi`] and publishes every
//! state through a `watch` channel.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};
use urlguard_model::{ScanResult, Verdict};

use crate::api::AnalysisApi;
use crate::error::{GatewayError, GatewayResult, describe};

/// Progress never passes this value until the response lands.
pub const PROGRESS_CAP: u8 = 90;
pub const PROGRESS_COMPLETE: u8 = 100;

const PROGRESS_TICK: Duration = Duration::from_millis(200);
const PROGRESS_STEP: u8 = 10;

/// Monotonic token identifying one submission of one machine.
pub type Generation = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ScanPhase {
    #[default]
    Idle,
    Submitting,
    Safe,
    Suspicious,
    Phishing,
    Failed,
    Frozen,
}

impl ScanPhase {
    pub fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Safe => ScanPhase::Safe,
            Verdict::Suspicious => ScanPhase::Suspicious,
            Verdict::Phishing => ScanPhase::Phishing,
        }
    }

    pub fn is_verdict(self) -> bool {
        matches!(
            self,
            ScanPhase::Safe | ScanPhase::Suspicious | ScanPhase::Phishing
        )
    }

    /// A new submission may start from this phase. `Frozen` is left only
    /// through a reset or a successful override.
    pub fn accepts_submit(self) -> bool {
        self == ScanPhase::Idle || self == ScanPhase::Failed || self.is_verdict()
    }
}

/// Freeze details kept for display and for the override workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreezeNotice {
    pub reason: String,
    pub actions: String,
}

/// Immutable view of a machine, replaced on every transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanState {
    pub phase: ScanPhase,
    pub url: Option<String>,
    /// Generation of the submission this state belongs to; 0 when idle.
    pub generation: Generation,
    pub result: Option<ScanResult>,
    /// User-facing failure message.
    pub error: Option<String>,
    pub freeze: Option<FreezeNotice>,
    /// Cosmetic, 0..=100.
    pub progress: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanCommandError {
    #[error("a scan is already in flight (generation {generation})")]
    InFlight { generation: Generation },

    #[error("scanning is frozen: {}", notice.reason)]
    Frozen { notice: FreezeNotice },

    #[error("url must not be empty")]
    EmptyUrl,
}

/// What happened to a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied(ScanPhase),
    /// The request was superseded or the machine was reset meanwhile.
    Discarded,
}

#[derive(Debug, Default)]
pub struct ScanMachine {
    state: ScanState,
    last_generation: Generation,
    pending: Option<Generation>,
}

impl ScanMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn phase(&self) -> ScanPhase {
        self.state.phase
    }

    /// Generation whose response may still commit, if any.
    pub fn pending(&self) -> Option<Generation> {
        self.pending
    }

    /// Starts a submission and returns its generation.
    ///
    /// # Errors
    /// [`ScanCommandError::InFlight`] while submitting,
    /// [`ScanCommandError::Frozen`] until reset or overridden,
    /// [`ScanCommandError::EmptyUrl`] for a blank url.
    pub fn submit(&mut self, url: &str) -> Result<Generation, ScanCommandError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ScanCommandError::EmptyUrl);
        }
        if !self.state.phase.accepts_submit() {
            return Err(self.refusal());
        }

        self.last_generation += 1;
        let generation = self.last_generation;
        self.pending = Some(generation);
        self.state = ScanState {
            phase: ScanPhase::Submitting,
            url: Some(url.to_string()),
            generation,
            ..ScanState::default()
        };
        Ok(generation)
    }

    fn refusal(&self) -> ScanCommandError {
        match &self.state.freeze {
            Some(notice) if self.state.phase == ScanPhase::Frozen => {
                ScanCommandError::Frozen {
                    notice: notice.clone(),
                }
            }
            _ => ScanCommandError::InFlight {
                generation: self.state.generation,
            },
        }
    }

    /// Commits the outcome of `generation` if it is still the pending one.
    pub fn complete(
        &mut self,
        generation: Generation,
        outcome: GatewayResult<ScanResult>,
    ) -> Completion {
        if self.pending != Some(generation) {
            debug!(generation, pending = ?self.pending, "discarding stale scan outcome");
            return Completion::Discarded;
        }
        self.pending = None;

        let url = self.state.url.take();
        self.state = match outcome {
            Ok(result) => ScanState {
                phase: ScanPhase::from_verdict(result.verdict),
                url,
                generation,
                result: Some(result),
                progress: PROGRESS_COMPLETE,
                ..ScanState::default()
            },
            Err(err) => {
                let message = describe(&err);
                let (phase, freeze) = match err {
                    GatewayError::GovernanceFreeze { reason, actions } => {
                        (ScanPhase::Frozen, Some(FreezeNotice { reason, actions }))
                    }
                    _ => (ScanPhase::Failed, None),
                };
                ScanState {
                    phase,
                    url,
                    generation,
                    error: Some(message),
                    freeze,
                    progress: PROGRESS_COMPLETE,
                    ..ScanState::default()
                }
            }
        };
        Completion::Applied(self.state.phase)
    }

    /// Back to `Idle` with every field cleared. Any pending request is
    /// forgotten, so its outcome will be discarded.
    pub fn reset(&mut self) {
        self.pending = None;
        self.state = ScanState::default();
    }

    /// Leaves `Frozen` after a successful override. Returns whether it did.
    pub fn on_override_succeeded(&mut self) -> bool {
        if self.state.phase != ScanPhase::Frozen {
            return false;
        }
        self.reset();
        true
    }

    /// Drops a submission whose caller went away. The machine returns to
    /// `Idle` if `generation` was still pending.
    pub fn abandon(&mut self, generation: Generation) -> bool {
        if self.pending != Some(generation) {
            return false;
        }
        self.reset();
        true
    }

    /// Advances the cosmetic progress of `generation`. Returns false once
    /// that submission is no longer in flight.
    pub fn tick_progress(&mut self, generation: Generation, step: u8) -> bool {
        if self.pending != Some(generation) || self.state.phase != ScanPhase::Submitting {
            return false;
        }
        self.state.progress = self.state.progress.saturating_add(step).min(PROGRESS_CAP);
        true
    }
}

/// Async driver for one scan widget.
#[derive(Debug)]
pub struct ScanController {
    api: Arc<dyn AnalysisApi>,
    machine: Mutex<ScanMachine>,
    state_tx: watch::Sender<ScanState>,
}

impl ScanController {
    /// A fresh widget in `Idle`.
    pub fn new(api: Arc<dyn AnalysisApi>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ScanState::default());
        Arc::new(Self {
            api,
            machine: Mutex::new(ScanMachine::new()),
            state_tx,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ScanState {
        self.state_tx.borrow().clone()
    }

    /// Submits `url` and waits for the response.
    ///
    /// Returns the state after the response was handled, which belongs to a
    /// newer submission if this one was superseded. Dropping the returned
    /// future abandons the submission and puts the widget back in `Idle`.
    ///
    /// # Errors
    /// See [`ScanMachine::submit`].
    pub async fn submit(
        self: &Arc<Self>,
        url: &str,
    ) -> Result<ScanState, ScanCommandError> {
        let (generation, url) = self.apply(|machine| {
            let generation = machine.submit(url)?;
            let url = machine.state().url.clone().unwrap_or_default();
            Ok::<_, ScanCommandError>((generation, url))
        })?;
        info!(generation, url = %url, "scan submitted");

        let in_flight = InFlightScan {
            controller: self,
            generation,
            ticker: tokio::spawn(tick_progress(Arc::downgrade(self), generation)),
            settled: false,
        };
        let outcome = self.api.scan(&url).await;
        in_flight.settle();

        match self.apply(|machine| machine.complete(generation, outcome)) {
            Completion::Applied(phase) => info!(generation, ?phase, "scan landed"),
            Completion::Discarded => debug!(generation, "scan superseded"),
        }
        Ok(self.state())
    }

    /// Back to `Idle`; any in-flight response is discarded when it lands.
    pub fn reset(&self) {
        self.apply(ScanMachine::reset);
    }

    /// Releases a `Frozen` widget to `Idle`. Returns whether it was frozen.
    pub fn on_override_succeeded(&self) -> bool {
        let left = self.apply(ScanMachine::on_override_succeeded);
        if left {
            info!("scan widget released from freeze");
        }
        left
    }

    fn lock(&self) -> MutexGuard<'_, ScanMachine> {
        self.machine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply<R>(&self, change: impl FnOnce(&mut ScanMachine) -> R) -> R {
        let mut machine = self.lock();
        let output = change(&mut machine);
        self.state_tx.send_if_modified(|published| {
            if published == machine.state() {
                return false;
            }
            *published = machine.state().clone();
            true
        });
        output
    }
}

/// Ties the progress ticker and the pending generation to the `submit`
/// future. Dropping the future before the response lands stops the ticker
/// and abandons the generation.
struct InFlightScan<'a> {
    controller: &'a ScanController,
    generation: Generation,
    ticker: JoinHandle<()>,
    settled: bool,
}

impl InFlightScan<'_> {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for InFlightScan<'_> {
    fn drop(&mut self) {
        self.ticker.abort();
        if self.settled {
            return;
        }
        let generation = self.generation;
        if self
            .controller
            .apply(|machine| machine.abandon(generation))
        {
            debug!(generation, "scan cancelled before the response landed");
        }
    }
}

async fn tick_progress(controller: Weak<ScanController>, generation: Generation) {
    let mut ticker = time::interval(PROGRESS_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(controller) = controller.upgrade() else {
            break;
        };
        if !controller.apply(|machine| machine.tick_progress(generation, PROGRESS_STEP)) {
            break;
        }
    }
}
