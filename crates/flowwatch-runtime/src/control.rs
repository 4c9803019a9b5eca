//! Control orchestrator for the remote capture process.
//!
//! Drives start / stop / interface changes against the service and keeps a
//! local [`MonitoringState`] in step with it. A follow-up status poll is the
//! source of truth for whether capture actually runs; a success response to
//! an action alone is never trusted.
//!
//! At most one control operation (start, stop, interface change) runs at a
//! time; a second one fails fast with [`FlowwatchError::Busy`]. Status polls
//! are not control operations: they only serialize with control operations
//! through the state lock, so a control operation issued during a poll waits
//! for it instead of being refused.
//!
//! A control operation whose future is dropped part-way leaves the phase
//! transitional. The reconciliation poll treats a transitional phase with no
//! operation in flight as stale and adopts the service's answer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flowwatch_core::error::{FlowwatchError, Result};
use flowwatch_core::models::{MonitoringState, Phase};
use flowwatch_core::protocol::{StartStatus, StatusReport};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::ControlApi;

// ── Timing ────────────────────────────────────────────────────────────────────

/// Delays used while driving the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTiming {
    /// Wait between a start action and the status poll that confirms it.
    pub settle_delay: Duration,
    /// Wait after stopping before rebinding, and after rebinding before
    /// starting again.
    pub interface_settle: Duration,
    /// Period of the reconciliation poll while capture is running.
    pub poll_interval: Duration,
}

impl Default for ControlTiming {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(1000),
            interface_settle: Duration::from_millis(500),
            poll_interval: Duration::from_secs(3),
        }
    }
}

/// What [`ControlOrchestrator::change_interface`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceChange {
    /// The requested interface was already selected; nothing was sent.
    Unchanged,
    /// Rebound while capture was not running.
    Switched,
    /// Capture was stopped, rebound and started again.
    Restarted,
}

/// Result of one reconciliation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Not running, or a control operation or poll was already in flight.
    Skipped,
    InSync,
    /// The service had stopped capturing behind our back, or a stale
    /// transitional phase was replaced by the polled truth.
    Corrected,
}

// ── ControlOrchestrator ───────────────────────────────────────────────────────

pub struct ControlOrchestrator {
    api: Arc<dyn ControlApi>,
    timing: ControlTiming,
    state: watch::Sender<MonitoringState>,
    /// Set while a start / stop / interface change is in flight.
    control_in_flight: AtomicBool,
    /// Serializes everything that talks to the service about capture state.
    state_lock: Mutex<()>,
}

impl ControlOrchestrator {
    pub fn new(api: Arc<dyn ControlApi>, timing: ControlTiming) -> Self {
        let (state, _) = watch::channel(MonitoringState::default());
        Self {
            api,
            timing,
            state,
            control_in_flight: AtomicBool::new(false),
            state_lock: Mutex::new(()),
        }
    }

    // ── State access ──────────────────────────────────────────────────────

    pub fn state(&self) -> MonitoringState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    pub fn watch_state(&self) -> watch::Receiver<MonitoringState> {
        self.state.subscribe()
    }

    /// `true` while a start / stop / interface change is in flight.
    pub fn is_busy(&self) -> bool {
        self.control_in_flight.load(Ordering::Acquire)
    }

    // ── Operations ────────────────────────────────────────────────────────

    /// Poll the service and adopt its answer wholesale.
    ///
    /// Waits for any in-flight control operation to finish first.
    pub async fn refresh_status(&self) -> Result<MonitoringState> {
        let _state = self.state_lock.lock().await;
        let report = self.api.status().await?;
        self.adopt(&report);
        Ok(self.state())
    }

    /// Start capturing. Returns the service's message on success.
    ///
    /// The phase becomes `Running` only when the action reported success and
    /// a status poll after [`ControlTiming::settle_delay`] confirms it.
    pub async fn start(&self) -> Result<String> {
        let operation = self.begin_control()?;
        let _state = self.state_lock.lock().await;
        let result = self.start_locked().await;
        operation.finish();
        result
    }

    /// Stop capturing. Returns the service's message on success.
    pub async fn stop(&self) -> Result<String> {
        let operation = self.begin_control()?;
        let _state = self.state_lock.lock().await;
        let result = self.stop_locked().await;
        operation.finish();
        result
    }

    /// Rebind capture to `name`, restarting it if it was running.
    pub async fn change_interface(&self, name: &str) -> Result<InterfaceChange> {
        let operation = self.begin_control()?;
        let _state = self.state_lock.lock().await;
        let result = self.change_interface_locked(name).await;
        operation.finish();
        result
    }

    async fn change_interface_locked(&self, name: &str) -> Result<InterfaceChange> {
        let (current, was_running) = {
            let state = self.state.borrow();
            (state.interface.clone(), state.phase.is_running())
        };
        if name == current {
            tracing::debug!(interface = name, "interface unchanged; nothing to do");
            return Ok(InterfaceChange::Unchanged);
        }

        tracing::info!(from = %current, to = name, was_running, "changing capture interface");

        if was_running {
            self.stop_locked().await?;
            time::sleep(self.timing.interface_settle).await;
        }

        if let Err(e) = self.api.set_interface(name).await {
            return Err(self.record_failure(None, e.to_string()));
        }
        self.state.send_modify(|s| {
            s.interface = name.to_string();
            s.interface_exists = Some(true);
            s.last_error = None;
        });

        if !was_running {
            return Ok(InterfaceChange::Switched);
        }

        time::sleep(self.timing.interface_settle).await;
        self.start_locked().await?;
        Ok(InterfaceChange::Restarted)
    }

    /// One reconciliation tick: while `Running`, poll and correct drift.
    ///
    /// A transitional phase left behind by an interrupted operation is
    /// replaced by the polled state. Skipped while a control operation or
    /// another poll is in flight.
    pub async fn reconcile_once(&self) -> Result<ReconcileOutcome> {
        if self.is_busy() {
            tracing::trace!("control operation in flight; skipping reconciliation");
            return Ok(ReconcileOutcome::Skipped);
        }
        let Ok(_state) = self.state_lock.try_lock() else {
            return Ok(ReconcileOutcome::Skipped);
        };
        let phase = self.phase();
        if !phase.is_running() && !phase.is_transitional() {
            return Ok(ReconcileOutcome::Skipped);
        }

        let report = self.api.status().await?;
        if phase.is_transitional() {
            self.adopt(&report);
            tracing::info!(
                stale = %phase,
                phase = %self.phase(),
                "resynchronised after an interrupted control operation"
            );
            return Ok(ReconcileOutcome::Corrected);
        }

        let drifted = !report.running;
        self.state.send_modify(|s| {
            s.absorb_status(&report);
            if drifted {
                s.phase = Phase::Stopped;
            }
        });

        if drifted {
            tracing::warn!(
                interface = %report.interface,
                last_error = report.sniffer_stats.last_error.as_deref().unwrap_or("-"),
                "capture stopped on the service side"
            );
            Ok(ReconcileOutcome::Corrected)
        } else {
            Ok(ReconcileOutcome::InSync)
        }
    }

    /// Spawn the periodic reconciliation poll. Runs until `cancel` fires.
    pub fn spawn_reconciler(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = time::interval(this.timing.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if let Err(e) = this.reconcile_once().await {
                    tracing::debug!(error = %e, "reconciliation poll failed");
                }
            }
            tracing::debug!("reconciler stopped");
        })
    }

    // ── Private implementation ────────────────────────────────────────────

    async fn start_locked(&self) -> Result<String> {
        self.set_phase(Phase::Starting);

        let response = match self.api.start().await {
            Ok(response) => response,
            Err(e) => return Err(self.record_failure(Some(Phase::Failed), e.to_string())),
        };

        match response.start_status() {
            status if status.claims_running() => {}
            StartStatus::Warning => {
                let message = response
                    .message
                    .unwrap_or_else(|| "Service reported a warning while starting".to_string());
                return Err(self.record_failure(Some(Phase::Stopped), message));
            }
            _ => {
                let message = response
                    .message
                    .unwrap_or_else(|| format!("Start failed ({})", response.status));
                return Err(self.record_failure(Some(Phase::Failed), message));
            }
        }

        time::sleep(self.timing.settle_delay).await;

        let report = match self.api.status().await {
            Ok(report) => report,
            Err(e) => {
                let message = format!("Could not confirm that capture started: {e}");
                return Err(self.record_failure(Some(Phase::Failed), message));
            }
        };

        if !report.running {
            self.state.send_modify(|s| s.absorb_status(&report));
            let message = match report.sniffer_stats.last_error.as_deref() {
                Some(detail) => format!("Capture did not start: {detail}"),
                None => "Service accepted the start request but capture is not running".to_string(),
            };
            return Err(self.record_failure(Some(Phase::Failed), message));
        }

        self.state.send_modify(|s| {
            s.absorb_status(&report);
            s.phase = Phase::Running;
            s.last_error = None;
        });
        tracing::info!(interface = %report.interface, "capture running");
        Ok(response
            .message
            .unwrap_or_else(|| format!("Capture running on {}", report.interface)))
    }

    async fn stop_locked(&self) -> Result<String> {
        self.set_phase(Phase::Stopping);

        match self.api.stop().await {
            Ok(ack) => {
                self.state.send_modify(|s| {
                    s.phase = Phase::Stopped;
                    s.last_error = None;
                });
                tracing::info!("capture stopped");
                Ok(ack.message.unwrap_or_else(|| "Capture stopped".to_string()))
            }
            Err(e) => {
                let message = e.to_string();
                // The stop may or may not have happened; ask.
                let phase = match self.api.status().await {
                    Ok(report) => {
                        self.state.send_modify(|s| s.absorb_status(&report));
                        if report.running {
                            Phase::Running
                        } else {
                            Phase::Stopped
                        }
                    }
                    Err(poll_error) => {
                        tracing::debug!(error = %poll_error, "status poll after failed stop also failed");
                        Phase::Failed
                    }
                };
                Err(self.record_failure(Some(phase), message))
            }
        }
    }

    /// Claim the control slot, or fail with [`FlowwatchError::Busy`].
    fn begin_control(&self) -> Result<ControlOperation<'_>> {
        self.control_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| FlowwatchError::Busy)?;
        Ok(ControlOperation {
            owner: self,
            finished: false,
        })
    }

    fn set_phase(&self, phase: Phase) {
        self.state.send_modify(|s| s.phase = phase);
    }

    /// Adopt a status poll as the complete truth. Only `last_error` survives.
    fn adopt(&self, report: &StatusReport) {
        self.state.send_modify(|s| {
            let last_error = s.last_error.take();
            *s = MonitoringState::from_status(report);
            s.last_error = last_error;
        });
    }

    /// Record a failed operation, optionally moving to `phase`, and build the
    /// error handed back to the caller.
    fn record_failure(&self, phase: Option<Phase>, message: String) -> FlowwatchError {
        tracing::warn!(%message, "control operation failed");
        self.state.send_modify(|s| {
            if let Some(phase) = phase {
                s.phase = phase;
            }
            s.last_error = Some(message.clone());
        });
        FlowwatchError::ControlAction(message)
    }
}

// ── Control slot ──────────────────────────────────────────────────────────────

/// Holds the control slot for one operation and releases it on drop.
///
/// Dropped without [`finish`](Self::finish) means the caller abandoned the
/// operation mid-flight; the phase may then be stale until the next
/// reconciliation tick.
struct ControlOperation<'a> {
    owner: &'a ControlOrchestrator,
    finished: bool,
}

impl ControlOperation<'_> {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for ControlOperation<'_> {
    fn drop(&mut self) {
        if !self.finished && self.owner.phase().is_transitional() {
            tracing::warn!(phase = %self.owner.phase(), "control operation abandoned before it finished");
            self.owner.state.send_modify(|s| {
                s.last_error = Some("Control operation was interrupted".to_string());
            });
        }
        self.owner.control_in_flight.store(false, Ordering::Release);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
