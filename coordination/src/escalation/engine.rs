//! Escalation Loop: timed driver around the alert state machine
//!
//! One [`EscalationLoop`] per monitored subject. Every mutation goes through
//! a single mutex around [`AlertMachine`]; the timer task, `simulate`,
//! `acknowledge` and `reset` all serialize on it.
//!
//! ```text
//! simulate ─▶ begin (pending) ─▶ roster snapshot ─▶ plan ─▶ activate ─▶ notify path[0]
//!                                                               │
//!                        ┌──────── timer task (1 s interval) ◀──┘
//!                        ▼
//!                 tick(generation) ── stale? ─▶ stop
//!                        │
//!                        ├─ counting
//!                        ├─ advanced / restarted ─▶ notify path[cursor]
//!                        └─ exhausted / failed ─▶ stop
//! ```
//!
//! Ticks carry the generation they were started for. Reset and acknowledge
//! cancel the timer and change the state, so a tick that was already queued
//! finds a different generation or a non-active status and does nothing.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{EscalationError, EscalationResult};
use crate::escalation::state::{
    AlertMachine, AlertSnapshot, AlertStatus, ExhaustionPolicy, NotifyRequest, TickOutcome,
    TransitionRecord, DEFAULT_TIMEOUT_SECS,
};
use crate::events::{AlertEvent, EventBus, EventHistory, ResetReason, SharedEventBus};
use crate::model::FallEvent;
use crate::notify::{alert_message, Recipient, SharedNotifier};
use crate::planner::EscalationPlanner;
use crate::roster::{RosterSnapshot, SharedRosterStore};

/// Configuration for the escalation loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Seconds to wait on each caregiver before escalating
    pub timeout_secs: u32,
    /// Length of one countdown step in milliseconds. Deployments keep the
    /// one-second default; shorter steps are for tests.
    pub tick_millis: u64,
    /// Behaviour when the last caregiver times out
    pub exhaustion: ExhaustionPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            tick_millis: 1000,
            exhaustion: ExhaustionPolicy::Terminate,
        }
    }
}

impl LoopConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn validate(&self) -> EscalationResult<()> {
        if self.timeout_secs == 0 {
            return Err(EscalationError::Config("timeout_secs must be at least 1".into()));
        }
        if self.tick_millis == 0 {
            return Err(EscalationError::Config("tick_millis must be at least 1".into()));
        }
        Ok(())
    }
}

/// Machine plus the cancellation handle of its running timer.
struct Core {
    machine: AlertMachine,
    timer: Option<CancellationToken>,
}

impl Core {
    fn stop_timer(&mut self) {
        if let Some(token) = self.timer.take() {
            token.cancel();
        }
    }
}

struct Shared {
    core: Mutex<Core>,
    roster: SharedRosterStore,
    notifier: SharedNotifier,
    planner: EscalationPlanner,
    bus: SharedEventBus,
    config: LoopConfig,
}

impl Shared {
    fn lock(&self) -> EscalationResult<MutexGuard<'_, Core>> {
        self.core
            .lock()
            .map_err(|e| EscalationError::Internal(format!("alert state lock poisoned: {e}")))
    }

    fn publish(&self, event: AlertEvent) {
        if let Err(e) = self.bus.publish(event) {
            warn!("Failed to publish alert event: {}", e);
        }
    }

    /// Send one notification without blocking the caller.
    fn dispatch(&self, request: NotifyRequest) {
        let NotifyRequest {
            generation,
            cursor,
            round,
            caregiver,
            severity,
        } = request;

        info!(
            generation,
            cursor,
            round,
            caregiver = %caregiver.name,
            %severity,
            "Notifying caregiver"
        );
        self.publish(AlertEvent::CaregiverNotified {
            generation,
            cursor,
            round,
            caregiver_id: caregiver.id.clone(),
            name: caregiver.name.clone(),
            timestamp: Utc::now(),
        });

        let notifier = self.notifier.clone();
        let bus = self.bus.clone();
        let recipient = Recipient::from(&caregiver);
        let message = alert_message(severity);
        tokio::spawn(async move {
            match notifier.notify(&recipient, &message).await {
                Ok(receipt) => {
                    debug!(
                        generation,
                        cursor,
                        delivered = ?receipt.delivered,
                        skipped = ?receipt.skipped,
                        "Notification sent"
                    );
                }
                Err(e) => {
                    warn!(generation, cursor, caregiver = %recipient.name, "Notification failed: {}", e);
                    let event = AlertEvent::NotificationFailed {
                        generation,
                        cursor,
                        caregiver_id: caregiver.id,
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    };
                    if let Err(e) = bus.publish(event) {
                        warn!("Failed to publish alert event: {}", e);
                    }
                }
            }
        });
    }

    /// Apply one timer tick. Returns whether the timer should keep running.
    ///
    /// Events and the next notification are emitted before the lock is
    /// released, so a reset or acknowledge never lands between an advance
    /// and its notification.
    fn on_tick(&self, generation: u64) -> bool {
        let mut core = match self.lock() {
            Ok(core) => core,
            Err(e) => {
                error!(generation, "Tick aborted: {}", e);
                return false;
            }
        };

        match core.machine.tick(generation) {
            TickOutcome::Stale => {
                debug!(generation, "Stale tick ignored");
                false
            }
            TickOutcome::Counting { .. } => true,
            TickOutcome::Advanced {
                from_cursor,
                request,
            } => {
                warn!(
                    generation,
                    from_cursor,
                    to_cursor = request.cursor,
                    "No response; escalating to next caregiver"
                );
                self.publish(AlertEvent::Escalated {
                    generation,
                    from_cursor,
                    to_cursor: request.cursor,
                    timestamp: Utc::now(),
                });
                self.dispatch(request);
                true
            }
            TickOutcome::Restarted { round, request } => {
                warn!(generation, round, "No response; restarting alert cycle");
                self.publish(AlertEvent::CycleRestarted {
                    generation,
                    round,
                    timestamp: Utc::now(),
                });
                self.dispatch(request);
                true
            }
            TickOutcome::Exhausted { notified } => {
                core.timer = None;
                warn!(generation, notified, "Escalation path exhausted; alert unresolved");
                self.publish(AlertEvent::Exhausted {
                    generation,
                    notified,
                    timestamp: Utc::now(),
                });
                false
            }
            TickOutcome::Failed { error } => {
                core.timer = None;
                error!(generation, "Escalation failed: {}", error);
                self.publish(AlertEvent::Failed {
                    generation,
                    error,
                    timestamp: Utc::now(),
                });
                false
            }
        }
    }
}

/// Start the countdown task for `generation`.
fn spawn_timer(shared: Weak<Shared>, generation: u64, period: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let cancelled = token.clone();

    tokio::spawn(async move {
        // Anchored schedule: tick n fires at start + n * period.
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        loop {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => break,
                _ = interval.tick() => {
                    let Some(strong) = shared.upgrade() else { break };
                    if cancelled.is_cancelled() || !strong.on_tick(generation) {
                        break;
                    }
                }
            }
        }
        debug!(generation, "Escalation timer stopped");
    });

    token
}

/// Timed escalation over a roster for one monitored subject.
///
/// Cheap to clone; clones drive the same alert.
#[derive(Clone)]
pub struct EscalationLoop {
    shared: Arc<Shared>,
}

impl EscalationLoop {
    /// Create a loop with default configuration.
    ///
    /// The bus keeps a bounded history so [`run_events`](Self::run_events)
    /// works without a subscriber.
    pub fn new(roster: SharedRosterStore, notifier: SharedNotifier) -> Self {
        Self::build(
            roster,
            notifier,
            EscalationPlanner::new(),
            EventBus::with_history(EventHistory::default().shared()).shared(),
            LoopConfig::default(),
        )
    }

    /// Create with custom configuration
    pub fn with_config(
        roster: SharedRosterStore,
        notifier: SharedNotifier,
        config: LoopConfig,
    ) -> EscalationResult<Self> {
        config.validate()?;
        Ok(Self::build(
            roster,
            notifier,
            EscalationPlanner::new(),
            EventBus::with_history(EventHistory::default().shared()).shared(),
            config,
        ))
    }

    /// Create with every collaborator supplied
    pub fn build(
        roster: SharedRosterStore,
        notifier: SharedNotifier,
        planner: EscalationPlanner,
        bus: SharedEventBus,
        config: LoopConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core {
                    machine: AlertMachine::new(config.timeout_secs, config.exhaustion),
                    timer: None,
                }),
                roster,
                notifier,
                planner,
                bus,
                config,
            }),
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.shared.config
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.shared.bus
    }

    /// Subscribe to alert events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AlertEvent> {
        self.shared.bus.subscribe()
    }

    /// Recorded events of one run, oldest first.
    ///
    /// Empty when the bus was built without a history or the run has been
    /// evicted from it.
    pub fn run_events(&self, generation: u64) -> Vec<AlertEvent> {
        self.shared
            .bus
            .history()
            .map(|history| history.for_generation(generation))
            .unwrap_or_default()
    }

    /// Current alert view
    pub fn snapshot(&self) -> EscalationResult<AlertSnapshot> {
        Ok(self.shared.lock()?.machine.snapshot())
    }

    pub fn status(&self) -> EscalationResult<AlertStatus> {
        Ok(self.shared.lock()?.machine.status())
    }

    /// Recorded state transitions, oldest first
    pub fn transitions(&self) -> EscalationResult<Vec<TransitionRecord>> {
        Ok(self.shared.lock()?.machine.transitions().cloned().collect())
    }

    /// Start escalating for a new fall.
    ///
    /// Planning failures return the alert to idle and are reported as
    /// errors; a roster read failure moves the alert to the error state.
    pub async fn simulate(&self, fall: FallEvent) -> EscalationResult<AlertSnapshot> {
        let shared = &self.shared;
        let severity = fall.severity;
        let location = fall.location;

        let generation = {
            let mut core = shared.lock()?;
            let generation = core.machine.begin(fall)?;
            info!(generation, %severity, "Fall reported; planning escalation");
            shared.publish(AlertEvent::FallSimulated {
                generation,
                severity,
                location,
                timestamp: Utc::now(),
            });
            generation
        };

        let roster = match shared.roster.list().await {
            Ok(roster) => roster,
            Err(e) => {
                let err = EscalationError::from(e);
                self.fail_run(generation, &err);
                return Err(err);
            }
        };
        let snapshot = RosterSnapshot::new(roster);

        let sequence = match shared.planner.plan(&snapshot, severity, location) {
            Ok(sequence) => sequence,
            Err(e) => {
                let err = EscalationError::from(e);
                self.abandon_run(generation, &err)?;
                return Err(err);
            }
        };

        if sequence.is_empty() {
            let err = EscalationError::NoAvailableCaregivers;
            self.abandon_run(generation, &err)?;
            return Err(err);
        }

        // The first notification goes out under the lock, like every later one.
        let mut core = shared.lock()?;
        let request = match core.machine.activate(generation, snapshot, sequence) {
            Ok(request) => request,
            Err(err) => {
                if core.machine.status() == AlertStatus::Error {
                    error!(generation, "Escalation failed: {}", err);
                    shared.publish(AlertEvent::Failed {
                        generation,
                        error: err.to_string(),
                        timestamp: Utc::now(),
                    });
                }
                return Err(err);
            }
        };
        core.stop_timer();
        core.timer = Some(spawn_timer(
            Arc::downgrade(shared),
            generation,
            shared.config.tick(),
        ));
        let view = core.machine.snapshot();

        info!(generation, path = ?view.path, "Escalation active");
        shared.publish(AlertEvent::PlanComputed {
            generation,
            path: view.path.clone(),
            timeout_secs: shared.config.timeout_secs,
            timestamp: Utc::now(),
        });
        shared.dispatch(request);
        Ok(view)
    }

    fn abandon_run(&self, generation: u64, err: &EscalationError) -> EscalationResult<()> {
        let reason = err.to_string();
        let mut core = self.shared.lock()?;
        match core.machine.abandon(generation, &reason) {
            Ok(()) => {}
            // A reset already cleared this run.
            Err(EscalationError::Superseded(_)) => return Ok(()),
            Err(e) => return Err(e),
        }
        warn!(generation, "Planning failed: {}", reason);
        self.shared.publish(AlertEvent::PlanningFailed {
            generation,
            reason,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn fail_run(&self, generation: u64, err: &EscalationError) {
        let Ok(mut core) = self.shared.lock() else {
            return;
        };
        if core.machine.fail(generation, &err.to_string()).is_ok() {
            error!(generation, "Escalation failed: {}", err);
            self.shared.publish(AlertEvent::Failed {
                generation,
                error: err.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    /// The caregiver currently being notified has responded.
    pub fn acknowledge(&self) -> EscalationResult<AlertSnapshot> {
        let mut core = self.shared.lock()?;
        let ack = core.machine.acknowledge()?;
        core.stop_timer();

        info!(
            generation = ack.generation,
            caregiver = %ack.caregiver.name,
            "Alert acknowledged"
        );
        self.shared.publish(AlertEvent::Acknowledged {
            generation: ack.generation,
            cursor: ack.cursor,
            caregiver_id: ack.caregiver.id,
            name: ack.caregiver.name,
            timestamp: Utc::now(),
        });
        Ok(core.machine.snapshot())
    }

    /// Clear the alert from any state. No tick applies after this returns.
    pub fn reset(&self) -> EscalationResult<AlertSnapshot> {
        let mut core = self.shared.lock()?;
        core.stop_timer();
        let generation = core.machine.reset(ResetReason::Manual);

        info!(generation, "Alert reset");
        self.shared.publish(AlertEvent::Reset {
            generation,
            reason: ResetReason::Manual,
            timestamp: Utc::now(),
        });
        Ok(core.machine.snapshot())
    }

    /// Whether a countdown task is currently running
    pub fn timer_running(&self) -> bool {
        self.shared
            .lock()
            .map(|core| core.timer.is_some())
            .unwrap_or(false)
    }
}
