//! Alert State: the lifecycle of one alert and its escalation plan
//!
//! [`AlertMachine`] is synchronous and clock-free apart from record
//! timestamps. The async driver in `engine.rs` owns one behind a mutex and
//! feeds it ticks; every method here is a single serialized transition.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EscalationError, EscalationResult};
use crate::events::ResetReason;
use crate::model::{Caregiver, CaregiverId, FallEvent, FallSeverity, GeoPoint};
use crate::roster::RosterSnapshot;

/// Default seconds to wait on one caregiver before moving on
pub const DEFAULT_TIMEOUT_SECS: u32 = 9;

/// Transition records kept per machine
const TRANSITION_LOG_CAPACITY: usize = 128;

/// Alert lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Nothing happening
    Idle,
    /// Fall reported, plan being computed
    Pending,
    /// Walking the plan on a timer
    Active,
    /// A caregiver responded; timer stopped
    Acknowledged,
    /// Unexpected failure; only a reset leaves this state
    Error,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Legal edges of the alert state graph:
///
/// ```text
/// Idle → Pending
/// Pending → Active | Idle | Error
/// Active → Acknowledged | Idle | Error
/// Acknowledged → Idle
/// Error → Idle
/// * → Idle (manual reset)
/// ```
fn is_legal_transition(from: AlertStatus, to: AlertStatus) -> bool {
    use AlertStatus::*;

    if to == Idle {
        return true;
    }

    matches!(
        (from, to),
        (Idle, Pending)
            | (Pending, Active)
            | (Pending, Error)
            | (Active, Acknowledged)
            | (Active, Error)
    )
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Illegal alert transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: AlertStatus,
    pub to: AlertStatus,
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: AlertStatus,
    pub to: AlertStatus,
    /// Alert run the transition belongs to
    pub generation: u64,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// What to do when the last caregiver in the path times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Go back to idle and report the alert as unresolved
    #[default]
    Terminate,
    /// Start again from the first caregiver
    Cycle,
}

/// How a finished run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOutcome {
    /// Nobody acknowledged before the path ran out
    Unresolved { notified: usize },
    /// Planning found nobody to notify or rejected its input
    PlanningFailed { reason: String },
}

/// Ordered path over a frozen roster, plus the walk position.
///
/// The snapshot and the index sequence are one unit: indices are only
/// meaningful against the snapshot they were planned from.
#[derive(Debug, Clone)]
pub struct EscalationPlan {
    snapshot: RosterSnapshot,
    sequence: Vec<usize>,
    cursor: usize,
    countdown: u32,
    /// Completed passes over the path (cycle policy only)
    round: u32,
}

impl EscalationPlan {
    /// Build a plan, checking every structural invariant.
    pub fn new(
        snapshot: RosterSnapshot,
        sequence: Vec<usize>,
        timeout_secs: u32,
    ) -> EscalationResult<Self> {
        if sequence.is_empty() {
            return Err(EscalationError::NoAvailableCaregivers);
        }
        let mut seen = HashSet::with_capacity(sequence.len());
        for &index in &sequence {
            let caregiver = snapshot.get(index).ok_or_else(|| {
                EscalationError::InvalidPlan(format!(
                    "index {index} outside roster of {}",
                    snapshot.len()
                ))
            })?;
            if !caregiver.is_available {
                return Err(EscalationError::InvalidPlan(format!(
                    "caregiver '{}' is unavailable",
                    caregiver.id
                )));
            }
            if !seen.insert(index) {
                return Err(EscalationError::InvalidPlan(format!(
                    "index {index} appears twice"
                )));
            }
        }
        Ok(Self {
            snapshot,
            sequence,
            cursor: 0,
            countdown: timeout_secs,
            round: 0,
        })
    }

    pub fn sequence(&self) -> &[usize] {
        &self.sequence
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn snapshot(&self) -> &RosterSnapshot {
        &self.snapshot
    }

    /// Caregiver at the cursor.
    pub fn current(&self) -> Option<&Caregiver> {
        self.sequence
            .get(self.cursor)
            .and_then(|&i| self.snapshot.get(i))
    }

    /// Caregiver ids in path order.
    pub fn path_ids(&self) -> Vec<CaregiverId> {
        self.sequence
            .iter()
            .filter_map(|&i| self.snapshot.get(i))
            .map(|c| c.id.clone())
            .collect()
    }
}

/// A notification the driver must send.
#[derive(Debug, Clone)]
pub struct NotifyRequest {
    pub generation: u64,
    pub cursor: usize,
    pub round: u32,
    pub caregiver: Caregiver,
    pub severity: FallSeverity,
}

/// Result of one timer tick.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Tick belonged to a finished or superseded run; nothing changed
    Stale,
    /// Still waiting on the current caregiver
    Counting { remaining: u32 },
    /// Moved to the next caregiver
    Advanced {
        from_cursor: usize,
        request: NotifyRequest,
    },
    /// Wrapped to the first caregiver (cycle policy)
    Restarted { round: u32, request: NotifyRequest },
    /// Path ran out (terminate policy); alert is idle again
    Exhausted { notified: usize },
    /// Invariant broken; alert moved to the error state
    Failed { error: String },
}

/// Details of an acknowledgment.
#[derive(Debug, Clone)]
pub struct Acknowledgment {
    pub generation: u64,
    pub cursor: usize,
    pub caregiver: Caregiver,
}

/// Point-in-time view of the alert for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSnapshot {
    pub status: AlertStatus,
    pub generation: u64,
    pub severity: Option<FallSeverity>,
    pub fall_location: Option<GeoPoint>,
    pub fall_timestamp: Option<DateTime<Utc>>,
    pub path: Vec<CaregiverId>,
    pub cursor: Option<usize>,
    pub countdown: Option<u32>,
    pub round: u32,
    pub current_caregiver: Option<CaregiverId>,
    pub acknowledged_by: Option<CaregiverId>,
    pub last_outcome: Option<AlertOutcome>,
    pub last_error: Option<String>,
}

/// The alert state machine for one monitored subject.
pub struct AlertMachine {
    status: AlertStatus,
    generation: u64,
    timeout_secs: u32,
    exhaustion: ExhaustionPolicy,
    fall: Option<FallEvent>,
    plan: Option<EscalationPlan>,
    acknowledged_by: Option<CaregiverId>,
    last_outcome: Option<AlertOutcome>,
    last_error: Option<String>,
    transitions: VecDeque<TransitionRecord>,
}

impl AlertMachine {
    pub fn new(timeout_secs: u32, exhaustion: ExhaustionPolicy) -> Self {
        Self {
            status: AlertStatus::Idle,
            generation: 0,
            timeout_secs: timeout_secs.max(1),
            exhaustion,
            fall: None,
            plan: None,
            acknowledged_by: None,
            last_outcome: None,
            last_error: None,
            transitions: VecDeque::new(),
        }
    }

    pub fn status(&self) -> AlertStatus {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn plan(&self) -> Option<&EscalationPlan> {
        self.plan.as_ref()
    }

    pub fn fall(&self) -> Option<&FallEvent> {
        self.fall.as_ref()
    }

    pub fn transitions(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.transitions.iter()
    }

    fn transition(&mut self, to: AlertStatus, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.status, to) {
            return Err(IllegalTransition {
                from: self.status,
                to,
            });
        }

        debug!(
            from = %self.status,
            to = %to,
            generation = self.generation,
            reason = reason.unwrap_or(""),
            "Alert transition"
        );

        if self.transitions.len() == TRANSITION_LOG_CAPACITY {
            self.transitions.pop_front();
        }
        self.transitions.push_back(TransitionRecord {
            from: self.status,
            to,
            generation: self.generation,
            at: Utc::now(),
            reason: reason.map(str::to_string),
        });
        self.status = to;
        Ok(())
    }

    fn check_run(&self, generation: u64, expected: AlertStatus) -> EscalationResult<()> {
        if generation != self.generation || self.status != expected {
            return Err(EscalationError::Superseded(generation));
        }
        Ok(())
    }

    fn request_for(&self, plan: &EscalationPlan, severity: FallSeverity) -> EscalationResult<NotifyRequest> {
        let caregiver = plan.current().cloned().ok_or_else(|| {
            EscalationError::Internal(format!("cursor {} outside path", plan.cursor))
        })?;
        Ok(NotifyRequest {
            generation: self.generation,
            cursor: plan.cursor,
            round: plan.round,
            caregiver,
            severity,
        })
    }

    /// Idle → Pending for a new fall. Returns the new run's generation.
    pub fn begin(&mut self, fall: FallEvent) -> EscalationResult<u64> {
        if self.status != AlertStatus::Idle {
            return Err(EscalationError::AlertInProgress(self.status));
        }
        self.generation += 1;
        self.last_outcome = None;
        self.last_error = None;
        self.acknowledged_by = None;
        self.plan = None;
        self.transition(AlertStatus::Pending, Some("fall reported"))?;
        self.fall = Some(fall);
        Ok(self.generation)
    }

    /// Pending → Active with a computed path. Returns the first notification.
    ///
    /// An empty path sends the alert back to idle with
    /// [`EscalationError::NoAvailableCaregivers`]; a structurally broken
    /// path moves it to the error state.
    pub fn activate(
        &mut self,
        generation: u64,
        snapshot: RosterSnapshot,
        sequence: Vec<usize>,
    ) -> EscalationResult<NotifyRequest> {
        self.check_run(generation, AlertStatus::Pending)?;

        if sequence.is_empty() {
            let err = EscalationError::NoAvailableCaregivers;
            self.abandon(generation, &err.to_string())?;
            return Err(err);
        }

        let plan = match EscalationPlan::new(snapshot, sequence, self.timeout_secs) {
            Ok(plan) => plan,
            Err(err) => {
                self.fail(generation, &err.to_string())?;
                return Err(err);
            }
        };

        let severity = self
            .fall
            .as_ref()
            .map(|f| f.severity)
            .ok_or_else(|| EscalationError::Internal("pending alert without a fall".into()))?;
        let request = self.request_for(&plan, severity)?;
        self.plan = Some(plan);
        self.transition(AlertStatus::Active, Some("plan computed"))?;
        Ok(request)
    }

    /// Pending → Idle after a planning failure.
    pub fn abandon(&mut self, generation: u64, reason: &str) -> EscalationResult<()> {
        self.check_run(generation, AlertStatus::Pending)?;
        self.transition(AlertStatus::Idle, Some(reason))?;
        self.clear();
        self.last_outcome = Some(AlertOutcome::PlanningFailed {
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Pending/Active → Error.
    pub fn fail(&mut self, generation: u64, error: &str) -> EscalationResult<()> {
        if generation != self.generation {
            return Err(EscalationError::Superseded(generation));
        }
        self.transition(AlertStatus::Error, Some(error))?;
        self.last_error = Some(error.to_string());
        Ok(())
    }

    /// Advance the countdown by one second.
    pub fn tick(&mut self, generation: u64) -> TickOutcome {
        if generation != self.generation || self.status != AlertStatus::Active {
            return TickOutcome::Stale;
        }
        let severity = match self.fall.as_ref() {
            Some(fall) => fall.severity,
            None => return self.tick_failed(generation, "active alert without a fall"),
        };
        let exhaustion = self.exhaustion;
        let timeout = self.timeout_secs;

        let Some(plan) = self.plan.as_mut() else {
            return self.tick_failed(generation, "active alert without a plan");
        };

        plan.countdown = plan.countdown.saturating_sub(1);
        if plan.countdown > 0 {
            return TickOutcome::Counting {
                remaining: plan.countdown,
            };
        }

        let from_cursor = plan.cursor;
        if from_cursor + 1 < plan.sequence.len() {
            plan.cursor += 1;
            plan.countdown = timeout;
            let plan = plan.clone();
            return match self.request_for(&plan, severity) {
                Ok(request) => TickOutcome::Advanced {
                    from_cursor,
                    request,
                },
                Err(err) => self.tick_failed(generation, &err.to_string()),
            };
        }

        match exhaustion {
            ExhaustionPolicy::Cycle => {
                plan.cursor = 0;
                plan.countdown = timeout;
                plan.round += 1;
                let round = plan.round;
                let plan = plan.clone();
                match self.request_for(&plan, severity) {
                    Ok(request) => TickOutcome::Restarted { round, request },
                    Err(err) => self.tick_failed(generation, &err.to_string()),
                }
            }
            ExhaustionPolicy::Terminate => {
                let notified = plan.sequence.len();
                if let Err(err) = self.transition(AlertStatus::Idle, Some("path exhausted")) {
                    return self.tick_failed(generation, &err.to_string());
                }
                self.clear();
                self.last_outcome = Some(AlertOutcome::Unresolved { notified });
                TickOutcome::Exhausted { notified }
            }
        }
    }

    fn tick_failed(&mut self, generation: u64, error: &str) -> TickOutcome {
        match self.fail(generation, error) {
            Ok(()) => TickOutcome::Failed {
                error: error.to_string(),
            },
            Err(_) => TickOutcome::Stale,
        }
    }

    /// Active → Acknowledged, crediting the caregiver at the cursor.
    pub fn acknowledge(&mut self) -> EscalationResult<Acknowledgment> {
        if self.status != AlertStatus::Active {
            return Err(IllegalTransition {
                from: self.status,
                to: AlertStatus::Acknowledged,
            }
            .into());
        }
        let (cursor, caregiver) = self
            .plan
            .as_ref()
            .and_then(|p| p.current().map(|c| (p.cursor, c.clone())))
            .ok_or_else(|| EscalationError::Internal("active alert without a plan".into()))?;

        self.transition(AlertStatus::Acknowledged, Some("caregiver responded"))?;
        self.acknowledged_by = Some(caregiver.id.clone());
        Ok(Acknowledgment {
            generation: self.generation,
            cursor,
            caregiver,
        })
    }

    /// Any state → Idle. Starts a new generation so in-flight ticks go stale.
    pub fn reset(&mut self, reason: ResetReason) -> u64 {
        let label = match reason {
            ResetReason::Manual => "manual reset",
            ResetReason::Superseded => "superseded",
        };
        if self.status != AlertStatus::Idle {
            if let Err(e) = self.transition(AlertStatus::Idle, Some(label)) {
                // Idle is reachable from every state; keep resetting regardless.
                warn!("{}", e);
                self.status = AlertStatus::Idle;
            }
        }
        self.clear();
        self.acknowledged_by = None;
        self.last_outcome = None;
        self.last_error = None;
        self.generation += 1;
        self.generation
    }

    fn clear(&mut self) {
        self.plan = None;
        self.fall = None;
    }

    pub fn snapshot(&self) -> AlertSnapshot {
        let plan = self.plan.as_ref();
        AlertSnapshot {
            status: self.status,
            generation: self.generation,
            severity: self.fall.as_ref().map(|f| f.severity),
            fall_location: self.fall.as_ref().and_then(|f| f.location),
            fall_timestamp: self.fall.as_ref().map(|f| f.occurred_at),
            path: plan.map(EscalationPlan::path_ids).unwrap_or_default(),
            cursor: plan.map(|p| p.cursor),
            countdown: plan
                .filter(|_| self.status == AlertStatus::Active)
                .map(|p| p.countdown),
            round: plan.map(|p| p.round).unwrap_or(0),
            current_caregiver: plan.and_then(|p| p.current()).map(|c| c.id.clone()),
            acknowledged_by: self.acknowledged_by.clone(),
            last_outcome: self.last_outcome.clone(),
            last_error: self.last_error.clone(),
        }
    }
}
