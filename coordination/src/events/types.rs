//! Event types for the alert lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CaregiverId, FallSeverity, GeoPoint};

/// Why an alert went back to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    /// Explicit user reset
    Manual,
    /// A new fall was simulated while a finished alert was still displayed
    Superseded,
}

/// Everything observable about an alert run.
///
/// `generation` identifies the run; it increases on every simulate and reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    /// A fall was reported and planning started
    FallSimulated {
        generation: u64,
        severity: FallSeverity,
        location: Option<GeoPoint>,
        timestamp: DateTime<Utc>,
    },

    /// Planning succeeded; the alert is active
    PlanComputed {
        generation: u64,
        path: Vec<CaregiverId>,
        timeout_secs: u32,
        timestamp: DateTime<Utc>,
    },

    /// Planning produced nothing to do or rejected its input
    PlanningFailed {
        generation: u64,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A caregiver is being contacted
    CaregiverNotified {
        generation: u64,
        cursor: usize,
        round: u32,
        caregiver_id: CaregiverId,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// A notify call failed; escalation continues regardless
    NotificationFailed {
        generation: u64,
        cursor: usize,
        caregiver_id: CaregiverId,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Countdown hit zero and the next caregiver is up
    Escalated {
        generation: u64,
        from_cursor: usize,
        to_cursor: usize,
        timestamp: DateTime<Utc>,
    },

    /// Path exhausted under the cycle policy; starting from the top
    CycleRestarted {
        generation: u64,
        round: u32,
        timestamp: DateTime<Utc>,
    },

    /// Path exhausted with nobody responding; alert is unresolved
    Exhausted {
        generation: u64,
        notified: usize,
        timestamp: DateTime<Utc>,
    },

    /// The current caregiver responded
    Acknowledged {
        generation: u64,
        cursor: usize,
        caregiver_id: CaregiverId,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// Alert state cleared
    Reset {
        generation: u64,
        reason: ResetReason,
        timestamp: DateTime<Utc>,
    },

    /// Unexpected failure; only a manual reset recovers
    Failed {
        generation: u64,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl AlertEvent {
    /// Short machine-readable name of the event
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::FallSimulated { .. } => "fall_simulated",
            Self::PlanComputed { .. } => "plan_computed",
            Self::PlanningFailed { .. } => "planning_failed",
            Self::CaregiverNotified { .. } => "caregiver_notified",
            Self::NotificationFailed { .. } => "notification_failed",
            Self::Escalated { .. } => "escalated",
            Self::CycleRestarted { .. } => "cycle_restarted",
            Self::Exhausted { .. } => "exhausted",
            Self::Acknowledged { .. } => "acknowledged",
            Self::Reset { .. } => "reset",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            Self::FallSimulated { generation, .. }
            | Self::PlanComputed { generation, .. }
            | Self::PlanningFailed { generation, .. }
            | Self::CaregiverNotified { generation, .. }
            | Self::NotificationFailed { generation, .. }
            | Self::Escalated { generation, .. }
            | Self::CycleRestarted { generation, .. }
            | Self::Exhausted { generation, .. }
            | Self::Acknowledged { generation, .. }
            | Self::Reset { generation, .. }
            | Self::Failed { generation, .. } => *generation,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::FallSimulated { timestamp, .. }
            | Self::PlanComputed { timestamp, .. }
            | Self::PlanningFailed { timestamp, .. }
            | Self::CaregiverNotified { timestamp, .. }
            | Self::NotificationFailed { timestamp, .. }
            | Self::Escalated { timestamp, .. }
            | Self::CycleRestarted { timestamp, .. }
            | Self::Exhausted { timestamp, .. }
            | Self::Acknowledged { timestamp, .. }
            | Self::Reset { timestamp, .. }
            | Self::Failed { timestamp, .. } => *timestamp,
        }
    }

    /// Whether this event ends the active phase of a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::PlanningFailed { .. }
                | Self::Exhausted { .. }
                | Self::Acknowledged { .. }
                | Self::Reset { .. }
                | Self::Failed { .. }
        )
    }
}
