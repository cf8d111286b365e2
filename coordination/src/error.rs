//! Escalation error types

use thiserror::Error;

use crate::escalation::state::{AlertStatus, IllegalTransition};
use crate::planner::PlanError;
use crate::roster::RosterError;

/// Result type alias for escalation operations
pub type EscalationResult<T> = Result<T, EscalationError>;

/// Errors surfaced by the escalation planner and loop.
///
/// Planning failures (`NoAvailableCaregivers`, `Planning`) leave the alert
/// idle. `Roster`, `InvalidPlan` and `Internal` move it to the error state.
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("No caregivers are available")]
    NoAvailableCaregivers,

    #[error("Could not determine an escalation path: {0}")]
    Planning(#[from] PlanError),

    #[error("Roster unavailable: {0}")]
    Roster(#[from] RosterError),

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    #[error("An alert is already {0}; reset it first")]
    AlertInProgress(AlertStatus),

    #[error("Alert run {0} was superseded by a reset")]
    Superseded(u64),

    #[error("Escalation plan invariant violated: {0}")]
    InvalidPlan(String),

    #[error("Invalid escalation configuration: {0}")]
    Config(String),

    #[error("Internal escalation error: {0}")]
    Internal(String),
}

impl EscalationError {
    /// Whether the alert stays usable (idle) after this error.
    pub fn is_planning_failure(&self) -> bool {
        matches!(self, Self::NoAvailableCaregivers | Self::Planning(_))
    }
}
