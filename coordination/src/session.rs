//! Communication session: the two-way call that follows an acknowledgement
//!
//! ```text
//! Idle ──start──▶ Calling ──connect──▶ Active
//!                    │                   │
//!                    └──────end──────────┴──▶ Ended ──reset──▶ Idle
//! ```
//!
//! The session is independent of the alert machine. The alert is already
//! acknowledged when a session starts, and ending the call is what resolves
//! the incident for the operator.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::CaregiverId;

/// Where the call with the responding caregiver stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationStatus {
    #[default]
    Idle,
    /// Ringing the caregiver who acknowledged
    Calling,
    /// Caregiver picked up
    Active,
    Ended,
}

impl fmt::Display for CommunicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Calling => write!(f, "calling"),
            Self::Active => write!(f, "active"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

fn is_legal_transition(from: CommunicationStatus, to: CommunicationStatus) -> bool {
    use CommunicationStatus::*;

    if to == Idle {
        return true;
    }

    matches!(
        (from, to),
        (Idle, Calling) | (Calling, Active) | (Calling, Ended) | (Active, Ended)
    )
}

/// Error returned when a session step is out of order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Illegal communication transition: {from} → {to}")]
pub struct IllegalSessionTransition {
    pub from: CommunicationStatus,
    pub to: CommunicationStatus,
}

/// One call with the caregiver who acknowledged an alert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommunicationSession {
    status: CommunicationStatus,
    caregiver_id: Option<CaregiverId>,
    caregiver_name: Option<String>,
    started_at: Option<DateTime<Utc>>,
    connected_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl CommunicationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> CommunicationStatus {
        self.status
    }

    pub fn caregiver_id(&self) -> Option<&str> {
        self.caregiver_id.as_deref()
    }

    pub fn caregiver_name(&self) -> Option<&str> {
        self.caregiver_name.as_deref()
    }

    /// Idle → Calling.
    pub fn start(
        &mut self,
        caregiver_id: impl Into<CaregiverId>,
        caregiver_name: impl Into<String>,
    ) -> Result<(), IllegalSessionTransition> {
        self.transition(CommunicationStatus::Calling)?;
        let name = caregiver_name.into();
        info!(caregiver = %name, "Calling responding caregiver");
        self.caregiver_id = Some(caregiver_id.into());
        self.caregiver_name = Some(name);
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Calling → Active.
    pub fn connect(&mut self) -> Result<(), IllegalSessionTransition> {
        self.transition(CommunicationStatus::Active)?;
        self.connected_at = Some(Utc::now());
        Ok(())
    }

    /// Calling or Active → Ended.
    pub fn end(&mut self) -> Result<(), IllegalSessionTransition> {
        self.transition(CommunicationStatus::Ended)?;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Back to Idle from anywhere, forgetting the caregiver.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Time spent connected, once the call has ended.
    pub fn talk_time(&self) -> Option<chrono::Duration> {
        match (self.connected_at, self.ended_at) {
            (Some(connected), Some(ended)) => Some(ended - connected),
            _ => None,
        }
    }

    fn transition(&mut self, to: CommunicationStatus) -> Result<(), IllegalSessionTransition> {
        let from = self.status;
        if !is_legal_transition(from, to) {
            return Err(IllegalSessionTransition { from, to });
        }
        debug!(%from, %to, "Communication transition");
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_call_lifecycle() {
        let mut session = CommunicationSession::new();
        assert_eq!(session.status(), CommunicationStatus::Idle);

        session.start("2", "Shafiq").unwrap();
        assert_eq!(session.status(), CommunicationStatus::Calling);
        assert_eq!(session.caregiver_id(), Some("2"));
        assert!(session.talk_time().is_none());

        session.connect().unwrap();
        session.end().unwrap();
        assert_eq!(session.status(), CommunicationStatus::Ended);
        assert!(session.talk_time().unwrap() >= chrono::Duration::zero());
    }

    #[test]
    fn test_unanswered_call_can_end() {
        let mut session = CommunicationSession::new();
        session.start("1", "Guru").unwrap();
        session.end().unwrap();
        assert_eq!(session.status(), CommunicationStatus::Ended);
        assert!(session.talk_time().is_none());
    }

    #[test]
    fn test_out_of_order_steps_are_rejected() {
        let mut session = CommunicationSession::new();
        assert_eq!(
            session.connect(),
            Err(IllegalSessionTransition {
                from: CommunicationStatus::Idle,
                to: CommunicationStatus::Active,
            })
        );
        assert!(session.end().is_err());

        session.start("1", "Guru").unwrap();
        assert!(session.start("3", "Sham").is_err());
        assert_eq!(session.caregiver_id(), Some("1"));

        session.end().unwrap();
        assert!(session.connect().is_err());
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut session = CommunicationSession::new();
        session.start("1", "Guru").unwrap();
        session.connect().unwrap();
        session.reset();
        assert_eq!(session.status(), CommunicationStatus::Idle);
        assert!(session.caregiver_name().is_none());
        session.start("4", "Sean").unwrap();
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&CommunicationStatus::Calling).unwrap();
        assert_eq!(json, "\"calling\"");
    }
}
