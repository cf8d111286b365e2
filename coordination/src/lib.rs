//! Fall-response escalation core
//!
//! This library provides:
//! - A deterministic planner that ranks caregivers by distance to the fall
//!   and historical response time
//! - An alert state machine (`idle → pending → active → acknowledged`)
//! - A timed escalation loop that walks the plan, notifying one caregiver
//!   at a time until someone acknowledges, the path runs out, or the alert
//!   is reset
//! - Seams for the roster store and the notifier, plus an event bus
//! - The post-acknowledgement call session (`idle → calling → active → ended`)
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use fallwise_coordination::{EscalationLoop, FallEvent, FallSeverity, InMemoryRoster, LogNotifier};
//!
//! let roster = InMemoryRoster::with_caregivers(caregivers)?.shared();
//! let alert = EscalationLoop::new(roster, Arc::new(LogNotifier));
//! let mut events = alert.subscribe();
//!
//! alert.simulate(FallEvent::new(FallSeverity::High, None)).await?;
//! // ... later, when the caregiver answers
//! alert.acknowledge()?;
//! alert.reset()?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod error;
pub mod escalation;
pub mod events;
pub mod model;
pub mod notify;
pub mod planner;
pub mod roster;
pub mod session;

pub use error::{EscalationError, EscalationResult};

// Re-export escalation types
pub use escalation::{
    AlertOutcome, AlertSnapshot, AlertStatus, EscalationLoop, EscalationPlan, ExhaustionPolicy,
    LoopConfig, TransitionRecord, DEFAULT_TIMEOUT_SECS,
};

// Re-export event types
pub use events::{AlertEvent, EventBus, EventHistory, ResetReason, SharedEventBus};

// Re-export model types
pub use model::{
    Caregiver, CaregiverId, Channel, ContactChannels, FallEvent, FallSeverity, GeoPoint,
};

// Re-export seams
pub use notify::{alert_message, LogNotifier, Notifier, NotifyError, NotifyReceipt, Recipient};
pub use planner::{plan, EscalationPlanner, PlanError, PlannerConfig, RankedCaregiver};
pub use roster::{InMemoryRoster, RosterError, RosterSnapshot, RosterStore, SharedRosterStore};
pub use session::{CommunicationSession, CommunicationStatus, IllegalSessionTransition};
