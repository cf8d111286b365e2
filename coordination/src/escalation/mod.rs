//! Escalation: alert state machine and its timed driver
//!
//! ```text
//! idle ──simulate──▶ pending ──plan ok──▶ active ──ack──▶ acknowledged
//!   ▲                   │                   │                 │
//!   │    plan empty /   │      timeout:     │                 │
//!   ├──── invalid ──────┘      advance,     │                 │
//!   │                          cycle or     │                 │
//!   ├──── exhausted ◀──────── terminate ────┘                 │
//!   │                                                         │
//!   └──────────────────────── reset (from any state) ◀────────┘
//!
//! pending/active ──unexpected failure──▶ error ──reset──▶ idle
//! ```

pub mod engine;
pub mod state;

pub use engine::{EscalationLoop, LoopConfig};
pub use state::{
    Acknowledgment, AlertMachine, AlertOutcome, AlertSnapshot, AlertStatus, EscalationPlan,
    ExhaustionPolicy, IllegalTransition, NotifyRequest, TickOutcome, TransitionRecord,
    DEFAULT_TIMEOUT_SECS,
};
