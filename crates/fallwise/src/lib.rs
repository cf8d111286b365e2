//! Fall-response alert runner.
//!
//! Wires the escalation core from `fallwise_coordination` to the outside
//! world: a TOML/env configuration, a JSON roster file, Twilio SMS and voice
//! delivery, an append-only incident log, random demo placement and the
//! follow-up call with whoever responds.

pub mod area;
pub mod config;
pub mod incident_log;
pub mod roster_file;
pub mod runner;
pub mod twilio;

pub use area::{ServiceArea, KUNDRATHUR_SRIPERUMBUDUR};
pub use config::{FallwiseConfig, TwilioCredentials};
pub use incident_log::IncidentLog;
pub use roster_file::{default_roster, JsonRosterStore};
pub use runner::{follow_up_call, run_simulation, CallOptions, RunOptions, RunOutcome, RunReport};
pub use twilio::TwilioNotifier;
