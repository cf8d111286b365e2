//! Alert events: pub/sub for everything the escalation loop does
//!
//! 1. **Event Types** (`types.rs`): what happened to an alert, tagged with
//!    the alert generation it belongs to.
//!
//! 2. **Event Bus** (`bus.rs`): Tokio broadcast-based pub/sub.
//!
//! 3. **Event History** (`history.rs`): bounded in-memory ring fed from the
//!    bus; a finished run can be read back by generation.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Escalation  │────▶│  Event Bus   │────▶│  Subscribers │
//! │     loop     │     │  (broadcast) │     │ (CLI, logs)  │
//! └──────────────┘     └──────┬───────┘     └──────────────┘
//!                             │
//!                             ▼
//!                      ┌──────────────┐
//!                      │ EventHistory │
//!                      └──────────────┘
//! ```

pub mod bus;
pub mod history;
pub mod types;

pub use bus::{EventBus, EventBusError, EventBusResult, SharedEventBus};
pub use history::{EventHistory, SharedEventHistory};
pub use types::{AlertEvent, ResetReason};
