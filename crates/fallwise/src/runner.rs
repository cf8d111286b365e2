//! Drive one alert from simulate to a terminal event.

use std::time::Duration;

use fallwise_coordination::{
    AlertEvent, CommunicationSession, CommunicationStatus, EscalationError, EscalationLoop,
    FallEvent, IllegalSessionTransition,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tracing::{info, warn};

/// How a single run is driven.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Acknowledge on behalf of the current caregiver after this long
    pub ack_after: Option<Duration>,
    /// Give up (and reset) if nothing terminal happens within this window
    pub max_wait: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            ack_after: None,
            max_wait: Duration::from_secs(300),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Acknowledged { caregiver_id: String, name: String },
    Unresolved { notified: usize },
    PlanningFailed { reason: String },
    Failed { error: String },
    /// Someone else reset the alert
    Cancelled,
    /// `max_wait` elapsed; the alert was reset
    TimedOut,
}

/// Everything observed during one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub generation: u64,
    pub outcome: RunOutcome,
    pub events: Vec<AlertEvent>,
}

impl RunReport {
    /// Caregiver ids in the order they were notified.
    pub fn notified(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                AlertEvent::CaregiverNotified { caregiver_id, .. } => Some(caregiver_id.as_str()),
                _ => None,
            })
            .collect()
    }
}

fn terminal_outcome(event: &AlertEvent) -> Option<RunOutcome> {
    match event {
        AlertEvent::Acknowledged {
            caregiver_id, name, ..
        } => Some(RunOutcome::Acknowledged {
            caregiver_id: caregiver_id.clone(),
            name: name.clone(),
        }),
        AlertEvent::Exhausted { notified, .. } => Some(RunOutcome::Unresolved {
            notified: *notified,
        }),
        AlertEvent::PlanningFailed { reason, .. } => Some(RunOutcome::PlanningFailed {
            reason: reason.clone(),
        }),
        AlertEvent::Failed { error, .. } => Some(RunOutcome::Failed {
            error: error.clone(),
        }),
        AlertEvent::Reset { .. } => Some(RunOutcome::Cancelled),
        _ => None,
    }
}

/// Simulate `fall` and follow its events until the run ends.
///
/// `observe` sees every event belonging to the run, in order. Planning
/// failures and roster failures are reported as outcomes; other loop
/// errors (e.g. an alert already in progress) are returned.
pub async fn run_simulation<F>(
    alert: &EscalationLoop,
    fall: FallEvent,
    options: &RunOptions,
    mut observe: F,
) -> Result<RunReport, EscalationError>
where
    F: FnMut(&AlertEvent),
{
    let mut rx = alert.subscribe();
    let mut events = Vec::new();

    let generation = match alert.simulate(fall).await {
        Ok(view) => view.generation,
        Err(e) if e.is_planning_failure() || matches!(e, EscalationError::Roster(_)) => {
            // The run ended inside simulate; read it back from the history.
            let generation = alert.snapshot()?.generation;
            let mut outcome = None;
            for event in alert.run_events(generation) {
                observe(&event);
                outcome = outcome.or_else(|| terminal_outcome(&event));
                events.push(event);
            }
            let outcome = outcome.unwrap_or_else(|| match e {
                EscalationError::Roster(_) => RunOutcome::Failed {
                    error: e.to_string(),
                },
                _ => RunOutcome::PlanningFailed {
                    reason: e.to_string(),
                },
            });
            return Ok(RunReport {
                generation,
                outcome,
                events,
            });
        }
        Err(e) => return Err(e),
    };

    let ack_timer = sleep(options.ack_after.unwrap_or(options.max_wait));
    tokio::pin!(ack_timer);
    let mut ack_pending = options.ack_after.is_some();
    let deadline = sleep(options.max_wait);
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            biased;

            received = rx.recv() => match received {
                Ok(event) => {
                    let ours = event.generation() == generation;
                    let cleared = matches!(event, AlertEvent::Reset { .. })
                        && event.generation() > generation;
                    if !(ours || cleared) {
                        continue;
                    }
                    observe(&event);
                    let outcome = terminal_outcome(&event);
                    events.push(event);
                    if let Some(outcome) = outcome {
                        break outcome;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged; some events were dropped");
                }
                Err(RecvError::Closed) => {
                    break RunOutcome::Failed {
                        error: "event bus closed".into(),
                    };
                }
            },

            _ = &mut ack_timer, if ack_pending => {
                ack_pending = false;
                if let Err(e) = alert.acknowledge() {
                    warn!("Acknowledge rejected: {e}");
                }
            }

            _ = &mut deadline => {
                info!(generation, "No terminal event before deadline; resetting");
                alert.reset()?;
                break RunOutcome::TimedOut;
            }
        }
    };

    Ok(RunReport {
        generation,
        outcome,
        events,
    })
}

/// Timing of the call placed to the caregiver who acknowledged.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Ringing before the caregiver picks up
    pub answer_after: Duration,
    /// How long the connected call lasts
    pub talk_for: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            answer_after: Duration::from_secs(2),
            talk_for: Duration::from_secs(5),
        }
    }
}

/// Walk a call with the responding caregiver from calling to ended.
///
/// `on_status` sees every status the session enters, in order.
pub async fn follow_up_call<F>(
    caregiver_id: &str,
    name: &str,
    options: &CallOptions,
    mut on_status: F,
) -> Result<CommunicationSession, IllegalSessionTransition>
where
    F: FnMut(CommunicationStatus, &CommunicationSession),
{
    let mut session = CommunicationSession::new();

    session.start(caregiver_id, name)?;
    on_status(session.status(), &session);

    sleep(options.answer_after).await;
    session.connect()?;
    on_status(session.status(), &session);

    sleep(options.talk_for).await;
    session.end()?;
    on_status(session.status(), &session);

    Ok(session)
}

/// One-line human rendering of an event.
pub fn describe(event: &AlertEvent) -> String {
    let at = event.timestamp().format("%H:%M:%S");
    let body = match event {
        AlertEvent::FallSimulated {
            severity, location, ..
        } => match location {
            Some(loc) => format!("{severity} severity fall at {loc}"),
            None => format!("{severity} severity fall (no location)"),
        },
        AlertEvent::PlanComputed {
            path, timeout_secs, ..
        } => format!(
            "escalation path [{}], {timeout_secs}s per caregiver",
            path.join(", ")
        ),
        AlertEvent::PlanningFailed { reason, .. } => format!("planning failed: {reason}"),
        AlertEvent::CaregiverNotified {
            cursor,
            round,
            name,
            caregiver_id,
            ..
        } => format!("notifying #{} {name} ({caregiver_id}), round {round}", cursor + 1),
        AlertEvent::NotificationFailed {
            caregiver_id,
            error,
            ..
        } => format!("delivery to {caregiver_id} failed: {error}"),
        AlertEvent::Escalated {
            from_cursor,
            to_cursor,
            ..
        } => format!("no response; escalating #{} -> #{}", from_cursor + 1, to_cursor + 1),
        AlertEvent::CycleRestarted { round, .. } => {
            format!("path exhausted; restarting from the top (round {round})")
        }
        AlertEvent::Exhausted { notified, .. } => {
            format!("path exhausted after {notified} caregiver(s); alert unresolved")
        }
        AlertEvent::Acknowledged { name, .. } => format!("acknowledged by {name}"),
        AlertEvent::Reset { reason, .. } => format!("alert reset ({reason:?})"),
        AlertEvent::Failed { error, .. } => format!("alert failed: {error}"),
    };
    format!("[{at}] gen {} {body}", event.generation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fallwise_coordination::FallSeverity;

    #[test]
    fn test_terminal_outcomes() {
        let ack = AlertEvent::Acknowledged {
            generation: 1,
            cursor: 0,
            caregiver_id: "a".into(),
            name: "A".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(
            terminal_outcome(&ack),
            Some(RunOutcome::Acknowledged {
                caregiver_id: "a".into(),
                name: "A".into()
            })
        );

        let notified = AlertEvent::CaregiverNotified {
            generation: 1,
            cursor: 0,
            round: 0,
            caregiver_id: "a".into(),
            name: "A".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(terminal_outcome(&notified), None);
    }

    #[test]
    fn test_describe_mentions_position() {
        let event = AlertEvent::Escalated {
            generation: 3,
            from_cursor: 0,
            to_cursor: 1,
            timestamp: Utc::now(),
        };
        let line = describe(&event);
        assert!(line.contains("gen 3"));
        assert!(line.contains("#1 -> #2"));

        let fall = AlertEvent::FallSimulated {
            generation: 1,
            severity: FallSeverity::Low,
            location: None,
            timestamp: Utc::now(),
        };
        assert!(describe(&fall).contains("low severity fall (no location)"));
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let json = serde_json::to_value(RunOutcome::Unresolved { notified: 2 }).unwrap();
        assert_eq!(json["outcome"], "unresolved");
        assert_eq!(json["notified"], 2);
    }
}
