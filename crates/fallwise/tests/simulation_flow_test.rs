//! End-to-end runs through `run_simulation` on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use fallwise::{
    default_roster, follow_up_call, run_simulation, CallOptions, IncidentLog, JsonRosterStore,
    RunOptions, RunOutcome, KUNDRATHUR_SRIPERUMBUDUR,
};
use fallwise_coordination::{
    AlertEvent, AlertStatus, Caregiver, CommunicationStatus, EscalationLoop, ExhaustionPolicy,
    FallEvent, FallSeverity, GeoPoint, InMemoryRoster, LogNotifier, LoopConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;
use tokio::time::Instant;

fn two_caregivers() -> Vec<Caregiver> {
    vec![
        Caregiver::new("Near")
            .with_id("near")
            .with_phone("+15550000001")
            .with_response_time(60.0)
            .with_location(GeoPoint::new(12.98, 80.04)),
        Caregiver::new("Far")
            .with_id("far")
            .with_phone("+15550000002")
            .with_response_time(20.0)
            .with_location(GeoPoint::new(13.00, 80.10)),
    ]
}

fn alert_with(caregivers: Vec<Caregiver>, exhaustion: ExhaustionPolicy) -> EscalationLoop {
    let roster = InMemoryRoster::with_caregivers(caregivers).unwrap().shared();
    let config = LoopConfig {
        exhaustion,
        ..LoopConfig::default()
    };
    EscalationLoop::with_config(roster, Arc::new(LogNotifier), config).unwrap()
}

fn fall_at(lat: f64, lng: f64) -> FallEvent {
    FallEvent::new(FallSeverity::High, Some(GeoPoint::new(lat, lng)))
}

#[tokio::test(start_paused = true)]
async fn test_ack_after_resolves_with_second_caregiver() {
    let alert = alert_with(two_caregivers(), ExhaustionPolicy::Terminate);
    let options = RunOptions {
        ack_after: Some(Duration::from_millis(12_500)),
        ..RunOptions::default()
    };

    let report = run_simulation(&alert, fall_at(12.98, 80.04), &options, |_| {})
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        RunOutcome::Acknowledged {
            caregiver_id: "far".into(),
            name: "Far".into()
        }
    );
    assert_eq!(report.notified(), vec!["near", "far"]);
    assert_eq!(alert.status().unwrap(), AlertStatus::Acknowledged);
}

#[tokio::test(start_paused = true)]
async fn test_no_ack_terminates_unresolved() {
    let alert = alert_with(two_caregivers(), ExhaustionPolicy::Terminate);

    let started = tokio::time::Instant::now();
    let report = run_simulation(&alert, fall_at(12.98, 80.04), &RunOptions::default(), |_| {})
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Unresolved { notified: 2 });
    assert_eq!(started.elapsed(), Duration::from_secs(18));
    assert_eq!(alert.status().unwrap(), AlertStatus::Idle);

    let types: Vec<&str> = report.events.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        types,
        vec![
            "fall_simulated",
            "plan_computed",
            "caregiver_notified",
            "escalated",
            "caregiver_notified",
            "exhausted",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cycle_policy_stops_at_max_wait() {
    let alert = alert_with(two_caregivers(), ExhaustionPolicy::Cycle);
    let options = RunOptions {
        ack_after: None,
        max_wait: Duration::from_millis(30_500),
    };

    let report = run_simulation(&alert, fall_at(12.98, 80.04), &options, |_| {})
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::TimedOut);
    assert_eq!(report.notified(), vec!["near", "far", "near", "far"]);
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, AlertEvent::CycleRestarted { round: 1, .. })));
    assert_eq!(alert.status().unwrap(), AlertStatus::Idle);
    assert!(!alert.timer_running());
}

#[tokio::test(start_paused = true)]
async fn test_nobody_available_is_planning_failure() {
    let caregivers = two_caregivers()
        .into_iter()
        .map(|c| c.with_availability(false))
        .collect();
    let alert = alert_with(caregivers, ExhaustionPolicy::Terminate);

    let report = run_simulation(&alert, fall_at(12.98, 80.04), &RunOptions::default(), |_| {})
        .await
        .unwrap();

    assert!(matches!(report.outcome, RunOutcome::PlanningFailed { .. }));
    assert!(report.notified().is_empty());
    assert_eq!(alert.status().unwrap(), AlertStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_planning_failure_reports_only_its_own_run() {
    let alert = alert_with(two_caregivers(), ExhaustionPolicy::Terminate);
    let options = RunOptions {
        ack_after: Some(Duration::from_millis(500)),
        ..RunOptions::default()
    };
    let first = run_simulation(&alert, fall_at(12.98, 80.04), &options, |_| {})
        .await
        .unwrap();
    alert.reset().unwrap();

    let mut observed = Vec::new();
    let report = run_simulation(&alert, fall_at(123.0, 80.0), &options, |e| {
        observed.push(e.event_type())
    })
    .await
    .unwrap();

    assert!(report.generation > first.generation);
    assert_eq!(observed, vec!["fall_simulated", "planning_failed"]);
    assert!(report
        .events
        .iter()
        .all(|e| e.generation() == report.generation));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_fall_location_is_planning_failure() {
    let alert = alert_with(two_caregivers(), ExhaustionPolicy::Terminate);

    let report = run_simulation(&alert, fall_at(123.0, 80.0), &RunOptions::default(), |_| {})
        .await
        .unwrap();

    assert!(matches!(report.outcome, RunOutcome::PlanningFailed { .. }));
    assert_eq!(alert.status().unwrap(), AlertStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_seeded_file_roster_notifies_nearest_first_and_logs() {
    let dir = TempDir::new().unwrap();
    let roster = Arc::new(JsonRosterStore::new(dir.path().join("roster.json")));
    let alert = EscalationLoop::new(roster, Arc::new(LogNotifier));
    let log = IncidentLog::new(dir.path().join("incidents.jsonl"));

    // Standing on caregiver "1".
    let seeded = default_roster();
    let spot = seeded[0].location.unwrap();
    let options = RunOptions {
        ack_after: Some(Duration::from_millis(500)),
        ..RunOptions::default()
    };

    let report = run_simulation(
        &alert,
        FallEvent::new(FallSeverity::Medium, Some(spot)),
        &options,
        |event| log.append(event),
    )
    .await
    .unwrap();

    assert_eq!(
        report.outcome,
        RunOutcome::Acknowledged {
            caregiver_id: "1".into(),
            name: seeded[0].name.clone()
        }
    );

    let logged = log.read_all().unwrap();
    let kinds = |events: &[AlertEvent]| -> Vec<&'static str> {
        events.iter().map(|e| e.event_type()).collect()
    };
    assert_eq!(kinds(logged.as_slice()), kinds(report.events.as_slice()));
    assert!(logged.iter().all(|e| e.generation() == report.generation));
    // The unavailable caregiver is never on the path.
    let path = logged
        .iter()
        .find_map(|e| match e {
            AlertEvent::PlanComputed { path, .. } => Some(path.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(path.len(), 4);
    assert!(!path.contains(&"5".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_external_reset_cancels_run() {
    let alert = alert_with(two_caregivers(), ExhaustionPolicy::Cycle);
    let resetter = alert.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        resetter.reset().unwrap();
    });

    let report = run_simulation(&alert, fall_at(12.98, 80.04), &RunOptions::default(), |_| {})
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.notified(), vec!["near"]);
    assert_eq!(alert.status().unwrap(), AlertStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_acknowledged_run_leads_into_a_call() {
    let alert = alert_with(two_caregivers(), ExhaustionPolicy::Terminate);
    let options = RunOptions {
        ack_after: Some(Duration::from_secs(3)),
        ..RunOptions::default()
    };
    let report = run_simulation(&alert, fall_at(12.98, 80.04), &options, |_| {})
        .await
        .unwrap();
    let RunOutcome::Acknowledged { caregiver_id, name } = report.outcome else {
        panic!("expected an acknowledgement, got {:?}", report.outcome);
    };

    let started = Instant::now();
    let mut seen = Vec::new();
    let call = CallOptions {
        answer_after: Duration::from_secs(2),
        talk_for: Duration::from_secs(30),
    };
    let session = follow_up_call(&caregiver_id, &name, &call, |status, _| seen.push(status))
        .await
        .unwrap();

    assert_eq!(
        seen,
        vec![
            CommunicationStatus::Calling,
            CommunicationStatus::Active,
            CommunicationStatus::Ended
        ]
    );
    assert_eq!(started.elapsed(), Duration::from_secs(32));
    assert_eq!(session.caregiver_id(), Some("near"));
    assert_eq!(alert.status().unwrap(), AlertStatus::Acknowledged);
    alert.reset().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scattered_roster_is_walked_nearest_first() {
    let mut rng = StdRng::seed_from_u64(11);
    let fall = KUNDRATHUR_SRIPERUMBUDUR.random_point(&mut rng);
    let caregivers = KUNDRATHUR_SRIPERUMBUDUR.scatter(default_roster(), &mut rng);
    let mut expected: Vec<_> = caregivers
        .iter()
        .filter(|c| c.is_available)
        .map(|c| (c.location.unwrap().distance_km(&fall), c.id.clone()))
        .collect();
    expected.sort_by(|a, b| a.0.total_cmp(&b.0));

    let alert = alert_with(caregivers, ExhaustionPolicy::Terminate);
    let report = run_simulation(
        &alert,
        FallEvent::new(FallSeverity::Medium, Some(fall)),
        &RunOptions::default(),
        |_| {},
    )
    .await
    .unwrap();

    assert!(matches!(report.outcome, RunOutcome::Unresolved { .. }));
    let expected: Vec<&str> = expected.iter().map(|(_, id)| id.as_str()).collect();
    assert_eq!(report.notified(), expected);
}
