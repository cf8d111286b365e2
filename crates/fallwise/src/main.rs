use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use fallwise::{
    follow_up_call, run_simulation, CallOptions, FallwiseConfig, IncidentLog, JsonRosterStore,
    RunOptions, RunOutcome, ServiceArea, TwilioNotifier,
};
use fallwise_coordination::{
    AlertStatus, Caregiver, ContactChannels, EscalationLoop, EscalationPlanner, EventBus,
    EventHistory, FallEvent, FallSeverity, GeoPoint, InMemoryRoster, LogNotifier, Notifier,
    RosterStore, SharedRosterStore,
};
use tracing::{info, warn};

/// Fall-response escalation: plan, simulate and manage the caregiver roster
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file (overrides FALLWISE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate a fall and run the escalation to completion
    Simulate {
        #[command(flatten)]
        fall: FallArgs,

        /// Acknowledge on behalf of the current caregiver after N seconds
        #[arg(long)]
        ack_after: Option<u64>,

        /// Log notifications instead of sending them
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Give up after N seconds without a terminal event
        #[arg(long, default_value_t = 300)]
        max_wait: u64,

        /// After an acknowledgement, hold a call with the responder for N seconds
        #[arg(long)]
        call_secs: Option<u64>,
    },

    /// Print the escalation path for a fall without notifying anyone
    Plan {
        #[command(flatten)]
        fall: FallArgs,
    },

    /// Manage the caregiver roster
    Roster {
        #[command(subcommand)]
        action: RosterAction,
    },

    /// Show recent incident log entries
    History {
        /// Number of events to show
        #[arg(long, default_value_t = 20)]
        last: usize,
    },
}

#[derive(Args, Debug)]
struct FallArgs {
    /// low | medium | high
    #[arg(long, default_value = "medium")]
    severity: FallSeverity,

    /// Fall latitude in degrees
    #[arg(long, requires = "lng", allow_negative_numbers = true)]
    lat: Option<f64>,

    /// Fall longitude in degrees
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    lng: Option<f64>,

    /// Place the fall and every caregiver at random inside the service area
    #[arg(long, conflicts_with_all = ["lat", "lng"])]
    random_location: bool,
}

impl FallArgs {
    fn location(&self) -> Option<GeoPoint> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        }
    }
}

#[derive(Subcommand, Debug)]
enum RosterAction {
    /// List every caregiver
    List,

    /// Add (or replace, with --id) a caregiver
    Add {
        #[arg(long)]
        name: String,

        /// Reuse an id to replace an existing entry
        #[arg(long)]
        id: Option<String>,

        /// Phone number in E.164 form
        #[arg(long)]
        phone: Option<String>,

        /// Mean historical response time in seconds
        #[arg(long)]
        response_time: Option<f64>,

        #[arg(long, requires = "lng", allow_negative_numbers = true)]
        lat: Option<f64>,

        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lng: Option<f64>,

        /// Add as unavailable
        #[arg(long, default_value_t = false)]
        unavailable: bool,

        #[arg(long, default_value_t = false)]
        no_sms: bool,

        #[arg(long, default_value_t = false)]
        no_call: bool,

        #[arg(long, default_value_t = false)]
        no_app: bool,
    },

    /// Remove a caregiver by id
    Remove { id: String },

    /// Mark a caregiver available or unavailable
    Available {
        id: String,
        #[arg(action = clap::ArgAction::Set)]
        available: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var("FALLWISE_CONFIG").ok().map(PathBuf::from));
    let config =
        FallwiseConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    let roster = Arc::new(JsonRosterStore::new(&config.roster_path));

    match cli.command {
        Command::Simulate {
            fall,
            ack_after,
            dry_run,
            max_wait,
            call_secs,
        } => {
            let options = RunOptions {
                ack_after: ack_after.map(Duration::from_secs),
                max_wait: Duration::from_secs(max_wait),
            };
            let call = call_secs.map(|secs| CallOptions {
                talk_for: Duration::from_secs(secs),
                ..CallOptions::default()
            });
            simulate(&config, roster, &fall, options, call, dry_run).await
        }
        Command::Plan { fall } => plan(&config, roster.as_ref(), &fall).await,
        Command::Roster { action } => manage_roster(roster.as_ref(), action).await,
        Command::History { last } => history(&config, last),
    }
}

/// Caregivers scattered at random, plus a random fall location.
async fn scatter_run(roster: &JsonRosterStore) -> Result<(Vec<Caregiver>, GeoPoint)> {
    let caregivers = roster.list().await.context("Failed to read roster")?;
    let area = ServiceArea::default();
    let mut rng = rand::rng();
    let location = area.random_point(&mut rng);
    info!(%location, "Placed fall and caregivers at random in the service area");
    Ok((area.scatter(caregivers, &mut rng), location))
}

async fn simulate(
    config: &FallwiseConfig,
    roster: Arc<JsonRosterStore>,
    fall: &FallArgs,
    options: RunOptions,
    call: Option<CallOptions>,
    dry_run: bool,
) -> Result<()> {
    let (roster, location): (SharedRosterStore, _) = if fall.random_location {
        let (caregivers, location) = scatter_run(roster.as_ref()).await?;
        let scattered = InMemoryRoster::with_caregivers(caregivers)
            .context("Stored roster is invalid")?
            .shared();
        (scattered, Some(location))
    } else {
        (roster as SharedRosterStore, fall.location())
    };

    let notifier: Arc<dyn Notifier> = if dry_run {
        Arc::new(LogNotifier)
    } else {
        let twilio =
            TwilioNotifier::with_base_url(config.twilio.clone(), config.twilio_base_url.clone())
                .context("Failed to build Twilio client")?;
        if !twilio.has_credentials() {
            warn!("Twilio credentials not set; phone deliveries will fail (use --dry-run to only log)");
        }
        Arc::new(twilio)
    };

    config
        .escalation
        .validate()
        .context("Invalid escalation settings")?;
    let alert = EscalationLoop::build(
        roster,
        notifier,
        EscalationPlanner::with_config(config.planner.clone()),
        EventBus::with_history(EventHistory::default().shared()).shared(),
        config.escalation.clone(),
    );

    let log = config.incident_log_path.as_ref().map(IncidentLog::new);
    let event = FallEvent::new(fall.severity, location);
    info!(
        severity = %event.severity,
        timeout_secs = config.escalation.timeout_secs,
        dry_run,
        "Starting fall simulation"
    );

    let report = run_simulation(&alert, event, &options, |event| {
        println!("{}", fallwise::runner::describe(event));
        if let Some(log) = &log {
            log.append(event);
        }
    })
    .await
    .context("Escalation run failed")?;

    if let (Some(call), RunOutcome::Acknowledged { caregiver_id, name }) =
        (&call, &report.outcome)
    {
        follow_up_call(caregiver_id, name, call, |status, session| {
            println!(
                "call with {}: {status}",
                session.caregiver_name().unwrap_or(name)
            );
        })
        .await
        .context("Follow-up call failed")?;
    }

    // Leave nothing armed behind an acknowledged or failed run.
    if alert.status()? != AlertStatus::Idle {
        alert.reset()?;
    }

    match &report.outcome {
        RunOutcome::Acknowledged { name, .. } => {
            println!("Resolved: {name} responded.");
            Ok(())
        }
        RunOutcome::Unresolved { notified } => {
            println!("Unresolved: {notified} caregiver(s) notified, nobody responded.");
            Ok(())
        }
        RunOutcome::TimedOut => {
            println!("Stopped after {}s without resolution.", options.max_wait.as_secs());
            Ok(())
        }
        RunOutcome::Cancelled => {
            println!("Alert was reset.");
            Ok(())
        }
        RunOutcome::PlanningFailed { reason } => bail!("No escalation possible: {reason}"),
        RunOutcome::Failed { error } => bail!("Escalation failed: {error}"),
    }
}

async fn plan(config: &FallwiseConfig, roster: &JsonRosterStore, fall: &FallArgs) -> Result<()> {
    let (caregivers, location) = if fall.random_location {
        let (caregivers, location) = scatter_run(roster).await?;
        println!("Fall at {location}");
        (caregivers, Some(location))
    } else {
        let caregivers = roster.list().await.context("Failed to read roster")?;
        (caregivers, fall.location())
    };
    let ranked = EscalationPlanner::with_config(config.planner.clone())
        .rank(&caregivers, fall.severity, location)
        .context("Planning failed")?;

    if ranked.is_empty() {
        println!("No available caregivers.");
        return Ok(());
    }
    for (position, entry) in ranked.iter().enumerate() {
        let distance = entry
            .distance_km
            .map(|d| format!("{d:.2} km"))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:>2}. {:<20} {:<10} {:>10}  {:>5.0}s",
            position + 1,
            entry.name,
            entry.caregiver_id,
            distance,
            entry.response_time_secs
        );
    }
    Ok(())
}

async fn manage_roster(roster: &JsonRosterStore, action: RosterAction) -> Result<()> {
    match action {
        RosterAction::List => {
            let caregivers = roster.list().await.context("Failed to read roster")?;
            for c in &caregivers {
                let channels: Vec<String> = c
                    .contact_methods
                    .enabled()
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                println!(
                    "{:<10} {:<20} {:<11} {:<16} {:>5.0}s  [{}]{}",
                    c.id,
                    c.name,
                    if c.is_available { "available" } else { "unavailable" },
                    c.phone_number.as_deref().unwrap_or("-"),
                    c.historical_response_time,
                    channels.join(","),
                    c.location.map(|l| format!("  @ {l}")).unwrap_or_default(),
                );
            }
        }
        RosterAction::Add {
            name,
            id,
            phone,
            response_time,
            lat,
            lng,
            unavailable,
            no_sms,
            no_call,
            no_app,
        } => {
            let channels = ContactChannels {
                sms: !no_sms,
                call: !no_call,
                app: !no_app,
            };
            if channels.is_empty() {
                bail!("At least one contact channel must stay enabled");
            }
            let mut caregiver = Caregiver::new(name)
                .with_availability(!unavailable)
                .with_channels(channels);
            if let Some(id) = id {
                caregiver = caregiver.with_id(id);
            }
            if let Some(phone) = phone {
                caregiver = caregiver.with_phone(phone);
            }
            if let Some(secs) = response_time {
                if !secs.is_finite() || secs < 0.0 {
                    bail!("Response time must be a non-negative number of seconds");
                }
                caregiver = caregiver.with_response_time(secs);
            }
            if let (Some(lat), Some(lng)) = (lat, lng) {
                let location = GeoPoint::new(lat, lng);
                if !location.is_valid() {
                    bail!("Location {location} is out of range");
                }
                caregiver = caregiver.with_location(location);
            }
            let id = caregiver.id.clone();
            roster
                .upsert(caregiver)
                .await
                .context("Failed to save caregiver")?;
            println!("Saved caregiver {id}");
        }
        RosterAction::Remove { id } => {
            let removed = roster
                .remove(&id)
                .await
                .with_context(|| format!("Failed to remove caregiver {id}"))?;
            println!("Removed {} ({})", removed.name, removed.id);
        }
        RosterAction::Available { id, available } => {
            roster
                .set_availability(&id, available)
                .await
                .with_context(|| format!("Failed to update caregiver {id}"))?;
            println!("{id} is now {}", if available { "available" } else { "unavailable" });
        }
    }
    Ok(())
}

fn history(config: &FallwiseConfig, last: usize) -> Result<()> {
    let Some(path) = &config.incident_log_path else {
        println!("Incident log is disabled.");
        return Ok(());
    };
    let events = IncidentLog::new(path)
        .tail(last)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    for event in &events {
        println!("{}", fallwise::runner::describe(event));
    }
    Ok(())
}
