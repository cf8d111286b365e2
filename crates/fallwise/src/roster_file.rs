//! JSON-file roster store.
//!
//! The roster is a JSON array of caregivers (camelCase keys). A missing file
//! reads as the seeded demo roster; the first write materializes it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fallwise_coordination::roster::{remove_from, upsert_into, RosterResult};
use fallwise_coordination::{Caregiver, ContactChannels, GeoPoint, RosterError, RosterStore};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Roster persisted as a JSON file.
#[derive(Debug)]
pub struct JsonRosterStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonRosterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> RosterResult<Vec<Caregiver>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Roster file missing; using seeded roster");
                return Ok(default_roster());
            }
            Err(e) => {
                return Err(RosterError::Io(format!(
                    "{}: {e}",
                    self.path.display()
                )))
            }
        };

        let roster: Vec<Caregiver> = serde_json::from_str(&text)
            .map_err(|e| RosterError::Parse(format!("{}: {e}", self.path.display())))?;

        let mut seen = HashSet::new();
        if let Some(dup) = roster.iter().find(|c| !seen.insert(c.id.as_str())) {
            return Err(RosterError::Parse(format!(
                "{}: duplicate caregiver id '{}'",
                self.path.display(),
                dup.id
            )));
        }
        Ok(roster)
    }

    async fn save(&self, roster: &[Caregiver]) -> RosterResult<()> {
        let json = serde_json::to_string_pretty(roster)
            .map_err(|e| RosterError::Parse(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RosterError::Io(format!("{}: {e}", parent.display())))?;
        }

        // Write-then-rename so readers never see a half-written roster.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| RosterError::Io(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| RosterError::Io(format!("{}: {e}", self.path.display())))?;

        info!(path = %self.path.display(), caregivers = roster.len(), "Roster saved");
        Ok(())
    }

    async fn modify<T: Send>(
        &self,
        apply: impl FnOnce(&mut Vec<Caregiver>) -> RosterResult<T> + Send,
    ) -> RosterResult<T> {
        let _guard = self.write_lock.lock().await;
        let mut roster = self.load().await?;
        let out = apply(&mut roster)?;
        self.save(&roster).await?;
        Ok(out)
    }
}

#[async_trait]
impl RosterStore for JsonRosterStore {
    async fn list(&self) -> RosterResult<Vec<Caregiver>> {
        self.load().await
    }

    async fn upsert(&self, caregiver: Caregiver) -> RosterResult<()> {
        self.modify(|roster| {
            upsert_into(roster, caregiver);
            Ok(())
        })
        .await
    }

    async fn remove(&self, id: &str) -> RosterResult<Caregiver> {
        self.modify(|roster| remove_from(roster, id)).await
    }

    async fn set_availability(&self, id: &str, available: bool) -> RosterResult<()> {
        self.modify(|roster| match roster.iter_mut().find(|c| c.id == id) {
            Some(c) => {
                c.is_available = available;
                Ok(())
            }
            None => Err(RosterError::NotFound(id.to_string())),
        })
        .await
    }
}

/// Demo roster used until a roster file exists.
///
/// Positions lie inside the demo map area (lat 12.96..13.00, lng 79.95..80.11).
pub fn default_roster() -> Vec<Caregiver> {
    let all = ContactChannels::default();
    vec![
        Caregiver::new("Asha Menon")
            .with_id("1")
            .with_phone("+15550100001")
            .with_response_time(30.0)
            .with_location(GeoPoint::new(12.9741, 80.0452)),
        Caregiver::new("Ravi Kumar")
            .with_id("2")
            .with_phone("+15550100002")
            .with_response_time(65.0)
            .with_location(GeoPoint::new(12.9688, 80.0217))
            .with_channels(ContactChannels { sms: false, ..all }),
        Caregiver::new("Daniel Joseph")
            .with_id("3")
            .with_phone("+15550100003")
            .with_response_time(90.0)
            .with_location(GeoPoint::new(12.9855, 80.0790))
            .with_channels(ContactChannels { app: false, ..all }),
        Caregiver::new("Meera Iyer")
            .with_id("4")
            .with_phone("+15550100004")
            .with_response_time(25.0)
            .with_location(GeoPoint::new(12.9632, 79.9876)),
        Caregiver::new("Priya Raman")
            .with_id("5")
            .with_phone("+15550100005")
            .with_response_time(45.0)
            .with_location(GeoPoint::new(12.9927, 80.1012))
            .with_availability(false)
            .with_channels(ContactChannels { call: false, ..all }),
    ]
}
