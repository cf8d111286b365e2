//! Roster store seam and frozen roster snapshots
//!
//! The escalation loop never reads a live roster mid-alert. It takes a
//! [`RosterSnapshot`] once at planning time and every plan index points into
//! that snapshot for the plan's lifetime.

use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::model::{Caregiver, CaregiverId};

/// Error type for roster operations
#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Caregiver not found: {0}")]
    NotFound(CaregiverId),

    #[error("Caregiver id already in roster: {0}")]
    DuplicateId(CaregiverId),

    #[error("Roster I/O error: {0}")]
    Io(String),

    #[error("Roster parse error: {0}")]
    Parse(String),
}

/// Result type for roster operations
pub type RosterResult<T> = Result<T, RosterError>;

/// Persistence for one subject's caregiver roster.
#[async_trait]
pub trait RosterStore: Send + Sync {
    /// Current roster, in roster order.
    async fn list(&self) -> RosterResult<Vec<Caregiver>>;

    /// Insert a new caregiver or replace the one with the same id.
    async fn upsert(&self, caregiver: Caregiver) -> RosterResult<()>;

    /// Remove a caregiver by id.
    async fn remove(&self, id: &str) -> RosterResult<Caregiver>;

    /// Flip the availability flag of one caregiver.
    async fn set_availability(&self, id: &str, available: bool) -> RosterResult<()>;
}

/// Shared reference to a roster store
pub type SharedRosterStore = Arc<dyn RosterStore>;

/// Apply an upsert to an in-memory roster vector, preserving order.
pub fn upsert_into(roster: &mut Vec<Caregiver>, caregiver: Caregiver) {
    match roster.iter_mut().find(|c| c.id == caregiver.id) {
        Some(existing) => *existing = caregiver,
        None => roster.push(caregiver),
    }
}

/// Remove a caregiver from an in-memory roster vector.
pub fn remove_from(roster: &mut Vec<Caregiver>, id: &str) -> RosterResult<Caregiver> {
    let pos = roster
        .iter()
        .position(|c| c.id == id)
        .ok_or_else(|| RosterError::NotFound(id.to_string()))?;
    Ok(roster.remove(pos))
}

/// Roster kept in process memory.
#[derive(Default)]
pub struct InMemoryRoster {
    caregivers: RwLock<Vec<Caregiver>>,
}

impl InMemoryRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an initial roster. Duplicate ids are rejected.
    pub fn with_caregivers(caregivers: Vec<Caregiver>) -> RosterResult<Self> {
        for (i, c) in caregivers.iter().enumerate() {
            if caregivers[..i].iter().any(|prev| prev.id == c.id) {
                return Err(RosterError::DuplicateId(c.id.clone()));
            }
        }
        Ok(Self {
            caregivers: RwLock::new(caregivers),
        })
    }

    pub fn shared(self) -> SharedRosterStore {
        Arc::new(self)
    }
}

#[async_trait]
impl RosterStore for InMemoryRoster {
    async fn list(&self) -> RosterResult<Vec<Caregiver>> {
        Ok(self.caregivers.read().await.clone())
    }

    async fn upsert(&self, caregiver: Caregiver) -> RosterResult<()> {
        upsert_into(&mut *self.caregivers.write().await, caregiver);
        Ok(())
    }

    async fn remove(&self, id: &str) -> RosterResult<Caregiver> {
        remove_from(&mut *self.caregivers.write().await, id)
    }

    async fn set_availability(&self, id: &str, available: bool) -> RosterResult<()> {
        let mut roster = self.caregivers.write().await;
        let caregiver = roster
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RosterError::NotFound(id.to_string()))?;
        caregiver.is_available = available;
        Ok(())
    }
}

/// Immutable copy of a roster taken at planning time.
///
/// Cloning is cheap; all clones share the same caregivers.
#[derive(Debug, Clone)]
pub struct RosterSnapshot(Arc<[Caregiver]>);

impl RosterSnapshot {
    pub fn new(caregivers: Vec<Caregiver>) -> Self {
        Self(caregivers.into())
    }

    pub fn caregivers(&self) -> &[Caregiver] {
        &self.0
    }
}

impl Deref for RosterSnapshot {
    type Target = [Caregiver];

    fn deref(&self) -> &[Caregiver] {
        &self.0
    }
}
