//! Core data model: caregivers, fall events and geographic positions
//!
//! Field names on the wire follow the roster document layout used by the
//! caregiver-management surface (`isAvailable`, `contactMethods`, ...), so a
//! roster exported from there deserializes unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mean Earth radius used for great-circle distances, in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Response latency assigned to caregivers added without history.
pub const DEFAULT_RESPONSE_TIME_SECS: f64 = 40.0;

/// Stable caregiver identifier, unique within a roster.
pub type CaregiverId = String;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Whether both coordinates are finite and inside their valid ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance to `other` (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos()
                * other.lat.to_radians().cos()
                * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.lat, self.lng)
    }
}

/// A single contact channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Call,
    App,
}

impl Channel {
    /// Channels that need a phone number to reach the caregiver.
    pub fn needs_phone(self) -> bool {
        matches!(self, Self::Sms | Self::Call)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sms => write!(f, "sms"),
            Self::Call => write!(f, "call"),
            Self::App => write!(f, "app"),
        }
    }
}

/// Enabled subset of {sms, voice call, in-app}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactChannels {
    pub sms: bool,
    pub call: bool,
    pub app: bool,
}

impl Default for ContactChannels {
    fn default() -> Self {
        Self {
            sms: true,
            call: true,
            app: true,
        }
    }
}

impl ContactChannels {
    /// Enabled channels in delivery order.
    pub fn enabled(&self) -> Vec<Channel> {
        let mut out = Vec::with_capacity(3);
        if self.sms {
            out.push(Channel::Sms);
        }
        if self.call {
            out.push(Channel::Call);
        }
        if self.app {
            out.push(Channel::App);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        !(self.sms || self.call || self.app)
    }
}

/// A person who can be alerted when a fall occurs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caregiver {
    pub id: CaregiverId,
    pub name: String,
    pub is_available: bool,
    #[serde(default)]
    pub contact_methods: ContactChannels,
    /// Mean historical response latency in seconds.
    #[serde(default = "default_response_time")]
    pub historical_response_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

fn default_response_time() -> f64 {
    DEFAULT_RESPONSE_TIME_SECS
}

impl Caregiver {
    /// New available caregiver with a generated id and default history.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            is_available: true,
            contact_methods: ContactChannels::default(),
            historical_response_time: DEFAULT_RESPONSE_TIME_SECS,
            phone_number: None,
            location: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone_number = Some(phone.into());
        self
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_response_time(mut self, secs: f64) -> Self {
        self.historical_response_time = secs;
        self
    }

    pub fn with_availability(mut self, available: bool) -> Self {
        self.is_available = available;
        self
    }

    pub fn with_channels(mut self, channels: ContactChannels) -> Self {
        self.contact_methods = channels;
        self
    }
}

/// Fall severity. Ordinal: `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallSeverity {
    Low,
    Medium,
    High,
}

impl fmt::Display for FallSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Error returned when parsing an unknown severity label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown fall severity '{0}' (expected low, medium or high)")]
pub struct ParseSeverityError(pub String);

impl FromStr for FallSeverity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(ParseSeverityError(other.to_string())),
        }
    }
}

/// A detected (or simulated) fall. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallEvent {
    pub severity: FallSeverity,
    pub occurred_at: DateTime<Utc>,
    pub location: Option<GeoPoint>,
}

impl FallEvent {
    /// A fall happening now.
    pub fn new(severity: FallSeverity, location: Option<GeoPoint>) -> Self {
        Self {
            severity,
            occurred_at: Utc::now(),
            location,
        }
    }
}
