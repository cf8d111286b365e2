//! Runtime configuration.
//!
//! Layered: built-in defaults, then an optional TOML file, then environment
//! variables (`FALLWISE_*`, `TWILIO_*`).

use std::path::{Path, PathBuf};
use std::str::FromStr;

use fallwise_coordination::{ExhaustionPolicy, LoopConfig, PlannerConfig};
use serde::Deserialize;
use thiserror::Error;

/// Default roster file, relative to the working directory.
pub const DEFAULT_ROSTER_PATH: &str = "fallwise-roster.json";
/// Default incident log, relative to the working directory.
pub const DEFAULT_INCIDENT_LOG_PATH: &str = ".fallwise-incidents.jsonl";
/// Twilio REST API root.
pub const DEFAULT_TWILIO_BASE_URL: &str = "https://api.twilio.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

/// Twilio account credentials.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number in E.164 form
    pub from_number: String,
}

impl std::fmt::Debug for TwilioCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioCredentials")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"<redacted>")
            .field("from_number", &self.from_number)
            .finish()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct FallwiseConfig {
    /// JSON roster file
    pub roster_path: PathBuf,
    /// JSONL incident log (None = disabled)
    pub incident_log_path: Option<PathBuf>,
    pub escalation: LoopConfig,
    pub planner: PlannerConfig,
    /// Twilio credentials (None = deliveries fail with missing credentials)
    pub twilio: Option<TwilioCredentials>,
    pub twilio_base_url: String,
}

impl Default for FallwiseConfig {
    fn default() -> Self {
        Self {
            roster_path: PathBuf::from(DEFAULT_ROSTER_PATH),
            incident_log_path: Some(PathBuf::from(DEFAULT_INCIDENT_LOG_PATH)),
            escalation: LoopConfig::default(),
            planner: PlannerConfig::default(),
            twilio: None,
            twilio_base_url: DEFAULT_TWILIO_BASE_URL.into(),
        }
    }
}

/// On-disk shape of the TOML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    roster_path: Option<PathBuf>,
    incident_log_path: Option<PathBuf>,
    incident_log: Option<bool>,
    escalation: Option<EscalationFileConfig>,
    planner: Option<PlannerFileConfig>,
    twilio: Option<TwilioFileConfig>,
}

/// Escalation keys a deployment may set. The countdown step is fixed at
/// one second and is not configurable here.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct EscalationFileConfig {
    timeout_secs: Option<u32>,
    exhaustion: Option<ExhaustionPolicy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PlannerFileConfig {
    location_aware: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TwilioFileConfig {
    account_sid: Option<String>,
    auth_token: Option<String>,
    from_number: Option<String>,
    base_url: Option<String>,
}

impl FallwiseConfig {
    /// Defaults, then `path` (if any), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            config.apply_toml(&text, path)?;
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay settings from TOML text.
    pub fn apply_toml(&mut self, text: &str, origin: &Path) -> Result<(), ConfigError> {
        let file: FileConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

        if let Some(p) = file.roster_path {
            self.roster_path = p;
        }
        if let Some(p) = file.incident_log_path {
            self.incident_log_path = Some(p);
        }
        if file.incident_log == Some(false) {
            self.incident_log_path = None;
        }
        if let Some(escalation) = file.escalation {
            if let Some(secs) = escalation.timeout_secs {
                self.escalation.timeout_secs = secs;
            }
            if let Some(policy) = escalation.exhaustion {
                self.escalation.exhaustion = policy;
            }
        }
        if let Some(aware) = file.planner.and_then(|p| p.location_aware) {
            self.planner.location_aware = aware;
        }
        if let Some(t) = file.twilio {
            if let Some(url) = t.base_url {
                self.twilio_base_url = url;
            }
            if let (Some(account_sid), Some(auth_token), Some(from_number)) =
                (t.account_sid, t.auth_token, t.from_number)
            {
                self.twilio = Some(TwilioCredentials {
                    account_sid,
                    auth_token,
                    from_number,
                });
            }
        }
        Ok(())
    }

    /// Overlay settings from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(p) = lookup("FALLWISE_ROSTER_PATH") {
            self.roster_path = PathBuf::from(p);
        }
        if let Some(p) = lookup("FALLWISE_INCIDENT_LOG") {
            self.incident_log_path = match p.trim() {
                "" | "off" | "none" => None,
                path => Some(PathBuf::from(path)),
            };
        }
        if let Some(v) = lookup("FALLWISE_TIMEOUT_SECS") {
            self.escalation.timeout_secs = parse_value("FALLWISE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("FALLWISE_EXHAUSTION") {
            self.escalation.exhaustion = parse_exhaustion(&v)?;
        }
        if let Some(v) = lookup("FALLWISE_LOCATION_AWARE") {
            self.planner.location_aware = parse_value("FALLWISE_LOCATION_AWARE", &v)?;
        }
        if let Some(url) = lookup("TWILIO_BASE_URL") {
            self.twilio_base_url = url;
        }
        if let Some(creds) = Self::twilio_from(&lookup) {
            self.twilio = Some(creds);
        }
        Ok(())
    }

    fn twilio_from<F>(lookup: &F) -> Option<TwilioCredentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let account_sid = lookup("TWILIO_ACCOUNT_SID").filter(|s| !s.is_empty())?;
        let auth_token = lookup("TWILIO_AUTH_TOKEN").filter(|s| !s.is_empty())?;
        let from_number = lookup("TWILIO_PHONE_NUMBER").filter(|s| !s.is_empty())?;
        Some(TwilioCredentials {
            account_sid,
            auth_token,
            from_number,
        })
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.into(),
        value: value.into(),
    })
}

fn parse_exhaustion(value: &str) -> Result<ExhaustionPolicy, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "terminate" => Ok(ExhaustionPolicy::Terminate),
        "cycle" => Ok(ExhaustionPolicy::Cycle),
        _ => Err(ConfigError::InvalidValue {
            key: "FALLWISE_EXHAUSTION".into(),
            value: value.into(),
        }),
    }
}
