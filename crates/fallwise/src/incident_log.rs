//! Append-only JSONL log of alert events.
//!
//! One `AlertEvent` per line. Write failures are logged and swallowed so a
//! full disk never interrupts an escalation.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fallwise_coordination::AlertEvent;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct IncidentLog {
    path: PathBuf,
}

impl IncidentLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event.
    pub fn append(&self, event: &AlertEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize incident event: {e}");
                return;
            }
        };
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{json}") {
                    warn!(path = %self.path.display(), "Failed to append incident event: {e}");
                }
            }
            Err(e) => warn!(path = %self.path.display(), "Failed to open incident log: {e}"),
        }
    }

    /// Read back every parseable event, oldest first.
    ///
    /// A missing file is an empty log. Malformed lines are skipped.
    pub fn read_all(&self) -> std::io::Result<Vec<AlertEvent>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping malformed incident line: {e}"),
            }
        }
        Ok(events)
    }

    /// The most recent `n` events.
    pub fn tail(&self, n: usize) -> std::io::Result<Vec<AlertEvent>> {
        let mut events = self.read_all()?;
        let skip = events.len().saturating_sub(n);
        Ok(events.split_off(skip))
    }
}
