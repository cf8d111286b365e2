//! Notifier seam: how a caregiver is actually reached
//!
//! The escalation loop only knows this trait. Delivery over SMS / voice
//! lives in the application crate; [`LogNotifier`] is the tracing-only
//! stand-in used for dry runs and tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::model::{Caregiver, Channel, ContactChannels, FallSeverity};

/// Error type for notification delivery
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("Notification credentials are not configured")]
    CredentialsMissing,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider rejected request (status {status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Who to reach and over which channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub phone_number: Option<String>,
    pub channels: ContactChannels,
}

impl From<&Caregiver> for Recipient {
    fn from(c: &Caregiver) -> Self {
        Self {
            name: c.name.clone(),
            phone_number: c.phone_number.clone().filter(|p| !p.trim().is_empty()),
            channels: c.contact_methods,
        }
    }
}

/// Outcome of a successful notify call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyReceipt {
    /// Channels the message went out on
    pub delivered: Vec<Channel>,
    /// Enabled channels that could not be used (e.g. no phone number)
    pub skipped: Vec<Channel>,
}

/// Delivers an alert message to one recipient.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send `message` to `recipient`.
    ///
    /// Must not panic on a missing phone number (phone channels become
    /// no-ops) or on missing credentials (typed failure).
    async fn notify(&self, recipient: &Recipient, message: &str)
        -> Result<NotifyReceipt, NotifyError>;
}

/// Shared reference to a notifier
pub type SharedNotifier = Arc<dyn Notifier>;

/// Alert text sent to caregivers.
pub fn alert_message(severity: FallSeverity) -> String {
    format!(
        "URGENT: A '{}' severity fall has been detected. Please respond immediately.",
        severity
    )
}

/// Split a recipient's enabled channels into usable and skipped.
pub fn plan_channels(recipient: &Recipient) -> NotifyReceipt {
    let mut receipt = NotifyReceipt::default();
    for channel in recipient.channels.enabled() {
        if channel.needs_phone() && recipient.phone_number.is_none() {
            receipt.skipped.push(channel);
        } else {
            receipt.delivered.push(channel);
        }
    }
    receipt
}

/// Notifier that only logs what it would send.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        recipient: &Recipient,
        message: &str,
    ) -> Result<NotifyReceipt, NotifyError> {
        let receipt = plan_channels(recipient);
        for channel in &receipt.delivered {
            info!(
                recipient = %recipient.name,
                phone = recipient.phone_number.as_deref().unwrap_or("-"),
                %channel,
                message,
                "Simulated notification"
            );
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_message_wording() {
        assert_eq!(
            alert_message(FallSeverity::High),
            "URGENT: A 'high' severity fall has been detected. Please respond immediately."
        );
    }

    #[test]
    fn test_blank_phone_treated_as_missing() {
        let c = Caregiver::new("A").with_phone("   ");
        assert!(Recipient::from(&c).phone_number.is_none());
    }

    #[tokio::test]
    async fn test_log_notifier_skips_phone_channels_without_number() {
        let recipient = Recipient {
            name: "A".into(),
            phone_number: None,
            channels: ContactChannels::default(),
        };
        let receipt = LogNotifier.notify(&recipient, "hi").await.unwrap();
        assert_eq!(receipt.delivered, vec![Channel::App]);
        assert_eq!(receipt.skipped, vec![Channel::Sms, Channel::Call]);
    }

    #[tokio::test]
    async fn test_log_notifier_uses_all_channels_with_number() {
        let recipient = Recipient {
            name: "A".into(),
            phone_number: Some("+15550100".into()),
            channels: ContactChannels {
                sms: true,
                call: false,
                app: true,
            },
        };
        let receipt = LogNotifier.notify(&recipient, "hi").await.unwrap();
        assert_eq!(receipt.delivered, vec![Channel::Sms, Channel::App]);
        assert!(receipt.skipped.is_empty());
    }
}
