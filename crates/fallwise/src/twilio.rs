//! Twilio delivery for SMS and voice alerts.
//!
//! Phone channels go through the Twilio REST API; the in-app channel has no
//! backend here and is only logged.

use std::time::Duration;

use async_trait::async_trait;
use fallwise_coordination::notify::plan_channels;
use fallwise_coordination::{Channel, Notifier, NotifyError, NotifyReceipt, Recipient};
use tracing::{debug, info};

use crate::config::{TwilioCredentials, DEFAULT_TWILIO_BASE_URL};

/// Per-request timeout for Twilio API calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Notifier backed by the Twilio Messages and Calls APIs.
#[derive(Debug, Clone)]
pub struct TwilioNotifier {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<TwilioCredentials>,
}

impl TwilioNotifier {
    /// Build a notifier. `credentials = None` is allowed; phone deliveries
    /// then fail with [`NotifyError::CredentialsMissing`].
    pub fn new(credentials: Option<TwilioCredentials>) -> Result<Self, NotifyError> {
        Self::with_base_url(credentials, DEFAULT_TWILIO_BASE_URL)
    }

    /// Build against a non-default API root.
    pub fn with_base_url(
        credentials: Option<TwilioCredentials>,
        base_url: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn endpoint(&self, creds: &TwilioCredentials, resource: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{}.json",
            self.base_url, creds.account_sid, resource
        )
    }

    async fn post_form(
        &self,
        creds: &TwilioCredentials,
        resource: &str,
        form: &[(&str, &str)],
    ) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.endpoint(creds, resource))
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .form(form)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(resource, status = status.as_u16(), "Twilio request accepted");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Notifier for TwilioNotifier {
    async fn notify(
        &self,
        recipient: &Recipient,
        message: &str,
    ) -> Result<NotifyReceipt, NotifyError> {
        let receipt = plan_channels(recipient);
        let needs_twilio = receipt.delivered.iter().any(|c| c.needs_phone());

        let phone_target = match (&recipient.phone_number, needs_twilio) {
            (Some(phone), true) => {
                let creds = self
                    .credentials
                    .as_ref()
                    .ok_or(NotifyError::CredentialsMissing)?;
                Some((phone.as_str(), creds))
            }
            _ => None,
        };

        for channel in &receipt.delivered {
            match (channel, phone_target) {
                (Channel::Sms, Some((to, creds))) => {
                    self.post_form(
                        creds,
                        "Messages",
                        &[
                            ("To", to),
                            ("From", creds.from_number.as_str()),
                            ("Body", message),
                        ],
                    )
                    .await?;
                    info!(recipient = %recipient.name, "SMS sent");
                }
                (Channel::Call, Some((to, creds))) => {
                    let twiml = voice_twiml(&recipient.name, message);
                    self.post_form(
                        creds,
                        "Calls",
                        &[
                            ("To", to),
                            ("From", creds.from_number.as_str()),
                            ("Twiml", twiml.as_str()),
                        ],
                    )
                    .await?;
                    info!(recipient = %recipient.name, "Voice call placed");
                }
                (Channel::App, _) => {
                    info!(recipient = %recipient.name, message, "In-app alert raised");
                }
                // Phone channels without a phone were already moved to `skipped`.
                (Channel::Sms | Channel::Call, None) => {}
            }
        }

        if !receipt.skipped.is_empty() {
            info!(
                recipient = %recipient.name,
                skipped = ?receipt.skipped,
                "No phone number; phone channels skipped"
            );
        }
        Ok(receipt)
    }
}

/// TwiML spoken to the caregiver on a voice call.
pub fn voice_twiml(name: &str, message: &str) -> String {
    format!(
        "<Response><Say>Hello {}. This is an urgent message from Fall Wise. {}</Say></Response>",
        xml_escape(name),
        xml_escape(message)
    )
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fallwise_coordination::{alert_message, ContactChannels, FallSeverity};

    fn recipient(phone: Option<&str>, channels: ContactChannels) -> Recipient {
        Recipient {
            name: "Sam".into(),
            phone_number: phone.map(String::from),
            channels,
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_is_typed_failure() {
        let notifier = TwilioNotifier::new(None).unwrap();
        let err = notifier
            .notify(
                &recipient(Some("+15550100001"), ContactChannels::default()),
                "hi",
            )
            .await
            .unwrap_err();
        assert_eq!(err, NotifyError::CredentialsMissing);
    }

    #[tokio::test]
    async fn test_missing_phone_skips_phone_channels_without_network() {
        let notifier = TwilioNotifier::new(None).unwrap();
        let receipt = notifier
            .notify(&recipient(None, ContactChannels::default()), "hi")
            .await
            .unwrap();
        assert_eq!(receipt.delivered, vec![Channel::App]);
        assert_eq!(receipt.skipped, vec![Channel::Sms, Channel::Call]);
    }

    #[tokio::test]
    async fn test_app_only_recipient_needs_no_credentials() {
        let notifier = TwilioNotifier::new(None).unwrap();
        let channels = ContactChannels {
            sms: false,
            call: false,
            app: true,
        };
        let receipt = notifier
            .notify(&recipient(Some("+15550100001"), channels), "hi")
            .await
            .unwrap();
        assert_eq!(receipt.delivered, vec![Channel::App]);
        assert!(receipt.skipped.is_empty());
    }

    #[test]
    fn test_endpoint_layout() {
        let creds = TwilioCredentials {
            account_sid: "AC42".into(),
            auth_token: "t".into(),
            from_number: "+15550000000".into(),
        };
        let notifier =
            TwilioNotifier::with_base_url(Some(creds.clone()), "http://localhost:9/").unwrap();
        assert_eq!(
            notifier.endpoint(&creds, "Messages"),
            "http://localhost:9/2010-04-01/Accounts/AC42/Messages.json"
        );
        assert!(notifier.has_credentials());
    }

    #[test]
    fn test_voice_twiml_wording() {
        let twiml = voice_twiml("Sam", &alert_message(FallSeverity::High));
        assert_eq!(
            twiml,
            "<Response><Say>Hello Sam. This is an urgent message from Fall Wise. \
             URGENT: A &apos;high&apos; severity fall has been detected. \
             Please respond immediately.</Say></Response>"
        );
    }

    #[test]
    fn test_voice_twiml_escapes_markup() {
        let twiml = voice_twiml("<Pat & Lee>", "ok");
        assert!(twiml.contains("Hello &lt;Pat &amp; Lee&gt;."));
    }
}
