//! Alert sink that records notifications in the log.
//!
//! Mail delivery itself is handled outside the agent; this sink checks that
//! a sender and recipients are configured and logs what would be sent.

use super::{Alert, AlertSink, DriverError};
use crate::config::AgentConfig;

/// Default submission port when only `SMTP_HOST` is configured.
const SMTP_DEFAULT_PORT: u16 = 587;

pub struct LogAlertSink {
    sender: Option<String>,
    recipients: Vec<String>,
    relay: Option<String>,
}

impl LogAlertSink {
    pub fn new(sender: Option<String>, recipients: Vec<String>) -> Self {
        Self {
            sender,
            recipients,
            relay: None,
        }
    }

    pub fn from_config(cfg: &AgentConfig) -> Self {
        let relay = cfg.smtp_host.as_ref().map(|host| {
            let port = cfg.smtp_port.unwrap_or(SMTP_DEFAULT_PORT);
            match &cfg.smtp_user {
                Some(user) => format!("{}@{}:{}", user, host, port),
                None => format!("{}:{}", host, port),
            }
        });
        Self {
            relay,
            ..Self::new(cfg.alert_from.clone(), cfg.alert_recipients())
        }
    }
}

impl AlertSink for LogAlertSink {
    fn send(&self, alert: &Alert) -> Result<(), DriverError> {
        let sender = self
            .sender
            .as_deref()
            .ok_or_else(|| DriverError::Alert("no sender configured".to_string()))?;
        if self.recipients.is_empty() {
            return Err(DriverError::Alert("no recipients configured".to_string()));
        }

        tracing::warn!(
            "DomiSafe Alert: {} from {} to {} via {} at {}: {}{}",
            alert.subject,
            sender,
            self.recipients.join(", "),
            self.relay.as_deref().unwrap_or("log"),
            alert.timestamp.format("%Y-%m-%d %H:%M:%S"),
            alert.message,
            alert
                .image
                .as_ref()
                .map(|p| format!(" [image: {}]", p.display()))
                .unwrap_or_default()
        );
        Ok(())
    }
}
