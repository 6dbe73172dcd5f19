//! Cloud pub/sub channel.
//!
//! Telemetry goes out through a [`Publisher`]; inbound control messages
//! arrive on a bounded queue as [`InboundMessage`]s.

mod mqtt;

pub use mqtt::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Logical feed names, namespaced per account on the broker.
pub mod feeds {
    pub const TEMPERATURE: &str = "temperature-feed";
    pub const HUMIDITY: &str = "humidity-feed";
    pub const PRESSURE: &str = "pressure-feed";

    pub const MOTION: &str = "motion-feed";
    pub const SMOKE: &str = "smoke-feed";
    pub const SOUND: &str = "sound-feed";

    pub const LIGHT: &str = "light-control";
    pub const FAN: &str = "fan-control";
    pub const BUZZER: &str = "buzzer-control";
    pub const MODE: &str = "system-mode";
    pub const CAMERA: &str = "camera-trigger";

    /// Feeds the agent subscribes to for commands.
    pub const CONTROL: [&str; 5] = [LIGHT, FAN, BUZZER, MODE, CAMERA];
}

/// Channel error types.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("receive loop already started")]
    AlreadyConnected,
    #[error("client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// A command received on a subscribed feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub feed: String,
    pub payload: String,
}

impl InboundMessage {
    pub fn new(feed: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            feed: feed.into(),
            payload: payload.into(),
        }
    }
}

/// Outbound side of the channel.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `value` to `feed`. Returns false without blocking when the
    /// session is down.
    async fn publish(&self, feed: &str, value: &str) -> bool;

    /// Current connectivity. Cheap and non-blocking.
    fn is_connected(&self) -> bool;
}

/// Publish each field to its feed, pausing `delay` after each one.
///
/// A failed field does not stop the rest; the result is true only if
/// every field was published.
pub async fn publish_fields(
    publisher: &dyn Publisher,
    fields: &[(&str, String)],
    delay: Duration,
) -> bool {
    let mut success = true;
    for (feed, value) in fields {
        if !publisher.publish(feed, value).await {
            success = false;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakePublisher;

    #[tokio::test]
    async fn test_publish_fields_continues_after_failure() {
        let publisher = FakePublisher::connected();
        publisher.fail_feed(feeds::HUMIDITY);

        let fields = vec![
            (feeds::TEMPERATURE, "21.5".to_string()),
            (feeds::HUMIDITY, "40".to_string()),
            (feeds::PRESSURE, "1013.2".to_string()),
        ];
        let ok = publish_fields(&publisher, &fields, Duration::ZERO).await;

        assert!(!ok);
        let sent = publisher.published();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], (feeds::PRESSURE.to_string(), "1013.2".to_string()));
    }

    #[tokio::test]
    async fn test_publish_fields_offline() {
        let publisher = FakePublisher::disconnected();
        let fields = vec![(feeds::MOTION, "1".to_string())];
        assert!(!publish_fields(&publisher, &fields, Duration::ZERO).await);
        assert!(publisher.published().is_empty());
    }
}
