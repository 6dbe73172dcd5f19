//! MQTT implementation of the cloud channel.
//!
//! The rumqttc event loop runs in its own task. It tracks connectivity,
//! re-subscribes every remembered feed after each ConnAck, and hands
//! inbound publishes to a bounded queue without ever blocking on it.

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::{ChannelError, InboundMessage, Publisher};
use crate::config::AgentConfig;

/// Capacity of the client -> event loop request queue.
const REQUEST_CAPACITY: usize = 32;

/// Connection settings for the broker.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub keepalive: Duration,
    pub username: String,
    pub key: String,
    pub client_id: String,
    pub inbound_capacity: usize,
    pub reconnect_delay: Duration,
}

impl From<&AgentConfig> for MqttSettings {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            host: cfg.broker_host.clone(),
            port: cfg.broker_port,
            keepalive: Duration::from_secs(cfg.broker_keepalive.max(5)),
            username: cfg.broker_username.clone(),
            key: cfg.broker_key.clone(),
            client_id: cfg.broker_client_id.clone(),
            inbound_capacity: cfg.inbound_queue_capacity,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Broker topic for a feed: `<username>/feeds/<feed>`.
pub fn topic_for(namespace: &str, feed: &str) -> String {
    format!("{}/feeds/{}", namespace, feed)
}

/// Feed name carried by a broker topic (its last path segment).
pub fn feed_from_topic(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

/// State shared between the channel handle and its receive loop.
struct Shared {
    client: AsyncClient,
    namespace: String,
    connected: AtomicBool,
    subscriptions: Mutex<BTreeSet<String>>,
}

impl Shared {
    fn remembered_feeds(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn subscribe_now(&self, feeds: &[String]) {
        for feed in feeds {
            let topic = topic_for(&self.namespace, feed);
            match self.client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                Ok(()) => tracing::info!("Channel: Subscribed to {}", topic),
                Err(e) => tracing::error!("Channel: Subscribe to {} failed: {}", topic, e),
            }
        }
    }
}

/// MQTT session with the cloud broker.
pub struct MqttChannel {
    shared: Arc<Shared>,
    eventloop: Mutex<Option<EventLoop>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    reconnect_delay: Duration,
}

impl MqttChannel {
    /// Create the client. Nothing touches the network until [`connect`].
    ///
    /// [`connect`]: MqttChannel::connect
    pub fn new(settings: &MqttSettings) -> Self {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keepalive);
        options.set_credentials(&settings.username, &settings.key);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(settings.inbound_capacity.max(1));

        Self {
            shared: Arc::new(Shared {
                client,
                namespace: settings.username.clone(),
                connected: AtomicBool::new(false),
                subscriptions: Mutex::new(BTreeSet::new()),
            }),
            eventloop: Mutex::new(Some(eventloop)),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            reconnect_delay: settings.reconnect_delay,
        }
    }

    /// Start the receive loop. Can be called once.
    pub fn connect(&self, stop: broadcast::Receiver<()>) -> Result<JoinHandle<()>, ChannelError> {
        let eventloop = self
            .eventloop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(ChannelError::AlreadyConnected)?;

        tracing::info!("Channel: Starting network loop");

        Ok(tokio::spawn(run_receive_loop(
            eventloop,
            self.shared.clone(),
            self.inbound_tx.clone(),
            stop,
            self.reconnect_delay,
        )))
    }

    /// Register interest in `feeds`. The set is remembered and re-issued
    /// after every reconnection.
    pub fn subscribe(&self, feeds: &[&str]) {
        let new_feeds: Vec<String> = feeds.iter().map(|f| f.to_string()).collect();
        {
            let mut subs = self
                .shared
                .subscriptions
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            subs.extend(new_feeds.iter().cloned());
        }

        if !self.is_connected() {
            tracing::warn!("Channel: Not connected, will subscribe to {:?} on connect", feeds);
            return;
        }

        self.shared.subscribe_now(&new_feeds);
    }

    /// Feeds that will be re-subscribed on reconnect.
    #[cfg(test)]
    pub fn subscribed_feeds(&self) -> Vec<String> {
        self.shared.remembered_feeds()
    }

    /// Take the inbound command queue. Only one consumer may exist, so
    /// this returns `Some` exactly once.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

#[async_trait]
impl Publisher for MqttChannel {
    async fn publish(&self, feed: &str, value: &str) -> bool {
        if !self.is_connected() {
            tracing::warn!("Channel: Not connected, skipping publish to {}", feed);
            return false;
        }

        let topic = topic_for(&self.shared.namespace, feed);
        match self
            .shared
            .client
            .publish(topic.clone(), QoS::AtLeastOnce, false, value.as_bytes().to_vec())
            .await
        {
            Ok(()) => {
                tracing::info!("Channel: Published {} to {}", value, topic);
                true
            }
            Err(e) => {
                tracing::error!("Channel: Failed to publish {} to {}: {}", value, topic, e);
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }
}

async fn run_receive_loop(
    mut eventloop: EventLoop,
    shared: Arc<Shared>,
    inbound: mpsc::Sender<InboundMessage>,
    mut stop: broadcast::Receiver<()>,
    reconnect_delay: Duration,
) {
    loop {
        tokio::select! {
            _ = stop.recv() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        shared.connected.store(true, Ordering::Release);
                        tracing::info!("Channel: Connected to broker");
                        let feeds = shared.remembered_feeds();
                        if !feeds.is_empty() {
                            shared.subscribe_now(&feeds);
                        }
                    } else {
                        shared.connected.store(false, Ordering::Release);
                        tracing::error!("Channel: Broker refused connection: {:?}", ack.code);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let feed = feed_from_topic(&publish.topic).to_string();
                    let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                    tracing::info!("Channel: Received command: {} -> {}", publish.topic, payload);
                    deliver(&inbound, InboundMessage::new(feed, payload));
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    tracing::debug!("Channel: Message {} acknowledged", ack.pkid);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    shared.connected.store(false, Ordering::Release);
                    tracing::info!("Channel: Disconnected by broker");
                }
                Ok(_) => {}
                Err(e) => {
                    if shared.connected.swap(false, Ordering::AcqRel) {
                        tracing::warn!("Channel: Disconnected unexpectedly ({}), reconnecting", e);
                    } else {
                        tracing::warn!("Channel: Connection attempt failed: {}", e);
                    }
                    // The next poll() reconnects.
                    tokio::select! {
                        _ = stop.recv() => break,
                        _ = tokio::time::sleep(reconnect_delay) => {}
                    }
                }
            }
        }
    }

    shared.connected.store(false, Ordering::Release);
    let _ = shared.client.try_disconnect();
    tracing::info!("Channel: Network loop stopped");
}

fn deliver(inbound: &mpsc::Sender<InboundMessage>, msg: InboundMessage) {
    match inbound.try_send(msg) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(msg)) => {
            tracing::warn!(
                "Channel: Command queue full, dropping {} -> {}",
                msg.feed,
                msg.payload
            );
        }
        Err(mpsc::error::TrySendError::Closed(msg)) => {
            tracing::warn!("Channel: No command handler, dropping {} -> {}", msg.feed, msg.payload);
        }
    }
}
