//! Routing of inbound control messages.

use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};

use crate::audit::AuditLog;
use crate::channel::{feeds, InboundMessage, Publisher};
use crate::devices::{Actuators, Device, Switch};
use crate::security::AlertResponder;
use crate::state::{Mode, ModeState};

/// Acknowledgement published after a manual capture.
pub const PHOTO_ACK: &str = "PHOTO_TAKEN";

/// Where an inbound message goes. Every message maps to exactly one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    SetMode(Mode),
    InvalidMode(String),
    ManualCapture,
    Actuator(Device, Switch),
    InvalidActuatorCommand(Device, String),
    Unmatched,
}

/// Classify a message without side effects.
pub fn route(feed: &str, payload: &str) -> Route {
    if feed == feeds::MODE {
        return match Mode::parse(payload) {
            Ok(mode) => Route::SetMode(mode),
            Err(_) => Route::InvalidMode(payload.to_string()),
        };
    }

    if feed == feeds::CAMERA && is_capture_request(payload) {
        return Route::ManualCapture;
    }

    if let Some(device) = Device::from_feed(feed) {
        return match Switch::parse(payload) {
            Some(state) => Route::Actuator(device, state),
            None => Route::InvalidActuatorCommand(device, payload.to_string()),
        };
    }

    Route::Unmatched
}

fn is_capture_request(payload: &str) -> bool {
    let p = payload.trim();
    p.eq_ignore_ascii_case("TAKE_PHOTO") || p == "1"
}

/// Applies routed commands to mode, actuators, and the camera.
pub struct CommandDispatcher {
    mode: Arc<ModeState>,
    actuators: Arc<Mutex<Box<dyn Actuators>>>,
    responder: Arc<AlertResponder>,
    publisher: Arc<dyn Publisher>,
    audit: Option<Arc<AuditLog>>,
}

impl CommandDispatcher {
    pub fn new(
        mode: Arc<ModeState>,
        actuators: Arc<Mutex<Box<dyn Actuators>>>,
        responder: Arc<AlertResponder>,
        publisher: Arc<dyn Publisher>,
        audit: Option<Arc<AuditLog>>,
    ) -> Self {
        Self {
            mode,
            actuators,
            responder,
            publisher,
            audit,
        }
    }

    /// Handle one message and report the route taken.
    pub async fn dispatch(&self, msg: &InboundMessage) -> Route {
        let route = route(&msg.feed, &msg.payload);

        match &route {
            Route::SetMode(_) | Route::InvalidMode(_) => {
                let _ = self.mode.set_from_str(&msg.payload);
            }
            Route::ManualCapture => {
                tracing::warn!("Remote photo triggered by dashboard command");
                self.responder.manual_capture(Instant::now());
                self.publisher.publish(feeds::CAMERA, PHOTO_ACK).await;
            }
            Route::Actuator(device, state) => self.switch(*device, *state),
            Route::InvalidActuatorCommand(device, payload) => {
                tracing::warn!("Invalid command for {}: {:?}", device, payload);
            }
            Route::Unmatched => {
                tracing::debug!("Unhandled command on {}: {:?}", msg.feed, msg.payload);
            }
        }

        route
    }

    fn switch(&self, device: Device, state: Switch) {
        let result = {
            let mut actuators = self.actuators.lock().unwrap_or_else(|e| e.into_inner());
            actuators.set(device, state).map(|()| actuators.status(device))
        };

        match result {
            Ok(current) => {
                if let Some(audit) = &self.audit {
                    if let Err(e) = audit.append_device(device, current) {
                        tracing::error!("Failed to log device status: {}", e);
                    }
                }
            }
            Err(e) => tracing::error!("Failed to switch {} {}: {}", device, state, e),
        }
    }

    /// Drain the inbound queue until it closes or `stop` fires.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut stop: broadcast::Receiver<()>,
    ) {
        tracing::info!("Dispatcher: Waiting for commands");
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                msg = inbound.recv() => match msg {
                    Some(msg) => {
                        self.dispatch(&msg).await;
                    }
                    None => break,
                },
            }
        }
        tracing::info!("Dispatcher: Stopped");
    }
}
