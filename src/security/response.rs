//! Image capture and alerting in response to detections.

use chrono::{Local, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::CooldownTracker;
use crate::db::DetectionKind;
use crate::devices::{release_quietly, Alert, AlertSink, Camera};

/// Cooldown key for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    Detection(DetectionKind),
    Manual,
}

/// Rate-limited capture and alert actions.
///
/// Captures and alerts have independent cooldowns. The capture cooldown
/// is marked on every capture attempt, manual ones included; the alert
/// cooldown only once the sink accepts the alert.
pub struct AlertResponder {
    camera: Mutex<Box<dyn Camera>>,
    sink: Arc<dyn AlertSink>,
    camera_enabled: bool,
    image_dir: PathBuf,
    capture_cooldown: CooldownTracker<ResponseKind>,
    alert_cooldown: CooldownTracker<ResponseKind>,
}

impl AlertResponder {
    pub fn new(
        camera: Box<dyn Camera>,
        sink: Arc<dyn AlertSink>,
        camera_enabled: bool,
        image_dir: PathBuf,
        capture_cooldown: Duration,
        alert_cooldown: Duration,
    ) -> Self {
        Self {
            camera: Mutex::new(camera),
            sink,
            camera_enabled,
            image_dir,
            capture_cooldown: CooldownTracker::new(capture_cooldown),
            alert_cooldown: CooldownTracker::new(alert_cooldown),
        }
    }

    /// React to a detection. Returns the captured image, if any.
    pub fn on_detection(&self, kind: DetectionKind, now: Instant) -> Option<PathBuf> {
        match kind {
            DetectionKind::Motion => {
                let image = if !self.camera_enabled {
                    None
                } else if self
                    .capture_cooldown
                    .try_acquire(ResponseKind::Detection(kind), now)
                {
                    tracing::warn!("Motion detected! Capturing image and sending alert.");
                    self.capture("security")
                } else {
                    tracing::debug!(
                        "Motion detected, but still in camera cooldown period ({}s).",
                        self.capture_cooldown.window().as_secs()
                    );
                    None
                };
                self.alert(
                    ResponseKind::Detection(kind),
                    "Motion Detected",
                    "PIR sensor triggered, check the image.",
                    image.clone(),
                    now,
                );
                image
            }
            DetectionKind::Smoke => {
                tracing::error!("SMOKE DETECTED! Sending critical alert.");
                self.alert(
                    ResponseKind::Detection(kind),
                    "CRITICAL SMOKE ALERT",
                    "Potential fire hazard detected!",
                    None,
                    now,
                );
                None
            }
            DetectionKind::Sound => {
                self.alert(
                    ResponseKind::Detection(kind),
                    "Sound Detected",
                    "Sound sensor triggered.",
                    None,
                    now,
                );
                None
            }
        }
    }

    /// Capture requested from the dashboard. Always attempts the capture
    /// and starts the motion capture cooldown, so a motion event right
    /// after a manual photo does not take a second one.
    pub fn manual_capture(&self, now: Instant) -> Option<PathBuf> {
        tracing::info!("MANUAL TRIGGER: Initiating image capture and alert.");
        let image = self.capture("manual");
        self.capture_cooldown
            .mark(ResponseKind::Detection(DetectionKind::Motion), now);
        self.alert(
            ResponseKind::Manual,
            "Manual Photo Trigger",
            "Remote photo capture requested by user dashboard command.",
            image.clone(),
            now,
        );
        image
    }

    pub fn release_camera(&self) {
        let mut camera = self.camera.lock().unwrap_or_else(|e| e.into_inner());
        release_quietly(camera.as_mut());
    }

    fn capture(&self, prefix: &str) -> Option<PathBuf> {
        let path = self.image_dir.join(format!(
            "{}_{}.jpg",
            prefix,
            Local::now().format("%Y%m%d_%H%M%S")
        ));

        let mut camera = self.camera.lock().unwrap_or_else(|e| e.into_inner());
        match camera.capture(&path) {
            Ok(()) => {
                tracing::info!("Image captured: {}", path.display());
                Some(path)
            }
            Err(e) => {
                tracing::error!("Camera capture failed: {}", e);
                None
            }
        }
    }

    fn alert(
        &self,
        kind: ResponseKind,
        subject: &str,
        message: &str,
        image: Option<PathBuf>,
        now: Instant,
    ) -> bool {
        if !self.alert_cooldown.is_ready(kind, now) {
            tracing::debug!("Alert cooldown active for {}, skipping email.", subject);
            return false;
        }

        let alert = Alert {
            subject: subject.to_string(),
            message: message.to_string(),
            image,
            timestamp: Utc::now(),
        };
        match self.sink.send(&alert) {
            Ok(()) => {
                tracing::info!("Email alert sent: {}", subject);
                self.alert_cooldown.mark(kind, now);
                true
            }
            Err(e) => {
                tracing::error!("Failed to send email alert: {}", e);
                false
            }
        }
    }
}
