//! Data-collection runloop: environment polling, mode-gated security
//! polling, summary reports, and audit flushes.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;

use super::IntervalGate;
use crate::audit::AuditLog;
use crate::channel::{publish_fields, Publisher};
use crate::config::AgentConfig;
use crate::db::{LocalStore, SecurityEvent, TelemetrySample};
use crate::devices::{release_quietly, DriverError, EnvReading, EnvSensor, SecuritySensor};
use crate::security::{AlertResponder, SecurityAggregator};
use crate::state::ModeState;

/// Tick failures caught by the runloop's fault barrier.
#[derive(Error, Debug)]
pub enum TickError {
    #[error("security sensor: {0}")]
    SecuritySensor(#[source] DriverError),
    #[error("audit flush: {0}")]
    Flush(#[source] std::io::Error),
}

/// Gate intervals and pacing for the collection loop.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub env: Duration,
    pub security_check: Duration,
    pub security_report: Duration,
    pub flush: Duration,
    pub publish_delay: Duration,
    pub error_backoff: Duration,
}

impl From<&AgentConfig> for Timings {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            env: cfg.env_interval(),
            security_check: cfg.security_check_interval(),
            security_report: cfg.security_send_interval(),
            flush: cfg.flushing_interval(),
            publish_delay: cfg.publish_delay(),
            error_backoff: cfg.error_backoff(),
        }
    }
}

/// Sensors polled by the collection loop.
pub struct Sensors {
    pub env: Box<dyn EnvSensor>,
    pub security: Box<dyn SecuritySensor>,
}

/// The supervisory loop. Ticks at the security-check interval and
/// evaluates each gate on every tick: env, security (Away only), report,
/// flush.
pub struct CollectionLoop {
    timings: Timings,
    mode: Arc<ModeState>,
    sensors: Sensors,
    store: LocalStore,
    publisher: Arc<dyn Publisher>,
    aggregator: SecurityAggregator,
    responder: Arc<AlertResponder>,
    audit: Option<Arc<AuditLog>>,
    env_gate: IntervalGate,
    security_gate: IntervalGate,
    report_gate: IntervalGate,
    flush_gate: IntervalGate,
    last_env: Option<EnvReading>,
}

impl CollectionLoop {
    pub fn new(
        timings: Timings,
        mode: Arc<ModeState>,
        sensors: Sensors,
        store: LocalStore,
        publisher: Arc<dyn Publisher>,
        responder: Arc<AlertResponder>,
        audit: Option<Arc<AuditLog>>,
    ) -> Self {
        Self {
            env_gate: IntervalGate::new(timings.env),
            security_gate: IntervalGate::new(timings.security_check),
            report_gate: IntervalGate::new(timings.security_report),
            flush_gate: IntervalGate::new(timings.flush),
            timings,
            mode,
            sensors,
            store,
            publisher,
            aggregator: SecurityAggregator::new(),
            responder,
            audit,
            last_env: None,
        }
    }

    /// Evaluate every gate once. `now` is the time since the loop started.
    ///
    /// A failing gate does not keep later gates from running; the first
    /// failure is returned after all of them have been checked.
    pub async fn tick(&mut self, now: Duration) -> Result<(), TickError> {
        let mut result = Ok(());

        if self.env_gate.fire(now) {
            self.poll_env().await;
        }

        if self.mode.is_away() && self.security_gate.fire(now) {
            if let Err(e) = self.poll_security() {
                result = Err(e);
            }
        }

        if self.report_gate.fire(now) {
            self.aggregator
                .report(
                    Utc::now(),
                    &self.store,
                    self.publisher.as_ref(),
                    self.timings.publish_delay,
                )
                .await;
        }

        if self.flush_gate.fire(now) {
            if let Err(e) = self.flush() {
                result = result.and(Err(e));
            }
        }

        result
    }

    async fn poll_env(&mut self) {
        let reading = match self.sensors.env.read() {
            Ok(r) => {
                self.last_env = Some(r);
                r
            }
            Err(e) => match self.last_env {
                Some(r) => {
                    tracing::warn!("Runloop: Env sensor read failed ({}), reusing last reading", e);
                    r
                }
                None => {
                    tracing::warn!("Runloop: Env sensor read failed ({}), no reading to reuse", e);
                    return;
                }
            },
        };

        let sample = TelemetrySample {
            timestamp: Utc::now(),
            temperature: reading.temperature,
            humidity: reading.humidity,
            pressure: reading.pressure,
        };
        tracing::info!(
            "Env: T={:.1}C H={:.1}% P={:.2}hPa",
            sample.temperature,
            sample.humidity,
            sample.pressure
        );

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.append_env(&sample) {
                tracing::error!("Runloop: Failed to write environmental log: {}", e);
            }
        }

        if let Err(e) = self.store.insert_telemetry(&sample) {
            tracing::error!("Runloop: Failed to insert telemetry: {}", e);
        }

        let sent = publish_fields(
            self.publisher.as_ref(),
            &sample.feed_values(),
            self.timings.publish_delay,
        )
        .await;
        if sent {
            tracing::info!("Environmental data sent to cloud");
        } else {
            tracing::warn!("Failed to send environmental data (offline). Saved locally.");
        }
    }

    fn poll_security(&mut self) -> Result<(), TickError> {
        let detections = self
            .sensors
            .security
            .read()
            .map_err(TickError::SecuritySensor)?;

        let mut event = SecurityEvent {
            timestamp: Utc::now(),
            motion_detected: detections.motion,
            smoke_detected: detections.smoke,
            sound_detected: detections.sound,
            image_path: None,
        };
        if !event.any_detected() {
            return Ok(());
        }

        self.aggregator.record(&event);

        let now = Instant::now();
        for kind in event.detected_kinds() {
            if let Some(image) = self.responder.on_detection(kind, now) {
                event.image_path = Some(image.display().to_string());
            }
        }

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.append_security(&event) {
                tracing::error!("Runloop: Failed to write security log: {}", e);
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), TickError> {
        match &self.audit {
            Some(audit) => {
                audit.sync_all().map_err(TickError::Flush)?;
                tracing::debug!("Runloop: Audit logs flushed to disk");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Tick until `stop` fires. Errors from a tick are logged and followed
    /// by the error backoff; they never end the loop. Returns the loop so
    /// its sensors can be released.
    pub async fn run(mut self, mut stop: broadcast::Receiver<()>) -> Self {
        tracing::info!(
            "Runloop: Starting (tick {:?}, env {:?}, report {:?})",
            self.timings.security_check,
            self.timings.env,
            self.timings.security_report
        );
        let start = Instant::now();

        loop {
            let pause = match self.tick(start.elapsed()).await {
                Ok(()) => self.timings.security_check,
                Err(e) => {
                    tracing::error!(
                        "Runloop: Tick failed: {}. Retrying in {:?}",
                        e,
                        self.timings.error_backoff
                    );
                    self.timings.error_backoff
                }
            };

            tokio::select! {
                _ = stop.recv() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!("Runloop: Stopped");
        self
    }

    /// Release both sensors.
    pub fn release(&mut self) {
        release_quietly(self.sensors.env.as_mut());
        release_quietly(self.sensors.security.as_mut());
    }
}
