//! Test doubles shared by unit tests.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::Publisher;
use crate::db::{RemoteError, RemoteStore, SecuritySummary, TelemetrySample};
use crate::devices::{
    Alert, AlertSink, Camera, Detections, DriverError, EnvReading, EnvSensor, Release,
    SecuritySensor,
};

#[derive(Default)]
pub struct FakePublisher {
    connected: AtomicBool,
    failing: Mutex<HashSet<String>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl FakePublisher {
    pub fn connected() -> Self {
        let p = Self::default();
        p.set_connected(true);
        p
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_feed(&self, feed: &str) {
        self.failing.lock().unwrap().insert(feed.to_string());
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, feed: &str, value: &str) -> bool {
        if !self.is_connected() || self.failing.lock().unwrap().contains(feed) {
            return false;
        }
        self.sent
            .lock()
            .unwrap()
            .push((feed.to_string(), value.to_string()));
        true
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeRemote {
    fail_telemetry: AtomicBool,
    fail_security: AtomicBool,
    pub telemetry: Mutex<Vec<TelemetrySample>>,
    pub summaries: Mutex<Vec<SecuritySummary>>,
}

impl FakeRemote {
    pub fn set_fail_telemetry(&self, fail: bool) {
        self.fail_telemetry.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_security(&self, fail: bool) {
        self.fail_security.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn insert_telemetry(&self, batch: &[TelemetrySample]) -> Result<(), RemoteError> {
        if self.fail_telemetry.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("telemetry write refused".to_string()));
        }
        self.telemetry.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }

    async fn insert_security_summaries(&self, batch: &[SecuritySummary]) -> Result<(), RemoteError> {
        if self.fail_security.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("security write refused".to_string()));
        }
        self.summaries.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }
}

/// Camera that only counts captures.
#[derive(Clone, Default)]
pub struct CountingCamera {
    captures: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl CountingCamera {
    pub fn count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Release for CountingCamera {
    fn name(&self) -> &str {
        "counting camera"
    }

    fn release(&mut self) -> Result<(), DriverError> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Camera for CountingCamera {
    fn capture(&mut self, _path: &Path) -> Result<(), DriverError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    failing: AtomicBool,
    sent: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.subject.clone())
            .collect()
    }
}

impl AlertSink for RecordingSink {
    fn send(&self, alert: &Alert) -> Result<(), DriverError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DriverError::Alert("smtp down".to_string()));
        }
        self.sent.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Environmental sensor replaying scripted results; repeats the last one.
pub struct ScriptedEnvSensor {
    script: VecDeque<Result<EnvReading, String>>,
    last: Result<EnvReading, String>,
}

impl ScriptedEnvSensor {
    pub fn new(script: Vec<Result<EnvReading, String>>) -> Self {
        Self {
            script: script.into(),
            last: Err("no reading".to_string()),
        }
    }
}

impl Release for ScriptedEnvSensor {
    fn name(&self) -> &str {
        "scripted env sensor"
    }
}

impl EnvSensor for ScriptedEnvSensor {
    fn read(&mut self) -> Result<EnvReading, DriverError> {
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        self.last.clone().map_err(DriverError::Read)
    }
}

/// Security sensor replaying scripted detections; quiet once exhausted.
pub struct ScriptedSecuritySensor {
    script: VecDeque<Detections>,
    pub reads: Arc<AtomicUsize>,
}

impl ScriptedSecuritySensor {
    pub fn new(script: Vec<Detections>) -> Self {
        Self {
            script: script.into(),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Release for ScriptedSecuritySensor {
    fn name(&self) -> &str {
        "scripted security sensor"
    }
}

impl SecuritySensor for ScriptedSecuritySensor {
    fn read(&mut self) -> Result<Detections, DriverError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

pub fn reading(temperature: f64) -> EnvReading {
    EnvReading {
        temperature,
        humidity: 45.0,
        pressure: 1012.0,
    }
}
