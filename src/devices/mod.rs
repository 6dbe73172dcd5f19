//! Hardware driver seams.
//!
//! Every driver implements [`Release`], which shutdown calls unconditionally.

mod alert;
mod sim;

pub use alert::*;
pub use sim::*;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::channel::feeds;

/// Driver error types.
#[derive(Error, Debug)]
pub enum DriverError {
    #[cfg(test)]
    #[error("sensor read failed: {0}")]
    Read(String),
    #[error("camera error: {0}")]
    Camera(String),
    #[error("alert delivery failed: {0}")]
    Alert(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resource cleanup on shutdown.
pub trait Release {
    fn name(&self) -> &str;

    /// Free the underlying resource. Drivers holding nothing keep the
    /// default.
    fn release(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Release a driver, logging instead of propagating failures.
pub fn release_quietly<R: Release + ?Sized>(driver: &mut R) {
    let name = driver.name().to_string();
    match driver.release() {
        Ok(()) => tracing::info!("Released {}", name),
        Err(e) => tracing::error!("Cleanup error for {}: {}", name, e),
    }
}

/// One environmental sensor reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvReading {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

pub trait EnvSensor: Release + Send {
    fn read(&mut self) -> Result<EnvReading, DriverError>;
}

/// Detection flags from one security sensor poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Detections {
    pub motion: bool,
    pub smoke: bool,
    pub sound: bool,
}

pub trait SecuritySensor: Release + Send {
    fn read(&mut self) -> Result<Detections, DriverError>;
}

/// Switched outputs controllable from the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Light,
    Fan,
    Buzzer,
}

impl Device {
    pub const ALL: [Device; 3] = [Device::Light, Device::Fan, Device::Buzzer];

    /// Device controlled by a feed, if any.
    pub fn from_feed(feed: &str) -> Option<Self> {
        match feed {
            feeds::LIGHT => Some(Device::Light),
            feeds::FAN => Some(Device::Fan),
            feeds::BUZZER => Some(Device::Buzzer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Light => "light",
            Device::Fan => "fan",
            Device::Buzzer => "buzzer",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    /// Accepts `on`/`1` and `off`/`0`, case-insensitively.
    pub fn parse(payload: &str) -> Option<Self> {
        let cmd = payload.trim().to_ascii_lowercase();
        match cmd.as_str() {
            "on" | "1" => Some(Switch::On),
            "off" | "0" => Some(Switch::Off),
            _ => None,
        }
    }
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Switch::On => f.write_str("ON"),
            Switch::Off => f.write_str("OFF"),
        }
    }
}

pub trait Actuators: Release + Send {
    fn set(&mut self, device: Device, state: Switch) -> Result<(), DriverError>;

    fn status(&self, device: Device) -> Switch;
}

pub trait Camera: Release + Send {
    /// Capture a still image to `path`.
    fn capture(&mut self, path: &Path) -> Result<(), DriverError>;
}

/// An outbound notification.
#[derive(Debug, Clone)]
pub struct Alert {
    pub subject: String,
    pub message: String,
    pub image: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

pub trait AlertSink: Send + Sync {
    fn send(&self, alert: &Alert) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_parse() {
        assert_eq!(Switch::parse("ON"), Some(Switch::On));
        assert_eq!(Switch::parse("1"), Some(Switch::On));
        assert_eq!(Switch::parse("Off"), Some(Switch::Off));
        assert_eq!(Switch::parse("0"), Some(Switch::Off));
        assert_eq!(Switch::parse("toggle"), None);
        assert_eq!(Switch::parse("2"), None);
    }

    #[test]
    fn test_device_from_feed() {
        assert_eq!(Device::from_feed("fan-control"), Some(Device::Fan));
        assert_eq!(Device::from_feed("system-mode"), None);
    }
}
