//! Record types buffered locally and synced to the remote store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::channel::feeds;

/// One environmental reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

impl TelemetrySample {
    /// Field values keyed by the feed they are published to.
    pub fn feed_values(&self) -> Vec<(&'static str, String)> {
        vec![
            (feeds::TEMPERATURE, self.temperature.to_string()),
            (feeds::HUMIDITY, self.humidity.to_string()),
            (feeds::PRESSURE, self.pressure.to_string()),
        ]
    }
}

/// Result of one security sensor poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub motion_detected: bool,
    pub smoke_detected: bool,
    pub sound_detected: bool,
    pub image_path: Option<String>,
}

impl SecurityEvent {
    pub fn any_detected(&self) -> bool {
        self.motion_detected || self.smoke_detected || self.sound_detected
    }

    /// Detection kinds whose flag is set, in motion/smoke/sound order.
    pub fn detected_kinds(&self) -> Vec<DetectionKind> {
        DetectionKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                DetectionKind::Motion => self.motion_detected,
                DetectionKind::Smoke => self.smoke_detected,
                DetectionKind::Sound => self.sound_detected,
            })
            .collect()
    }
}

/// Intrusion-class detection kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionKind {
    Motion,
    Smoke,
    Sound,
}

impl DetectionKind {
    pub const ALL: [DetectionKind; 3] = [Self::Motion, Self::Smoke, Self::Sound];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Motion => "motion",
            Self::Smoke => "smoke",
            Self::Sound => "sound",
        }
    }
}

impl fmt::Display for DetectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detection counts over one reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecuritySummary {
    pub timestamp: DateTime<Utc>,
    pub motion_count: i64,
    pub smoke_count: i64,
    pub sound_count: i64,
}

impl SecuritySummary {
    pub fn feed_values(&self) -> Vec<(&'static str, String)> {
        vec![
            (feeds::MOTION, self.motion_count.to_string()),
            (feeds::SMOKE, self.smoke_count.to_string()),
            (feeds::SOUND, self.sound_count.to_string()),
        ]
    }
}

/// Which local table a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Telemetry,
    SecuritySummary,
}

impl RecordKind {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Telemetry => "env_data",
            Self::SecuritySummary => "security_data",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Telemetry => f.write_str("environmental"),
            Self::SecuritySummary => f.write_str("security"),
        }
    }
}

/// A persisted record together with its local id and sync flag.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord<T> {
    pub id: i64,
    pub synced: bool,
    pub record: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detected_kinds() {
        let event = SecurityEvent {
            timestamp: Utc::now(),
            motion_detected: true,
            smoke_detected: false,
            sound_detected: true,
            image_path: None,
        };
        assert!(event.any_detected());
        assert_eq!(
            event.detected_kinds(),
            vec![DetectionKind::Motion, DetectionKind::Sound]
        );
    }

    #[test]
    fn test_summary_feed_values() {
        let summary = SecuritySummary {
            timestamp: Utc::now(),
            motion_count: 3,
            smoke_count: 0,
            sound_count: 1,
        };
        let values = summary.feed_values();
        assert_eq!(values[0], ("motion-feed", "3".to_string()));
        assert_eq!(values[2], ("sound-feed", "1".to_string()));
    }
}
