//! Detection counting over the reporting window.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

use crate::channel::{publish_fields, Publisher};
use crate::db::{DetectionKind, LocalStore, SecurityEvent, SecuritySummary};

/// Per-kind detection counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecurityCounts {
    pub motion: i64,
    pub smoke: i64,
    pub sound: i64,
}

impl SecurityCounts {
    fn slot(&mut self, kind: DetectionKind) -> &mut i64 {
        match kind {
            DetectionKind::Motion => &mut self.motion,
            DetectionKind::Smoke => &mut self.smoke,
            DetectionKind::Sound => &mut self.sound,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.motion == 0 && self.smoke == 0 && self.sound == 0
    }
}

/// What a report tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// All counts were zero.
    Idle,
    Reported {
        summary: SecuritySummary,
        persisted: bool,
        published: bool,
    },
}

/// Accumulates detections between report ticks.
#[derive(Debug, Default)]
pub struct SecurityAggregator {
    counts: Mutex<SecurityCounts>,
}

impl SecurityAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count every detection flag set in `event`, once each.
    pub fn record(&self, event: &SecurityEvent) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        for kind in event.detected_kinds() {
            let slot = counts.slot(kind);
            *slot += 1;
            tracing::warn!(
                "INTRUSION DETECTED: {} - Count: {}",
                kind.as_str().to_uppercase(),
                *slot
            );
        }
    }

    #[cfg(test)]
    pub fn counts(&self) -> SecurityCounts {
        *self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the current counts as a summary and zero them. Returns `None`
    /// (and leaves nothing to reset) when every count is zero.
    pub fn take_summary(&self, timestamp: DateTime<Utc>) -> Option<SecuritySummary> {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        if counts.is_empty() {
            return None;
        }

        let summary = SecuritySummary {
            timestamp,
            motion_count: counts.motion,
            smoke_count: counts.smoke,
            sound_count: counts.sound,
        };
        *counts = SecurityCounts::default();
        Some(summary)
    }

    /// Run one report tick: persist the summary locally, then publish its
    /// fields. Counts are zeroed whether or not either step succeeds; the
    /// local store is the durability guarantee, not the broker.
    pub async fn report(
        &self,
        timestamp: DateTime<Utc>,
        store: &LocalStore,
        publisher: &dyn Publisher,
        publish_delay: Duration,
    ) -> ReportOutcome {
        let summary = match self.take_summary(timestamp) {
            Some(s) => s,
            None => {
                tracing::debug!("No security events to report this interval");
                return ReportOutcome::Idle;
            }
        };

        let persisted = match store.insert_security_summary(&summary) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to insert security summary: {}", e);
                false
            }
        };

        tracing::warn!(
            "Security Summary: Motion={}, Smoke={}, Sound={}",
            summary.motion_count,
            summary.smoke_count,
            summary.sound_count
        );

        let published = publish_fields(publisher, &summary.feed_values(), publish_delay).await;
        if published {
            tracing::info!("Security summary sent to cloud");
        } else {
            tracing::warn!("Failed to send security summary (offline). Saved locally.");
        }

        ReportOutcome::Reported {
            summary,
            persisted,
            published,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RecordKind;
    use crate::testutil::FakePublisher;

    fn event(motion: bool, smoke: bool, sound: bool) -> SecurityEvent {
        SecurityEvent {
            timestamp: Utc::now(),
            motion_detected: motion,
            smoke_detected: smoke,
            sound_detected: sound,
            image_path: None,
        }
    }

    #[test]
    fn test_counts_match_detections() {
        let agg = SecurityAggregator::new();
        for i in 0..7 {
            agg.record(&event(true, i % 3 == 0, false));
        }
        agg.record(&event(false, false, false));

        let counts = agg.counts();
        assert_eq!(counts.motion, 7);
        assert_eq!(counts.smoke, 3);
        assert_eq!(counts.sound, 0);
    }

    #[test]
    fn test_take_summary_resets() {
        let agg = SecurityAggregator::new();
        assert!(agg.take_summary(Utc::now()).is_none());

        agg.record(&event(false, true, true));
        let summary = agg.take_summary(Utc::now()).unwrap();
        assert_eq!((summary.motion_count, summary.smoke_count, summary.sound_count), (0, 1, 1));
        assert!(agg.counts().is_empty());
    }

    #[tokio::test]
    async fn test_report_resets_even_when_offline() {
        let agg = SecurityAggregator::new();
        let store = LocalStore::in_memory().unwrap();
        let publisher = FakePublisher::disconnected();

        agg.record(&event(true, false, false));
        agg.record(&event(true, false, false));

        let outcome = agg.report(Utc::now(), &store, &publisher, Duration::ZERO).await;
        match outcome {
            ReportOutcome::Reported { summary, persisted, published } => {
                assert_eq!(summary.motion_count, 2);
                assert!(persisted);
                assert!(!published);
            }
            ReportOutcome::Idle => panic!("expected a report"),
        }

        assert!(agg.counts().is_empty());
        assert_eq!(store.unsynced_count(RecordKind::SecuritySummary).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_idle_report_has_no_side_effects() {
        let agg = SecurityAggregator::new();
        let store = LocalStore::in_memory().unwrap();
        let publisher = FakePublisher::connected();

        let outcome = agg.report(Utc::now(), &store, &publisher, Duration::ZERO).await;

        assert_eq!(outcome, ReportOutcome::Idle);
        assert!(publisher.published().is_empty());
        assert_eq!(store.unsynced_count(RecordKind::SecuritySummary).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_report_publishes_every_field() {
        let agg = SecurityAggregator::new();
        let store = LocalStore::in_memory().unwrap();
        let publisher = FakePublisher::connected();
        publisher.fail_feed("smoke-feed");

        agg.record(&event(true, true, false));
        let outcome = agg.report(Utc::now(), &store, &publisher, Duration::ZERO).await;

        assert!(matches!(outcome, ReportOutcome::Reported { published: false, .. }));
        let feeds: Vec<String> = publisher.published().into_iter().map(|(f, _)| f).collect();
        assert_eq!(feeds, vec!["motion-feed", "sound-feed"]);
    }
}
