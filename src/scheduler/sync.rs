//! Cloud sync: drains unsynced local rows into the remote store.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::channel::Publisher;
use crate::db::{LocalStore, RecordKind, RemoteStore, SyncRecord};

/// Result of one sync attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// The link was down and nothing was attempted.
    pub skipped: bool,
    pub telemetry: usize,
    pub summaries: usize,
}

impl SyncReport {
    pub fn total(&self) -> usize {
        self.telemetry + self.summaries
    }
}

/// Moves locally buffered records to the remote store while the broker
/// link is up. A row is marked synced only after the batch containing it
/// was written remotely.
pub struct CloudSyncWorker {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    link: Arc<dyn Publisher>,
}

impl CloudSyncWorker {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteStore>, link: Arc<dyn Publisher>) -> Self {
        Self {
            store,
            remote,
            link,
        }
    }

    /// Run one sync pass over both record kinds.
    pub async fn run_once(&self) -> SyncReport {
        if !self.link.is_connected() {
            self.log_backlog();
            return SyncReport {
                skipped: true,
                ..Default::default()
            };
        }

        let report = SyncReport {
            skipped: false,
            telemetry: self.sync_telemetry().await,
            summaries: self.sync_summaries().await,
        };

        if report.total() > 0 {
            tracing::info!(
                "CloudSync: Synced {} telemetry and {} security records",
                report.telemetry,
                report.summaries
            );
        }
        report
    }

    async fn sync_telemetry(&self) -> usize {
        let rows = match self.store.fetch_unsynced_telemetry() {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("CloudSync: Failed to read unsynced telemetry: {}", e);
                return 0;
            }
        };
        if rows.is_empty() {
            return 0;
        }

        let (ids, batch) = split(rows);
        if let Err(e) = self.remote.insert_telemetry(&batch).await {
            tracing::error!("CloudSync: Failed to sync {} telemetry rows: {}", batch.len(), e);
            return 0;
        }
        self.mark(RecordKind::Telemetry, &ids)
    }

    async fn sync_summaries(&self) -> usize {
        let rows = match self.store.fetch_unsynced_summaries() {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("CloudSync: Failed to read unsynced security summaries: {}", e);
                return 0;
            }
        };
        if rows.is_empty() {
            return 0;
        }

        let (ids, batch) = split(rows);
        if let Err(e) = self.remote.insert_security_summaries(&batch).await {
            tracing::error!("CloudSync: Failed to sync {} security rows: {}", batch.len(), e);
            return 0;
        }
        self.mark(RecordKind::SecuritySummary, &ids)
    }

    fn mark(&self, kind: RecordKind, ids: &[i64]) -> usize {
        // Remote already holds these rows; a failure here means they are
        // sent again next pass.
        match self.store.mark_synced(kind, ids) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!("CloudSync: Failed to mark {} rows synced: {}", kind, e);
                0
            }
        }
    }

    fn log_backlog(&self) {
        let pending = |kind| self.store.unsynced_count(kind).unwrap_or(-1);
        tracing::debug!(
            "CloudSync: Link down, skipping sync ({} telemetry, {} security pending)",
            pending(RecordKind::Telemetry),
            pending(RecordKind::SecuritySummary)
        );
    }

    /// Sync every `interval` after `initial_delay` until `stop` fires.
    pub async fn run(self, initial_delay: Duration, interval: Duration, mut stop: broadcast::Receiver<()>) {
        tracing::info!("CloudSync: Starting, first pass in {:?}", initial_delay);

        tokio::select! {
            _ = stop.recv() => return,
            _ = tokio::time::sleep(initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.recv() => break,
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }

        tracing::info!("CloudSync: Stopped");
    }
}

fn split<T>(rows: Vec<SyncRecord<T>>) -> (Vec<i64>, Vec<T>) {
    rows.into_iter().map(|r| (r.id, r.record)).unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{SecuritySummary, TelemetrySample};
    use crate::testutil::{FakePublisher, FakeRemote};
    use chrono::Utc;

    struct Fixture {
        worker: CloudSyncWorker,
        store: LocalStore,
        remote: Arc<FakeRemote>,
        link: Arc<FakePublisher>,
    }

    fn fixture() -> Fixture {
        let store = LocalStore::in_memory().unwrap();
        let remote = Arc::new(FakeRemote::default());
        let link = Arc::new(FakePublisher::connected());
        let worker = CloudSyncWorker::new(store.clone(), remote.clone(), link.clone());
        Fixture {
            worker,
            store,
            remote,
            link,
        }
    }

    fn insert_telemetry(store: &LocalStore, n: usize) -> Vec<i64> {
        (0..n)
            .map(|i| {
                store
                    .insert_telemetry(&TelemetrySample {
                        timestamp: Utc::now(),
                        temperature: 20.0 + i as f64,
                        humidity: 40.0,
                        pressure: 1010.0,
                    })
                    .unwrap()
            })
            .collect()
    }

    fn insert_summary(store: &LocalStore) -> i64 {
        store
            .insert_security_summary(&SecuritySummary {
                timestamp: Utc::now(),
                motion_count: 2,
                smoke_count: 0,
                sound_count: 1,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_remote_failure_marks_nothing() {
        let f = fixture();
        let ids = insert_telemetry(&f.store, 10);

        f.remote.set_fail_telemetry(true);
        let report = f.worker.run_once().await;
        assert_eq!(report.telemetry, 0);
        assert_eq!(f.store.unsynced_count(RecordKind::Telemetry).unwrap(), 10);

        f.remote.set_fail_telemetry(false);
        let report = f.worker.run_once().await;
        assert_eq!(report.telemetry, 10);
        for id in ids {
            assert!(f.store.is_synced(RecordKind::Telemetry, id).unwrap());
        }
        assert_eq!(f.remote.telemetry.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_offline_skips_then_drains() {
        let f = fixture();
        insert_telemetry(&f.store, 1);
        insert_summary(&f.store);

        f.link.set_connected(false);
        let report = f.worker.run_once().await;
        assert!(report.skipped);
        assert_eq!(report.total(), 0);
        assert!(f.remote.telemetry.lock().unwrap().is_empty());

        f.link.set_connected(true);
        let report = f.worker.run_once().await;
        assert!(!report.skipped);
        assert_eq!((report.telemetry, report.summaries), (1, 1));
        assert_eq!(f.store.unsynced_count(RecordKind::Telemetry).unwrap(), 0);
        assert_eq!(f.store.unsynced_count(RecordKind::SecuritySummary).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_kinds_sync_independently() {
        let f = fixture();
        insert_telemetry(&f.store, 3);
        let summary_id = insert_summary(&f.store);

        f.remote.set_fail_telemetry(true);
        let report = f.worker.run_once().await;

        assert_eq!((report.telemetry, report.summaries), (0, 1));
        assert!(f.store.is_synced(RecordKind::SecuritySummary, summary_id).unwrap());
        assert_eq!(f.store.unsynced_count(RecordKind::Telemetry).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_summary_failure_leaves_telemetry_synced() {
        let f = fixture();
        let telemetry_ids = insert_telemetry(&f.store, 2);
        let summary_ids = [insert_summary(&f.store), insert_summary(&f.store)];

        f.remote.set_fail_security(true);
        let report = f.worker.run_once().await;

        assert_eq!((report.telemetry, report.summaries), (2, 0));
        for id in telemetry_ids {
            assert!(f.store.is_synced(RecordKind::Telemetry, id).unwrap());
        }
        for id in summary_ids {
            assert!(!f.store.is_synced(RecordKind::SecuritySummary, id).unwrap());
        }
        assert!(f.remote.summaries.lock().unwrap().is_empty());

        f.remote.set_fail_security(false);
        let report = f.worker.run_once().await;
        assert_eq!((report.telemetry, report.summaries), (0, 2));
        assert_eq!(f.store.unsynced_count(RecordKind::SecuritySummary).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_synced_rows_are_not_resent() {
        let f = fixture();
        insert_telemetry(&f.store, 2);

        f.worker.run_once().await;
        let report = f.worker.run_once().await;

        assert_eq!(report.total(), 0);
        assert_eq!(f.remote.telemetry.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_during_initial_delay() {
        let f = fixture();
        let (stop_tx, stop_rx) = broadcast::channel(1);

        let handle = tokio::spawn(f.worker.run(Duration::from_secs(3600), Duration::from_secs(30), stop_rx));
        stop_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
