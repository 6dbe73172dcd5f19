//! Scheduler module for the collection and cloud-sync runloops.

mod collect;
mod sync;

pub use collect::*;
pub use sync::*;

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Elapsed-time gate. Armed at loop start; fires once `interval` has
/// passed since it last fired.
#[derive(Debug, Clone, Copy)]
pub struct IntervalGate {
    interval: Duration,
    last: Duration,
}

impl IntervalGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Duration::ZERO,
        }
    }

    /// Check the gate at `now` (time since loop start) and reset it if it
    /// fires.
    pub fn fire(&mut self, now: Duration) -> bool {
        if now.saturating_sub(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub fn last_fired(&self) -> Duration {
        self.last
    }
}

/// Owns the background loops and their shared stop signal.
pub struct Scheduler {
    stop: broadcast::Sender<()>,
    collection: Option<JoinHandle<CollectionLoop>>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    shutdown_timeout: Duration,
}

impl Scheduler {
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            stop,
            collection: None,
            tasks: Vec::new(),
            shutdown_timeout,
        }
    }

    /// A receiver for the stop signal, for tasks spawned outside the
    /// scheduler.
    pub fn stop_signal(&self) -> broadcast::Receiver<()> {
        self.stop.subscribe()
    }

    /// Start the data-collection runloop.
    pub fn start_collection(&mut self, runloop: CollectionLoop) {
        let stop = self.stop.subscribe();
        self.collection = Some(tokio::spawn(runloop.run(stop)));
    }

    /// Start the cloud-sync runloop.
    pub fn start_sync(&mut self, worker: CloudSyncWorker, initial_delay: Duration, interval: Duration) {
        let stop = self.stop.subscribe();
        self.track(
            "cloud sync",
            tokio::spawn(worker.run(initial_delay, interval, stop)),
        );
    }

    /// Join `handle` on shutdown alongside the scheduler's own loops.
    pub fn track(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.push((name, handle));
    }

    /// Signal every loop to stop and wait for them, up to the shutdown
    /// timeout in total. Returns the collection loop so its drivers can be
    /// released.
    pub async fn shutdown(self) -> Option<CollectionLoop> {
        tracing::info!("Scheduler: Stopping background loops");
        let _ = self.stop.send(());
        let deadline = Instant::now() + self.shutdown_timeout;

        let mut runloop = None;
        if let Some(mut handle) = self.collection {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(lp)) => runloop = Some(lp),
                Ok(Err(e)) => tracing::error!("Scheduler: collection loop failed: {}", e),
                Err(_) => {
                    tracing::warn!("Scheduler: collection loop did not stop in time");
                    handle.abort();
                }
            }
        }

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Scheduler: {} task failed: {}", name, e),
                Err(_) => {
                    tracing::warn!("Scheduler: {} task did not stop in time", name);
                    handle.abort();
                }
            }
        }

        runloop
    }
}
