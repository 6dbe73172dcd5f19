//! Per-key rate limiting for alert-worthy actions.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Remembers when each key last fired and suppresses repeats inside the
/// window. Suppressed requests are dropped, not deferred.
#[derive(Debug)]
pub struct CooldownTracker<K> {
    window: Duration,
    last: Mutex<HashMap<K, Instant>>,
}

impl<K: Eq + Hash + Copy> CooldownTracker<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether `key` may fire at `now`.
    pub fn is_ready(&self, key: K, now: Instant) -> bool {
        let last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        Self::ready_at(&last, key, now, self.window)
    }

    /// Record that `key` fired at `now`.
    pub fn mark(&self, key: K, now: Instant) {
        self.last
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, now);
    }

    /// Check and mark in one step. Returns false if suppressed.
    pub fn try_acquire(&self, key: K, now: Instant) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if !Self::ready_at(&last, key, now, self.window) {
            return false;
        }
        last.insert(key, now);
        true
    }

    fn ready_at(last: &HashMap<K, Instant>, key: K, now: Instant, window: Duration) -> bool {
        match last.get(&key) {
            Some(prev) => now.saturating_duration_since(*prev) >= window,
            None => true,
        }
    }
}
