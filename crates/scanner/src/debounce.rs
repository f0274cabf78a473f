//! TTL'd dispatch keys for `(user, symbol)` pairs.
//!
//! A key is set atomically at dispatch time, before execution completes,
//! guaranteeing at most one in-flight signal per symbol per user even when
//! scanner ticks overlap. Keys act as lightweight locks with expiry, not
//! mutexes: nothing ever blocks on them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct DebounceMap {
    ttl: Duration,
    keys: Mutex<HashMap<(String, String), Instant>>,
}

impl DebounceMap {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the key if it is absent or expired. Returns whether this caller
    /// won the slot; losers must not dispatch.
    pub fn try_acquire(&self, user_id: &str, symbol: &str) -> bool {
        let mut keys = self.keys.lock();
        let now = Instant::now();
        let key = (user_id.to_string(), symbol.to_string());
        match keys.get(&key) {
            Some(set_at) if now.duration_since(*set_at) < self.ttl => false,
            _ => {
                keys.insert(key, now);
                true
            }
        }
    }

    /// Whether an unexpired key exists for the pair.
    #[must_use]
    pub fn is_active(&self, user_id: &str, symbol: &str) -> bool {
        let keys = self.keys.lock();
        keys.get(&(user_id.to_string(), symbol.to_string()))
            .is_some_and(|set_at| set_at.elapsed() < self.ttl)
    }

    /// Drops every key belonging to the user (emergency stop path).
    pub fn clear_user(&self, user_id: &str) {
        self.keys.lock().retain(|(user, _), _| user != user_id);
    }

    /// Number of unexpired keys, purging expired ones as a side effect.
    #[must_use]
    pub fn active_count(&self) -> usize {
        let mut keys = self.keys.lock();
        let ttl = self.ttl;
        keys.retain(|_, set_at| set_at.elapsed() < ttl);
        keys.len()
    }
}
