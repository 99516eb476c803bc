use crate::events::Timestamp;
use chrono::{Duration, Utc};
use std::collections::HashMap;

/// Suppression window for repeated alerts
///
/// Tracks when each de-duplication key was last permitted and refuses the
/// same key again until the cooldown has elapsed. This is what keeps a
/// periodic check that fires every cycle from turning into an alert storm.
/// Keys are exact strings: two messages that differ only in an embedded
/// number are distinct keys.
#[derive(Debug)]
pub struct DedupWindow {
    /// How long an identical key stays suppressed
    cooldown: Duration,
    /// Last permitted time per key
    last_permitted: HashMap<String, Timestamp>,
}

impl DedupWindow {
    /// Create a window with the given cooldown
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_permitted: HashMap::new(),
        }
    }

    /// Check whether the key may fire now, recording it if so
    ///
    /// # Returns
    ///
    /// `true` when the key has not fired within the cooldown (the key is
    /// recorded as fired), `false` when it is still suppressed.
    pub fn permit(&mut self, key: &str) -> bool {
        self.permit_at(key, Utc::now())
    }

    /// Check a key against an explicit current time
    ///
    /// This is primarily used for testing with controlled timestamps.
    pub fn permit_at(&mut self, key: &str, now: Timestamp) -> bool {
        self.prune(now);
        match self.last_permitted.get(key) {
            Some(last) if now - *last < self.cooldown => false,
            _ => {
                self.last_permitted.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.last_permitted.len()
    }

    /// Drop entries whose cooldown has fully elapsed
    fn prune(&mut self, now: Timestamp) {
        let cooldown = self.cooldown;
        self.last_permitted.retain(|_, last| now - *last < cooldown);
    }
}


// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::collections::HashSet;

    #[quickcheck]
    fn prop_one_permit_per_key_within_window(keys: Vec<u8>) -> bool {
        let mut window = DedupWindow::new(Duration::seconds(60));
        let now = Utc::now();

        let mut permitted = 0usize;
        for key in &keys {
            if window.permit_at(&format!("key-{}", key), now) {
                permitted += 1;
            }
        }

        let distinct: HashSet<u8> = keys.iter().copied().collect();
        permitted == distinct.len()
    }
}
