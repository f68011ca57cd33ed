//! Sliding-window attempt tracking.
//!
//! Used twice by the coordinator: bounding HELLO replies per source
//! address (outbound amplification, since the source address cannot yet be
//! trusted) and bounding connection attempts per target node for the
//! signaling relay.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Per-identifier sliding window of attempt timestamps.
pub struct AttemptWindow<K: Hash + Eq> {
    window: Duration,
    attempts: HashMap<K, Vec<Instant>>,
}

impl<K: Hash + Eq + Clone> AttemptWindow<K> {
    /// Create a tracker with the given window (60 s in the protocol).
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            attempts: HashMap::new(),
        }
    }

    /// Record an attempt for `key` and report whether it stayed within
    /// `max` attempts per window. The attempt is counted either way, so a
    /// peer hammering the limit keeps extending its own penalty.
    pub fn check_and_record(&mut self, key: K, max: u32) -> bool {
        let now = Instant::now();
        let window = self.window;
        let entries = self.attempts.entry(key).or_default();
        entries.retain(|at| now.duration_since(*at) < window);
        entries.push(now);
        entries.len() <= max as usize
    }

    /// Whether `key` has reached `max` attempts in the current window,
    /// without recording a new attempt.
    pub fn is_limited(&mut self, key: &K, max: u32) -> bool {
        let now = Instant::now();
        let window = self.window;
        match self.attempts.get_mut(key) {
            Some(entries) => {
                entries.retain(|at| now.duration_since(*at) < window);
                entries.len() >= max as usize
            }
            None => false,
        }
    }

    /// Drop identifiers whose windows have emptied. Run on the maintenance
    /// interval so the map does not grow with dead peers.
    pub fn prune(&mut self) {
        let now = Instant::now();
        let window = self.window;
        self.attempts.retain(|_, entries| {
            entries.retain(|at| now.duration_since(*at) < window);
            !entries.is_empty()
        });
    }

    /// Number of identifiers currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.attempts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_max() {
        let mut window = AttemptWindow::new(Duration::from_secs(60));
        for _ in 0..3 {
            assert!(window.check_and_record("peer", 3));
        }
        assert!(!window.check_and_record("peer", 3));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut window = AttemptWindow::new(Duration::from_secs(60));
        assert!(window.check_and_record("a", 1));
        assert!(!window.check_and_record("a", 1));
        assert!(window.check_and_record("b", 1));
    }

    #[test]
    fn test_is_limited_does_not_record() {
        let mut window = AttemptWindow::new(Duration::from_secs(60));
        assert!(!window.is_limited(&"peer", 1));
        assert!(window.check_and_record("peer", 1));
        assert!(window.is_limited(&"peer", 1));
        // still exactly one recorded attempt
        assert_eq!(window.attempts.get(&"peer").unwrap().len(), 1);
    }

    #[test]
    fn test_window_expiry() {
        let mut window = AttemptWindow::new(Duration::from_millis(10));
        assert!(window.check_and_record("peer", 1));
        assert!(!window.check_and_record("peer", 1));

        std::thread::sleep(Duration::from_millis(20));
        assert!(window.check_and_record("peer", 1));
    }

    #[test]
    fn test_prune_drops_empty_windows() {
        let mut window = AttemptWindow::new(Duration::from_millis(10));
        window.check_and_record("peer", 5);
        assert_eq!(window.tracked(), 1);

        std::thread::sleep(Duration::from_millis(20));
        window.prune();
        assert_eq!(window.tracked(), 0);
    }
}
