//! Keyed rate limiters.
//!
//! A [`RateLimiter`] lets the first event for a key through and swallows any
//! further events for the same key until `window` milliseconds have passed.
//! The detector uses one keyed by domain (500 ms) to collapse seek and
//! rebuffer bursts, the engine one keyed by tab and target (1 s) to collapse
//! duplicate redirects.

use std::collections::HashMap;
use std::hash::Hash;

use crate::types::Timestamp;

/// Leading-edge limiter with a fixed window per key.
#[derive(Debug, Clone)]
pub struct RateLimiter<K> {
    window_ms: u64,
    last: HashMap<K, Timestamp>,
}

impl<K: Eq + Hash + Clone> RateLimiter<K> {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last: HashMap::new(),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Try to pass an event. Returns `true` and records it when the key is
    /// outside its window; returns `false` without touching the window
    /// otherwise.
    pub fn check(&mut self, key: &K, now: Timestamp) -> bool {
        if self.would_pass(key, now) {
            self.last.insert(key.clone(), now);
            true
        } else {
            false
        }
    }

    /// Same as [`check`](Self::check) but without recording anything.
    pub fn would_pass(&self, key: &K, now: Timestamp) -> bool {
        match self.last.get(key) {
            Some(&last) => now.saturating_sub(last) >= self.window_ms,
            None => true,
        }
    }

    /// Time of the last event that passed for a key.
    pub fn last_passed(&self, key: &K) -> Option<Timestamp> {
        self.last.get(key).copied()
    }

    pub fn forget(&mut self, key: &K) {
        self.last.remove(key);
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }

    /// Keep only the keys matching `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.last.retain(|key, _| keep(key));
    }

    /// Drop keys whose window has long passed.
    pub fn prune(&mut self, now: Timestamp) {
        let window = self.window_ms;
        self.last.retain(|_, last| now.saturating_sub(*last) < window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_bursts() {
        let mut limiter = RateLimiter::new(500);
        let key = "youtube.com".to_string();
        assert!(limiter.check(&key, 1_000));
        assert!(!limiter.check(&key, 1_200));
        assert!(!limiter.check(&key, 1_499));
        assert!(limiter.check(&key, 1_500));
        assert_eq!(limiter.last_passed(&key), Some(1_500));
    }

    #[test]
    fn test_rejected_events_do_not_extend_window() {
        let mut limiter = RateLimiter::new(1_000);
        assert!(limiter.check(&7, 0));
        assert!(!limiter.check(&7, 900));
        assert!(limiter.check(&7, 1_000));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut limiter = RateLimiter::new(1_000);
        assert!(limiter.check(&1, 0));
        assert!(limiter.check(&2, 10));
        assert!(!limiter.would_pass(&1, 20));
        limiter.forget(&1);
        assert!(limiter.would_pass(&1, 20));
    }

    #[test]
    fn test_retain_by_key() {
        let mut limiter = RateLimiter::new(1_000);
        limiter.check(&(1, "a".to_string()), 0);
        limiter.check(&(1, "b".to_string()), 0);
        limiter.check(&(2, "a".to_string()), 0);
        limiter.retain(|(tab, _)| *tab != 1);
        assert!(limiter.would_pass(&(1, "a".to_string()), 10));
        assert!(!limiter.would_pass(&(2, "a".to_string()), 10));
    }

    #[test]
    fn test_prune() {
        let mut limiter = RateLimiter::new(100);
        limiter.check(&1, 0);
        limiter.check(&2, 150);
        limiter.prune(200);
        assert_eq!(limiter.last_passed(&1), None);
        assert_eq!(limiter.last_passed(&2), Some(150));
    }
}
