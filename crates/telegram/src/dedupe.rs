//! Suppression of repeated events inside a time window.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Remembers recently seen keys for `threshold`.
///
/// A zero threshold disables suppression.
#[derive(Debug)]
pub struct DedupeWindow {
    threshold: Duration,
    seen: HashMap<String, Instant>,
}

impl DedupeWindow {
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            seen: HashMap::new(),
        }
    }

    /// Whether `key` was recorded within the threshold before `now`.
    /// Expired keys are evicted on the way.
    pub fn contains_at(&mut self, key: &str, now: Instant) -> bool {
        if self.threshold.is_zero() {
            return false;
        }
        let threshold = self.threshold;
        self.seen
            .retain(|_, at| now.saturating_duration_since(*at) < threshold);
        self.seen.contains_key(key)
    }

    /// Remember `key` as seen at `now`. Call only once the event went out,
    /// so a failed delivery can be retried inside the window.
    pub fn record_at(&mut self, key: &str, now: Instant) {
        if !self.threshold.is_zero() {
            self.seen.insert(key.to_string(), now);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_key_is_seen_within_window() {
        let mut window = DedupeWindow::new(Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(!window.contains_at("alice joined", t0));
        window.record_at("alice joined", t0);
        assert!(window.contains_at("alice joined", t0 + Duration::from_secs(3)));
        assert!(!window.contains_at("bob joined", t0 + Duration::from_secs(3)));
    }

    #[test]
    fn checking_does_not_record() {
        let mut window = DedupeWindow::new(Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(!window.contains_at("alice joined", t0));
        assert!(!window.contains_at("alice joined", t0));
        assert!(window.is_empty());
    }

    #[test]
    fn entries_expire_after_threshold() {
        let mut window = DedupeWindow::new(Duration::from_secs(10));
        let t0 = Instant::now();
        window.record_at("alice joined", t0);
        assert!(!window.contains_at("alice joined", t0 + Duration::from_secs(10)));
        assert!(window.is_empty());
    }

    #[test]
    fn zero_threshold_disables() {
        let mut window = DedupeWindow::new(Duration::ZERO);
        let now = Instant::now();
        window.record_at("x", now);
        assert!(!window.contains_at("x", now));
        assert_eq!(window.len(), 0);
    }
}
