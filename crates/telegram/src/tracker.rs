//! In-flight message bookkeeping for the router.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug)]
struct Entry {
    status: DeliveryStatus,
    updated_at: Instant,
}

/// Tracks messages from first sighting until delivery.
///
/// Entries leave on `Sent`, or once older than the retention window.
#[derive(Debug)]
pub struct MessageTracker {
    retention: Duration,
    entries: HashMap<String, Entry>,
}

impl MessageTracker {
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: HashMap::new(),
        }
    }

    /// Start tracking `key`. Returns `false` if it is already pending, which
    /// means the same message is being processed twice.
    pub fn begin_at(&mut self, key: &str, now: Instant) -> bool {
        self.evict_expired(now);
        if let Some(entry) = self.entries.get(key)
            && entry.status == DeliveryStatus::Pending
        {
            return false;
        }
        self.entries.insert(key.to_string(), Entry {
            status: DeliveryStatus::Pending,
            updated_at: now,
        });
        true
    }

    pub fn finish_at(&mut self, key: &str, status: DeliveryStatus, now: Instant) {
        match status {
            DeliveryStatus::Sent => {
                self.entries.remove(key);
            },
            DeliveryStatus::Pending | DeliveryStatus::Failed => {
                self.entries.insert(key.to_string(), Entry {
                    status,
                    updated_at: now,
                });
            },
        }
    }

    pub fn status(&self, key: &str) -> Option<DeliveryStatus> {
        self.entries.get(key).map(|e| e.status)
    }

    fn evict_expired(&mut self, now: Instant) {
        let retention = self.retention;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.updated_at) < retention);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sent_entries_are_evicted() {
        let mut tracker = MessageTracker::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(tracker.begin_at("m1", now));
        assert_eq!(tracker.status("m1"), Some(DeliveryStatus::Pending));
        tracker.finish_at("m1", DeliveryStatus::Sent, now);
        assert!(tracker.is_empty());
    }

    #[test]
    fn pending_entry_rejects_reprocessing() {
        let mut tracker = MessageTracker::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(tracker.begin_at("m1", now));
        assert!(!tracker.begin_at("m1", now));
    }

    #[test]
    fn failed_entry_can_be_retried_and_expires() {
        let mut tracker = MessageTracker::new(Duration::from_secs(60));
        let t0 = Instant::now();
        tracker.begin_at("m1", t0);
        tracker.finish_at("m1", DeliveryStatus::Failed, t0);
        assert_eq!(tracker.status("m1"), Some(DeliveryStatus::Failed));

        assert!(tracker.begin_at("m1", t0 + Duration::from_secs(1)));
        tracker.finish_at("m1", DeliveryStatus::Failed, t0 + Duration::from_secs(1));

        tracker.begin_at("other", t0 + Duration::from_secs(120));
        assert_eq!(tracker.status("m1"), None);
        assert_eq!(tracker.len(), 1);
    }
}
