use std::sync::atomic::{AtomicU64, Ordering};

/// Transient network errors seen since the session was created.
///
/// Never reset: the admin notice reports the total since startup.
#[derive(Debug, Default)]
pub struct NetworkErrorCounter {
    count: AtomicU64,
}

impl NetworkErrorCounter {
    /// Record one error and return the new total.
    pub fn increment(&self) -> u64 {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Whether the admin should hear about error number `count`.
    /// `interval == 0` disables notices.
    #[must_use]
    pub fn should_notify(count: u64, interval: u64) -> bool {
        interval != 0 && count.is_multiple_of(interval)
    }
}
