//! Lazily refreshed per-camera policy value

use crate::error::Result;
use std::time::Duration;
use tokio::time::Instant;

/// Cached policy with a minimum interval between reloads.
///
/// There is no timer: the owner asks [`PolicyCache::is_due`] on its own
/// evaluation path and feeds the load result back through
/// [`PolicyCache::store`].
#[derive(Debug)]
pub struct PolicyCache<T> {
    refresh_interval: Duration,
    next_refresh: Option<Instant>,
    value: Option<T>,
}

impl<T: PartialEq> PolicyCache<T> {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            refresh_interval,
            next_refresh: None,
            value: None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_refresh.map_or(true, |at| now >= at)
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Apply a load result. A failed load keeps the previous value.
    /// Returns true when the cached value changed.
    pub fn store(&mut self, loaded: Result<Option<T>>, now: Instant) -> bool {
        self.next_refresh = Some(now + self.refresh_interval);
        match loaded {
            Ok(value) => {
                let changed = value != self.value;
                self.value = value;
                changed
            }
            Err(e) => {
                tracing::debug!(error = %e, "Policy refresh failed, keeping cached value");
                false
            }
        }
    }

    /// Drop the cached value and force a reload on next use
    pub fn invalidate(&mut self) {
        self.value = None;
        self.next_refresh = None;
    }
}
