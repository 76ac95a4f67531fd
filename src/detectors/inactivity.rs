//! InactivityDetector - Prolonged stillness per camera and subject

use super::policy_cache::PolicyCache;
use crate::geometry::{within_quiet_window, Point, Rect};
use crate::policy_store::{InactivityPolicy, PolicySource};
use chrono::NaiveTime;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Box-center movement (pixels) that counts as activity
pub const MOVEMENT_THRESHOLD_PX: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InactivityAssessment {
    pub idle_seconds: f64,
    pub threshold_seconds: f64,
    /// Evaluated inside the policy's quiet window
    pub quiet: bool,
    pub triggered: bool,
}

#[derive(Debug, Clone, Copy)]
struct Activity {
    center: Point,
    last_active_ms: i64,
}

pub struct InactivityDetector {
    ip_address: String,
    cache: PolicyCache<InactivityPolicy>,
    subjects: HashMap<i64, Activity>,
}

impl InactivityDetector {
    pub fn new(ip_address: impl Into<String>, refresh_interval: Duration) -> Self {
        Self {
            ip_address: ip_address.into(),
            cache: PolicyCache::new(refresh_interval),
            subjects: HashMap::new(),
        }
    }

    /// Point the detector at another camera address; clears all state
    pub fn set_ip_address(&mut self, ip_address: &str) {
        if self.ip_address != ip_address {
            self.ip_address = ip_address.to_string();
            self.cache.invalidate();
            self.subjects.clear();
        }
    }

    /// Reload the policy if the refresh interval has elapsed
    pub async fn refresh(&mut self, source: &dyn PolicySource, now: Instant) {
        if !self.cache.is_due(now) {
            return;
        }
        let loaded = source.fetch_inactivity_policy(&self.ip_address).await;
        if self.cache.store(loaded, now) {
            tracing::info!(
                ip_address = %self.ip_address,
                policy = ?self.cache.get(),
                "Inactivity policy updated"
            );
        }
    }

    pub fn policy(&self) -> Option<&InactivityPolicy> {
        self.cache.get()
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.get().is_some_and(|p| p.enabled)
    }

    /// Track one subject box. `None` while the subject is active or the
    /// policy is absent.
    pub fn evaluate(
        &mut self,
        track_id: i64,
        bbox: &Rect,
        timestamp_ms: i64,
        now: NaiveTime,
    ) -> Option<InactivityAssessment> {
        let Some(policy) = self.cache.get().filter(|p| p.enabled) else {
            self.subjects.remove(&track_id);
            return None;
        };

        let center = bbox.center();
        let moved = match self.subjects.get(&track_id) {
            Some(prev) => prev.center.distance(&center) > MOVEMENT_THRESHOLD_PX,
            None => true,
        };
        if moved {
            self.subjects.insert(
                track_id,
                Activity {
                    center,
                    last_active_ms: timestamp_ms,
                },
            );
            return None;
        }

        let last_active_ms = self.subjects.get(&track_id)?.last_active_ms;
        let idle_seconds = (timestamp_ms - last_active_ms) as f64 / 1000.0;
        let threshold_seconds = f64::from(policy.idle_minutes.max(0)) * 60.0;
        let quiet = is_quiet(policy, now);
        let triggered = !quiet && threshold_seconds > 0.0 && idle_seconds >= threshold_seconds;

        Some(InactivityAssessment {
            idle_seconds,
            threshold_seconds,
            quiet,
            triggered,
        })
    }

    /// Drop all state for a subject
    pub fn forget(&mut self, track_id: i64) {
        self.subjects.remove(&track_id);
    }

    pub fn tracked_subjects(&self) -> usize {
        self.subjects.len()
    }

    #[cfg(test)]
    fn set_policy(&mut self, policy: Option<InactivityPolicy>) {
        self.cache.store(Ok(policy), Instant::now());
    }
}

fn is_quiet(policy: &InactivityPolicy, now: NaiveTime) -> bool {
    if !policy.quiet_enabled {
        return false;
    }
    match (policy.quiet_start, policy.quiet_end) {
        (Some(start), Some(end)) => within_quiet_window(now, start, end),
        _ => false,
    }
}
