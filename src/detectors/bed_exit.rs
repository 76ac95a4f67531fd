//! BedExitDetector - Night-time bed absence per camera
//!
//! During the zone's active window, a subject whose box lies mostly
//! outside the bed polygon counts as having left the bed.

use super::policy_cache::PolicyCache;
use crate::geometry::{clip_polygon_to_rect, polygon_area, within_window, Rect};
use crate::policy_store::{BedRoiZone, PolicySource};
use chrono::NaiveTime;
use std::time::Duration;
use tokio::time::Instant;

/// Outside share of the box at which a bed exit is raised
pub const OUTSIDE_RATIO_THRESHOLD: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BedExitAssessment {
    pub inside_ratio: f64,
    pub outside_ratio: f64,
    pub triggered: bool,
}

pub struct BedExitDetector {
    ip_address: String,
    cache: PolicyCache<BedRoiZone>,
}

impl BedExitDetector {
    pub fn new(ip_address: impl Into<String>, refresh_interval: Duration) -> Self {
        Self {
            ip_address: ip_address.into(),
            cache: PolicyCache::new(refresh_interval),
        }
    }

    /// Point the detector at another camera address; drops the cached zone
    pub fn set_ip_address(&mut self, ip_address: &str) {
        if self.ip_address != ip_address {
            self.ip_address = ip_address.to_string();
            self.cache.invalidate();
        }
    }

    /// Reload the zone if the refresh interval has elapsed
    pub async fn refresh(&mut self, source: &dyn PolicySource, now: Instant) {
        if !self.cache.is_due(now) {
            return;
        }
        let loaded = source.fetch_bed_roi_zone(&self.ip_address).await;
        if self.cache.store(loaded, now) {
            match self.cache.get() {
                Some(zone) => tracing::info!(
                    ip_address = %self.ip_address,
                    points = zone.points.len(),
                    enabled = zone.enabled,
                    quiet_start = ?zone.quiet_start,
                    quiet_end = ?zone.quiet_end,
                    "Bed ROI zone updated"
                ),
                None => tracing::info!(ip_address = %self.ip_address, "Bed ROI zone cleared"),
            }
        }
    }

    pub fn zone(&self) -> Option<&BedRoiZone> {
        self.cache.get()
    }

    /// Evaluate one subject box (pixels) against the cached zone
    pub fn evaluate(
        &self,
        bbox: &Rect,
        frame_size: (u32, u32),
        now: NaiveTime,
    ) -> Option<BedExitAssessment> {
        evaluate_zone(self.cache.get()?, bbox, frame_size, now)
    }
}

/// Pure bed-exit evaluation. `None` means the detector is inert for
/// this input.
pub fn evaluate_zone(
    zone: &BedRoiZone,
    bbox: &Rect,
    frame_size: (u32, u32),
    now: NaiveTime,
) -> Option<BedExitAssessment> {
    if !zone.enabled || zone.points.len() < 3 {
        return None;
    }
    let (Some(start), Some(end)) = (zone.quiet_start, zone.quiet_end) else {
        return None;
    };
    if !within_window(now, start, end) {
        return None;
    }

    let (w, h) = (frame_size.0 as f64, frame_size.1 as f64);
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    let rect = Rect {
        x_min: (bbox.x_min / w).clamp(0.0, 1.0),
        y_min: (bbox.y_min / h).clamp(0.0, 1.0),
        x_max: (bbox.x_max / w).clamp(0.0, 1.0),
        y_max: (bbox.y_max / h).clamp(0.0, 1.0),
    };
    if rect.x_max <= rect.x_min || rect.y_max <= rect.y_min {
        return None;
    }
    let rect_area = rect.area();
    if rect_area <= 0.0 {
        return None;
    }

    let clipped = clip_polygon_to_rect(&zone.points, &rect);
    let inside_ratio = (polygon_area(&clipped) / rect_area).clamp(0.0, 1.0);
    let outside_ratio = 1.0 - inside_ratio;
    Some(BedExitAssessment {
        inside_ratio,
        outside_ratio,
        triggered: outside_ratio >= OUTSIDE_RATIO_THRESHOLD,
    })
}
