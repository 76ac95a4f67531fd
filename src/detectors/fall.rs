//! FallTracker - Per-subject fall heuristics
//!
//! A fall is a fast rotation of the torso away from vertical together
//! with a shrinking bounding box. Each subject keeps the previous box
//! height and the previous torso angle; the rates are taken against them.

use crate::geometry::Skeleton;
use std::collections::HashMap;
use std::fmt;

const TILT_MIN_DEG: f64 = 55.0;
const HEIGHT_RATIO_MIN: f64 = 1.1;
const SLOW_OMEGA_MIN: f64 = 80.0;
const SLOW_BOX_RATE_MAX: f64 = -0.5;
const FAST_OMEGA_MIN: f64 = 100.0;
const FAST_BOX_RATE_MAX: f64 = -0.2;
const SNAP_OMEGA_MIN: f64 = 170.0;

/// Per-frame fall metrics for one subject
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallMetrics {
    /// Torso angle from vertical, degrees
    pub tilt_deg: f64,
    /// Head to ankle distance over box height
    pub height_ratio: f64,
    /// |d tilt| / dt, degrees per second
    pub angular_velocity: f64,
    pub box_height_ratio: f64,
    /// (h / h_prev - 1) / dt, per second
    pub box_height_rate: f64,
}

impl FallMetrics {
    fn all_finite(&self) -> bool {
        [
            self.tilt_deg,
            self.height_ratio,
            self.angular_velocity,
            self.box_height_rate,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    /// Fall decision. Any non-finite input means no decision.
    pub fn is_fall(&self) -> bool {
        if !self.all_finite() {
            return false;
        }
        let slow = self.tilt_deg > TILT_MIN_DEG
            && self.height_ratio > HEIGHT_RATIO_MIN
            && self.angular_velocity > SLOW_OMEGA_MIN
            && self.box_height_rate < SLOW_BOX_RATE_MAX;
        let fast =
            self.angular_velocity > FAST_OMEGA_MIN && self.box_height_rate < FAST_BOX_RATE_MAX;
        slow || fast || self.angular_velocity > SNAP_OMEGA_MIN
    }
}

impl fmt::Display for FallMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tilt={:.1} hr={:.2} w={:.1} box_ratio={:.3} box_rate={:.3}",
            self.tilt_deg,
            self.height_ratio,
            self.angular_velocity,
            self.box_height_ratio,
            self.box_height_rate
        )
    }
}

/// Result of one evaluation
#[derive(Debug, Clone, Copy)]
pub struct FallAssessment {
    pub track_id: i64,
    pub metrics: FallMetrics,
    pub triggered: bool,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f64,
    timestamp_ms: i64,
}

/// Rolling fall state for every subject seen by one stream session
#[derive(Debug, Default)]
pub struct FallTracker {
    last_box: HashMap<i64, Sample>,
    last_tilt: HashMap<i64, Sample>,
}

impl FallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &mut self,
        track_id: i64,
        skeleton: &Skeleton,
        box_height: f64,
        timestamp_ms: i64,
    ) -> FallAssessment {
        let tilt_deg = skeleton.tilt_angle_deg();
        let angular_velocity = self.angular_velocity(track_id, tilt_deg, timestamp_ms);
        let (box_height_ratio, box_height_rate) =
            self.box_height_change(track_id, box_height, timestamp_ms);
        let height_ratio = skeleton.height_ratio(box_height);

        let metrics = FallMetrics {
            tilt_deg,
            height_ratio,
            angular_velocity,
            box_height_ratio,
            box_height_rate,
        };
        FallAssessment {
            track_id,
            metrics,
            triggered: metrics.is_fall(),
        }
    }

    fn angular_velocity(&mut self, track_id: i64, tilt: f64, timestamp_ms: i64) -> f64 {
        if tilt.is_nan() {
            self.last_tilt.remove(&track_id);
            return f64::NAN;
        }
        let prev = self.last_tilt.insert(
            track_id,
            Sample {
                value: tilt,
                timestamp_ms,
            },
        );
        match prev {
            Some(p) if !p.value.is_nan() => {
                let dt = (timestamp_ms - p.timestamp_ms) as f64 / 1000.0;
                if dt <= 0.0 {
                    0.0
                } else {
                    (tilt - p.value).abs() / dt
                }
            }
            _ => 0.0,
        }
    }

    fn box_height_change(&mut self, track_id: i64, height: f64, timestamp_ms: i64) -> (f64, f64) {
        let prev = self.last_box.insert(
            track_id,
            Sample {
                value: height,
                timestamp_ms,
            },
        );
        let Some(p) = prev else {
            return (1.0, 0.0);
        };
        let dt = (timestamp_ms - p.timestamp_ms) as f64 / 1000.0;
        if p.value <= 0.0 || dt <= 0.0 {
            return (1.0, 0.0);
        }
        let ratio = height / p.value.max(1e-6);
        (ratio, (ratio - 1.0) / dt)
    }

    /// Drop all state for a subject
    pub fn forget(&mut self, track_id: i64) {
        self.last_box.remove(&track_id);
        self.last_tilt.remove(&track_id);
    }

    pub fn tracked_subjects(&self) -> usize {
        self.last_box.len()
    }
}
