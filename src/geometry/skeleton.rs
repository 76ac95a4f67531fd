//! 17-point skeleton (COCO keypoint order) and the body measurements
//! derived from it.

use super::Point;
use serde::{Deserialize, Serialize};

pub const KEYPOINT_COUNT: usize = 17;

pub const NOSE: usize = 0;
pub const LEFT_SHOULDER: usize = 5;
pub const RIGHT_SHOULDER: usize = 6;
pub const LEFT_HIP: usize = 11;
pub const RIGHT_HIP: usize = 12;
pub const LEFT_KNEE: usize = 13;
pub const RIGHT_KNEE: usize = 14;
pub const LEFT_ANKLE: usize = 15;
pub const RIGHT_ANKLE: usize = 16;

/// Keypoints in pixel coordinates. A (0, 0) entry means not observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Skeleton(pub [Point; KEYPOINT_COUNT]);

impl Default for Skeleton {
    fn default() -> Self {
        Self([Point::default(); KEYPOINT_COUNT])
    }
}

impl Skeleton {
    /// Build from an arbitrary-length list, padding or truncating to 17.
    pub fn from_points(points: &[Point]) -> Self {
        let mut skeleton = Self::default();
        for (slot, p) in skeleton.0.iter_mut().zip(points) {
            *slot = *p;
        }
        skeleton
    }

    /// Observed keypoint at `index`
    pub fn point(&self, index: usize) -> Option<Point> {
        self.0.get(index).copied().filter(Point::is_observed)
    }

    /// Mean of the observed keypoints of a left/right pair
    pub fn pair_midpoint(&self, left: usize, right: usize) -> Option<Point> {
        mean_observed([self.point(left), self.point(right)].into_iter().flatten())
    }

    pub fn shoulders(&self) -> Option<Point> {
        self.pair_midpoint(LEFT_SHOULDER, RIGHT_SHOULDER)
    }

    pub fn hips(&self) -> Option<Point> {
        self.pair_midpoint(LEFT_HIP, RIGHT_HIP)
    }

    pub fn knees(&self) -> Option<Point> {
        self.pair_midpoint(LEFT_KNEE, RIGHT_KNEE)
    }

    pub fn ankles(&self) -> Option<Point> {
        self.pair_midpoint(LEFT_ANKLE, RIGHT_ANKLE)
    }

    /// Angle in degrees between the shoulder->hip vector and vertical.
    /// NaN when either midpoint is unobservable.
    pub fn tilt_angle_deg(&self) -> f64 {
        match (self.shoulders(), self.hips()) {
            (Some(s), Some(h)) => {
                let vx = h.x - s.x;
                let vy = h.y - s.y;
                vx.atan2(vy + 1e-9).to_degrees().abs()
            }
            _ => f64::NAN,
        }
    }

    /// Head to ankle-midpoint distance over box height.
    /// NaN when the head or both ankles are missing.
    pub fn height_ratio(&self, box_height: f64) -> f64 {
        match (self.point(NOSE), self.ankles()) {
            (Some(head), Some(ankle)) => head.distance(&ankle) / box_height.max(1e-6),
            _ => f64::NAN,
        }
    }
}

fn mean_observed(points: impl Iterator<Item = Point>) -> Option<Point> {
    let (sum, n) = points.fold((Point::default(), 0usize), |(acc, n), p| {
        (Point::new(acc.x + p.x, acc.y + p.y), n + 1)
    });
    (n > 0).then(|| Point::new(sum.x / n as f64, sum.y / n as f64))
}
