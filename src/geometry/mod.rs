//! GeometryEngine - Stateless polygon, angle and ratio math
//!
//! ## Responsibilities
//!
//! - Polygon canonicalization (angular sort around the centroid)
//! - Shoelace area and Sutherland-Hodgman clipping against a rectangle
//! - Wall-clock window checks with midnight wraparound
//! - Skeleton measurements used by the detectors (see [`skeleton`])

pub mod skeleton;

pub use skeleton::{Skeleton, KEYPOINT_COUNT};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Coordinates closer to zero than this are treated as "not observed"
const UNOBSERVED_EPS: f64 = 1e-8;

/// 2D point (pixels or normalized units depending on context)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Pose engines report missing keypoints as (0, 0)
    pub fn is_observed(&self) -> bool {
        !(self.x.abs() < UNOBSERVED_EPS && self.y.abs() < UNOBSERVED_EPS)
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Axis-aligned rectangle given by its bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Rect {
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }
}

// ========================================
// Polygons
// ========================================

/// Sort points by angle around their centroid so that arbitrary input
/// order yields the same simple polygon.
pub fn sort_polygon_points(mut points: Vec<Point>) -> Vec<Point> {
    if points.len() < 3 {
        return points;
    }
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    points.sort_by(|a, b| {
        let ta = (a.y - cy).atan2(a.x - cx);
        let tb = (b.y - cy).atan2(b.x - cx);
        ta.total_cmp(&tb)
    });
    points
}

/// Shoelace area. Zero for fewer than 3 points.
pub fn polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: f64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum();
    twice.abs() / 2.0
}

#[derive(Clone, Copy)]
enum Edge {
    Left(f64),
    Right(f64),
    Top(f64),
    Bottom(f64),
}

impl Edge {
    fn inside(&self, p: &Point) -> bool {
        match *self {
            Edge::Left(x) => p.x >= x,
            Edge::Right(x) => p.x <= x,
            Edge::Top(y) => p.y >= y,
            Edge::Bottom(y) => p.y <= y,
        }
    }

    fn intersect(&self, a: &Point, b: &Point) -> Point {
        match *self {
            Edge::Left(x) | Edge::Right(x) => {
                let dx = b.x - a.x;
                if dx.abs() < f64::EPSILON {
                    return Point::new(x, a.y);
                }
                let t = (x - a.x) / dx;
                Point::new(x, a.y + t * (b.y - a.y))
            }
            Edge::Top(y) | Edge::Bottom(y) => {
                let dy = b.y - a.y;
                if dy.abs() < f64::EPSILON {
                    return Point::new(a.x, y);
                }
                let t = (y - a.y) / dy;
                Point::new(a.x + t * (b.x - a.x), y)
            }
        }
    }
}

/// Sutherland-Hodgman clip of `polygon` against the four half-planes of `rect`.
pub fn clip_polygon_to_rect(polygon: &[Point], rect: &Rect) -> Vec<Point> {
    let edges = [
        Edge::Left(rect.x_min),
        Edge::Right(rect.x_max),
        Edge::Top(rect.y_min),
        Edge::Bottom(rect.y_max),
    ];

    let mut output: Vec<Point> = polygon.to_vec();
    for edge in edges {
        if output.is_empty() {
            break;
        }
        let input = std::mem::take(&mut output);
        let mut prev = input[input.len() - 1];
        for current in input {
            let cur_in = edge.inside(&current);
            let prev_in = edge.inside(&prev);
            if cur_in {
                if !prev_in {
                    output.push(edge.intersect(&prev, &current));
                }
                output.push(current);
            } else if prev_in {
                output.push(edge.intersect(&prev, &current));
            }
            prev = current;
        }
    }
    output
}

// ========================================
// Time windows
// ========================================

/// Inclusive window check; `start > end` spans midnight.
pub fn within_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}

/// Quiet-window check: `start == end` means all day, otherwise
/// `[start, end)` with wraparound past midnight.
pub fn within_quiet_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start == end {
        return true;
    }
    if start < end {
        start <= now && now < end
    } else {
        now >= start || now < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn square(min: f64, max: f64) -> Vec<Point> {
        vec![
            Point::new(min, min),
            Point::new(max, min),
            Point::new(max, max),
            Point::new(min, max),
        ]
    }

    #[test]
    fn test_polygon_area_square_and_degenerate() {
        assert!((polygon_area(&square(0.0, 2.0)) - 4.0).abs() < 1e-9);
        assert_eq!(polygon_area(&[Point::new(0.0, 0.0), Point::new(1.0, 1.0)]), 0.0);
        assert_eq!(polygon_area(&[]), 0.0);
    }

    #[test]
    fn test_area_is_orientation_independent() {
        let mut reversed = square(0.0, 3.0);
        reversed.reverse();
        assert!((polygon_area(&reversed) - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_sort_canonicalizes_shuffled_points() {
        // Bow-tie order would give zero area without sorting
        let shuffled = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
        ];
        assert!(polygon_area(&shuffled) < 1.0);
        let sorted = sort_polygon_points(shuffled);
        assert!((polygon_area(&sorted) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_clip_never_exceeds_original_area() {
        let triangle = sort_polygon_points(vec![
            Point::new(0.1, 0.1),
            Point::new(0.9, 0.2),
            Point::new(0.4, 0.95),
        ]);
        let original = polygon_area(&triangle);
        let rects = [
            Rect { x_min: 0.0, y_min: 0.0, x_max: 1.0, y_max: 1.0 },
            Rect { x_min: 0.3, y_min: 0.3, x_max: 0.6, y_max: 0.6 },
            Rect { x_min: 0.5, y_min: 0.0, x_max: 1.0, y_max: 0.5 },
            Rect { x_min: 0.95, y_min: 0.95, x_max: 1.0, y_max: 1.0 },
        ];
        for rect in rects {
            let clipped = polygon_area(&clip_polygon_to_rect(&triangle, &rect));
            assert!(clipped >= 0.0);
            assert!(clipped <= original + 1e-9);
            assert!(clipped <= rect.area() + 1e-9);
        }
    }

    #[test]
    fn test_clip_partial_overlap() {
        let poly = square(0.0, 1.0);
        let rect = Rect { x_min: 0.5, y_min: 0.5, x_max: 1.5, y_max: 1.5 };
        let clipped = clip_polygon_to_rect(&poly, &rect);
        assert!((polygon_area(&clipped) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_clip_disjoint_is_empty() {
        let poly = square(0.0, 0.2);
        let rect = Rect { x_min: 0.5, y_min: 0.5, x_max: 0.9, y_max: 0.9 };
        assert_eq!(polygon_area(&clip_polygon_to_rect(&poly, &rect)), 0.0);
    }

    #[test]
    fn test_window_wraps_midnight() {
        let (start, end) = (t(22, 0), t(6, 0));
        assert!(within_window(t(23, 0), start, end));
        assert!(within_window(t(5, 0), start, end));
        assert!(!within_window(t(12, 0), start, end));

        assert!(within_quiet_window(t(23, 0), start, end));
        assert!(within_quiet_window(t(5, 0), start, end));
        assert!(!within_quiet_window(t(12, 0), start, end));
    }

    #[test]
    fn test_window_same_day() {
        assert!(within_window(t(9, 0), t(8, 0), t(17, 0)));
        assert!(within_window(t(17, 0), t(8, 0), t(17, 0)));
        assert!(!within_quiet_window(t(17, 0), t(8, 0), t(17, 0)));
        assert!(!within_window(t(20, 0), t(8, 0), t(17, 0)));
    }

    #[test]
    fn test_quiet_window_equal_bounds_is_all_day() {
        assert!(within_quiet_window(t(3, 0), t(8, 0), t(8, 0)));
        assert!(within_quiet_window(t(15, 30), t(8, 0), t(8, 0)));
    }
}
