//! Posture labels (stand / sit / sleep) from skeleton geometry

use crate::geometry::skeleton::{
    LEFT_ANKLE, LEFT_HIP, LEFT_KNEE, NOSE, RIGHT_ANKLE, RIGHT_HIP, RIGHT_KNEE,
};
use crate::geometry::{Point, Skeleton};
use serde::Serialize;
use std::fmt;

const STAND_TILT_MAX: f64 = 25.0;
const STAND_HEIGHT_RATIO_MIN: f64 = 0.7;
const STAND_ALIGNMENT_MAX: f64 = 0.12;

const SIT_LEG_VERTICAL_MAX: f64 = 0.25;
const SIT_THIGH_HORIZONTAL_MAX: f64 = 0.35;
const SIT_TORSO_VERTICAL_MAX: f64 = 0.6;
const SIT_KNEE_COS_MAX: f64 = 0.4;

const SLEEP_COLLINEARITY_MAX: f64 = 0.18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    Stand,
    Sit,
    Sleep,
    NotStand,
}

impl Posture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Posture::Stand => "stand",
            Posture::Sit => "sit",
            Posture::Sleep => "sleep",
            Posture::NotStand => "not_stand",
        }
    }
}

impl fmt::Display for Posture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify_posture(skeleton: &Skeleton, box_height: f64) -> Posture {
    if is_standing(skeleton, box_height) {
        return Posture::Stand;
    }
    if is_sitting(skeleton) {
        return Posture::Sit;
    }
    match collinearity(skeleton) {
        Some(score) if score < SLEEP_COLLINEARITY_MAX => Posture::Sleep,
        _ => Posture::NotStand,
    }
}

fn is_standing(skeleton: &Skeleton, box_height: f64) -> bool {
    let tilt = skeleton.tilt_angle_deg();
    let (Some(height_ratio), Some(alignment)) = (
        posture_height_ratio(skeleton, box_height),
        alignment_deviation(skeleton, box_height),
    ) else {
        return false;
    };
    tilt.is_finite()
        && tilt < STAND_TILT_MAX
        && height_ratio > STAND_HEIGHT_RATIO_MIN
        && alignment < STAND_ALIGNMENT_MAX
}

/// Head-to-feet extent over box height; falls back to the lowest
/// observed of ankles, knees and hips when no ankle is visible.
fn posture_height_ratio(skeleton: &Skeleton, box_height: f64) -> Option<f64> {
    if box_height <= 0.0 {
        return None;
    }
    let head = skeleton.point(NOSE)?;
    let bottom_y = match skeleton.ankles() {
        Some(ankle) => ankle.y,
        None => [LEFT_ANKLE, RIGHT_ANKLE, LEFT_KNEE, RIGHT_KNEE, LEFT_HIP, RIGHT_HIP]
            .into_iter()
            .filter_map(|i| skeleton.point(i))
            .map(|p| p.y)
            .reduce(f64::max)?,
    };
    Some((bottom_y - head.y).abs() / box_height.max(1e-6))
}

/// Horizontal spread of the body-pair midpoints, relative to box height
fn alignment_deviation(skeleton: &Skeleton, box_height: f64) -> Option<f64> {
    if box_height <= 0.0 {
        return None;
    }
    let xs: Vec<f64> = [
        skeleton.shoulders(),
        skeleton.hips(),
        skeleton.knees(),
        skeleton.ankles(),
    ]
    .into_iter()
    .flatten()
    .map(|p| p.x)
    .collect();
    if xs.len() < 3 {
        return None;
    }
    let mean = xs.iter().sum::<f64>() / xs.len() as f64;
    let mad = xs.iter().map(|x| (x - mean).abs()).sum::<f64>() / xs.len() as f64;
    Some(mad / box_height)
}

fn is_sitting(skeleton: &Skeleton) -> bool {
    let (Some(ankle), Some(knee), Some(hip), Some(shoulder)) = (
        skeleton.ankles(),
        skeleton.knees(),
        skeleton.hips(),
        skeleton.shoulders(),
    ) else {
        return false;
    };
    let leg = (ankle.x - knee.x, ankle.y - knee.y);
    let thigh = (hip.x - knee.x, hip.y - knee.y);
    let torso = (shoulder.x - hip.x, shoulder.y - hip.y);
    let (leg_len, thigh_len, torso_len) = (len(leg), len(thigh), len(torso));
    if leg_len <= 1e-6 || thigh_len <= 1e-6 || torso_len <= 1e-6 {
        return false;
    }

    let leg_vertical = leg.0.abs() / leg_len;
    let thigh_horizontal = thigh.1.abs() / thigh_len;
    let torso_vertical = torso.0.abs() / torso_len;
    let knee_cos = (leg.0 * thigh.0 + leg.1 * thigh.1) / (leg_len * thigh_len);

    leg_vertical < SIT_LEG_VERTICAL_MAX
        && thigh_horizontal < SIT_THIGH_HORIZONTAL_MAX
        && torso_vertical < SIT_TORSO_VERTICAL_MAX
        && knee_cos.abs() < SIT_KNEE_COS_MAX
}

/// Mean sine between consecutive shoulder-hip-knee-ankle segments
fn collinearity(skeleton: &Skeleton) -> Option<f64> {
    let s = skeleton.shoulders()?;
    let h = skeleton.hips()?;
    let k = skeleton.knees()?;
    let a = skeleton.ankles()?;
    let v1 = diff(&h, &s);
    let v2 = diff(&k, &h);
    let v3 = diff(&a, &k);
    Some((sine(v1, v2) + sine(v2, v3)) * 0.5)
}

fn diff(a: &Point, b: &Point) -> (f64, f64) {
    (a.x - b.x, a.y - b.y)
}

fn len(v: (f64, f64)) -> f64 {
    v.0.hypot(v.1)
}

fn sine(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 * b.1 - a.1 * b.0).abs() / (len(a) * len(b) + 1e-9)
}
