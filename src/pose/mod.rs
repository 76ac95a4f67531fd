//! Pose - Data contract with the pose-estimation engine
//!
//! ## Responsibilities
//!
//! - Define the per-subject observation handed to the detectors
//!   (track id, box, 17-point skeleton)
//! - Abstract the engine behind [`PoseEngine`] / [`PoseSession`]
//!
//! Engine output is adapted to [`TrackedPose`] in exactly one place per
//! engine (see [`client`] for the HTTP engine).

pub mod client;

pub use client::{HttpPoseEngine, PoseEngineSettings};

use crate::error::Result;
use crate::geometry::{Rect, Skeleton};
use async_trait::async_trait;
use image::RgbImage;
use std::sync::Arc;

/// One tracked person in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPose {
    /// Stable across consecutive frames of one session
    pub track_id: i64,
    /// Pixel box
    pub bbox: Rect,
    pub skeleton: Skeleton,
}

/// Engine result for one frame together with the raw image
#[derive(Debug, Clone)]
pub struct PoseFrame {
    pub image: Arc<RgbImage>,
    pub poses: Vec<TrackedPose>,
    /// Capture time, unix milliseconds
    pub timestamp_ms: i64,
}

/// Pose-estimation engine
#[async_trait]
pub trait PoseEngine: Send + Sync {
    /// Open a tracking session for one camera, identified by its address.
    /// Track ids are scoped to the session.
    async fn open_session(&self, camera: &str) -> Result<Box<dyn PoseSession>>;
}

/// Persistent tracking session bound to one stream
#[async_trait]
pub trait PoseSession: Send {
    async fn track(&mut self, frame: Arc<RgbImage>) -> Result<Vec<TrackedPose>>;

    /// Release engine-side resources. Idempotent.
    async fn close(&mut self);
}
