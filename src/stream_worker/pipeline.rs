//! Per-frame detection pipeline for one stream session
//!
//! Owns the detector trio and the overlay timers. Created fresh for every
//! streaming session, so subject state never survives a reconnect.

use super::annotate::{annotate, banner_text, SubjectOverlay};
use super::WorkerSettings;
use crate::detectors::{classify_posture, BedExitDetector, FallTracker, InactivityDetector, Posture};
use crate::event_reporter::{EventKind, SafetyEvent};
use crate::policy_store::{CameraConfig, PolicySource};
use crate::pose::PoseFrame;
use chrono::NaiveTime;
use image::RgbImage;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Result of processing one frame
pub struct FrameOutcome {
    pub events: Vec<SafetyEvent>,
    pub overlay: FrameOverlay,
}

/// Boxes, posture labels and alert banners to draw on one frame
#[derive(Debug, Clone, Default)]
pub struct FrameOverlay {
    pub subjects: Vec<SubjectOverlay>,
    pub alerts: Vec<EventKind>,
}

impl FrameOverlay {
    /// Annotated copy of `source`. CPU bound; callers on the runtime run it
    /// through `spawn_blocking`.
    pub fn render(&self, source: &RgbImage) -> RgbImage {
        let mut annotated = source.clone();
        annotate(&mut annotated, &self.subjects, &self.alerts);
        annotated
    }
}

pub struct FramePipeline {
    fall: FallTracker,
    bed_exit: BedExitDetector,
    inactivity: InactivityDetector,
    overlay_until: HashMap<EventKind, Instant>,
    last_seen: HashMap<i64, Instant>,
    overlay_hold: Duration,
    subject_stale_after: Duration,
}

impl FramePipeline {
    pub fn new(camera: &CameraConfig, settings: &WorkerSettings) -> Self {
        Self {
            fall: FallTracker::new(),
            bed_exit: BedExitDetector::new(&camera.ip_address, settings.bed_roi_refresh),
            inactivity: InactivityDetector::new(&camera.ip_address, settings.inactivity_refresh),
            overlay_until: HashMap::new(),
            last_seen: HashMap::new(),
            overlay_hold: settings.overlay_hold,
            subject_stale_after: settings.subject_stale_after,
        }
    }

    /// Metadata update for the same stream
    pub fn set_camera(&mut self, camera: &CameraConfig) {
        self.bed_exit.set_ip_address(&camera.ip_address);
        self.inactivity.set_ip_address(&camera.ip_address);
    }

    pub async fn refresh_policies(&mut self, source: &dyn PolicySource, now: Instant) {
        self.bed_exit.refresh(source, now).await;
        self.inactivity.refresh(source, now).await;
    }

    /// Run every detector over the frame's subjects and collect triggered
    /// events together with the overlay for the frame.
    pub fn process(
        &mut self,
        camera: &CameraConfig,
        frame: &PoseFrame,
        now: Instant,
        wall_clock: NaiveTime,
    ) -> FrameOutcome {
        self.expire_stale_subjects(now);

        let frame_size = frame.image.dimensions();
        let label_postures = self.inactivity.is_enabled();
        let mut events = Vec::new();
        let mut subjects = Vec::with_capacity(frame.poses.len());

        for pose in &frame.poses {
            let pid = pose.track_id;
            self.last_seen.insert(pid, now);
            let box_height = pose.bbox.height();

            let posture: Option<Posture> =
                label_postures.then(|| classify_posture(&pose.skeleton, box_height));
            subjects.push(SubjectOverlay {
                bbox: pose.bbox,
                posture,
            });

            if let Some(result) = self.bed_exit.evaluate(&pose.bbox, frame_size, wall_clock) {
                tracing::debug!(
                    ip_address = %camera.ip_address,
                    pid,
                    outside_ratio = result.outside_ratio,
                    inside_ratio = result.inside_ratio,
                    "Bed exit check"
                );
                if result.triggered {
                    events.push(SafetyEvent::bed_exit(camera, pid, &result));
                    self.raise_overlay(EventKind::BedExit, now);
                }
            }

            if let Some(result) =
                self.inactivity
                    .evaluate(pid, &pose.bbox, frame.timestamp_ms, wall_clock)
            {
                tracing::trace!(
                    ip_address = %camera.ip_address,
                    pid,
                    idle_seconds = result.idle_seconds,
                    threshold_seconds = result.threshold_seconds,
                    quiet = result.quiet,
                    "Inactivity check"
                );
                if result.triggered {
                    events.push(SafetyEvent::inactivity(camera, pid, &result));
                    self.raise_overlay(EventKind::Inactivity, now);
                }
            }

            if camera.fall_detection_enabled {
                let result = self
                    .fall
                    .evaluate(pid, &pose.skeleton, box_height, frame.timestamp_ms);
                tracing::trace!(ip_address = %camera.ip_address, pid, metrics = %result.metrics, "Fall check");
                if result.triggered {
                    tracing::info!(
                        ip_address = %camera.ip_address,
                        pid,
                        metrics = %result.metrics,
                        "Fall detected"
                    );
                    events.push(SafetyEvent::fall(
                        camera,
                        pid,
                        &result.metrics,
                        Some(frame.image.clone()),
                    ));
                    self.raise_overlay(EventKind::Fall, now);
                }
            }
        }

        let alerts = self.active_overlays(now);
        FrameOutcome {
            events,
            overlay: FrameOverlay { subjects, alerts },
        }
    }

    fn raise_overlay(&mut self, kind: EventKind, now: Instant) {
        if !self.overlay_until.get(&kind).is_some_and(|until| now < *until) {
            tracing::debug!(overlay = banner_text(kind), "Overlay raised");
        }
        self.overlay_until.insert(kind, now + self.overlay_hold);
    }

    /// Active alert banners in display order
    pub fn active_overlays(&self, now: Instant) -> Vec<EventKind> {
        [EventKind::Fall, EventKind::BedExit, EventKind::Inactivity]
            .into_iter()
            .filter(|kind| self.overlay_until.get(kind).is_some_and(|until| now < *until))
            .collect()
    }

    /// Forget subjects whose track id has not been seen recently, so a
    /// reused id starts from clean state.
    fn expire_stale_subjects(&mut self, now: Instant) {
        let stale_after = self.subject_stale_after;
        let stale: Vec<i64> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) > stale_after)
            .map(|(pid, _)| *pid)
            .collect();
        for pid in stale {
            self.last_seen.remove(&pid);
            self.fall.forget(pid);
            self.inactivity.forget(pid);
            tracing::debug!(pid, "Subject state expired");
        }
    }

    pub fn tracked_subjects(&self) -> usize {
        self.last_seen.len()
    }
}
