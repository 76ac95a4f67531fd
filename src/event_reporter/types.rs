//! EventReporter types

use crate::capture::redact_credentials;
use crate::detectors::{BedExitAssessment, FallMetrics, InactivityAssessment};
use crate::policy_store::{CameraConfig, EdgeEventRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use image::RgbImage;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Safety event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Fall,
    BedExit,
    Inactivity,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Fall => "fall",
            EventKind::BedExit => "bed_exit",
            EventKind::Inactivity => "inactivity",
        }
    }

    /// `edge_events.event_type` label shown by the console
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::Fall => "跌倒",
            EventKind::BedExit => "夜間離床",
            EventKind::Inactivity => "長時間靜止",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A triggered detection, built by the stream worker and consumed once
#[derive(Debug, Clone)]
pub struct SafetyEvent {
    pub kind: EventKind,
    pub camera: CameraConfig,
    pub track_id: Option<i64>,
    /// Magnitude fields (ratios, seconds, rates)
    pub details: Map<String, Value>,
    pub occurred_at: DateTime<Utc>,
    /// Raw frame that triggered the event
    pub snapshot: Option<Arc<RgbImage>>,
}

impl SafetyEvent {
    pub fn fall(
        camera: &CameraConfig,
        track_id: i64,
        metrics: &FallMetrics,
        snapshot: Option<Arc<RgbImage>>,
    ) -> Self {
        let details = json!({
            "tilt_deg": metrics.tilt_deg,
            "height_ratio": metrics.height_ratio,
            "angular_velocity": metrics.angular_velocity,
            "box_height_rate": metrics.box_height_rate,
        });
        Self::build(EventKind::Fall, camera, track_id, details, snapshot)
    }

    pub fn bed_exit(camera: &CameraConfig, track_id: i64, assessment: &BedExitAssessment) -> Self {
        let details = json!({
            "outside_ratio": assessment.outside_ratio,
            "inside_ratio": assessment.inside_ratio,
        });
        Self::build(EventKind::BedExit, camera, track_id, details, None)
    }

    pub fn inactivity(
        camera: &CameraConfig,
        track_id: i64,
        assessment: &InactivityAssessment,
    ) -> Self {
        let details = json!({ "idle_seconds": assessment.idle_seconds });
        Self::build(EventKind::Inactivity, camera, track_id, details, None)
    }

    fn build(
        kind: EventKind,
        camera: &CameraConfig,
        track_id: i64,
        details: Value,
        snapshot: Option<Arc<RgbImage>>,
    ) -> Self {
        Self {
            kind,
            camera: camera.clone(),
            track_id: Some(track_id),
            details: match details {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            occurred_at: Utc::now(),
            snapshot,
        }
    }

    /// ISO-8601 UTC with milliseconds
    pub fn event_time(&self) -> String {
        self.occurred_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Row appended to `edge_events`
    pub fn to_record(&self) -> EdgeEventRecord {
        let mut payload = Map::new();
        payload.insert("ip_address".into(), json!(self.camera.ip_address));
        payload.insert(
            "stream_url".into(),
            json!(redact_credentials(&self.camera.stream_url())),
        );
        payload.insert("pid".into(), json!(self.track_id));
        payload.insert("event_time".into(), json!(self.event_time()));
        for (k, v) in &self.details {
            payload.insert(k.clone(), v.clone());
        }
        EdgeEventRecord {
            event_type: self.kind.event_type().to_string(),
            payload: Value::Object(payload),
            occurred_at: self.occurred_at,
        }
    }
}

/// JSON body posted to the remote event endpoint
#[derive(Debug, Clone, Serialize)]
pub struct RemoteEventPayload {
    pub edge_id: String,
    pub ip_address: String,
    pub ipc_name: String,
    pub location: String,
    pub event_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_mime_type: Option<String>,
}

/// Reporter settings
#[derive(Debug, Clone)]
pub struct ReporterSettings {
    pub edge_id: String,
    /// Overrides the camera display name as `location`
    pub location: Option<String>,
    /// Master switch for remote delivery
    pub remote_enabled: bool,
    pub timeout: Duration,
    pub cooldown: Duration,
    pub attach_snapshot: bool,
    pub fall_endpoint: Option<String>,
    pub bed_exit_endpoint: Option<String>,
    pub inactivity_endpoint: Option<String>,
}

impl ReporterSettings {
    pub fn endpoint_for(&self, kind: EventKind) -> Option<&str> {
        if !self.remote_enabled {
            return None;
        }
        let endpoint = match kind {
            EventKind::Fall => &self.fall_endpoint,
            EventKind::BedExit => &self.bed_exit_endpoint,
            EventKind::Inactivity => &self.inactivity_endpoint,
        };
        endpoint.as_deref().filter(|s| !s.is_empty())
    }
}

/// What `report` did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Persisted and handed to a background delivery task
    Dispatched,
    /// Persisted; remote delivery skipped by cooldown
    Suppressed,
    /// Persisted; no remote endpoint for this kind
    PersistedOnly,
}
