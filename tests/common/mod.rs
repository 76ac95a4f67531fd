//! Shared fakes for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{extract::State, routing::post, Json, Router};
use edge_vision::capture::{CaptureSource, FrameStream};
use edge_vision::error::Result;
use edge_vision::event_reporter::{EventReporter, ReporterSettings};
use edge_vision::frame_registry::FrameRegistry;
use edge_vision::geometry::skeleton::*;
use edge_vision::geometry::{Point, Rect, Skeleton};
use edge_vision::policy_store::{
    BedRoiZone, CameraConfig, EdgeEventRecord, EventSink, InactivityPolicy, PolicySource,
};
use edge_vision::pose::{PoseEngine, PoseSession, TrackedPose};
use edge_vision::stream_worker::{WorkerContext, WorkerSettings};
use image::RgbImage;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FRAME_SIZE: (u32, u32) = (1000, 1000);

pub fn camera(ip: &str) -> CameraConfig {
    CameraConfig {
        ip_address: ip.to_string(),
        mac_address: None,
        ipc_name: Some(format!("ipc-{}", ip)),
        custom_name: Some("Room 101".to_string()),
        ipc_account: "admin".to_string(),
        ipc_password: "secret".to_string(),
        fall_detection_enabled: true,
    }
}

/// Upright subject, 200px tall, head at (x, top)
pub fn standing(track_id: i64, x: f64, top: f64) -> TrackedPose {
    let mut s = Skeleton::default();
    s.0[NOSE] = Point::new(x, top);
    s.0[LEFT_SHOULDER] = Point::new(x - 20.0, top + 40.0);
    s.0[RIGHT_SHOULDER] = Point::new(x + 20.0, top + 40.0);
    s.0[LEFT_HIP] = Point::new(x - 15.0, top + 100.0);
    s.0[RIGHT_HIP] = Point::new(x + 15.0, top + 100.0);
    s.0[LEFT_KNEE] = Point::new(x - 15.0, top + 150.0);
    s.0[RIGHT_KNEE] = Point::new(x + 15.0, top + 150.0);
    s.0[LEFT_ANKLE] = Point::new(x - 15.0, top + 200.0);
    s.0[RIGHT_ANKLE] = Point::new(x + 15.0, top + 200.0);
    TrackedPose {
        track_id,
        bbox: Rect { x_min: x - 40.0, y_min: top, x_max: x + 40.0, y_max: top + 200.0 },
        skeleton: s,
    }
}

/// All-day quiet window (inclusive bounds)
pub fn all_day_zone(ip: &str, points: Vec<Point>) -> BedRoiZone {
    BedRoiZone::new(
        ip,
        points,
        true,
        chrono::NaiveTime::from_hms_opt(0, 0, 0),
        chrono::NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999),
    )
}

// ========================================
// Policy source / sink
// ========================================

#[derive(Default)]
pub struct StaticPolicies {
    pub cameras: Mutex<Vec<CameraConfig>>,
    pub zone: Mutex<Option<BedRoiZone>>,
    pub inactivity: Mutex<Option<InactivityPolicy>>,
}

#[async_trait]
impl PolicySource for StaticPolicies {
    async fn fetch_cameras(&self) -> Result<Vec<CameraConfig>> {
        Ok(self.cameras.lock().unwrap().clone())
    }

    async fn fetch_bed_roi_zone(&self, _ip: &str) -> Result<Option<BedRoiZone>> {
        Ok(self.zone.lock().unwrap().clone())
    }

    async fn fetch_inactivity_policy(&self, _ip: &str) -> Result<Option<InactivityPolicy>> {
        Ok(self.inactivity.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub records: Mutex<Vec<EdgeEventRecord>>,
}

impl MemorySink {
    pub fn event_types(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.event_type.clone())
            .collect()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn log_edge_event(&self, record: &EdgeEventRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ========================================
// Capture / pose
// ========================================

/// Endless blank frames
pub struct BlankCapture;

struct BlankStream;

#[async_trait]
impl FrameStream for BlankStream {
    async fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Some(RgbImage::new(FRAME_SIZE.0, FRAME_SIZE.1)))
    }
}

#[async_trait]
impl CaptureSource for BlankCapture {
    async fn open(&self, _url: &str) -> Result<Box<dyn FrameStream>> {
        Ok(Box::new(BlankStream))
    }
}

/// Returns the same subjects on every frame
pub struct FixedPoseEngine {
    pub poses: Vec<TrackedPose>,
}

struct FixedPoseSession {
    poses: Vec<TrackedPose>,
}

#[async_trait]
impl PoseEngine for FixedPoseEngine {
    async fn open_session(&self, _camera: &str) -> Result<Box<dyn PoseSession>> {
        Ok(Box::new(FixedPoseSession { poses: self.poses.clone() }))
    }
}

#[async_trait]
impl PoseSession for FixedPoseSession {
    async fn track(&mut self, _frame: Arc<RgbImage>) -> Result<Vec<TrackedPose>> {
        Ok(self.poses.clone())
    }

    async fn close(&mut self) {}
}

// ========================================
// Remote event endpoint
// ========================================

/// Local HTTP endpoint that records every JSON body POSTed to it
pub struct EventEndpoint {
    pub url: String,
    pub bodies: Arc<Mutex<Vec<Value>>>,
}

impl EventEndpoint {
    pub async fn start() -> Self {
        let bodies: Arc<Mutex<Vec<Value>>> = Arc::default();
        let app = Router::new()
            .route("/event", post(record_event))
            .with_state(bodies.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            url: format!("http://{}/event", addr),
            bodies,
        }
    }

    pub fn count(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }
}

async fn record_event(State(bodies): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>) -> &'static str {
    bodies.lock().unwrap().push(body);
    "ok"
}

// ========================================
// Wiring
// ========================================

pub fn reporter_settings() -> ReporterSettings {
    ReporterSettings {
        edge_id: "RED-TEST0001".to_string(),
        location: None,
        remote_enabled: true,
        timeout: Duration::from_secs(2),
        cooldown: Duration::from_secs(30),
        attach_snapshot: true,
        fall_endpoint: None,
        bed_exit_endpoint: None,
        inactivity_endpoint: None,
    }
}

pub fn worker_context(
    policies: Arc<StaticPolicies>,
    pose: FixedPoseEngine,
    reporter: Arc<EventReporter>,
    registry: Arc<FrameRegistry>,
) -> WorkerContext {
    WorkerContext {
        settings: WorkerSettings {
            connect_timeout: Duration::from_millis(500),
            reconnect_delay: Duration::from_millis(100),
            max_fps: 20.0,
            ..WorkerSettings::default()
        },
        capture: Arc::new(BlankCapture),
        pose: Arc::new(pose),
        policies,
        reporter,
        registry,
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
