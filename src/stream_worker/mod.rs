//! StreamWorker - One camera's capture and detection lifecycle
//!
//! ## Responsibilities
//!
//! - Open the camera stream until it yields a frame, retrying with a
//!   fixed reconnect delay
//! - Run the per-frame loop: pose tracking, detectors, event reporting,
//!   annotation, publication to FrameRegistry
//! - Release the capture handle, the pose session and the registry entry
//!   whenever a session ends, including when the task is cancelled
//!
//! ## State machine
//!
//! ```text
//! Idle -> Probing -> Streaming -> Retrying -> Probing -> ... -> Stopped
//! ```

mod annotate;
mod pipeline;

pub use annotate::{annotate, SubjectOverlay};
pub use pipeline::{FrameOutcome, FrameOverlay, FramePipeline};

use crate::capture::{redact_credentials, CaptureSource, FrameStream};
use crate::error::{Error, Result};
use crate::event_reporter::EventReporter;
use crate::frame_registry::{FramePayload, FrameRegistry};
use crate::policy_store::{CameraConfig, PolicySource};
use crate::pose::{PoseEngine, PoseFrame, PoseSession};
use chrono::{Local, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Probing,
    Streaming,
    Retrying,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Probing => "probing",
            WorkerState::Streaming => "streaming",
            WorkerState::Retrying => "retrying",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Worker timing settings
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Connect window and per-read stall limit
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_fps: f64,
    pub bed_roi_refresh: Duration,
    pub inactivity_refresh: Duration,
    pub overlay_hold: Duration,
    pub subject_stale_after: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            max_fps: 3.0,
            bed_roi_refresh: Duration::from_secs(1),
            inactivity_refresh: Duration::from_secs(3),
            overlay_hold: Duration::from_secs(5),
            subject_stale_after: Duration::from_secs(10),
        }
    }
}

impl WorkerSettings {
    fn frame_interval(&self) -> Duration {
        if self.max_fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.max_fps)
        } else {
            Duration::ZERO
        }
    }
}

/// Shared services handed to every worker
#[derive(Clone)]
pub struct WorkerContext {
    pub settings: WorkerSettings,
    pub capture: Arc<dyn CaptureSource>,
    pub pose: Arc<dyn PoseEngine>,
    pub policies: Arc<dyn PolicySource>,
    pub reporter: Arc<EventReporter>,
    pub registry: Arc<FrameRegistry>,
}

/// Handle to one camera's worker task
pub struct StreamWorker {
    /// Owner tag for this worker's registry entries
    id: u64,
    ctx: WorkerContext,
    camera_tx: watch::Sender<CameraConfig>,
    state_tx: Arc<watch::Sender<WorkerState>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StreamWorker {
    pub fn new(camera: CameraConfig, ctx: WorkerContext) -> Self {
        let (camera_tx, _) = watch::channel(camera);
        let (state_tx, _) = watch::channel(WorkerState::Idle);
        Self {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
            ctx,
            camera_tx,
            state_tx: Arc::new(state_tx),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn camera(&self) -> CameraConfig {
        self.camera_tx.borrow().clone()
    }

    /// Current stream identity (frame registry id)
    pub fn stream_id(&self) -> String {
        self.camera_tx.borrow().stream_url()
    }

    pub fn state(&self) -> WorkerState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    /// Spawn the worker task. No-op if already started or stopped.
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.is_some() || self.cancel.is_cancelled() {
            return;
        }
        let ctx = self.ctx.clone();
        let camera_rx = self.camera_tx.subscribe();
        let state_tx = self.state_tx.clone();
        let cancel = self.cancel.clone();
        *handle = Some(tokio::spawn(run_worker(self.id, ctx, camera_rx, state_tx, cancel)));
    }

    /// Swap the camera configuration.
    ///
    /// Metadata changes apply to the running frame loop. A new stream
    /// identity drops the old registry entry and reconnects.
    pub fn update_stream(&self, camera: CameraConfig) {
        let old_id = self.stream_id();
        let new_id = camera.stream_url();
        if old_id != new_id {
            self.ctx.registry.remove(&old_id, self.id);
            tracing::info!(
                old = %redact_credentials(&old_id),
                new = %redact_credentials(&new_id),
                "Stream identity changed"
            );
        }
        self.camera_tx.send_replace(camera);
    }

    /// Cancel the task and wait for it; aborts after a bounded wait.
    /// Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!(
                    stream = %redact_credentials(&self.stream_id()),
                    "Worker did not stop in time, aborting"
                );
                handle.abort();
                let _ = handle.await;
            }
        }
        self.ctx.registry.remove(&self.stream_id(), self.id);
        self.state_tx.send_replace(WorkerState::Stopped);
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ========================================
// Worker task
// ========================================

enum SessionEnd {
    Exhausted,
    Reconfigured,
    Failed(Error),
}

async fn run_worker(
    worker_id: u64,
    ctx: WorkerContext,
    mut camera_rx: watch::Receiver<CameraConfig>,
    state_tx: Arc<watch::Sender<WorkerState>>,
    cancel: CancellationToken,
) {
    let mut attempts: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let camera = camera_rx.borrow_and_update().clone();
        let stream_id = camera.stream_url();
        let redacted = redact_credentials(&stream_id);
        state_tx.send_replace(WorkerState::Probing);
        attempts += 1;

        let end = tokio::select! {
            _ = cancel.cancelled() => break,
            end = run_session(worker_id, &ctx, camera, &mut camera_rx, &state_tx) => end,
        };

        match end {
            SessionEnd::Reconfigured => {
                tracing::info!(stream = %redacted, "Reconnecting with new stream configuration");
                continue;
            }
            SessionEnd::Exhausted => {
                tracing::warn!(stream = %redacted, attempts, "Stream ended, reconnecting");
            }
            SessionEnd::Failed(e) => {
                tracing::warn!(stream = %redacted, attempts, error = %e, "Stream failed, reconnecting");
            }
        }

        state_tx.send_replace(WorkerState::Retrying);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(ctx.settings.reconnect_delay) => {}
        }
    }

    let stream_id = camera_rx.borrow().stream_url();
    ctx.registry.remove(&stream_id, worker_id);
    state_tx.send_replace(WorkerState::Stopped);
    tracing::info!(stream = %redact_credentials(&stream_id), "Stream worker stopped");
}

/// Capture handle, pose session and registry entry of one streaming
/// session. Dropping it releases all three.
struct ActiveSession {
    stream: Box<dyn FrameStream>,
    pose: Box<dyn PoseSession>,
    registry: Arc<FrameRegistry>,
    stream_id: String,
    owner: u64,
}

impl ActiveSession {
    async fn close(mut self) {
        self.pose.close().await;
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.registry.remove(&self.stream_id, self.owner);
    }
}

/// Decoded frame stamped with its arrival time
struct CapturedFrame {
    image: image::RgbImage,
    captured_at_ms: i64,
}

impl CapturedFrame {
    fn now(image: image::RgbImage) -> Self {
        Self {
            image,
            captured_at_ms: Utc::now().timestamp_millis(),
        }
    }
}

async fn connect_stream(ctx: &WorkerContext, stream_id: &str) -> Result<(Box<dyn FrameStream>, CapturedFrame)> {
    let timeout = ctx.settings.connect_timeout;
    let mut stream = tokio::time::timeout(timeout, ctx.capture.open(stream_id))
        .await
        .map_err(|_| Error::Capture("open timed out".to_string()))??;

    match tokio::time::timeout(timeout, stream.next_frame()).await {
        Ok(Ok(Some(frame))) => Ok((stream, CapturedFrame::now(frame))),
        Ok(Ok(None)) => Err(Error::Capture("stream ended before first frame".to_string())),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::Capture(format!("no frame within {:?}", timeout))),
    }
}

async fn run_session(
    worker_id: u64,
    ctx: &WorkerContext,
    mut camera: CameraConfig,
    camera_rx: &mut watch::Receiver<CameraConfig>,
    state_tx: &watch::Sender<WorkerState>,
) -> SessionEnd {
    let stream_id = camera.stream_url();
    let redacted = redact_credentials(&stream_id);

    let (stream, first_frame) = match connect_stream(ctx, &stream_id).await {
        Ok(ok) => ok,
        Err(e) => return SessionEnd::Failed(e),
    };
    let pose = match ctx.pose.open_session(&camera.ip_address).await {
        Ok(p) => p,
        Err(e) => return SessionEnd::Failed(e),
    };

    let mut session = ActiveSession {
        stream,
        pose,
        registry: ctx.registry.clone(),
        stream_id: stream_id.clone(),
        owner: worker_id,
    };
    state_tx.send_replace(WorkerState::Streaming);
    tracing::info!(stream = %redacted, label = %camera.display_label(), "Streaming");

    let mut pipeline = FramePipeline::new(&camera, &ctx.settings);
    let frame_interval = ctx.settings.frame_interval();
    let mut pending = Some(first_frame);

    loop {
        let started = Instant::now();

        let captured = match pending.take() {
            Some(frame) => frame,
            None => {
                match tokio::time::timeout(ctx.settings.connect_timeout, session.stream.next_frame()).await {
                    Ok(Ok(Some(frame))) => CapturedFrame::now(frame),
                    Ok(Ok(None)) => {
                        session.close().await;
                        return SessionEnd::Exhausted;
                    }
                    Ok(Err(e)) => {
                        session.close().await;
                        return SessionEnd::Failed(e);
                    }
                    Err(_) => {
                        session.close().await;
                        return SessionEnd::Failed(Error::Capture("read stalled".to_string()));
                    }
                }
            }
        };

        if camera_rx.has_changed().unwrap_or(false) {
            let updated = camera_rx.borrow_and_update().clone();
            if updated.stream_url() != stream_id {
                session.close().await;
                return SessionEnd::Reconfigured;
            }
            pipeline.set_camera(&updated);
            camera = updated;
        }

        let image = Arc::new(captured.image);
        let poses = match session.pose.track(image.clone()).await {
            Ok(p) => p,
            Err(e) => {
                session.close().await;
                return SessionEnd::Failed(e);
            }
        };

        pipeline
            .refresh_policies(ctx.policies.as_ref(), Instant::now())
            .await;

        let frame = PoseFrame {
            image,
            poses,
            timestamp_ms: captured.captured_at_ms,
        };
        let outcome = pipeline.process(&camera, &frame, Instant::now(), Local::now().time());
        for event in outcome.events {
            ctx.reporter.report(event);
        }

        let overlay = outcome.overlay;
        let source = frame.image;
        let annotated = match tokio::task::spawn_blocking(move || overlay.render(&source)).await {
            Ok(annotated) => annotated,
            Err(e) => {
                session.close().await;
                return SessionEnd::Failed(e.into());
            }
        };
        ctx.registry.publish(FramePayload {
            stream_id: stream_id.clone(),
            label: camera.display_label(),
            image: Arc::new(annotated),
            captured_at_ms: frame.timestamp_ms,
            owner: worker_id,
        });

        let elapsed = started.elapsed();
        if elapsed < frame_interval {
            tokio::time::sleep(frame_interval - elapsed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_reporter::ReporterSettings;
    use crate::policy_store::{BedRoiZone, EdgeEventRecord, EventSink, InactivityPolicy};
    use crate::pose::TrackedPose;
    use async_trait::async_trait;
    use image::RgbImage;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct NoPolicies;

    #[async_trait]
    impl PolicySource for NoPolicies {
        async fn fetch_cameras(&self) -> Result<Vec<CameraConfig>> {
            Ok(Vec::new())
        }

        async fn fetch_bed_roi_zone(&self, _ip: &str) -> Result<Option<BedRoiZone>> {
            Ok(None)
        }

        async fn fetch_inactivity_policy(&self, _ip: &str) -> Result<Option<InactivityPolicy>> {
            Ok(None)
        }
    }

    struct NullSink;

    #[async_trait]
    impl EventSink for NullSink {
        async fn log_edge_event(&self, _record: &EdgeEventRecord) -> Result<()> {
            Ok(())
        }
    }

    /// Endless synthetic stream, or a dead one
    struct FakeCapture {
        reachable: bool,
        opened: Arc<AtomicUsize>,
        live_streams: Arc<AtomicUsize>,
    }

    struct FakeStream {
        live: Arc<AtomicUsize>,
    }

    impl Drop for FakeStream {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl FrameStream for FakeStream {
        async fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(Some(RgbImage::new(64, 48)))
        }
    }

    #[async_trait]
    impl CaptureSource for FakeCapture {
        async fn open(&self, _url: &str) -> Result<Box<dyn FrameStream>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if !self.reachable {
                return Err(Error::Capture("connection refused".to_string()));
            }
            self.live_streams.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeStream { live: self.live_streams.clone() }))
        }
    }

    struct FakePose {
        closed: Arc<AtomicBool>,
        cameras: Arc<Mutex<Vec<String>>>,
    }

    struct FakePoseSession {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PoseEngine for FakePose {
        async fn open_session(&self, camera: &str) -> Result<Box<dyn PoseSession>> {
            self.cameras.lock().unwrap().push(camera.to_string());
            Ok(Box::new(FakePoseSession { closed: self.closed.clone() }))
        }
    }

    #[async_trait]
    impl PoseSession for FakePoseSession {
        async fn track(&mut self, _frame: Arc<RgbImage>) -> Result<Vec<TrackedPose>> {
            Ok(Vec::new())
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct Harness {
        ctx: WorkerContext,
        opened: Arc<AtomicUsize>,
        live_streams: Arc<AtomicUsize>,
        pose_cameras: Arc<Mutex<Vec<String>>>,
    }

    fn harness(reachable: bool) -> Harness {
        let opened = Arc::new(AtomicUsize::new(0));
        let live_streams = Arc::new(AtomicUsize::new(0));
        let pose_cameras = Arc::new(Mutex::new(Vec::new()));
        let reporter = EventReporter::new(
            ReporterSettings {
                edge_id: "RED-TEST".to_string(),
                location: None,
                remote_enabled: false,
                timeout: Duration::from_secs(1),
                cooldown: Duration::from_secs(30),
                attach_snapshot: false,
                fall_endpoint: None,
                bed_exit_endpoint: None,
                inactivity_endpoint: None,
            },
            Arc::new(NullSink),
        )
        .unwrap();
        let ctx = WorkerContext {
            settings: WorkerSettings {
                connect_timeout: Duration::from_millis(200),
                reconnect_delay: Duration::from_millis(50),
                max_fps: 20.0,
                ..WorkerSettings::default()
            },
            capture: Arc::new(FakeCapture {
                reachable,
                opened: opened.clone(),
                live_streams: live_streams.clone(),
            }),
            pose: Arc::new(FakePose {
                closed: Arc::new(AtomicBool::new(false)),
                cameras: pose_cameras.clone(),
            }),
            policies: Arc::new(NoPolicies),
            reporter: Arc::new(reporter),
            registry: Arc::new(FrameRegistry::new()),
        };
        Harness {
            ctx,
            opened,
            live_streams,
            pose_cameras,
        }
    }

    fn camera(ip: &str) -> CameraConfig {
        CameraConfig {
            ip_address: ip.to_string(),
            mac_address: None,
            ipc_name: Some("Hall".to_string()),
            custom_name: None,
            ipc_account: "admin".to_string(),
            ipc_password: "pw".to_string(),
            fall_detection_enabled: true,
        }
    }

    async fn wait_for_state(worker: &StreamWorker, want: WorkerState) {
        let mut rx = worker.subscribe_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("state not reached")
            .unwrap();
    }

    #[tokio::test]
    async fn test_streams_publishes_and_stops_cleanly() {
        let h = harness(true);
        let worker = StreamWorker::new(camera("10.0.0.1"), h.ctx.clone());
        assert_eq!(worker.state(), WorkerState::Idle);

        worker.start();
        wait_for_state(&worker, WorkerState::Streaming).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.ctx.registry.contains(&worker.stream_id()));
        let published = h.ctx.registry.snapshot().remove(0);
        let age_ms = Utc::now().timestamp_millis() - published.captured_at_ms;
        assert!((0..5_000).contains(&age_ms));

        // Pose sessions are keyed by camera, never by the credentialed url
        assert_eq!(*h.pose_cameras.lock().unwrap(), vec!["10.0.0.1".to_string()]);

        worker.stop().await;
        worker.stop().await;
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(h.ctx.registry.is_empty());
        assert_eq!(h.live_streams.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_camera_retries() {
        let h = harness(false);
        let worker = StreamWorker::new(camera("10.0.0.2"), h.ctx.clone());
        worker.start();
        wait_for_state(&worker, WorkerState::Retrying).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(h.opened.load(Ordering::SeqCst) >= 2);
        assert!(h.ctx.registry.is_empty());
        worker.stop().await;
    }

    #[tokio::test]
    async fn test_identity_change_drops_old_entry() {
        let h = harness(true);
        let worker = StreamWorker::new(camera("10.0.0.3"), h.ctx.clone());
        worker.start();
        wait_for_state(&worker, WorkerState::Streaming).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let old_id = worker.stream_id();

        worker.update_stream(camera("10.0.0.4"));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!h.ctx.registry.contains(&old_id));
        assert!(h.ctx.registry.contains(&worker.stream_id()));
        worker.stop().await;
        assert_eq!(h.live_streams.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_metadata_change_keeps_session() {
        let h = harness(true);
        let worker = StreamWorker::new(camera("10.0.0.5"), h.ctx.clone());
        worker.start();
        wait_for_state(&worker, WorkerState::Streaming).await;

        let mut renamed = camera("10.0.0.5");
        renamed.custom_name = Some("Lobby".to_string());
        worker.update_stream(renamed);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(h.opened.load(Ordering::SeqCst), 1);
        let snapshot = h.ctx.registry.snapshot();
        assert_eq!(snapshot[0].label, "Lobby");
        worker.stop().await;
    }
}
