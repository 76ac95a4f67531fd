//! MosaicComposer - Composited multi-camera preview
//!
//! ## Responsibilities
//!
//! - Read FrameRegistry on a fixed cadence and compose one preview frame
//! - Publish it as the latest output with a monotonically increasing version
//! - Let viewers wait for the next version ([`MosaicComposer::wait_for_frame`])
//!
//! ## Layout
//!
//! - No sources: blank "waiting" canvas
//! - One source: resized to the full canvas
//! - Several: fixed grid of `max_tiles` cells in stream-id order; extra
//!   sources are dropped, empty cells get a placeholder tile

use crate::error::Result;
use crate::frame_registry::{FramePayload, FrameRegistry};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect as PixelRect;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const PLACEHOLDER_FILL: Rgb<u8> = Rgb([24, 24, 24]);
const PLACEHOLDER_MARK: Rgb<u8> = Rgb([90, 90, 90]);
const STOP_TIMEOUT: Duration = Duration::from_secs(2);
const MIN_FPS: f64 = 0.1;
const MAX_FPS: f64 = 60.0;

/// Mosaic settings
#[derive(Debug, Clone)]
pub struct MosaicSettings {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub max_tiles: usize,
}

impl Default for MosaicSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 5.0,
            max_tiles: 4,
        }
    }
}

impl MosaicSettings {
    /// Composition tick, always positive
    pub fn period(&self) -> Duration {
        let fps = if self.fps.is_finite() {
            self.fps.clamp(MIN_FPS, MAX_FPS)
        } else {
            MIN_FPS
        };
        Duration::from_secs_f64(1.0 / fps)
    }

    /// (columns, rows) of the grid
    fn grid(&self) -> (u32, u32) {
        let tiles = self.max_tiles.max(1) as f64;
        let cols = tiles.sqrt().ceil() as u32;
        let rows = (tiles / cols as f64).ceil() as u32;
        (cols.max(1), rows.max(1))
    }
}

/// One composed preview frame
#[derive(Debug, Clone)]
pub struct MosaicFrame {
    pub version: u64,
    pub image: Arc<RgbImage>,
    pub sources: usize,
}

/// Periodic preview compositor
pub struct MosaicComposer {
    registry: Arc<FrameRegistry>,
    settings: MosaicSettings,
    tx: watch::Sender<MosaicFrame>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MosaicComposer {
    pub fn new(registry: Arc<FrameRegistry>, settings: MosaicSettings) -> Self {
        let initial = MosaicFrame {
            version: 0,
            image: Arc::new(compose_mosaic(&[], &settings)),
            sources: 0,
        };
        let (tx, _) = watch::channel(initial);
        Self {
            registry,
            settings,
            tx,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &MosaicSettings {
        &self.settings
    }

    /// Start the composition loop. No-op if already running or stopped.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.is_some() || self.cancel.is_cancelled() {
            return;
        }

        let composer = Arc::clone(self);
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(composer.settings.period());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                width = composer.settings.width,
                height = composer.settings.height,
                fps = composer.settings.fps,
                "Mosaic composer started"
            );

            loop {
                tokio::select! {
                    _ = composer.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = composer.compose_once().await {
                            tracing::warn!(error = %e, "Mosaic composition failed");
                        }
                    }
                }
            }

            tracing::info!("Mosaic composer stopped");
        }));
    }

    /// Compose from the current registry snapshot and publish
    pub async fn compose_once(&self) -> Result<u64> {
        let frames = self.registry.snapshot();
        let sources = frames.len();
        let settings = self.settings.clone();
        let image = tokio::task::spawn_blocking(move || compose_mosaic(&frames, &settings)).await?;
        Ok(self.publish(image, sources))
    }

    fn publish(&self, image: RgbImage, sources: usize) -> u64 {
        let image = Arc::new(image);
        let mut version = 0;
        self.tx.send_modify(|frame| {
            frame.version += 1;
            frame.image = image;
            frame.sources = sources;
            version = frame.version;
        });
        version
    }

    pub fn latest(&self) -> MosaicFrame {
        self.tx.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.tx.borrow().version
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until a frame newer than `after` is published, the timeout
    /// elapses, or the composer stops. Always returns the latest frame.
    pub async fn wait_for_frame(&self, after: Option<u64>, timeout: Duration) -> MosaicFrame {
        let Some(after) = after else {
            return self.latest();
        };
        let mut rx = self.tx.subscribe();
        let wait = async {
            loop {
                if rx.borrow_and_update().version > after {
                    return;
                }
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = self.cancel.cancelled() => return,
                }
            }
        };
        let _ = tokio::time::timeout(timeout, wait).await;
        self.latest()
    }

    /// Stop the loop and wake all waiters. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!("Mosaic composer did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

// ========================================
// Composition
// ========================================

/// Compose one preview frame from frames already ordered by stream id
pub fn compose_mosaic(frames: &[FramePayload], settings: &MosaicSettings) -> RgbImage {
    let (width, height) = (settings.width.max(1), settings.height.max(1));

    match frames {
        [] => blank_canvas(width, height),
        [single] => imageops::resize(single.image.as_ref(), width, height, FilterType::Triangle),
        _ => {
            let (cols, rows) = settings.grid();
            let tile_w = (width / cols).max(1);
            let tile_h = (height / rows).max(1);
            let mut canvas = RgbImage::from_pixel(tile_w * cols, tile_h * rows, BACKGROUND);
            let capacity = settings.max_tiles.max(1).min((cols * rows) as usize);

            for cell in 0..(cols * rows) as usize {
                let x = (cell as u32 % cols) * tile_w;
                let y = (cell as u32 / cols) * tile_h;
                let tile = match frames.get(cell).filter(|_| cell < capacity) {
                    Some(frame) => {
                        imageops::resize(frame.image.as_ref(), tile_w, tile_h, FilterType::Triangle)
                    }
                    None => placeholder_tile(tile_w, tile_h),
                };
                imageops::replace(&mut canvas, &tile, i64::from(x), i64::from(y));
            }
            canvas
        }
    }
}

fn placeholder_tile(width: u32, height: u32) -> RgbImage {
    let mut tile = RgbImage::from_pixel(width, height, PLACEHOLDER_FILL);
    if width > 4 && height > 4 {
        draw_hollow_rect_mut(
            &mut tile,
            PixelRect::at(1, 1).of_size(width - 2, height - 2),
            PLACEHOLDER_MARK,
        );
        // "no signal" bar
        let bar_w = (width / 3).max(1);
        let bar_h = (height / 20).max(1);
        draw_filled_rect_mut(
            &mut tile,
            PixelRect::at(((width - bar_w) / 2) as i32, ((height - bar_h) / 2) as i32)
                .of_size(bar_w, bar_h),
            PLACEHOLDER_MARK,
        );
    }
    tile
}

fn blank_canvas(width: u32, height: u32) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(width, height, BACKGROUND);
    let bar_w = (width / 4).max(1);
    let bar_h = (height / 40).max(1);
    if width > bar_w && height > bar_h {
        draw_filled_rect_mut(
            &mut canvas,
            PixelRect::at(((width - bar_w) / 2) as i32, ((height - bar_h) / 2) as i32)
                .of_size(bar_w, bar_h),
            PLACEHOLDER_MARK,
        );
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MosaicSettings {
        MosaicSettings {
            width: 64,
            height: 32,
            fps: 50.0,
            max_tiles: 4,
        }
    }

    fn payload(id: &str, value: u8) -> FramePayload {
        FramePayload {
            stream_id: id.to_string(),
            label: id.to_string(),
            image: Arc::new(RgbImage::from_pixel(10, 10, Rgb([value, value, value]))),
            captured_at_ms: 0,
            owner: 0,
        }
    }

    #[test]
    fn test_period_is_always_positive() {
        for fps in [0.0, -5.0, f64::INFINITY, f64::NAN, 1e30] {
            let period = MosaicSettings { fps, ..settings() }.period();
            assert!(period > Duration::ZERO, "fps {} gave a zero period", fps);
        }
        assert_eq!(settings().period(), Duration::from_millis(20));
    }

    #[test]
    fn test_grid_shape() {
        assert_eq!(settings().grid(), (2, 2));
        let mut s = settings();
        s.max_tiles = 6;
        assert_eq!(s.grid(), (3, 2));
        s.max_tiles = 1;
        assert_eq!(s.grid(), (1, 1));
    }

    #[test]
    fn test_single_source_fills_canvas() {
        let image = compose_mosaic(&[payload("a", 200)], &settings());
        assert_eq!(image.dimensions(), (64, 32));
        assert_eq!(image.get_pixel(0, 0), &Rgb([200, 200, 200]));
        assert_eq!(image.get_pixel(63, 31), &Rgb([200, 200, 200]));
    }

    #[test]
    fn test_grid_places_frames_in_order_with_placeholders() {
        let frames = [payload("a", 100), payload("b", 200)];
        let image = compose_mosaic(&frames, &settings());
        assert_eq!(image.dimensions(), (64, 32));
        // Cells: a top-left, b top-right, placeholders below
        assert_eq!(image.get_pixel(10, 8), &Rgb([100, 100, 100]));
        assert_eq!(image.get_pixel(42, 8), &Rgb([200, 200, 200]));
        assert_eq!(image.get_pixel(5, 20), &PLACEHOLDER_FILL);
    }

    #[test]
    fn test_extra_sources_are_dropped() {
        let frames: Vec<_> = (0..6u8).map(|i| payload(&format!("cam-{}", i), 10 + i)).collect();
        let image = compose_mosaic(&frames, &settings());
        // Bottom-right cell holds the fourth frame, not the sixth
        assert_eq!(image.get_pixel(42, 20), &Rgb([13, 13, 13]));
    }

    #[test]
    fn test_empty_registry_renders_blank_canvas() {
        let image = compose_mosaic(&[], &settings());
        assert_eq!(image.dimensions(), (64, 32));
        assert_eq!(image.get_pixel(0, 0), &BACKGROUND);
    }

    #[tokio::test]
    async fn test_versions_increase_and_waiters_wake() {
        let registry = Arc::new(FrameRegistry::new());
        let composer = Arc::new(MosaicComposer::new(registry.clone(), settings()));
        assert_eq!(composer.version(), 0);

        let waiter = {
            let composer = composer.clone();
            tokio::spawn(async move { composer.wait_for_frame(Some(0), Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;

        registry.publish(payload("a", 0));
        let v1 = composer.compose_once().await.unwrap();
        assert_eq!(v1, 1);

        let frame = waiter.await.unwrap();
        assert_eq!(frame.version, 1);
        assert_eq!(frame.sources, 1);

        let v2 = composer.compose_once().await.unwrap();
        assert!(v2 > v1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_with_latest_frame() {
        let composer = MosaicComposer::new(Arc::new(FrameRegistry::new()), settings());
        let frame = composer.wait_for_frame(Some(0), Duration::from_millis(100)).await;
        assert_eq!(frame.version, 0);

        let frame = composer.wait_for_frame(None, Duration::from_millis(100)).await;
        assert_eq!(frame.version, 0);
    }

    #[tokio::test]
    async fn test_stop_wakes_waiters_and_is_idempotent() {
        let composer = Arc::new(MosaicComposer::new(Arc::new(FrameRegistry::new()), settings()));
        composer.start();

        let waiter = {
            let composer = composer.clone();
            tokio::spawn(async move { composer.wait_for_frame(Some(u64::MAX), Duration::from_secs(60)).await })
        };
        composer.stop().await;
        composer.stop().await;

        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(result.is_ok());
    }
}
