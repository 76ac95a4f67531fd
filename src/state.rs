//! Application state
//!
//! Environment-driven configuration and the shared service handles

use crate::event_reporter::{EventReporter, ReporterSettings};
use crate::frame_registry::FrameRegistry;
use crate::media_signaling::{MediaSignalingServer, SignalingSettings};
use crate::mosaic::{MosaicComposer, MosaicSettings};
use crate::pose::PoseEngineSettings;
use crate::stream_coordinator::StreamCoordinator;
use crate::stream_worker::WorkerSettings;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// `EnvFilter` directives used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "edge_vision=debug,tower_http=debug,webrtc=warn";

/// Upper bound for any duration setting (one week)
const MAX_SETTING_SECS: f64 = 7.0 * 24.0 * 3600.0;
/// Accepted frame-rate range for `MAX_FPS` and `MOSAIC_FPS`
const FPS_RANGE: std::ops::RangeInclusive<f64> = 0.1..=60.0;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// Pool acquire timeout
    pub db_connect_timeout: Duration,
    /// Edge device id sent with every remote event
    pub edge_id: String,
    /// Camera list reconciliation cadence
    pub poll_interval: Duration,
    pub ffmpeg_path: String,
    pub worker: WorkerSettings,
    pub pose: PoseEngineSettings,
    pub mosaic: MosaicSettings,
    pub signaling: SignalingSettings,
    /// Signaling listener host
    pub host: String,
    /// Signaling listener port
    pub port: u16,
    pub reporter: ReporterSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl AppConfig {
    /// Build from a variable lookup; missing or unparsable values fall back
    /// to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let worker_defaults = WorkerSettings::default();
        let mosaic_defaults = MosaicSettings::default();

        let database_url = env.string("DATABASE_URL").unwrap_or_else(|| {
            format!(
                "postgres://{}:{}@{}:{}/{}",
                env.string("PGUSER").unwrap_or_else(|| "redsafedb".to_string()),
                env.string("PGPASSWORD").unwrap_or_else(|| "redsafedb".to_string()),
                env.string("PGHOST").unwrap_or_else(|| "localhost".to_string()),
                env.parse("PGPORT").unwrap_or(5432u16),
                env.string("PGDATABASE").unwrap_or_else(|| "redsafedb".to_string()),
            )
        });

        let ffmpeg_path = env.string("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string());
        let edge_id = env.string("EDGE_ID").unwrap_or_else(|| "RED-AAAAAAAA".to_string());
        let reporter = ReporterSettings {
            edge_id: edge_id.clone(),
            location: env.string("FALL_EVENT_LOCATION"),
            remote_enabled: env.flag("FALL_EVENT_ENABLED", true),
            timeout: env.secs("FALL_EVENT_TIMEOUT", 5.0),
            cooldown: env.secs("FALL_EVENT_COOLDOWN", 30.0),
            attach_snapshot: env.flag("FALL_EVENT_SNAPSHOT", true),
            fall_endpoint: match lookup("FALL_EVENT_ENDPOINT") {
                Some(v) => Some(v.trim().to_string()).filter(|v| !v.is_empty()),
                None => Some("https://api.redsafe-tw.com/edge/event/fall".to_string()),
            },
            bed_exit_endpoint: env.string("BED_EXIT_EVENT_ENDPOINT"),
            inactivity_endpoint: env.string("INACTIVITY_EVENT_ENDPOINT"),
        };

        Self {
            database_url,
            db_connect_timeout: env.secs("PGCONNECT_TIMEOUT", 5.0),
            edge_id,
            poll_interval: env.secs("IPC_POLL_INTERVAL", 1.0),
            ffmpeg_path: ffmpeg_path.clone(),
            worker: WorkerSettings {
                connect_timeout: env.secs("STREAM_CONNECT_TIMEOUT", 5.0),
                reconnect_delay: env.secs("STREAM_RECONNECT_DELAY", 5.0),
                max_fps: env.fps("MAX_FPS").unwrap_or(worker_defaults.max_fps),
                bed_roi_refresh: env.secs("BED_ROI_REFRESH_SECS", 1.0),
                inactivity_refresh: env.secs("INACTIVITY_REFRESH_SECS", 3.0),
                overlay_hold: env.secs("OVERLAY_HOLD_SECS", 5.0),
                subject_stale_after: env.secs("SUBJECT_STALE_SECS", 10.0),
            },
            pose: PoseEngineSettings {
                base_url: env
                    .string("POSE_ENGINE_URL")
                    .unwrap_or_else(|| "http://127.0.0.1:9000".to_string()),
                confidence: env.parse("MODEL_CONF").unwrap_or(0.5),
                image_size: env.parse("MODEL_IMGSZ").unwrap_or(640),
                timeout: env.secs("POSE_ENGINE_TIMEOUT", 10.0),
            },
            mosaic: MosaicSettings {
                width: env.parse("MOSAIC_WIDTH").unwrap_or(mosaic_defaults.width),
                height: env.parse("MOSAIC_HEIGHT").unwrap_or(mosaic_defaults.height),
                fps: env.fps("MOSAIC_FPS").unwrap_or(mosaic_defaults.fps),
                max_tiles: env.parse("MOSAIC_MAX_TILES").unwrap_or(mosaic_defaults.max_tiles),
            },
            signaling: SignalingSettings {
                session_ttl: env.secs("WEBRTC_SESSION_TTL", 3600.0),
                frame_wait: env.secs("WEBRTC_FRAME_WAIT", 2.0),
                stun_url: env.string("WEBRTC_STUN_URL"),
                ffmpeg_path,
            },
            host: env.string("WEBRTC_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.parse("WEBRTC_PORT").unwrap_or(8765),
            reporter,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed, non-empty value
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        self.string(key).and_then(|v| v.parse().ok())
    }

    /// Positive, finite and at most a week; anything else keeps the default
    fn secs(&self, key: &str, default: f64) -> Duration {
        let secs = self
            .parse::<f64>(key)
            .filter(|v| v.is_finite() && *v > 0.0 && *v <= MAX_SETTING_SECS)
            .unwrap_or(default);
        Duration::from_secs_f64(secs)
    }

    fn fps(&self, key: &str) -> Option<f64> {
        self.parse::<f64>(key).filter(|v| FPS_RANGE.contains(v))
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.string(key) {
            Some(v) => !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"),
            None => default,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Latest annotated frame per stream
    pub registry: Arc<FrameRegistry>,
    /// Preview mosaic
    pub mosaic: Arc<MosaicComposer>,
    /// Worker set mirroring the camera table
    pub coordinator: Arc<StreamCoordinator>,
    /// Viewer sessions
    pub signaling: Arc<MediaSignalingServer>,
    pub reporter: Arc<EventReporter>,
}
