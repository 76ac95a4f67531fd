//! Edge Vision Library
//!
//! Per-camera safety monitoring on the edge box: fall, night-time bed exit
//! and prolonged inactivity, with a composited live preview.
//!
//! ## Architecture
//!
//! 1. PolicyStore - Camera inventory, bed zones, inactivity policies, event log
//! 2. StreamWorker - Capture, pose tracking and detectors for one camera
//! 3. Detectors - FallTracker, BedExitDetector, InactivityDetector, posture
//! 4. EventReporter - Persistence and remote delivery of safety events
//! 5. FrameRegistry - Latest annotated frame per stream
//! 6. StreamCoordinator - Reconciles workers with the camera table
//! 7. MosaicComposer - Grid preview of all streams
//! 8. MediaSignalingServer - Viewer sessions for the preview
//! 9. WebAPI - Signaling and status endpoints
//!
//! ## Design Principles
//!
//! - Services are constructed explicitly and passed in; no global state
//! - External engines (capture, pose, transport) sit behind traits
//! - A single camera's failure never leaves its worker

pub mod capture;
pub mod detectors;
pub mod error;
pub mod event_reporter;
pub mod frame_registry;
pub mod geometry;
pub mod media_signaling;
pub mod mosaic;
pub mod policy_store;
pub mod pose;
pub mod state;
pub mod stream_coordinator;
pub mod stream_worker;
pub mod web_api;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
