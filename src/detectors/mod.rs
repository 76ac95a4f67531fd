//! Detectors - Per-camera and per-subject safety heuristics
//!
//! ## Responsibilities
//!
//! - Fall detection from torso rotation and box collapse ([`FallTracker`])
//! - Night-time bed exit against a bed polygon ([`BedExitDetector`])
//! - Prolonged stillness with quiet hours ([`InactivityDetector`])
//! - Posture labels for the preview overlay ([`classify_posture`])
//!
//! ## Design Principles
//!
//! - Detectors are owned by a single stream worker and are never shared,
//!   so they hold plain maps with no locking
//! - Policies are refreshed lazily on the evaluation path
//! - Non-finite intermediate values mean "no decision", never an error

pub mod bed_exit;
pub mod fall;
pub mod inactivity;
pub mod policy_cache;
pub mod posture;

pub use bed_exit::{BedExitAssessment, BedExitDetector};
pub use fall::{FallAssessment, FallMetrics, FallTracker};
pub use inactivity::{InactivityAssessment, InactivityDetector};
pub use policy_cache::PolicyCache;
pub use posture::{classify_posture, Posture};
