//! Signaling wire types

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque session description exchanged with the viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Answer returned for an accepted offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HangupRequest {
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct HangupResponse {
    pub closed: bool,
}

#[derive(Debug, Clone)]
pub struct SignalingSettings {
    /// Hard lifetime of a session regardless of activity
    pub session_ttl: Duration,
    /// Bounded wait for the next mosaic frame in the sender loop
    pub frame_wait: Duration,
    /// Optional STUN server, e.g. `stun:stun.l.google.com:19302`
    pub stun_url: Option<String>,
    /// Encoder for the H.264 mosaic track
    pub ffmpeg_path: String,
}

impl Default for SignalingSettings {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(3600),
            frame_wait: Duration::from_secs(2),
            stun_url: None,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

/// Lets a transport report that its session closed on its own.
///
/// Clones share one flag, so a close reported while the offer is still
/// being negotiated is visible once the session is registered.
#[derive(Debug, Clone)]
pub struct CloseNotifier {
    session_id: Uuid,
    tx: mpsc::UnboundedSender<Uuid>,
    fired: Arc<AtomicBool>,
}

impl CloseNotifier {
    pub(crate) fn new(session_id: Uuid, tx: mpsc::UnboundedSender<Uuid>) -> Self {
        Self {
            session_id,
            tx,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn notify(&self) {
        self.fired.store(true, Ordering::SeqCst);
        let _ = self.tx.send(self.session_id);
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}
