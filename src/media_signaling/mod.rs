//! MediaSignalingServer - Viewer sessions for the mosaic preview
//!
//! ## Responsibilities
//!
//! - Accept an offer, bind the mosaic video track (fed by
//!   `MosaicComposer::wait_for_frame`) and return the answer
//! - Tear sessions down on hangup, negotiation failure or transport close
//! - Terminate every session after a fixed TTL, even without a hangup
//!
//! ## Design Principles
//!
//! - The transport sits behind `MediaTransport` so the session lifecycle is
//!   testable without a real peer
//! - Closing a session is idempotent; only the caller that removes it from
//!   the map closes the peer

mod rtc_transport;
mod types;
mod video;

pub use rtc_transport::WebRtcTransport;
pub use types::*;

use crate::error::{Error, Result};
use crate::mosaic::MosaicComposer;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use uuid::Uuid;

/// Negotiates one media session against a viewer offer
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// On error the transport has already released anything it created.
    async fn negotiate(
        &self,
        offer: SessionDescription,
        composer: Arc<MosaicComposer>,
        closed: CloseNotifier,
    ) -> Result<(SessionDescription, Box<dyn MediaPeer>)>;
}

/// Live peer of an accepted session
#[async_trait]
pub trait MediaPeer: Send + Sync {
    async fn close(&self);
}

struct MediaSession {
    peer: Box<dyn MediaPeer>,
    created_at: Instant,
    watchdog: CancellationToken,
}

pub struct MediaSignalingServer {
    composer: Arc<MosaicComposer>,
    transport: Arc<dyn MediaTransport>,
    settings: SignalingSettings,
    sessions: Mutex<HashMap<Uuid, MediaSession>>,
    close_tx: mpsc::UnboundedSender<Uuid>,
    close_rx: Mutex<Option<mpsc::UnboundedReceiver<Uuid>>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl MediaSignalingServer {
    pub fn new(
        composer: Arc<MosaicComposer>,
        transport: Arc<dyn MediaTransport>,
        settings: SignalingSettings,
    ) -> Self {
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        Self {
            composer,
            transport,
            settings,
            sessions: Mutex::new(HashMap::new()),
            close_tx,
            close_rx: Mutex::new(Some(close_rx)),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Start the close-notification listener. No-op after the first call.
    pub fn start(self: &Arc<Self>) {
        let Some(mut close_rx) = self.close_rx.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            return;
        };
        let server = Arc::clone(self);
        self.tasks.spawn(async move {
            loop {
                let session_id = tokio::select! {
                    _ = server.cancel.cancelled() => break,
                    id = close_rx.recv() => match id {
                        Some(id) => id,
                        None => break,
                    },
                };
                server.teardown(session_id, "transport closed").await;
            }
        });
    }

    /// Negotiate a new session and arm its TTL watchdog
    pub async fn offer(&self, offer: SessionDescription) -> Result<OfferResponse> {
        if self.cancel.is_cancelled() {
            return Err(Error::Signaling("signaling server is shutting down".to_string()));
        }
        if offer.kind != "offer" {
            return Err(Error::Validation(format!(
                "expected session description of type offer, got {}",
                offer.kind
            )));
        }

        let session_id = Uuid::new_v4();
        let notifier = CloseNotifier::new(session_id, self.close_tx.clone());
        let closed = notifier.clone();
        let (answer, peer) = match self
            .transport
            .negotiate(offer, self.composer.clone(), notifier)
            .await
        {
            Ok(ok) => ok,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Negotiation failed");
                return Err(e);
            }
        };

        let watchdog = self.cancel.child_token();
        {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.insert(
                session_id,
                MediaSession {
                    peer,
                    created_at: Instant::now(),
                    watchdog: watchdog.clone(),
                },
            );
        }

        if self.cancel.is_cancelled() {
            self.teardown(session_id, "shutdown").await;
            return Err(Error::Signaling("signaling server is shutting down".to_string()));
        }
        // The listener may have consumed the notification before the insert
        if closed.has_fired() {
            self.teardown(session_id, "transport closed").await;
            return Err(Error::Signaling("peer closed during negotiation".to_string()));
        }

        let ttl = self.settings.session_ttl;
        let close_tx = self.close_tx.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = watchdog.cancelled() => {}
                _ = tokio::time::sleep(ttl) => {
                    info!(session_id = %session_id, ttl_secs = ttl.as_secs(), "Session TTL expired");
                    let _ = close_tx.send(session_id);
                }
            }
        });

        info!(session_id = %session_id, sessions = self.session_count(), "Viewer session opened");
        Ok(OfferResponse {
            sdp: answer.sdp,
            kind: answer.kind,
            session_id,
        })
    }

    /// Explicit hangup from the viewer. Returns whether a session was closed.
    pub async fn hangup(&self, session_id: Uuid) -> bool {
        self.teardown(session_id, "hangup").await
    }

    /// Remove and close one session. Idempotent.
    pub async fn teardown(&self, session_id: Uuid, reason: &str) -> bool {
        let session = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&session_id);
        let Some(session) = session else {
            return false;
        };

        session.watchdog.cancel();
        session.peer.close().await;
        info!(
            session_id = %session_id,
            reason,
            lifetime_secs = session.created_at.elapsed().as_secs(),
            "Viewer session closed"
        );
        true
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn settings(&self) -> &SignalingSettings {
        &self.settings
    }

    /// Close every session and stop background tasks. Idempotent.
    pub async fn shutdown(&self, timeout: Duration) {
        self.cancel.cancel();
        let drained: Vec<(Uuid, MediaSession)> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (session_id, session) in drained {
            session.peer.close().await;
            info!(session_id = %session_id, "Viewer session closed at shutdown");
        }

        self.tasks.close();
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            warn!("Signaling tasks still running at shutdown");
        }
    }
}
