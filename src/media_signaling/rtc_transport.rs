//! webrtc-rs transport: one peer connection per viewer carrying the mosaic
//! as a single H.264 video track. Viewers that open a data channel also
//! receive each mosaic frame as a JPEG message.

use super::video::MosaicVideoFeed;
use super::{CloseNotifier, MediaPeer, MediaTransport, SessionDescription, SignalingSettings};
use crate::capture::encode_jpeg;
use crate::error::{Error, Result};
use crate::mosaic::MosaicComposer;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

const FRAME_JPEG_QUALITY: u8 = 80;
const GATHER_TIMEOUT: Duration = Duration::from_secs(5);
const RTCP_BUFFER: usize = 1500;

pub struct WebRtcTransport {
    api: API,
    ice_servers: Vec<RTCIceServer>,
    frame_wait: Duration,
    ffmpeg_path: String,
}

impl WebRtcTransport {
    pub fn new(settings: &SignalingSettings) -> Result<Self> {
        let ice_servers = settings
            .stun_url
            .iter()
            .filter(|url| !url.trim().is_empty())
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;

        Ok(Self {
            api: APIBuilder::new()
                .with_media_engine(media)
                .with_interceptor_registry(registry)
                .build(),
            ice_servers,
            frame_wait: settings.frame_wait,
            ffmpeg_path: settings.ffmpeg_path.clone(),
        })
    }
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn negotiate(
        &self,
        offer: SessionDescription,
        composer: Arc<MosaicComposer>,
        closed: CloseNotifier,
    ) -> Result<(SessionDescription, Box<dyn MediaPeer>)> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(self.api.new_peer_connection(config).await?);
        let sender_cancel = CancellationToken::new();
        let peer = WebRtcPeer {
            pc: pc.clone(),
            sender_cancel: sender_cancel.clone(),
        };

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: 90_000,
                ..Default::default()
            },
            "mosaic".to_owned(),
            "edge-vision".to_owned(),
        ));
        let rtp_sender = match pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                peer.close().await;
                return Err(e.into());
            }
        };
        // Drain RTCP so interceptors (NACK, reports) keep running
        tokio::spawn(async move {
            let mut rtcp = vec![0u8; RTCP_BUFFER];
            while rtp_sender.read(&mut rtcp).await.is_ok() {}
        });
        let video = Arc::new(MosaicVideoFeed::new(
            track,
            composer.clone(),
            self.ffmpeg_path.clone(),
            self.frame_wait,
            sender_cancel.clone(),
        ));

        let frame_wait = self.frame_wait;
        let dc_cancel = sender_cancel.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let composer = composer.clone();
            let cancel = dc_cancel.clone();
            Box::pin(async move {
                tracing::debug!(label = %dc.label(), "Viewer data channel opened");
                let channel = dc.clone();
                dc.on_open(Box::new(move || {
                    let channel = channel.clone();
                    let composer = composer.clone();
                    let cancel = cancel.clone();
                    Box::pin(async move {
                        tokio::spawn(send_mosaic_frames(channel, composer, frame_wait, cancel));
                    })
                }));
            })
        }));

        let notifier = closed.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let notifier = notifier.clone();
            let video = video.clone();
            Box::pin(async move {
                tracing::debug!(session_id = %notifier.session_id(), state = %state, "Peer connection state");
                if state == RTCPeerConnectionState::Connected {
                    video.start();
                }
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed
                        | RTCPeerConnectionState::Disconnected
                ) {
                    notifier.notify();
                }
            })
        }));

        match answer_offer(&peer.pc, offer).await {
            Ok(answer) => Ok((answer, Box::new(peer))),
            Err(e) => {
                peer.close().await;
                Err(e)
            }
        }
    }
}

async fn answer_offer(pc: &RTCPeerConnection, offer: SessionDescription) -> Result<SessionDescription> {
    let offer = RTCSessionDescription::offer(offer.sdp)?;
    pc.set_remote_description(offer).await?;
    let answer = pc.create_answer(None).await?;

    // Non-trickle: hand back the answer with all candidates gathered
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(answer).await?;
    if tokio::time::timeout(GATHER_TIMEOUT, gather_complete.recv()).await.is_err() {
        tracing::warn!("ICE gathering incomplete, answering with the candidates found so far");
    }

    let local = pc
        .local_description()
        .await
        .ok_or_else(|| Error::Signaling("local description missing".to_string()))?;
    Ok(SessionDescription {
        sdp: local.sdp,
        kind: local.sdp_type.to_string(),
    })
}

/// Push every new mosaic version to the viewer until the channel fails,
/// the session is cancelled or the composer stops.
async fn send_mosaic_frames(
    dc: Arc<RTCDataChannel>,
    composer: Arc<MosaicComposer>,
    frame_wait: Duration,
    cancel: CancellationToken,
) {
    let mut last_version: Option<u64> = None;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = composer.wait_for_frame(last_version, frame_wait) => frame,
        };
        if composer.is_stopped() {
            break;
        }
        if last_version == Some(frame.version) {
            continue;
        }
        last_version = Some(frame.version);

        let image = frame.image.clone();
        let jpeg = match tokio::task::spawn_blocking(move || encode_jpeg(&image, FRAME_JPEG_QUALITY)).await {
            Ok(Ok(jpeg)) => jpeg,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Mosaic encode failed");
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Mosaic encode task failed");
                break;
            }
        };

        if let Err(e) = dc.send(&Bytes::from(jpeg)).await {
            tracing::debug!(error = %e, "Data channel send failed, sender exiting");
            break;
        }
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    sender_cancel: CancellationToken,
}

#[async_trait]
impl MediaPeer for WebRtcPeer {
    async fn close(&self) {
        self.sender_cancel.cancel();
        if let Err(e) = self.pc.close().await {
            tracing::debug!(error = %e, "Peer connection close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_registry::FrameRegistry;
    use crate::mosaic::MosaicSettings;
    use tokio::sync::mpsc;
    use uuid::Uuid;
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
    use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
    use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

    /// Browser-style offer that only wants to receive video
    async fn recvonly_video_offer() -> (RTCPeerConnection, SessionDescription) {
        let mut media = MediaEngine::default();
        media.register_default_codecs().unwrap();
        let api = APIBuilder::new().with_media_engine(media).build();
        let viewer = api.new_peer_connection(RTCConfiguration::default()).await.unwrap();
        viewer
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .unwrap();

        let offer = viewer.create_offer(None).await.unwrap();
        let mut gathered = viewer.gathering_complete_promise().await;
        viewer.set_local_description(offer).await.unwrap();
        let _ = tokio::time::timeout(GATHER_TIMEOUT, gathered.recv()).await;
        let local = viewer.local_description().await.unwrap();
        (
            viewer,
            SessionDescription {
                sdp: local.sdp,
                kind: "offer".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_answer_carries_sending_video_track() {
        let transport = WebRtcTransport::new(&SignalingSettings::default()).unwrap();
        let composer = Arc::new(MosaicComposer::new(
            Arc::new(FrameRegistry::new()),
            MosaicSettings::default(),
        ));
        let (tx, _rx) = mpsc::unbounded_channel();
        let (viewer, offer) = recvonly_video_offer().await;

        let (answer, peer) = transport
            .negotiate(offer, composer, CloseNotifier::new(Uuid::new_v4(), tx))
            .await
            .unwrap();

        assert_eq!(answer.kind, "answer");
        let video = answer
            .sdp
            .split("m=")
            .find(|section| section.starts_with("video"))
            .expect("answer has no video section");
        assert!(video.contains("a=sendonly") || video.contains("a=sendrecv"));
        assert!(video.contains("H264"));

        peer.close().await;
        viewer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_offer_is_rejected() {
        let transport = WebRtcTransport::new(&SignalingSettings::default()).unwrap();
        let composer = Arc::new(MosaicComposer::new(
            Arc::new(FrameRegistry::new()),
            MosaicSettings::default(),
        ));
        let (tx, _rx) = mpsc::unbounded_channel();
        let offer = SessionDescription {
            sdp: "not an sdp".to_string(),
            kind: "offer".to_string(),
        };
        let result = transport
            .negotiate(offer, composer, CloseNotifier::new(Uuid::new_v4(), tx))
            .await;
        assert!(matches!(result, Err(Error::Signaling(_))));
    }
}
