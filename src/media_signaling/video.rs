//! Mosaic video for the WebRTC track
//!
//! One ffmpeg process per connected viewer turns raw RGB mosaic frames
//! into an H.264 baseline elementary stream. Access units are cut at the
//! AUD markers x264 emits and written to the track as samples. The
//! process is killed with the session.

use crate::error::{Error, Result};
use crate::mosaic::{MosaicComposer, MosaicFrame};
use bytes::Bytes;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

const READ_CHUNK: usize = 64 * 1024;
/// Upper bound for buffered bytes without a complete access unit
const MAX_BUFFERED: usize = 8 * 1024 * 1024;
const NAL_TYPE_AUD: u8 = 9;

/// Splits an Annex-B H.264 stream into access units, each starting with
/// its access unit delimiter
#[derive(Debug, Default)]
pub struct AccessUnitSplitter {
    buf: Vec<u8>,
}

impl AccessUnitSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `bytes` and return every access unit completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let mut units = Vec::new();

        loop {
            let Some(start) = find_aud(&self.buf, 0) else {
                // Keep a tail that may hold a split start code
                let keep_from = self.buf.len().saturating_sub(4);
                self.buf.drain(..keep_from);
                break;
            };
            if start > 0 {
                self.buf.drain(..start);
            }
            let Some(end) = find_aud(&self.buf, 4) else {
                break;
            };
            units.push(self.buf.drain(..end).collect());
        }

        if self.buf.len() > MAX_BUFFERED {
            tracing::warn!(buffered = self.buf.len(), "H.264 buffer overflow, resyncing");
            self.buf.clear();
        }
        units
    }
}

/// Offset of the first AUD start code at or after `from`, including the
/// leading zero of a four-byte start code
fn find_aud(buf: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 3 < buf.len() {
        if buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 1 && buf[i + 3] & 0x1F == NAL_TYPE_AUD {
            let four_byte = i > from && buf[i - 1] == 0;
            return Some(if four_byte { i - 1 } else { i });
        }
        i += 1;
    }
    None
}

fn encoder_args(width: u32, height: u32, fps: f64) -> Vec<String> {
    let gop = ((fps * 2.0).round() as u32).max(1);
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-s".into(),
        format!("{}x{}", width, height),
        "-r".into(),
        format!("{}", fps),
        "-i".into(),
        "pipe:0".into(),
        "-an".into(),
        "-vf".into(),
        "scale=trunc(iw/2)*2:trunc(ih/2)*2".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "ultrafast".into(),
        "-tune".into(),
        "zerolatency".into(),
        "-profile:v".into(),
        "baseline".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-g".into(),
        gop.to_string(),
        "-bf".into(),
        "0".into(),
        "-x264-params".into(),
        "aud=1:repeat-headers=1".into(),
        "-f".into(),
        "h264".into(),
        "pipe:1".into(),
    ]
}

/// Feeds one session's video track. Started once, when the peer connects.
pub struct MosaicVideoFeed {
    track: Arc<TrackLocalStaticSample>,
    composer: Arc<MosaicComposer>,
    ffmpeg_path: String,
    frame_wait: Duration,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl MosaicVideoFeed {
    pub fn new(
        track: Arc<TrackLocalStaticSample>,
        composer: Arc<MosaicComposer>,
        ffmpeg_path: String,
        frame_wait: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            track,
            composer,
            ffmpeg_path,
            frame_wait,
            cancel,
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the encoder task. No-op after the first call.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let feed = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = feed.run().await {
                tracing::warn!(error = %e, "Mosaic video feed stopped");
            }
        });
    }

    async fn run(&self) -> Result<()> {
        let first = self.composer.latest();
        let (width, height) = first.image.dimensions();
        let fps = self.composer.settings().fps;
        let period = self.composer.settings().period();

        let mut child = Command::new(&self.ffmpeg_path)
            .args(encoder_args(width, height, 1.0 / period.as_secs_f64()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Signaling(format!("failed to start video encoder: {}", e)))?;
        let (stdin, stdout) = take_pipes(&mut child)?;
        tracing::debug!(width, height, fps, "Mosaic video encoder started");

        let result = tokio::select! {
            _ = self.cancel.cancelled() => Ok(()),
            r = self.feed_frames(stdin, first, (width, height)) => r,
            r = self.write_samples(stdout, period) => r,
        };
        let _ = child.kill().await;
        result
    }

    /// Write every mosaic version as one raw frame. Without a new version
    /// the latest frame is repeated after `frame_wait`.
    async fn feed_frames(&self, mut stdin: ChildStdin, first: MosaicFrame, size: (u32, u32)) -> Result<()> {
        let mut frame = first;
        loop {
            if frame.image.dimensions() == size {
                stdin.write_all(frame.image.as_raw()).await?;
            } else {
                tracing::debug!(size = ?frame.image.dimensions(), "Mosaic size changed, frame skipped");
            }
            frame = self
                .composer
                .wait_for_frame(Some(frame.version), self.frame_wait)
                .await;
            if self.composer.is_stopped() {
                return Ok(());
            }
        }
    }

    async fn write_samples(&self, mut stdout: ChildStdout, period: Duration) -> Result<()> {
        let mut splitter = AccessUnitSplitter::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = stdout.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Signaling("video encoder exited".to_string()));
            }
            for unit in splitter.push(&chunk[..n]) {
                let sample = Sample {
                    data: Bytes::from(unit),
                    duration: period,
                    ..Default::default()
                };
                self.track.write_sample(&sample).await?;
            }
        }
    }
}

fn take_pipes(child: &mut Child) -> Result<(ChildStdin, ChildStdout)> {
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Signaling("encoder stdin unavailable".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Signaling("encoder stdout unavailable".to_string()))?;
    Ok((stdin, stdout))
}
