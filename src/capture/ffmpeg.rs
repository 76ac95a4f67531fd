//! ffmpeg-backed capture source
//!
//! Runs one ffmpeg process per open stream, transcoding RTSP to an MJPEG
//! pipe. `kill_on_drop(true)` ties the process lifetime to the stream
//! handle, so dropping the handle (including on task abort) kills ffmpeg.

use super::jpeg::{decode_jpeg, JpegSplitter};
use super::{redact_credentials, CaptureSource, FrameStream};
use crate::error::{Error, Result};
use async_trait::async_trait;
use image::RgbImage;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

const READ_CHUNK: usize = 64 * 1024;

/// Capture source spawning ffmpeg per stream
#[derive(Debug, Clone)]
pub struct FfmpegCapture {
    ffmpeg_path: String,
    max_fps: f64,
    io_timeout: Duration,
}

impl FfmpegCapture {
    pub fn new(ffmpeg_path: impl Into<String>, max_fps: f64, io_timeout: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            max_fps,
            io_timeout,
        }
    }

    fn args(&self, url: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
        ];
        if url.starts_with("rtsp://") {
            args.extend([
                "-rtsp_transport".into(),
                "tcp".into(),
                "-timeout".into(),
                self.io_timeout.as_micros().to_string(),
            ]);
        }
        args.extend(["-i".into(), url.to_string(), "-an".into()]);
        if self.max_fps > 0.0 {
            args.extend(["-vf".into(), format!("fps={}", self.max_fps)]);
        }
        args.extend([
            "-f".into(),
            "image2pipe".into(),
            "-vcodec".into(),
            "mjpeg".into(),
            "-q:v".into(),
            "5".into(),
            "pipe:1".into(),
        ]);
        args
    }

    /// Check that ffmpeg is runnable; returns its version line
    pub async fn check_ffmpeg(&self) -> Result<String> {
        let output = Command::new(&self.ffmpeg_path)
            .arg("-version")
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::Capture("ffmpeg -version failed".to_string()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl CaptureSource for FfmpegCapture {
    async fn open(&self, url: &str) -> Result<Box<dyn FrameStream>> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Capture(format!("failed to spawn ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Capture("ffmpeg stdout not captured".to_string()))?;

        tracing::debug!(url = %redact_credentials(url), pid = ?child.id(), "ffmpeg capture started");

        Ok(Box::new(FfmpegStream {
            child,
            stdout,
            splitter: JpegSplitter::new(),
            chunk: vec![0u8; READ_CHUNK],
        }))
    }
}

struct FfmpegStream {
    child: Child,
    stdout: ChildStdout,
    splitter: JpegSplitter,
    chunk: Vec<u8>,
}

#[async_trait]
impl FrameStream for FfmpegStream {
    async fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        loop {
            if let Some(jpeg) = self.splitter.next_frame() {
                match tokio::task::spawn_blocking(move || decode_jpeg(&jpeg)).await? {
                    Ok(image) => return Ok(Some(image)),
                    Err(e) => {
                        tracing::debug!(error = %e, "Skipping undecodable frame");
                        continue;
                    }
                }
            }

            let n = self.stdout.read(&mut self.chunk).await?;
            if n == 0 {
                let status = self.child.try_wait().ok().flatten();
                tracing::debug!(status = ?status, "ffmpeg stream ended");
                return Ok(None);
            }
            self.splitter.push(&self.chunk[..n]);
        }
    }
}
