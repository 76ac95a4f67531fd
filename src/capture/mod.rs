//! Capture - Live decoded frames from a camera stream
//!
//! ## Responsibilities
//!
//! - Open a network stream and yield decoded RGB frames
//! - Keep the underlying decoder process tied to the handle lifetime
//! - JPEG framing and codec helpers shared with the preview path

pub mod ffmpeg;
pub mod jpeg;

pub use ffmpeg::FfmpegCapture;
pub use jpeg::{decode_jpeg, encode_jpeg, JpegSplitter};

use crate::error::Result;
use async_trait::async_trait;
use image::RgbImage;

/// Opens live streams by url
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn FrameStream>>;
}

/// An open stream. Dropping it releases the capture handle.
#[async_trait]
pub trait FrameStream: Send {
    /// Next decoded frame; `None` once the stream is exhausted
    async fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Hide `user:password@` in stream urls before they reach logs
pub fn redact_credentials(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", &url[..scheme_end], &rest[at + 1..]),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_credentials() {
        assert_eq!(
            redact_credentials("rtsp://admin:p@ss@10.0.0.5:554/stream1"),
            "rtsp://***@10.0.0.5:554/stream1"
        );
        assert_eq!(
            redact_credentials("rtsp://10.0.0.5:554/stream1"),
            "rtsp://10.0.0.5:554/stream1"
        );
        assert_eq!(redact_credentials("/tmp/file.mp4"), "/tmp/file.mp4");
    }
}
