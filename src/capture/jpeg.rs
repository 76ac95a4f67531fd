//! JPEG helpers: MJPEG pipe splitting, decode and encode

use crate::error::{Error, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound for buffered bytes without a complete frame
const MAX_BUFFERED: usize = 16 * 1024 * 1024;

/// Splits a concatenated MJPEG byte stream into whole JPEG images
#[derive(Debug, Default)]
pub struct JpegSplitter {
    buf: Vec<u8>,
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_BUFFERED {
            tracing::warn!(buffered = self.buf.len(), "MJPEG buffer overflow, resyncing");
            let keep = self.buf.len() - 1;
            self.buf.drain(..keep);
        }
    }

    /// Next complete JPEG, if one is buffered
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let Some(start) = find(&self.buf, &SOI, 0) else {
            // Keep a trailing 0xFF that may begin the next marker
            let keep_from = self.buf.len().saturating_sub(1);
            self.buf.drain(..keep_from);
            return None;
        };
        if start > 0 {
            self.buf.drain(..start);
        }
        let end = find(&self.buf, &EOI, SOI.len())?;
        let frame: Vec<u8> = self.buf.drain(..end + EOI.len()).collect();
        Some(frame)
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|i| i + from)
}

pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)?;
    Ok(image.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(image)
        .map_err(Error::from)?;
    Ok(out)
}
