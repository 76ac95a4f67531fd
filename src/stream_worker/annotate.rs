//! Frame annotation: subject boxes and alert banners

use crate::detectors::Posture;
use crate::event_reporter::EventKind;
use crate::geometry::Rect;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect as PixelRect;

const BOX_DEFAULT: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_SIT: Rgb<u8> = Rgb([0, 0, 255]);
const BOX_SLEEP: Rgb<u8> = Rgb([255, 0, 128]);

/// Share of the frame height covered by the alert banner
const BANNER_HEIGHT_RATIO: f64 = 0.15;
const POSTURE_TAG_SIZE: (u32, u32) = (14, 8);

/// One subject box to draw
#[derive(Debug, Clone, Copy)]
pub struct SubjectOverlay {
    pub bbox: Rect,
    /// Only set while posture labelling is enabled
    pub posture: Option<Posture>,
}

pub fn posture_color(posture: Option<Posture>) -> Rgb<u8> {
    match posture {
        Some(Posture::Sit) => BOX_SIT,
        Some(Posture::Sleep) => BOX_SLEEP,
        _ => BOX_DEFAULT,
    }
}

pub fn banner_color(kind: EventKind) -> Rgb<u8> {
    match kind {
        EventKind::Fall => Rgb([255, 0, 0]),
        EventKind::BedExit => Rgb([255, 165, 0]),
        EventKind::Inactivity => Rgb([255, 255, 0]),
    }
}

/// Banner caption for an alert kind
pub fn banner_text(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Fall => "Fall!",
        EventKind::BedExit => "Bed Exit!",
        EventKind::Inactivity => "No Movement!",
    }
}

/// Draw subject boxes and, when any alert is active, the banner
pub fn annotate(image: &mut RgbImage, subjects: &[SubjectOverlay], alerts: &[EventKind]) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    for subject in subjects {
        draw_subject(image, subject);
    }
    if !alerts.is_empty() {
        draw_banner(image, alerts);
    }
}

fn draw_subject(image: &mut RgbImage, subject: &SubjectOverlay) {
    let (width, height) = image.dimensions();
    let clamp_x = |v: f64| v.clamp(0.0, (width - 1) as f64) as i32;
    let clamp_y = |v: f64| v.clamp(0.0, (height - 1) as f64) as i32;

    let (x1, y1) = (clamp_x(subject.bbox.x_min), clamp_y(subject.bbox.y_min));
    let (x2, y2) = (clamp_x(subject.bbox.x_max), clamp_y(subject.bbox.y_max));
    if x2 <= x1 || y2 <= y1 {
        return;
    }
    let color = posture_color(subject.posture);

    // 2px outline
    for inset in 0..2 {
        let w = (x2 - x1 - 2 * inset).max(1) as u32;
        let h = (y2 - y1 - 2 * inset).max(1) as u32;
        draw_hollow_rect_mut(image, PixelRect::at(x1 + inset, y1 + inset).of_size(w, h), color);
    }

    if subject.posture.is_some() {
        let (tag_w, tag_h) = POSTURE_TAG_SIZE;
        let tag_y = (y1 - tag_h as i32 - 2).max(0);
        draw_filled_rect_mut(image, PixelRect::at(x1, tag_y).of_size(tag_w, tag_h), color);
    }
}

/// Top band blended 50% with black, one colored strip per active alert
fn draw_banner(image: &mut RgbImage, alerts: &[EventKind]) {
    let (width, height) = image.dimensions();
    let band_h = ((height as f64 * BANNER_HEIGHT_RATIO) as u32).max(1);

    let mut overlay = RgbImage::new(width, band_h);
    let row_h = (band_h / alerts.len() as u32).max(1);
    let strip_x = (width as f64 * 0.05) as i32;
    let strip_w = ((width as f64 * 0.4) as u32).max(1);
    let strip_h = (row_h / 2).max(1);
    for (idx, kind) in alerts.iter().enumerate() {
        let y = (idx as u32 * row_h + (row_h - strip_h) / 2) as i32;
        draw_filled_rect_mut(
            &mut overlay,
            PixelRect::at(strip_x, y).of_size(strip_w, strip_h),
            banner_color(*kind),
        );
    }

    for (x, y, over) in overlay.enumerate_pixels() {
        let base = image.get_pixel_mut(x, y);
        for c in 0..3 {
            base.0[c] = ((u16::from(base.0[c]) + u16::from(over.0[c])) / 2) as u8;
        }
    }
}
