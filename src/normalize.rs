//! Pixel-to-relative bounding box conversion.
//!
//! Boxes arrive in pixel units of the stored frame; clients overlay them on
//! a scaled preview, so each one is also reported relative to the frame
//! size. Frames that cannot be decoded fall back to a `1x1` placeholder,
//! which keeps the division defined and leaves the pixel values unchanged.

use serde::Serialize;
use std::path::Path;

use crate::models::BBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const PLACEHOLDER: FrameSize = FrameSize {
        width: 1,
        height: 1,
    };

    pub fn is_placeholder(&self) -> bool {
        *self == Self::PLACEHOLDER
    }
}

/// Reads the pixel dimensions of a stored frame.
///
/// The format is sniffed from the content, since uploaded filenames are
/// whatever the client sent.
pub fn frame_size(path: &Path) -> FrameSize {
    match read_dimensions(path) {
        Ok((width, height)) if width > 0 && height > 0 => FrameSize { width, height },
        Ok(_) => FrameSize::PLACEHOLDER,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "frame not decodable, using 1x1");
            FrameSize::PLACEHOLDER
        }
    }
}

fn read_dimensions(path: &Path) -> image::ImageResult<(u32, u32)> {
    image::ImageReader::open(path)?
        .with_guessed_format()?
        .into_dimensions()
}

/// `[x/W, y/H, w/W, h/H]` for a pixel-space box.
pub fn normalize_bbox(bbox: &BBox, size: FrameSize) -> [f64; 4] {
    let width = f64::from(size.width);
    let height = f64::from(size.height);
    [
        bbox.x / width,
        bbox.y / height,
        bbox.w / width,
        bbox.h / height,
    ]
}

/// Per-frame token distinguishing detections within one ingest call.
///
/// Not stable across frames.
pub fn track_token(index: usize) -> String {
    format!("srv-{}", index)
}
