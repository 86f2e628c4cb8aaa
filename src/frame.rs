//! Raw frame container.
//!
//! - `RawFrame`: owned RGB24 pixels plus dimensions and a per-run frame index.
//!
//! Pixels are private and only lent out read-only; the detector boundary takes
//! `&RawFrame` and must not retain the slice past the `detect` call.

use std::time::{Duration, Instant};

/// One acquired video frame (packed RGB24, row-major, no padding).
pub struct RawFrame {
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Monotonic index assigned by the source, starting at 1.
    pub index: u64,

    capture_instant: Instant,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: u64) -> Self {
        Self {
            data,
            width,
            height,
            index,
            capture_instant: Instant::now(),
        }
    }

    /// Read-only view of the pixel bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Expected byte length for a packed RGB24 frame of these dimensions.
    pub fn expected_rgb_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(3))
    }

    /// Time since the frame was captured.
    pub fn age(&self) -> Duration {
        self.capture_instant.elapsed()
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("index", &self.index)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_omits_pixels() {
        let frame = RawFrame::new(vec![7u8; 12], 2, 2, 1);
        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("bytes: 12"));
        assert!(!rendered.contains("[7"));
    }

    #[test]
    fn expected_len_matches_rgb24() {
        let frame = RawFrame::new(vec![0u8; 640 * 480 * 3], 640, 480, 1);
        assert_eq!(frame.expected_rgb_len(), Some(frame.byte_len()));
    }
}
