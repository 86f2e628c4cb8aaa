use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection, PERSON_CLASS_ID};
use crate::frame::RawFrame;

const CYCLE_FRAMES: u64 = 200;
const WALK_FRAMES: u64 = 150;

/// COCO "chair": a static non-target object for exercising class filtering.
const PROP_CLASS_ID: u32 = 56;

/// Synthetic backend.
///
/// Ignores pixel content and derives detections from the frame index: one
/// person walks left to right across the frame over `WALK_FRAMES` frames, then
/// the scene stays empty of people for the rest of the cycle. A static prop
/// stands in the bottom-right corner throughout.
pub struct StubBackend {
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { calls: 0 }
    }

    /// Number of frames this backend has seen.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn scene(frame: &RawFrame) -> Vec<Detection> {
        let w = frame.width as f32;
        let h = frame.height as f32;
        let mut out = Vec::with_capacity(2);

        let phase = frame.index.saturating_sub(1) % CYCLE_FRAMES;
        if phase < WALK_FRAMES {
            let t = phase as f32 / (WALK_FRAMES - 1) as f32;
            let box_w = w * 0.08;
            let box_h = h * 0.45;
            let cx = box_w / 2.0 + t * (w - box_w);
            let cy = h * 0.6;
            out.push(Detection::new(
                BoundingBox::from_center(cx, cy, box_w, box_h),
                PERSON_CLASS_ID,
                0.88,
            ));
        }

        out.push(Detection::new(
            BoundingBox::new(w * 0.82, h * 0.70, w * 0.92, h * 0.95),
            PROP_CLASS_ID,
            0.71,
        ));
        out
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<Detection>> {
        self.calls += 1;
        Ok(Self::scene(frame))
    }
}
