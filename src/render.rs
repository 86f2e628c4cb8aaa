//! Display seam. Renderers only observe; nothing flows back into the pipeline.

use crate::frame::RawFrame;
use crate::track::{TrackedObject, TrackerId};

pub trait FrameRenderer: Send {
    fn render(
        &mut self,
        frame: &RawFrame,
        snapshot: &[TrackedObject],
        membership: &[(TrackerId, bool)],
    );
}

/// Logs a one-line summary per frame at `debug`.
#[derive(Default)]
pub struct LogRenderer;

impl FrameRenderer for LogRenderer {
    fn render(
        &mut self,
        frame: &RawFrame,
        snapshot: &[TrackedObject],
        membership: &[(TrackerId, bool)],
    ) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        let inside: Vec<String> = membership
            .iter()
            .filter(|(_, inside)| *inside)
            .map(|(id, _)| id.to_string())
            .collect();
        log::debug!(
            "frame {}: {} tracked, in zone: [{}]",
            frame.index,
            snapshot.len(),
            inside.join(", ")
        );
    }
}

#[derive(Default)]
pub struct NullRenderer;

impl FrameRenderer for NullRenderer {
    fn render(&mut self, _: &RawFrame, _: &[TrackedObject], _: &[(TrackerId, bool)]) {}
}
