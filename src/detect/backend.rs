use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::RawFrame;

/// Detector backend trait.
///
/// A backend is a blocking, per-frame call that returns the raw candidate set
/// for one frame. Confidence filtering and non-max suppression are applied
/// afterwards by [`crate::detect::postprocess`], so every backend shares the
/// same threshold and NMS semantics.
///
/// Implementations must treat the frame as read-only and must not retain the
/// pixel slice beyond the `detect` call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
