//! Frame ingestion sources.
//!
//! - `stub://name[?frames=N]`: synthetic frames, optionally ending after N
//! - `rtsp://...`: IP cameras (feature: ingest-gstreamer)
//! - `v4l2:///dev/videoN`: USB webcams (feature: ingest-gstreamer)
//! - `file:///path` or a bare path: local video files (feature: ingest-gstreamer)
//!
//! Sources are blocking: `next_frame` waits for the next decoded frame or a
//! bounded timeout. Raw frames are never written to disk or logged.

#[cfg(feature = "ingest-gstreamer")]
mod gst;
mod synthetic;

use anyhow::Result;

use crate::config::SourceSettings;
use crate::frame::RawFrame;

#[cfg(feature = "ingest-gstreamer")]
use self::gst::GstreamerSource;
pub use synthetic::SyntheticSource;

/// Outcome of one acquisition attempt.
#[derive(Debug)]
pub enum Acquired {
    Frame(RawFrame),
    /// Nothing usable this time; the source is still alive.
    Skipped(String),
    /// The source has no more frames.
    EndOfStream,
}

/// A blocking frame producer.
pub trait FrameSource {
    /// Open the stream. Failure here is fatal at startup.
    fn connect(&mut self) -> Result<()>;

    /// Block for the next frame. `Err` means the source is unusable.
    fn next_frame(&mut self) -> Result<Acquired>;

    fn stats(&self) -> SourceStats;
}

#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub frames_skipped: u64,
    pub url: String,
}

/// URL-dispatched video source.
pub struct VideoSource {
    backend: SourceBackend,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-gstreamer")]
    Gstreamer(GstreamerSource),
}

impl VideoSource {
    pub fn new(settings: &SourceSettings) -> Result<Self> {
        if settings.url.starts_with("stub://") {
            Ok(Self {
                backend: SourceBackend::Synthetic(SyntheticSource::new(settings)?),
            })
        } else {
            #[cfg(feature = "ingest-gstreamer")]
            {
                Ok(Self {
                    backend: SourceBackend::Gstreamer(GstreamerSource::new(settings)?),
                })
            }
            #[cfg(not(feature = "ingest-gstreamer"))]
            {
                anyhow::bail!(
                    "source '{}' requires the ingest-gstreamer feature",
                    settings.url
                )
            }
        }
    }
}

impl FrameSource for VideoSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-gstreamer")]
            SourceBackend::Gstreamer(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Acquired> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-gstreamer")]
            SourceBackend::Gstreamer(source) => source.next_frame(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-gstreamer")]
            SourceBackend::Gstreamer(source) => source.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> SourceSettings {
        SourceSettings {
            url: url.to_string(),
            target_fps: 0,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn stub_url_selects_synthetic_source() -> Result<()> {
        let mut source = VideoSource::new(&settings("stub://test"))?;
        source.connect()?;
        match source.next_frame()? {
            Acquired::Frame(frame) => {
                assert_eq!((frame.width, frame.height), (64, 48));
                assert_eq!(frame.index, 1);
            }
            other => panic!("expected frame, got {:?}", other),
        }
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[cfg(not(feature = "ingest-gstreamer"))]
    #[test]
    fn real_sources_need_gstreamer() {
        let err = VideoSource::new(&settings("rtsp://camera/stream"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("ingest-gstreamer"));
    }
}
