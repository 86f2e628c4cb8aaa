//! GStreamer-backed sources: RTSP cameras, V4L2 webcams and local files.
//!
//! Every source decodes to packed RGB at the configured resolution, so zone
//! coordinates always line up with the frames the detector sees.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;

use crate::config::SourceSettings;
use crate::frame::RawFrame;
use crate::ingest::{Acquired, FrameSource, SourceStats};

#[derive(Clone, Debug, PartialEq, Eq)]
enum StreamKind {
    Rtsp(String),
    V4l2(String),
    File(String),
}

impl StreamKind {
    fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
            return Ok(Self::Rtsp(url.to_string()));
        }
        if let Some(device) = url.strip_prefix("v4l2://") {
            let device = if device.is_empty() { "/dev/video0" } else { device };
            return Ok(Self::V4l2(device.to_string()));
        }
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(Self::File(path.to_string()));
        }
        if url.contains("://") {
            return Err(anyhow!("unsupported source URL scheme: {}", url));
        }
        Ok(Self::File(url.to_string()))
    }

    fn is_live(&self) -> bool {
        !matches!(self, Self::File(_))
    }

    fn pipeline_description(&self, settings: &SourceSettings) -> String {
        let head = match self {
            Self::Rtsp(url) => format!("rtspsrc location={} latency=0 ! decodebin", url),
            Self::V4l2(device) => format!("v4l2src device={} ! decodebin", device),
            Self::File(path) => format!("filesrc location=\"{}\" ! decodebin", path),
        };
        let rate = if settings.target_fps > 0 {
            format!(" ! videorate ! video/x-raw,framerate={}/1", settings.target_fps)
        } else {
            String::new()
        };
        // Live streams drop stale buffers; files must deliver every frame.
        let sink = if self.is_live() {
            "appsink name=appsink sync=false max-buffers=1 drop=true"
        } else {
            "appsink name=appsink sync=false max-buffers=4 drop=false"
        };
        format!(
            "{}{} ! videoconvert ! videoscale ! video/x-raw,format=RGB,width={},height={} ! {}",
            head, rate, settings.width, settings.height, sink
        )
    }
}

pub(crate) struct GstreamerSource {
    settings: SourceSettings,
    kind: StreamKind,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    frames_skipped: u64,
    last_frame_at: Option<Instant>,
}

impl GstreamerSource {
    pub(crate) fn new(settings: &SourceSettings) -> Result<Self> {
        let kind = StreamKind::from_url(&settings.url)?;
        if let StreamKind::File(path) = &kind {
            if !Path::new(path).is_file() {
                return Err(anyhow!("video file {} does not exist", path));
            }
        }

        gstreamer::init().context("initialize gstreamer")?;

        let description = kind.pipeline_description(settings);
        let pipeline = gstreamer::parse::launch(&description)
            .with_context(|| format!("build pipeline for {}", settings.url))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("pipeline for {} is not a Pipeline", settings.url))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        Ok(Self {
            settings: settings.clone(),
            kind,
            pipeline,
            appsink,
            frame_count: 0,
            frames_skipped: 0,
            last_frame_at: None,
        })
    }

    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.settings.target_fps == 0 {
            500
        } else {
            (1000 / self.settings.target_fps).saturating_mul(4)
        };
        Duration::from_millis(u64::from(base_ms.max(500)))
    }

    /// Drain the bus. Returns the first error message, if any.
    fn poll_bus(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            if let MessageView::Error(err) = message.view() {
                return Some(format!(
                    "gstreamer error from {:?}: {}",
                    err.src().map(|s| s.path_string()),
                    err.error()
                ));
            }
        }
        None
    }
}

impl FrameSource for GstreamerSource {
    fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .with_context(|| format!("start pipeline for {}", self.settings.url))?;
        if let Some(err) = self.poll_bus() {
            return Err(anyhow!("{}: {}", self.settings.url, err));
        }
        log::info!("VideoSource: connected to {}", self.settings.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Acquired> {
        if let Some(err) = self.poll_bus() {
            return Err(anyhow!("{}: {}", self.settings.url, err));
        }

        let timeout = self.frame_timeout();
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let Some(sample) = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(millis))
        else {
            if self.appsink.is_eos() {
                return Ok(Acquired::EndOfStream);
            }
            self.frames_skipped += 1;
            let idle = self
                .last_frame_at
                .map(|t| t.elapsed().as_secs_f32())
                .unwrap_or_default();
            return Ok(Acquired::Skipped(format!(
                "no frame within {}ms ({:.1}s since last frame)",
                millis, idle
            )));
        };

        let (pixels, width, height) = match sample_to_pixels(&sample) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.frames_skipped += 1;
                return Ok(Acquired::Skipped(format!("undecodable sample: {:#}", e)));
            }
        };

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Acquired::Frame(RawFrame::new(
            pixels,
            width,
            height,
            self.frame_count,
        )))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_skipped: self.frames_skipped,
            url: self.settings.url.clone(),
        }
    }
}

impl Drop for GstreamerSource {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::debug!("failed to stop pipeline for {:?}: {}", self.kind, e);
        }
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data.get(..len).context("buffer shorter than frame")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("buffer row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}
