use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::config::SourceSettings;
use crate::frame::RawFrame;
use crate::ingest::{Acquired, FrameSource, SourceStats};

/// Synthetic `stub://` source.
///
/// Produces a slowly shifting gradient. `stub://name?frames=N` ends the stream
/// after N frames; without it the stream never ends. Paced to `target_fps`
/// when that is non-zero.
pub struct SyntheticSource {
    url: String,
    width: u32,
    height: u32,
    frame_limit: Option<u64>,
    frame_interval: Option<Duration>,
    next_due: Option<Instant>,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(settings: &SourceSettings) -> Result<Self> {
        let frame_limit = parse_frame_limit(&settings.url)?;
        let frame_interval = (settings.target_fps > 0)
            .then(|| Duration::from_secs_f64(1.0 / f64::from(settings.target_fps)));
        Ok(Self {
            url: settings.url.clone(),
            width: settings.width,
            height: settings.height,
            frame_limit,
            frame_interval,
            next_due: None,
            frame_count: 0,
        })
    }

    fn pace(&mut self) {
        let Some(interval) = self.frame_interval else {
            return;
        };
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(self.next_due.map_or(now, |due| due.max(now)) + interval);
    }

    fn pixels(&self) -> Vec<u8> {
        let len = (self.width as usize) * (self.height as usize) * 3;
        let shift = self.frame_count as usize;
        (0..len).map(|i| ((i / 3 + shift) % 256) as u8).collect()
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("VideoSource: connected to {} (synthetic)", self.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Acquired> {
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(Acquired::EndOfStream);
        }
        self.pace();
        self.frame_count += 1;
        Ok(Acquired::Frame(RawFrame::new(
            self.pixels(),
            self.width,
            self.height,
            self.frame_count,
        )))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_skipped: 0,
            url: self.url.clone(),
        }
    }
}

fn parse_frame_limit(url: &str) -> Result<Option<u64>> {
    let Some((_, query)) = url.split_once('?') else {
        return Ok(None);
    };
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("frames=") {
            let limit = value
                .parse()
                .with_context(|| format!("invalid frames= value in {}", url))?;
            return Ok(Some(limit));
        }
        if !pair.is_empty() {
            return Err(anyhow!("unknown stub source option '{}' in {}", pair, url));
        }
    }
    Ok(None)
}
