//! Per-frame orchestration: detect, track, evaluate, check, publish.
//!
//! The pipeline owns all state that lives across frames (tracker history and
//! the last reported count). Skipped frames and frames whose detector call
//! failed never reach the tracker, so lost-track ageing counts only frames
//! that were actually observed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};

use crate::config::{OccupancyConfig, PipelineSettings};
use crate::detect::{postprocess, DetectParams, DetectorBackend};
use crate::frame::RawFrame;
use crate::ingest::{Acquired, FrameSource};
use crate::occupancy::{check_at, unix_now, OccupancyEvent, OccupancyState};
use crate::publish::{EventSink, PublishError};
use crate::render::{FrameRenderer, LogRenderer};
use crate::track::{IdentityTracker, TrackerConfig};
use crate::zone::Zone;

/// What happened to the occupancy event on one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum PublishOutcome {
    /// Count unchanged; nothing to send.
    Unchanged,
    Published(OccupancyEvent),
    /// Dispatch failed; the change is retried on the next frame.
    Failed(PublishError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrameOutcome {
    pub frame_index: u64,
    pub tracked: usize,
    pub in_zone: usize,
    pub publish: PublishOutcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    EndOfStream,
    MaxFrames,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    pub peak_occupancy: usize,
    pub stop_reason: Option<StopReason>,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frames={} skipped={} events={} publish_failures={} peak={}",
            self.frames_processed,
            self.frames_skipped,
            self.events_published,
            self.publish_failures,
            self.peak_occupancy
        )
    }
}

/// Detection, tracking and loop settings for one run.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub detect: DetectParams,
    pub tracker: TrackerConfig,
    pub run: PipelineSettings,
}

impl PipelineConfig {
    pub fn from_config(cfg: &OccupancyConfig) -> Self {
        Self {
            detect: cfg.detector.params.clone(),
            tracker: cfg.tracker.clone(),
            run: cfg.pipeline.clone(),
        }
    }
}

pub struct Pipeline<S: FrameSource, D: DetectorBackend, P: EventSink> {
    source: S,
    detector: D,
    sink: P,
    tracker: IdentityTracker,
    zone: Zone,
    state: OccupancyState,
    detect: DetectParams,
    run: PipelineSettings,
    renderer: Box<dyn FrameRenderer>,
    clock: fn() -> u64,
    stats: RunStats,
    /// Consecutive failed dispatches; reset by the next success.
    failing_publishes: u64,
}

impl<S: FrameSource, D: DetectorBackend, P: EventSink> Pipeline<S, D, P> {
    pub fn new(source: S, detector: D, sink: P, zone: Zone, config: PipelineConfig) -> Self {
        Self {
            source,
            detector,
            sink,
            tracker: IdentityTracker::new(config.tracker),
            zone,
            state: OccupancyState::new(),
            detect: config.detect,
            run: config.run,
            renderer: Box::new(LogRenderer),
            clock: unix_now,
            stats: RunStats::default(),
            failing_publishes: 0,
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn FrameRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Replace the event timestamp clock (seconds since the epoch).
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> &OccupancyState {
        &self.state
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    /// Dispatch attempts that have failed since the last successful one.
    pub fn failing_publishes(&self) -> u64 {
        self.failing_publishes
    }

    /// Run one observed frame through the whole cycle.
    ///
    /// An `Err` means the detector failed; the tracker has not been touched.
    pub fn process_frame(&mut self, frame: &RawFrame) -> Result<FrameOutcome> {
        let raw = self.detector.detect(frame).with_context(|| {
            format!(
                "{} detector failed on frame {}",
                self.detector.name(),
                frame.index
            )
        })?;
        let detections = postprocess(raw, &self.detect);

        let snapshot = self.tracker.update(&detections, frame.index);
        let in_zone = self.zone.evaluate(&snapshot);
        let count = in_zone.len();
        self.stats.peak_occupancy = self.stats.peak_occupancy.max(count);

        let publish = match check_at(&in_zone, &self.state, (self.clock)()) {
            None => PublishOutcome::Unchanged,
            Some(event) => match self.sink.publish(&event) {
                Ok(()) => {
                    if self.failing_publishes > 0 {
                        log::info!(
                            "publishing via {} recovered after {} failed attempts",
                            self.sink.name(),
                            self.failing_publishes
                        );
                        self.failing_publishes = 0;
                    }
                    self.state.mark_reported(event.count);
                    self.stats.events_published += 1;
                    PublishOutcome::Published(event)
                }
                Err(e) => {
                    self.failing_publishes += 1;
                    self.stats.publish_failures += 1;
                    if !e.is_transient() {
                        log::error!(
                            "cannot publish occupancy count={} via {}: {}",
                            event.count,
                            self.sink.name(),
                            e
                        );
                    } else if self.failing_publishes == 1 {
                        log::warn!(
                            "failed to publish occupancy count={} via {}: {}; retrying each frame",
                            event.count,
                            self.sink.name(),
                            e
                        );
                    } else {
                        log::debug!("publish retry {} failed: {}", self.failing_publishes, e);
                    }
                    PublishOutcome::Failed(e)
                }
            },
        };

        let membership = self.zone.membership(&snapshot);
        self.renderer.render(frame, &snapshot, &membership);
        self.stats.frames_processed += 1;

        Ok(FrameOutcome {
            frame_index: frame.index,
            tracked: snapshot.len(),
            in_zone: count,
            publish,
        })
    }

    /// Loop until `stop` is set, the source ends, or `max_frames` is reached.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<RunStats> {
        let mut consecutive_skips: u32 = 0;
        let mut last_health = Instant::now();

        log::info!(
            "pipeline started (detector: {}, sink: {})",
            self.detector.name(),
            self.sink.name()
        );

        let reason = loop {
            if stop.load(Ordering::SeqCst) {
                break StopReason::Requested;
            }
            if self
                .run
                .max_frames
                .is_some_and(|max| self.stats.frames_processed >= max)
            {
                break StopReason::MaxFrames;
            }

            let skipped = match self
                .source
                .next_frame()
                .context("frame acquisition failed")?
            {
                Acquired::Frame(frame) => match self.process_frame(&frame) {
                    Ok(_) => None,
                    Err(e) => Some(format!("{:#}", e)),
                },
                Acquired::Skipped(reason) => Some(reason),
                Acquired::EndOfStream => {
                    log::info!("source reached end of stream");
                    break StopReason::EndOfStream;
                }
            };

            match skipped {
                None => consecutive_skips = 0,
                Some(reason) => {
                    self.stats.frames_skipped += 1;
                    consecutive_skips += 1;
                    log::warn!(
                        "skipping frame ({}/{}): {}",
                        consecutive_skips,
                        self.run.max_consecutive_skips,
                        reason
                    );
                    if consecutive_skips >= self.run.max_consecutive_skips {
                        log::info!("pipeline stats: {}", self.stats);
                        return Err(anyhow!(
                            "acquisition failed: {} consecutive frames skipped",
                            consecutive_skips
                        ));
                    }
                }
            }

            if !self.run.health_log_interval.is_zero()
                && last_health.elapsed() >= self.run.health_log_interval
            {
                log::info!(
                    "pipeline health: {} live_tracks={} last_reported={:?}",
                    self.stats,
                    self.tracker.live_tracks(),
                    self.state.last_reported()
                );
                last_health = Instant::now();
            }
        };

        self.stats.stop_reason = Some(reason);
        log::info!("pipeline stopped ({:?}): {}", reason, self.stats);
        Ok(self.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneSettings;
    use crate::detect::{Detection, ScriptedBackend};
    use crate::ingest::SourceStats;
    use crate::publish::MemorySink;
    use crate::render::NullRenderer;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct QueueSource {
        items: VecDeque<Option<u64>>,
    }

    impl FrameSource for QueueSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Acquired> {
            Ok(match self.items.pop_front() {
                Some(Some(index)) => Acquired::Frame(RawFrame::new(Vec::new(), 1280, 720, index)),
                Some(None) => Acquired::Skipped("test gap".into()),
                None => Acquired::EndOfStream,
            })
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: 0,
                frames_skipped: 0,
                url: "test://queue".into(),
            }
        }
    }

    fn config(max_skips: u32) -> PipelineConfig {
        PipelineConfig {
            detect: DetectParams::default(),
            tracker: TrackerConfig::default(),
            run: PipelineSettings {
                max_frames: None,
                max_consecutive_skips: max_skips,
                health_log_interval: Duration::ZERO,
            },
        }
    }

    fn zone() -> Zone {
        Zone::from_settings(&ZoneSettings::default(), 1280, 720).unwrap()
    }

    fn fixed_clock() -> u64 {
        1_700_000_000
    }

    #[test]
    fn consecutive_skips_fail_the_run() {
        let source = QueueSource {
            items: vec![None, None, None].into(),
        };
        let mut pipeline = Pipeline::new(
            source,
            ScriptedBackend::new(vec![]),
            MemorySink::new(),
            zone(),
            config(3),
        )
        .with_renderer(Box::new(NullRenderer));
        let err = pipeline.run(&AtomicBool::new(false)).unwrap_err();
        assert!(err.to_string().contains("3 consecutive"));
    }

    #[test]
    fn stop_flag_ends_run_immediately() {
        let source = QueueSource {
            items: vec![Some(1)].into(),
        };
        let mut pipeline = Pipeline::new(
            source,
            ScriptedBackend::new(vec![]),
            MemorySink::new(),
            zone(),
            config(3),
        );
        let stats = pipeline.run(&AtomicBool::new(true)).unwrap();
        assert_eq!(stats.frames_processed, 0);
        assert_eq!(stats.stop_reason, Some(StopReason::Requested));
    }

    #[test]
    fn first_frame_reports_zero_occupancy() {
        let sink = MemorySink::new();
        let source = QueueSource {
            items: vec![Some(1), Some(2)].into(),
        };
        let mut pipeline = Pipeline::new(
            source,
            ScriptedBackend::new(vec![]),
            sink.clone(),
            zone(),
            config(3),
        )
        .with_clock(fixed_clock);
        let stats = pipeline.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(stats.frames_processed, 2);
        assert_eq!(
            sink.events(),
            vec![OccupancyEvent {
                count: 0,
                timestamp: 1_700_000_000
            }]
        );
    }

    #[test]
    fn max_frames_caps_run() {
        let source = QueueSource {
            items: (1..=10).map(Some).collect(),
        };
        let mut cfg = config(3);
        cfg.run.max_frames = Some(4);
        let detections = vec![vec![Detection::person(100.0, 100.0, 200.0, 400.0, 0.9)]; 10];
        let mut pipeline = Pipeline::new(
            source,
            ScriptedBackend::new(detections),
            MemorySink::new(),
            zone(),
            cfg,
        );
        let stats = pipeline.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(stats.frames_processed, 4);
        assert_eq!(stats.peak_occupancy, 1);
        assert_eq!(stats.stop_reason, Some(StopReason::MaxFrames));
    }

    #[test]
    fn failure_streak_resets_after_successful_dispatch() {
        let sink = MemorySink::new();
        sink.fail_next(3, PublishError::Disconnected);
        let source = QueueSource {
            items: (1..=5).map(Some).collect(),
        };
        let mut pipeline = Pipeline::new(
            source,
            ScriptedBackend::new(vec![]),
            sink.clone(),
            zone(),
            config(3),
        );

        for index in 1..=3 {
            let outcome = pipeline
                .process_frame(&RawFrame::new(Vec::new(), 1280, 720, index))
                .unwrap();
            assert_eq!(outcome.publish, PublishOutcome::Failed(PublishError::Disconnected));
            assert_eq!(pipeline.failing_publishes(), index);
        }

        let stats = pipeline.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(pipeline.failing_publishes(), 0);
        assert_eq!(stats.publish_failures, 3);
        assert_eq!(sink.counts(), vec![0]);
    }
}
