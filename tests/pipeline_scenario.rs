use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use zone_occupancy::config::{PipelineSettings, SourceSettings, ZoneSettings};
use zone_occupancy::detect::{DetectParams, ScriptedBackend, StubBackend};
use zone_occupancy::ingest::SourceStats;
use zone_occupancy::{
    Acquired, Detection, DetectorBackend, FrameRenderer, FrameSource, MemorySink, NullRenderer,
    OccupancyEvent, Pipeline, PipelineConfig, PublishError, PublishOutcome, RawFrame, StopReason,
    TrackedObject, TrackerConfig, TrackerId, VideoSource, Zone,
};

const T0: u64 = 1_700_000_000;

fn fixed_clock() -> u64 {
    T0
}

/// Replays frames (`Some`) and gaps (`None`), then ends the stream.
struct ScriptedSource {
    steps: VecDeque<Option<()>>,
    next_index: u64,
}

impl ScriptedSource {
    fn frames(n: usize) -> Self {
        Self::with_steps(vec![Some(()); n])
    }

    fn with_steps(steps: Vec<Option<()>>) -> Self {
        Self {
            steps: steps.into(),
            next_index: 0,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Acquired> {
        Ok(match self.steps.pop_front() {
            Some(Some(())) => {
                self.next_index += 1;
                Acquired::Frame(RawFrame::new(Vec::new(), 1280, 720, self.next_index))
            }
            Some(None) => Acquired::Skipped("decoder hiccup".to_string()),
            None => Acquired::EndOfStream,
        })
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.next_index,
            frames_skipped: 0,
            url: "scripted://".to_string(),
        }
    }
}

fn left_half_zone() -> Zone {
    Zone::from_settings(&ZoneSettings::default(), 1280, 720).unwrap()
}

fn pipeline_config(tracker: TrackerConfig) -> PipelineConfig {
    PipelineConfig {
        detect: DetectParams::default(),
        tracker,
        run: PipelineSettings {
            max_frames: None,
            max_consecutive_skips: 10,
            health_log_interval: Duration::ZERO,
        },
    }
}

fn scenario_tracker() -> TrackerConfig {
    TrackerConfig {
        track_activation_threshold: 0.6,
        lost_track_buffer: 30,
        ..TrackerConfig::default()
    }
}

fn inside(confidence: f32) -> Detection {
    Detection::person(200.0, 150.0, 400.0, 650.0, confidence)
}

fn outside(confidence: f32) -> Detection {
    Detection::person(900.0, 150.0, 1100.0, 650.0, confidence)
}

fn thirty_four_frame_script() -> Vec<Vec<Detection>> {
    let mut script = vec![vec![inside(0.9)], vec![inside(0.9)], vec![outside(0.9)]];
    script.extend(std::iter::repeat(Vec::new()).take(30));
    script.push(vec![Detection::person(100.0, 200.0, 250.0, 600.0, 0.5)]);
    assert_eq!(script.len(), 34);
    script
}

#[test]
fn enter_exit_absence_and_weak_detection() {
    let sink = MemorySink::new();
    let mut pipeline = Pipeline::new(
        ScriptedSource::frames(34),
        ScriptedBackend::new(thirty_four_frame_script()),
        sink.clone(),
        left_half_zone(),
        pipeline_config(scenario_tracker()),
    )
    .with_renderer(Box::new(NullRenderer))
    .with_clock(fixed_clock);

    let stats = pipeline.run(&AtomicBool::new(false)).unwrap();

    assert_eq!(
        sink.events(),
        vec![
            OccupancyEvent {
                count: 1,
                timestamp: T0
            },
            OccupancyEvent {
                count: 0,
                timestamp: T0
            },
        ]
    );
    assert_eq!(stats.frames_processed, 34);
    assert_eq!(stats.events_published, 2);
    assert_eq!(stats.peak_occupancy, 1);
    assert_eq!(stats.stop_reason, Some(StopReason::EndOfStream));
    assert_eq!(pipeline.state().last_reported(), Some(0));
}

#[test]
fn per_frame_outcomes_follow_the_scenario() {
    let mut source = ScriptedSource::frames(34);
    let mut pipeline = Pipeline::new(
        ScriptedSource::frames(0),
        ScriptedBackend::new(thirty_four_frame_script()),
        MemorySink::new(),
        left_half_zone(),
        pipeline_config(scenario_tracker()),
    )
    .with_clock(fixed_clock);

    let mut outcomes = Vec::new();
    while let Acquired::Frame(frame) = source.next_frame().unwrap() {
        outcomes.push(pipeline.process_frame(&frame).unwrap());
    }
    assert_eq!(outcomes.len(), 34);

    assert_eq!(outcomes[0].in_zone, 1);
    assert!(matches!(outcomes[0].publish, PublishOutcome::Published(e) if e.count == 1));
    assert_eq!(outcomes[1].publish, PublishOutcome::Unchanged);
    assert_eq!(outcomes[2].in_zone, 0);
    assert!(matches!(outcomes[2].publish, PublishOutcome::Published(e) if e.count == 0));
    for outcome in &outcomes[3..] {
        assert_eq!(outcome.in_zone, 0);
        assert_eq!(outcome.publish, PublishOutcome::Unchanged);
    }

    // The first identity ages out at frame 33, the second at frame 34, and the
    // weak detection on frame 34 never becomes a track.
    assert_eq!(outcomes[31].tracked, 2);
    assert_eq!(outcomes[32].tracked, 1);
    assert_eq!(outcomes[33].tracked, 0);
}

#[test]
fn no_two_consecutive_events_share_a_count() {
    let mut script = Vec::new();
    for round in 0..20 {
        if round % 3 == 0 {
            script.push(vec![inside(0.9), Detection::person(420.0, 150.0, 600.0, 650.0, 0.9)]);
        } else if round % 3 == 1 {
            script.push(vec![inside(0.9)]);
        } else {
            script.push(vec![outside(0.9)]);
        }
    }
    let sink = MemorySink::new();
    let mut pipeline = Pipeline::new(
        ScriptedSource::frames(script.len()),
        ScriptedBackend::new(script),
        sink.clone(),
        left_half_zone(),
        pipeline_config(TrackerConfig::default()),
    );
    pipeline.run(&AtomicBool::new(false)).unwrap();

    let counts = sink.counts();
    assert!(!counts.is_empty());
    assert!(counts.windows(2).all(|w| w[0] != w[1]));
}

/// Records the tracker IDs seen on every rendered frame.
#[derive(Clone, Default)]
struct RecordingRenderer {
    frames: Arc<Mutex<Vec<Vec<TrackerId>>>>,
}

impl FrameRenderer for RecordingRenderer {
    fn render(
        &mut self,
        _frame: &RawFrame,
        snapshot: &[TrackedObject],
        _membership: &[(TrackerId, bool)],
    ) {
        let ids = snapshot.iter().map(|t| t.id).collect();
        self.frames.lock().unwrap().push(ids);
    }
}

#[test]
fn skipped_frames_do_not_age_tracks() {
    let tracker = TrackerConfig {
        lost_track_buffer: 2,
        ..TrackerConfig::default()
    };
    let mut steps = vec![Some(())];
    steps.extend(std::iter::repeat(None).take(5));
    steps.push(Some(()));

    let sink = MemorySink::new();
    let renderer = RecordingRenderer::default();
    let mut pipeline = Pipeline::new(
        ScriptedSource::with_steps(steps),
        ScriptedBackend::new(vec![vec![inside(0.9)], vec![inside(0.9)]]),
        sink.clone(),
        left_half_zone(),
        pipeline_config(tracker),
    )
    .with_renderer(Box::new(renderer.clone()));
    let stats = pipeline.run(&AtomicBool::new(false)).unwrap();

    assert_eq!(stats.frames_processed, 2);
    assert_eq!(stats.frames_skipped, 5);
    assert_eq!(sink.counts(), vec![1]);

    let frames = renderer.frames.lock().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], frames[1]);
    assert_eq!(frames[1].len(), 1);
}

#[test]
fn failed_publish_is_retried_on_next_frame() {
    let sink = MemorySink::new();
    sink.fail_next(1, PublishError::Disconnected);

    let mut pipeline = Pipeline::new(
        ScriptedSource::frames(3),
        ScriptedBackend::new(vec![vec![inside(0.9)]; 4]),
        sink.clone(),
        left_half_zone(),
        pipeline_config(TrackerConfig::default()),
    )
    .with_clock(fixed_clock);

    let frame = RawFrame::new(Vec::new(), 1280, 720, 1);
    let first = pipeline.process_frame(&frame).unwrap();
    assert_eq!(first.publish, PublishOutcome::Failed(PublishError::Disconnected));
    assert_eq!(pipeline.state().last_reported(), None);

    let stats = pipeline.run(&AtomicBool::new(false)).unwrap();
    assert_eq!(sink.counts(), vec![1]);
    assert_eq!(stats.publish_failures, 1);
    assert_eq!(stats.events_published, 1);
    assert_eq!(pipeline.state().last_reported(), Some(1));
}

struct FlakyBackend {
    inner: ScriptedBackend,
    calls: u64,
    fail_on: u64,
}

impl DetectorBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<Detection>> {
        self.calls += 1;
        if self.calls == self.fail_on {
            return Err(anyhow!("inference timed out"));
        }
        self.inner.detect(frame)
    }
}

#[test]
fn detector_failure_skips_frame_without_touching_state() {
    let sink = MemorySink::new();
    let backend = FlakyBackend {
        inner: ScriptedBackend::new(vec![vec![inside(0.9)], vec![inside(0.9)]]),
        calls: 0,
        fail_on: 2,
    };
    let mut pipeline = Pipeline::new(
        ScriptedSource::frames(3),
        backend,
        sink.clone(),
        left_half_zone(),
        pipeline_config(TrackerConfig {
            lost_track_buffer: 0,
            ..TrackerConfig::default()
        }),
    );
    let stats = pipeline.run(&AtomicBool::new(false)).unwrap();

    // With a zero lost buffer, one phantom empty frame would have retired the
    // track and produced a 0 event followed by a second 1 event.
    assert_eq!(stats.frames_skipped, 1);
    assert_eq!(stats.frames_processed, 2);
    assert_eq!(sink.counts(), vec![1]);
}

#[test]
fn synthetic_walker_enters_then_leaves() {
    let settings = SourceSettings {
        url: "stub://walker?frames=200".to_string(),
        target_fps: 0,
        width: 320,
        height: 180,
    };
    let mut source = VideoSource::new(&settings).unwrap();
    source.connect().unwrap();

    let sink = MemorySink::new();
    let mut pipeline = Pipeline::new(
        source,
        StubBackend::new(),
        sink.clone(),
        Zone::from_settings(&ZoneSettings::default(), 320, 180).unwrap(),
        pipeline_config(TrackerConfig::default()),
    );
    let stats = pipeline.run(&AtomicBool::new(false)).unwrap();

    assert_eq!(stats.frames_processed, 200);
    assert_eq!(sink.counts(), vec![1, 0]);
}
